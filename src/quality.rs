use serde_json::{json, Value};
use std::path::Path;
use tree_sitter::{Node, Parser};

/// Node kinds that increment cyclomatic complexity by one, mirroring the
/// original AST-based estimate's branching-construct set.
const COMPLEXITY_KINDS: &[&str] = &[
    "if_statement",
    "for_statement",
    "while_statement",
    "with_statement",
    "try_statement",
    "except_clause",
    "boolean_operator",
    "conditional_expression",
    "list_comprehension",
    "set_comprehension",
    "dictionary_comprehension",
    "generator_expression",
];

fn loc_sloc(text: &str) -> (u64, u64) {
    let mut loc = 0u64;
    let mut sloc = 0u64;
    for line in text.lines() {
        loc += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        sloc += 1;
    }
    (loc, sloc)
}

fn cyclomatic_complexity(node: Node) -> u64 {
    let mut score = 1u64;
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        if COMPLEXITY_KINDS.contains(&n.kind()) {
            score += 1;
        }
        let mut cursor = n.walk();
        for child in n.children(&mut cursor) {
            stack.push(child);
        }
    }
    score
}

fn function_spans(node: Node) -> Vec<u64> {
    let mut spans = vec![];
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        if n.kind() == "function_definition" {
            let start = n.start_position().row as u64;
            let end = n.end_position().row as u64;
            spans.push(end - start + 1);
        }
        let mut cursor = n.walk();
        for child in n.children(&mut cursor) {
            stack.push(child);
        }
    }
    spans
}

fn count_kind(node: Node, kind: &str) -> u64 {
    let mut count = 0u64;
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        if n.kind() == kind {
            count += 1;
        }
        let mut cursor = n.walk();
        for child in n.children(&mut cursor) {
            stack.push(child);
        }
    }
    count
}

/// Computes a `quality.metric` record for a Python file. Always returns a
/// record: unreadable files get all-zero metrics with `notes:["unreadable"]`;
/// decode errors get `notes:["decode_error"]`; parse failures still report
/// loc/sloc from the raw text with `notes:["parse_error"]`.
pub fn quality_for_python(path: &Path, rel_path: &str) -> Value {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(_) => {
            return build_metric(rel_path, 0, 0, 0, 0, 0, 0.0, Some(vec!["unreadable"]));
        }
    };

    let (loc, sloc) = loc_sloc(&text);

    let mut parser = Parser::new();
    if parser.set_language(&tree_sitter_python::language()).is_err() {
        return build_metric(rel_path, loc, sloc, 0, 0, 0, 0.0, Some(vec!["parse_error"]));
    }
    let Some(tree) = parser.parse(&text, None) else {
        return build_metric(rel_path, loc, sloc, 0, 0, 0, 0.0, Some(vec!["parse_error"]));
    };
    let root = tree.root_node();
    if root.has_error() {
        return build_metric(rel_path, loc, sloc, 0, 0, 0, 0.0, Some(vec!["parse_error"]));
    }

    let cyclo = cyclomatic_complexity(root);
    let n_functions = count_kind(root, "function_definition");
    let n_classes = count_kind(root, "class_definition");
    let spans = function_spans(root);
    let avg_fn_len = if spans.is_empty() {
        0.0
    } else {
        let sum: u64 = spans.iter().sum();
        (sum as f64 / spans.len() as f64 * 100.0).round() / 100.0
    };

    build_metric(rel_path, loc, sloc, cyclo, n_functions, n_classes, avg_fn_len, None)
}

fn build_metric(
    path: &str,
    loc: u64,
    sloc: u64,
    cyclomatic: u64,
    n_functions: u64,
    n_classes: u64,
    avg_fn_len: f64,
    notes: Option<Vec<&str>>,
) -> Value {
    json!({
        "kind": "quality.metric",
        "path": path,
        "language": "python",
        "sloc": sloc,
        "loc": loc,
        "cyclomatic": cyclomatic,
        "n_functions": n_functions,
        "n_classes": n_classes,
        "avg_fn_len": avg_fn_len,
        "notes": notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn computes_metrics_for_simple_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        fs::write(
            &path,
            "def f(x):\n    if x:\n        return 1\n    return 0\n",
        )
        .unwrap();

        let rec = quality_for_python(&path, "m.py");
        println!("quality record: {rec}");
        assert_eq!(rec["n_functions"], 1);
        assert_eq!(rec["cyclomatic"], 2);
        assert!(rec["notes"].is_null());
    }

    #[test]
    fn unreadable_file_gets_zeroed_metrics() {
        let rec = quality_for_python(Path::new("/nonexistent/file.py"), "file.py");
        assert_eq!(rec["notes"], json!(["unreadable"]));
        assert_eq!(rec["loc"], 0);
    }
}
