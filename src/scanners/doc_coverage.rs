use super::Scanner;
use crate::model::RepoItem;
use anyhow::Result;
use serde_json::{json, Value};
use std::path::Path;
use tree_sitter::{Node, Parser};

#[derive(Default, Clone, Copy)]
struct Counts {
    total: u64,
    with_doc: u64,
}

impl Counts {
    fn coverage(&self) -> Value {
        if self.total == 0 {
            Value::Null
        } else {
            json!(self.with_doc as f64 / self.total as f64)
        }
    }
}

fn has_docstring(node: Node, src: &[u8]) -> bool {
    let Some(body) = node.child_by_field_name("body") else {
        return false;
    };
    let Some(first) = body.named_child(0) else {
        return false;
    };
    if first.kind() != "expression_statement" {
        return false;
    }
    let Some(expr) = first.named_child(0) else {
        return false;
    };
    if expr.kind() != "string" {
        return false;
    }
    let text = expr.utf8_text(src).unwrap_or("");
    !text.trim_matches(|c| c == '"' || c == '\'').trim().is_empty()
}

/// Module-level docstring: the first statement of the module body.
fn module_has_docstring(root: Node, src: &[u8]) -> bool {
    let Some(first) = root.named_child(0) else {
        return false;
    };
    if first.kind() != "expression_statement" {
        return false;
    }
    let Some(expr) = first.named_child(0) else {
        return false;
    };
    if expr.kind() != "string" {
        return false;
    }
    let text = expr.utf8_text(src).unwrap_or("");
    !text.trim_matches(|c| c == '"' || c == '\'').trim().is_empty()
}

fn classify(node: Node, src: &[u8], classes: &mut Counts, methods: &mut Counts, functions: &mut Counts, in_class: bool) -> bool {
    match node.kind() {
        "class_definition" => {
            classes.total += 1;
            if has_docstring(node, src) {
                classes.with_doc += 1;
            }
            if let Some(body) = node.child_by_field_name("body") {
                walk_counts(body, src, classes, methods, functions, true);
            }
            true
        }
        "function_definition" => {
            let bucket = if in_class { &mut *methods } else { &mut *functions };
            bucket.total += 1;
            if has_docstring(node, src) {
                bucket.with_doc += 1;
            }
            if let Some(body) = node.child_by_field_name("body") {
                walk_counts(body, src, classes, methods, functions, false);
            }
            true
        }
        _ => false,
    }
}

fn walk_counts(node: Node, src: &[u8], classes: &mut Counts, methods: &mut Counts, functions: &mut Counts, in_class: bool) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if classify(child, src, classes, methods, functions, in_class) {
            continue;
        }
        if child.kind() == "decorated_definition" {
            if let Some(def) = child.child_by_field_name("definition") {
                classify(def, src, classes, methods, functions, in_class);
            }
            continue;
        }
        walk_counts(child, src, classes, methods, functions, in_class);
    }
}

fn analyze_file(path: &Path, rel_path: &str) -> Value {
    let Ok(text) = std::fs::read_to_string(path) else {
        return zeroed_record(rel_path);
    };
    let mut parser = Parser::new();
    if parser.set_language(&tree_sitter_python::language()).is_err() {
        return zeroed_record(rel_path);
    }
    let Some(tree) = parser.parse(&text, None) else {
        return zeroed_record(rel_path);
    };
    let root = tree.root_node();
    let src = text.as_bytes();

    let module_doc = module_has_docstring(root, src);
    let mut classes = Counts::default();
    let mut methods = Counts::default();
    let mut functions = Counts::default();
    walk_counts(root, src, &mut classes, &mut methods, &mut functions, false);

    let documentables = 1 + classes.total + methods.total + functions.total;
    let with_doc = (module_doc as u64) + classes.with_doc + methods.with_doc + functions.with_doc;
    let overall = Counts {
        total: documentables,
        with_doc,
    };

    json!({
        "kind": "docs.coverage",
        "path": rel_path,
        "module_doc": module_doc,
        "classes": {"total": classes.total, "with_doc": classes.with_doc, "coverage": classes.coverage()},
        "methods": {"total": methods.total, "with_doc": methods.with_doc, "coverage": methods.coverage()},
        "functions": {"total": functions.total, "with_doc": functions.with_doc, "coverage": functions.coverage()},
        "overall": {"documentables": overall.total, "with_doc": overall.with_doc, "coverage": overall.coverage()},
    })
}

fn zeroed_record(rel_path: &str) -> Value {
    json!({
        "kind": "docs.coverage",
        "path": rel_path,
        "module_doc": false,
        "classes": {"total": 0, "with_doc": 0, "coverage": Value::Null},
        "methods": {"total": 0, "with_doc": 0, "coverage": Value::Null},
        "functions": {"total": 0, "with_doc": 0, "coverage": Value::Null},
        "overall": {"documentables": 1, "with_doc": 0, "coverage": 0.0},
    })
}

pub struct DocCoverageScanner;

impl Scanner for DocCoverageScanner {
    fn name(&self) -> &'static str {
        "doc_coverage"
    }

    fn scan(&self, _root: &Path, items: &[RepoItem]) -> Result<Vec<Value>> {
        let mut records = vec![];
        let mut totals = (Counts::default(), Counts::default(), Counts::default(), Counts::default());
        let mut module_totals = Counts::default();

        for item in items.iter().filter(|i| i.rel_path.ends_with(".py")) {
            let rec = analyze_file(&item.abs_path, &item.rel_path);
            module_totals.total += 1;
            if rec["module_doc"].as_bool().unwrap_or(false) {
                module_totals.with_doc += 1;
            }
            totals.0.total += rec["classes"]["total"].as_u64().unwrap_or(0);
            totals.0.with_doc += rec["classes"]["with_doc"].as_u64().unwrap_or(0);
            totals.1.total += rec["methods"]["total"].as_u64().unwrap_or(0);
            totals.1.with_doc += rec["methods"]["with_doc"].as_u64().unwrap_or(0);
            totals.2.total += rec["functions"]["total"].as_u64().unwrap_or(0);
            totals.2.with_doc += rec["functions"]["with_doc"].as_u64().unwrap_or(0);
            totals.3.total += rec["overall"]["documentables"].as_u64().unwrap_or(0);
            totals.3.with_doc += rec["overall"]["with_doc"].as_u64().unwrap_or(0);
            records.push(rec);
        }

        let files = records.len() as u64;
        records.push(json!({
            "kind": "docs.coverage.summary",
            "files": files,
            "totals": {
                "modules": {"total": module_totals.total, "with_doc": module_totals.with_doc, "coverage": module_totals.coverage()},
                "classes": {"total": totals.0.total, "with_doc": totals.0.with_doc, "coverage": totals.0.coverage()},
                "methods": {"total": totals.1.total, "with_doc": totals.1.with_doc, "coverage": totals.1.coverage()},
                "functions": {"total": totals.2.total, "with_doc": totals.2.with_doc, "coverage": totals.2.coverage()},
                "overall": {"documentables": totals.3.total, "with_doc": totals.3.with_doc, "coverage": totals.3.coverage()},
            },
        }));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_module_and_function_docstrings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        std::fs::write(
            &path,
            "\"\"\"module doc\"\"\"\ndef f():\n    \"\"\"doc\"\"\"\n    pass\n\ndef g():\n    pass\n",
        )
        .unwrap();

        let rec = analyze_file(&path, "m.py");
        println!("doc coverage record: {rec}");
        assert_eq!(rec["module_doc"], true);
        assert_eq!(rec["functions"]["total"], 2);
        assert_eq!(rec["functions"]["with_doc"], 1);
    }

    #[test]
    fn summary_counts_match_file_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f():\n    pass\n").unwrap();
        let item = RepoItem {
            abs_path: dir.path().join("a.py"),
            rel_path: "a.py".to_string(),
            bytes: 10,
        };
        let scanner = DocCoverageScanner;
        let records = scanner.scan(dir.path(), &[item]).unwrap();
        let summary = records.last().unwrap();
        assert_eq!(summary["kind"], "docs.coverage.summary");
        assert_eq!(summary["files"], 1);
    }
}
