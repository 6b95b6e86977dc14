use super::{read_capped, Scanner};
use crate::model::RepoItem;
use anyhow::Result;
use regex::Regex;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::OnceLock;

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?m)^\s*import\s+.*?\s+from\s+['"]([^'"]+)['"]"#).unwrap())
}
fn require_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap())
}

fn is_js_ts(rel_path: &str) -> bool {
    [".js", ".jsx", ".ts", ".tsx", ".mjs", ".cjs"]
        .iter()
        .any(|ext| rel_path.ends_with(ext))
}

/// Regex-based import inventory for JS/TS files (ES `import ... from`, CJS
/// `require(...)`), without a full JS parser.
pub struct JsTsScanner;

impl Scanner for JsTsScanner {
    fn name(&self) -> &'static str {
        "js_ts"
    }

    fn scan(&self, _root: &Path, items: &[RepoItem]) -> Result<Vec<Value>> {
        let mut records = vec![];
        let mut total_imports = 0u64;

        for item in items.iter().filter(|i| is_js_ts(&i.rel_path)) {
            let Some(text) = read_capped(&item.abs_path, item.bytes) else {
                continue;
            };
            let mut imports: Vec<String> = import_re()
                .captures_iter(&text)
                .map(|c| c[1].to_string())
                .chain(require_re().captures_iter(&text).map(|c| c[1].to_string()))
                .collect();
            imports.sort();
            imports.dedup();
            total_imports += imports.len() as u64;
            records.push(json!({
                "kind": "js_ts.file",
                "path": item.rel_path,
                "imports": imports,
            }));
        }

        records.push(json!({
            "kind": "js_ts.summary",
            "files": records.len() as u64,
            "total_imports": total_imports,
        }));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_es_and_cjs_imports() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.ts"),
            "import { x } from 'pkg';\nconst y = require('other');\n",
        )
        .unwrap();
        let item = RepoItem { abs_path: dir.path().join("a.ts"), rel_path: "a.ts".into(), bytes: 10 };
        let records = JsTsScanner.scan(dir.path(), &[item]).unwrap();
        assert_eq!(records[0]["imports"], json!(["other", "pkg"]));
    }
}
