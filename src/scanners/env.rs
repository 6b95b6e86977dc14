use super::{read_capped, Scanner};
use crate::model::RepoItem;
use anyhow::Result;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r#"os\.environ(?:\.get)?\[['"]([A-Za-z_][A-Za-z0-9_]*)['"]\]"#).unwrap(),
            Regex::new(r#"os\.getenv\(\s*['"]([A-Za-z_][A-Za-z0-9_]*)['"]"#).unwrap(),
            Regex::new(r#"process\.env\.([A-Za-z_][A-Za-z0-9_]*)"#).unwrap(),
            Regex::new(r#"process\.env\[['"]([A-Za-z_][A-Za-z0-9_]*)['"]\]"#).unwrap(),
            Regex::new(r#"std::env::var\(\s*"([A-Za-z_][A-Za-z0-9_]*)""#).unwrap(),
        ]
    })
}

/// Regex-based scan for environment-variable reads across source files.
pub struct EnvScanner;

impl Scanner for EnvScanner {
    fn name(&self) -> &'static str {
        "env"
    }

    fn scan(&self, _root: &Path, items: &[RepoItem]) -> Result<Vec<Value>> {
        let mut records = vec![];
        let mut all_vars: BTreeSet<String> = BTreeSet::new();

        for item in items {
            let Some(text) = read_capped(&item.abs_path, item.bytes) else {
                continue;
            };
            let mut found: BTreeSet<String> = BTreeSet::new();
            for re in patterns() {
                for cap in re.captures_iter(&text) {
                    found.insert(cap[1].to_string());
                }
            }
            if found.is_empty() {
                continue;
            }
            for v in &found {
                all_vars.insert(v.clone());
            }
            let mut vars: Vec<_> = found.into_iter().collect();
            vars.sort();
            records.push(json!({
                "kind": "env.usage",
                "path": item.rel_path,
                "vars": vars,
            }));
        }

        records.push(json!({
            "kind": "env.summary",
            "files": records.len() as u64,
            "unique_vars": all_vars.len() as u64,
        }));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_env_var_reads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.py"),
            "import os\nTOKEN = os.environ['API_TOKEN']\nOTHER = os.getenv('OTHER_VAR')\n",
        )
        .unwrap();
        let item = RepoItem { abs_path: dir.path().join("a.py"), rel_path: "a.py".into(), bytes: 10 };
        let records = EnvScanner.scan(dir.path(), &[item]).unwrap();
        assert_eq!(records[0]["vars"], json!(["API_TOKEN", "OTHER_VAR"]));
    }
}
