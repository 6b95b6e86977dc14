use super::{read_capped, Scanner};
use crate::model::RepoItem;
use anyhow::Result;
use regex::Regex;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::OnceLock;

fn statement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)\b(SELECT|INSERT\s+INTO|UPDATE|DELETE\s+FROM|CREATE\s+TABLE)\b").unwrap()
    })
}
fn table_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)\b(?:FROM|INTO|UPDATE|TABLE)\s+[`\"\[]?([A-Za-z_][A-Za-z0-9_]*)").unwrap()
    })
}

/// Regex-based inventory of embedded SQL statements and referenced tables
/// across source and `.sql` files.
pub struct SqlScanner;

impl Scanner for SqlScanner {
    fn name(&self) -> &'static str {
        "sql"
    }

    fn scan(&self, _root: &Path, items: &[RepoItem]) -> Result<Vec<Value>> {
        let mut records = vec![];
        let mut edges = 0u64;

        for item in items {
            let Some(text) = read_capped(&item.abs_path, item.bytes) else {
                continue;
            };
            let statements = statement_re().find_iter(&text).count() as u64;
            if statements == 0 {
                continue;
            }
            let tables: Vec<String> = {
                let mut t: Vec<String> = table_re()
                    .captures_iter(&text)
                    .map(|c| c[1].to_string())
                    .collect();
                t.sort();
                t.dedup();
                t
            };
            edges += tables.len() as u64;
            records.push(json!({
                "kind": "sql.file",
                "path": item.rel_path,
                "statements": statements,
                "tables": tables,
            }));
        }

        records.push(json!({
            "kind": "sql.summary",
            "files": records.len() as u64,
            "edges": edges,
        }));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_sql_statements_and_tables() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("q.py"), "q = 'SELECT * FROM users WHERE id=1'\n").unwrap();
        let item = RepoItem { abs_path: dir.path().join("q.py"), rel_path: "q.py".into(), bytes: 10 };
        let records = SqlScanner.scan(dir.path(), &[item]).unwrap();
        assert_eq!(records[0]["tables"], json!(["users"]));
    }
}
