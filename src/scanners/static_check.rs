use super::{read_capped, Scanner};
use crate::model::RepoItem;
use anyhow::Result;
use regex::Regex;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::OnceLock;

fn todo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(TODO|FIXME|XXX)\b").unwrap())
}
fn bare_except_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*except\s*:\s*$").unwrap())
}

/// Lightweight heuristic checks: TODO/FIXME markers and Python bare-`except:`
/// clauses, one record per file with ≥1 finding.
pub struct StaticCheckScanner;

impl Scanner for StaticCheckScanner {
    fn name(&self) -> &'static str {
        "static_check"
    }

    fn scan(&self, _root: &Path, items: &[RepoItem]) -> Result<Vec<Value>> {
        let mut records = vec![];
        let mut total_findings = 0u64;

        for item in items {
            let Some(text) = read_capped(&item.abs_path, item.bytes) else {
                continue;
            };
            let todos = todo_re().find_iter(&text).count() as u64;
            let bare_excepts = if item.rel_path.ends_with(".py") {
                bare_except_re().find_iter(&text).count() as u64
            } else {
                0
            };
            if todos == 0 && bare_excepts == 0 {
                continue;
            }
            total_findings += todos + bare_excepts;
            records.push(json!({
                "kind": "static_check.file",
                "path": item.rel_path,
                "todo_markers": todos,
                "bare_excepts": bare_excepts,
            }));
        }

        records.push(json!({
            "kind": "static_check.summary",
            "files": records.len() as u64,
            "total_findings": total_findings,
        }));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_todo_markers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "# TODO: fix this\ntry:\n    pass\nexcept:\n    pass\n").unwrap();
        let item = RepoItem { abs_path: dir.path().join("a.py"), rel_path: "a.py".into(), bytes: 10 };
        let records = StaticCheckScanner.scan(dir.path(), &[item]).unwrap();
        assert_eq!(records[0]["todo_markers"], 1);
        assert_eq!(records[0]["bare_excepts"], 1);
    }
}
