use super::Scanner;
use crate::model::RepoItem;
use anyhow::Result;
use serde_json::{json, Value};
use std::path::Path;

/// Parses a `CODEOWNERS` file (GitHub/GitLab convention: `path_pattern owner1
/// owner2 ...` per line, `#` comments) into per-pattern ownership records.
pub struct OwnersScanner;

fn find_codeowners(root: &Path) -> Option<std::path::PathBuf> {
    for candidate in [
        "CODEOWNERS",
        ".github/CODEOWNERS",
        "docs/CODEOWNERS",
        ".gitlab/CODEOWNERS",
    ] {
        let p = root.join(candidate);
        if p.is_file() {
            return Some(p);
        }
    }
    None
}

impl Scanner for OwnersScanner {
    fn name(&self) -> &'static str {
        "owners"
    }

    fn scan(&self, root: &Path, _items: &[RepoItem]) -> Result<Vec<Value>> {
        let mut records = vec![];
        let mut rules = 0u64;

        if let Some(path) = find_codeowners(root) {
            if let Ok(text) = std::fs::read_to_string(&path) {
                for line in text.lines() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    let mut parts = line.split_whitespace();
                    let Some(pattern) = parts.next() else { continue };
                    let owners: Vec<&str> = parts.collect();
                    rules += 1;
                    records.push(json!({
                        "kind": "owners.rule",
                        "pattern": pattern,
                        "owners": owners,
                    }));
                }
            }
        }

        records.push(json!({
            "kind": "owners.summary",
            "files": rules,
            "has_codeowners": rules > 0,
        }));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_codeowners_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("CODEOWNERS"),
            "# comment\n*.rs @rustacean\n/docs/ @writer\n",
        )
        .unwrap();
        let records = OwnersScanner.scan(dir.path(), &[]).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["pattern"], "*.rs");
    }
}
