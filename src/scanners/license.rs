use super::{read_capped, Scanner};
use crate::model::RepoItem;
use anyhow::Result;
use regex::Regex;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::OnceLock;

fn spdx_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"SPDX-License-Identifier:\s*([A-Za-z0-9.\-+]+)").unwrap())
}

fn is_license_file(basename: &str) -> bool {
    let upper = basename.to_ascii_uppercase();
    upper == "LICENSE" || upper == "LICENSE.TXT" || upper == "LICENSE.MD" || upper == "COPYING"
}

/// Detects a top-level license file and per-file SPDX headers.
pub struct LicenseScanner;

impl Scanner for LicenseScanner {
    fn name(&self) -> &'static str {
        "license"
    }

    fn scan(&self, _root: &Path, items: &[RepoItem]) -> Result<Vec<Value>> {
        let mut records = vec![];
        let mut repo_license_found = false;

        for item in items {
            let basename = item.rel_path.rsplit('/').next().unwrap_or(&item.rel_path);
            if !item.rel_path.contains('/') && is_license_file(basename) {
                repo_license_found = true;
                records.push(json!({
                    "kind": "license.file",
                    "path": item.rel_path,
                }));
            }
        }

        let mut spdx_count = 0u64;
        for item in items {
            let Some(text) = read_capped(&item.abs_path, item.bytes) else {
                continue;
            };
            if let Some(cap) = spdx_re().captures(&text) {
                spdx_count += 1;
                records.push(json!({
                    "kind": "license.spdx",
                    "path": item.rel_path,
                    "identifier": cap[1].to_string(),
                }));
            }
        }

        records.push(json!({
            "kind": "license.summary",
            "files": records.len() as u64,
            "repo_license_found": repo_license_found,
            "spdx_headers": spdx_count,
        }));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_top_level_license_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("LICENSE"), "MIT").unwrap();
        let item = RepoItem { abs_path: dir.path().join("LICENSE"), rel_path: "LICENSE".into(), bytes: 3 };
        let records = LicenseScanner.scan(dir.path(), &[item]).unwrap();
        assert_eq!(records[0]["kind"], "license.file");
    }
}
