use super::{read_capped, Scanner};
use crate::model::RepoItem;
use anyhow::Result;
use serde_json::{json, Value};
use std::path::Path;

fn from_requirements(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| {
            l.split(|c: char| "=<>!~[;".contains(c))
                .next()
                .unwrap_or(l)
                .trim()
                .to_string()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn from_package_json(text: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return vec![];
    };
    let mut out = vec![];
    for key in ["dependencies", "devDependencies"] {
        if let Some(obj) = value.get(key).and_then(|v| v.as_object()) {
            out.extend(obj.keys().cloned());
        }
    }
    out
}

fn from_cargo_toml(text: &str) -> Vec<String> {
    let Ok(value) = toml::from_str::<toml::Value>(text) else {
        return vec![];
    };
    let mut out = vec![];
    for key in ["dependencies", "dev-dependencies"] {
        if let Some(table) = value.get(key).and_then(|v| v.as_table()) {
            out.extend(table.keys().cloned());
        }
    }
    out
}

fn from_go_mod(text: &str) -> Vec<String> {
    let mut out = vec![];
    let mut in_require = false;
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with("require (") {
            in_require = true;
            continue;
        }
        if in_require && line == ")" {
            in_require = false;
            continue;
        }
        if in_require {
            if let Some(module) = line.split_whitespace().next() {
                out.push(module.to_string());
            }
        } else if let Some(rest) = line.strip_prefix("require ") {
            if let Some(module) = rest.split_whitespace().next() {
                out.push(module.to_string());
            }
        }
    }
    out
}

/// Parses well-known manifest files (`requirements.txt`, `package.json`,
/// `Cargo.toml`, `go.mod`) into a per-manifest dependency-name list.
pub struct DepsScanner;

impl Scanner for DepsScanner {
    fn name(&self) -> &'static str {
        "deps"
    }

    fn scan(&self, _root: &Path, items: &[RepoItem]) -> Result<Vec<Value>> {
        let mut records = vec![];
        let mut total_deps = 0u64;

        for item in items {
            let basename = item.rel_path.rsplit('/').next().unwrap_or(&item.rel_path);
            let (ecosystem, deps): (&str, Vec<String>) = match basename {
                "requirements.txt" => {
                    let Some(text) = read_capped(&item.abs_path, item.bytes) else { continue };
                    ("pip", from_requirements(&text))
                }
                "package.json" => {
                    let Some(text) = read_capped(&item.abs_path, item.bytes) else { continue };
                    ("npm", from_package_json(&text))
                }
                "Cargo.toml" => {
                    let Some(text) = read_capped(&item.abs_path, item.bytes) else { continue };
                    ("cargo", from_cargo_toml(&text))
                }
                "go.mod" => {
                    let Some(text) = read_capped(&item.abs_path, item.bytes) else { continue };
                    ("go", from_go_mod(&text))
                }
                _ => continue,
            };
            if deps.is_empty() {
                continue;
            }
            total_deps += deps.len() as u64;
            records.push(json!({
                "kind": "deps.manifest",
                "path": item.rel_path,
                "ecosystem": ecosystem,
                "dependencies": deps,
            }));
        }

        records.push(json!({
            "kind": "deps.summary",
            "files": records.len() as u64,
            "total_dependencies": total_deps,
        }));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_requirements_txt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("requirements.txt"),
            "# comment\nrequests==2.31.0\nnumpy>=1.20\n",
        )
        .unwrap();
        let item = RepoItem {
            abs_path: dir.path().join("requirements.txt"),
            rel_path: "requirements.txt".into(),
            bytes: 10,
        };
        let records = DepsScanner.scan(dir.path(), &[item]).unwrap();
        assert_eq!(records[0]["dependencies"], json!(["requests", "numpy"]));
    }

    #[test]
    fn parses_cargo_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"x\"\n[dependencies]\nserde = \"1.0\"\n",
        )
        .unwrap();
        let item = RepoItem {
            abs_path: dir.path().join("Cargo.toml"),
            rel_path: "Cargo.toml".into(),
            bytes: 10,
        };
        let records = DepsScanner.scan(dir.path(), &[item]).unwrap();
        assert_eq!(records[0]["dependencies"], json!(["serde"]));
    }
}
