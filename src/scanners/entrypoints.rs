use super::{read_capped, Scanner};
use crate::model::RepoItem;
use anyhow::Result;
use serde_json::{json, Value};
use std::path::Path;

/// Detects run/CLI entrypoints: Python `if __name__ == "__main__"` guards,
/// Rust `[[bin]]` targets (via `Cargo.toml`), and `package.json` `"bin"` maps.
pub struct EntrypointsScanner;

fn python_entrypoints(item: &RepoItem, text: &str, out: &mut Vec<Value>) {
    if text.contains("__name__") && text.contains("__main__") {
        out.push(json!({
            "kind": "entrypoints.item",
            "path": item.rel_path,
            "entry_kind": "python_main",
        }));
    }
}

fn cargo_entrypoints(item: &RepoItem, text: &str, out: &mut Vec<Value>) {
    if let Ok(value) = toml::from_str::<toml::Value>(text) {
        if let Some(bins) = value.get("bin").and_then(|b| b.as_array()) {
            for bin in bins {
                if let Some(name) = bin.get("name").and_then(|n| n.as_str()) {
                    out.push(json!({
                        "kind": "entrypoints.item",
                        "path": item.rel_path,
                        "entry_kind": "cargo_bin",
                        "name": name,
                    }));
                }
            }
        }
        if value.get("package").is_some() && value.get("lib").is_none() {
            // a [package] with a src/main.rs convention also counts, but we only
            // record explicit [[bin]] tables here to avoid guessing paths.
        }
    }
}

fn package_json_entrypoints(item: &RepoItem, text: &str, out: &mut Vec<Value>) {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        match value.get("bin") {
            Some(serde_json::Value::String(s)) => {
                out.push(json!({
                    "kind": "entrypoints.item",
                    "path": item.rel_path,
                    "entry_kind": "npm_bin",
                    "name": Value::Null,
                    "target": s,
                }));
            }
            Some(serde_json::Value::Object(map)) => {
                for (name, target) in map {
                    out.push(json!({
                        "kind": "entrypoints.item",
                        "path": item.rel_path,
                        "entry_kind": "npm_bin",
                        "name": name,
                        "target": target,
                    }));
                }
            }
            _ => {}
        }
    }
}

impl Scanner for EntrypointsScanner {
    fn name(&self) -> &'static str {
        "entrypoints"
    }

    fn scan(&self, _root: &Path, items: &[RepoItem]) -> Result<Vec<Value>> {
        let mut records = vec![];
        for item in items {
            let Some(text) = read_capped(&item.abs_path, item.bytes) else {
                continue;
            };
            if item.rel_path.ends_with(".py") {
                python_entrypoints(item, &text, &mut records);
            } else if item.rel_path.ends_with("Cargo.toml") {
                cargo_entrypoints(item, &text, &mut records);
            } else if item.rel_path.ends_with("package.json") {
                package_json_entrypoints(item, &text, &mut records);
            }
        }
        let items_count = records.len() as u64;
        let top_items: Vec<Value> = records.iter().take(5).cloned().collect();
        records.push(json!({
            "kind": "entrypoints.summary",
            "files": items_count,
            "items": top_items,
        }));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_python_main_guard() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run.py"), "if __name__ == '__main__':\n    pass\n").unwrap();
        let item = RepoItem { abs_path: dir.path().join("run.py"), rel_path: "run.py".into(), bytes: 10 };
        let records = EntrypointsScanner.scan(dir.path(), &[item]).unwrap();
        assert_eq!(records[0]["entry_kind"], "python_main");
    }
}
