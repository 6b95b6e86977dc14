use super::Scanner;
use crate::model::RepoItem;
use anyhow::Result;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;

const TEXT_EXTS: &[&str] = &[
    "py", "rs", "js", "jsx", "ts", "tsx", "mjs", "cjs", "go", "java", "cs", "php", "rb", "c", "h",
    "cpp", "hpp", "md", "txt", "json", "yaml", "yml", "toml", "ini", "cfg", "sh", "html", "css",
    "sql", "xml", "proto",
];

fn ext_of(rel_path: &str) -> Option<&str> {
    rel_path.rsplit('/').next()?.rsplit_once('.').map(|(_, ext)| ext)
}

/// Inventories non-text (binary/asset) files by extension: images, archives,
/// fonts, and anything else not in the known source/text-extension set.
pub struct AssetsScanner;

impl Scanner for AssetsScanner {
    fn name(&self) -> &'static str {
        "assets"
    }

    fn scan(&self, _root: &Path, items: &[RepoItem]) -> Result<Vec<Value>> {
        let mut by_ext: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        let mut records = vec![];

        for item in items {
            let ext = ext_of(&item.rel_path).unwrap_or("").to_ascii_lowercase();
            if ext.is_empty() || TEXT_EXTS.contains(&ext.as_str()) {
                continue;
            }
            records.push(json!({
                "kind": "assets.file",
                "path": item.rel_path,
                "ext": ext,
                "bytes": item.bytes,
            }));
            let entry = by_ext.entry(ext).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += item.bytes;
        }

        let by_ext_summary: Vec<Value> = by_ext
            .into_iter()
            .map(|(ext, (count, bytes))| json!({"ext": ext, "count": count, "bytes": bytes}))
            .collect();

        records.push(json!({
            "kind": "assets.summary",
            "files": records.len() as u64,
            "by_ext": by_ext_summary,
        }));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_known_text_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let item = RepoItem { abs_path: dir.path().join("a.py"), rel_path: "a.py".into(), bytes: 10 };
        let records = AssetsScanner.scan(dir.path(), &[item]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["kind"], "assets.summary");
    }

    #[test]
    fn inventories_binary_asset() {
        let dir = tempfile::tempdir().unwrap();
        let item = RepoItem { abs_path: dir.path().join("logo.png"), rel_path: "logo.png".into(), bytes: 2048 };
        let records = AssetsScanner.scan(dir.path(), &[item]).unwrap();
        assert_eq!(records[0]["kind"], "assets.file");
        assert_eq!(records[0]["ext"], "png");
    }
}
