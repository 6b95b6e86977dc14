use crate::config::PackagerConfig;
use crate::model::now_rfc3339;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

/// Writes JSON atomically: temp sibling file, then rename into place
/// (matching the original `write_json_atomic`'s tmp-then-replace contract,
/// grounded in `core/writer.py`). Sorted keys, 2-space indent, trailing
/// newline.
pub fn write_json_atomic(path: &Path, data: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating parent dir for {}", path.display()))?;
    }
    let sorted = sort_value(data);
    let payload = format!("{}\n", serde_json::to_string_pretty(&sorted)?);
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, &payload).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming {} into place", tmp.display()))?;
    Ok(())
}

fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> =
                map.iter().map(|(k, v)| (k.clone(), sort_value(v))).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

/// Builds and writes `superbundle.run.json`: the effective config snapshot,
/// transport settings, filters, fs flags, and provenance for this run.
/// Grounded in `core/writer.py`'s `Packager.run` run-spec assembly.
pub fn write_runspec(cfg: &PackagerConfig, path: &Path, local: bool, remote: bool) -> Result<()> {
    let mut filters = serde_json::Map::new();
    if !cfg.include_globs.is_empty() {
        filters.insert("include_globs".into(), json!(cfg.include_globs));
    }
    if !cfg.exclude_globs.is_empty() {
        filters.insert("exclude_globs".into(), json!(cfg.exclude_globs));
    }
    if !cfg.segment_excludes.is_empty() {
        filters.insert("segment_excludes".into(), json!(cfg.segment_excludes));
    }

    let spec = json!({
        "record_type": "superbundle.run",
        "generated_at": now_rfc3339(),
        "source_root": cfg.source_root.display().to_string(),
        "modes": {"local": local, "github": remote},
        "transport": {
            "part_stem": cfg.transport.part_stem,
            "part_ext": cfg.transport.part_ext,
            "parts_per_dir": cfg.transport.parts_per_dir,
            "split_bytes": cfg.transport.split_bytes,
            "preserve_monolith": cfg.transport.preserve_monolith,
        },
        "artifact_root": cfg.manifest_paths.root_dir,
        "filters": Value::Object(filters),
        "fs": {
            "follow_symlinks": cfg.follow_symlinks,
            "case_insensitive": cfg.case_insensitive,
        },
        "provenance": {
            "packager_version": env!("CARGO_PKG_VERSION"),
        },
        "paths": {
            "bundle": format!("{}.jsonl", cfg.manifest_paths.root_dir),
            "runspec": cfg.manifest_paths.runspec_filename,
            "guide": cfg.manifest_paths.handoff_filename,
            "sums": cfg.manifest_paths.checksums_filename,
        },
    });
    write_json_atomic(path, &spec)
}

fn read_json(path: &Path) -> Option<Value> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Builds and writes `assistant_handoff.v1.json`: a consumer-facing guide
/// pointing at the produced artifacts and selected analysis sidecars.
/// Grounded in `io/guide_writer.py`'s `GuideWriter.build`.
pub fn write_handoff(
    cfg: &PackagerConfig,
    artifact_root: &Path,
    analysis_dir: &Path,
    path: &Path,
    chunked: bool,
    monolith_available: bool,
) -> Result<()> {
    let mp = &cfg.manifest_paths;

    let mut analysis_files = serde_json::Map::new();
    for (key, filename) in &cfg.analysis_filenames {
        if analysis_dir.join(filename).exists() {
            analysis_files.insert(
                key.clone(),
                json!(format!("{}/{}", mp.analysis_subdir, filename)),
            );
        }
    }

    let card = |title: &str, key: &str, why: &str| -> Option<Value> {
        analysis_files.get(key).map(|p| json!({"title": title, "path": p, "why": why}))
    };
    let start_here: Vec<Value> = [
        card("Run & CLI", "entrypoints", "How to invoke binaries/scripts and service entrypoints."),
        card("Docs coverage", "docs", "Docstring coverage by module; identify gaps."),
        card("Complexity hotspots", "quality", "Prioritize risky modules/functions."),
        card("SQL surface", "sql", "DB schemas and queries in one place."),
        card("Repo provenance", "git", "Branch, commit, authorship if available."),
    ]
    .into_iter()
    .flatten()
    .collect();

    let idx = read_json(&analysis_dir.join(&mp.analysis_index_filename));
    let py_index = read_json(&analysis_dir.join(&mp.python_index_filename));
    let py_summary = py_index
        .as_ref()
        .and_then(|v| v.get("summary"))
        .cloned()
        .unwrap_or(Value::Null);

    let quality = cfg
        .analysis_filenames
        .get("quality")
        .and_then(|f| read_json(&analysis_dir.join(f)));
    let heavy_files_top = quality
        .as_ref()
        .and_then(|q| q.get("heavy_files_top"))
        .cloned()
        .unwrap_or_else(|| json!([]));

    let entrypoints = cfg
        .analysis_filenames
        .get("entrypoints")
        .and_then(|f| read_json(&analysis_dir.join(f)));
    let entry_items = entrypoints
        .as_ref()
        .and_then(|e| e.get("items"))
        .cloned()
        .unwrap_or_else(|| json!([]));

    let families = idx.as_ref().and_then(|v| v.get("families")).cloned();
    let secrets_count = families
        .as_ref()
        .and_then(|f| f.get("secrets"))
        .and_then(|s| s.get("count"))
        .cloned()
        .unwrap_or(json!(0));
    let license_count = families
        .as_ref()
        .and_then(|f| f.get("license"))
        .and_then(|l| l.get("count"))
        .cloned()
        .unwrap_or(json!(0));

    let data = json!({
        "record_type": "assistant_handoff.v1",
        "version": "1",
        "generated_at": now_rfc3339(),
        "artifact_root": artifact_root.display().to_string(),
        "transport": {
            "chunked": chunked,
            "part_stem": cfg.transport.part_stem,
            "part_ext": cfg.transport.part_ext,
            "parts_per_dir": cfg.transport.parts_per_dir,
            "split_bytes": cfg.transport.split_bytes,
            "preserve_monolith": cfg.transport.preserve_monolith,
        },
        "paths": {
            "guide": mp.handoff_filename,
            "runspec": mp.runspec_filename,
            "checksums": mp.checksums_filename,
            "parts_index": mp.parts_index_filename,
            "monolith": if monolith_available { Value::String(format!("{}.jsonl", mp.root_dir)) } else { Value::Null },
            "analysis_index": format!("{}/{}", mp.analysis_subdir, mp.analysis_index_filename),
        },
        "analysis_files": Value::Object(analysis_files),
        "quickstart": {
            "start_here": start_here,
        },
        "highlights": {
            "stats": py_summary,
            "top": {
                "complexity_modules": take(&heavy_files_top, 5),
                "entrypoints": take(&entry_items, 5),
            },
            "risks": {
                "secrets_findings": secrets_count,
                "license_flags": license_count,
            },
        },
        "notes": [
            "Paths are relative to artifact_root unless absolute.",
            "If preserve_monolith=false, the monolithic manifest may be empty or removed.",
        ],
    });

    write_json_atomic(path, &data)
}

fn take(value: &Value, n: usize) -> Value {
    match value.as_array() {
        Some(items) => json!(items.iter().take(n).cloned().collect::<Vec<_>>()),
        None => json!([]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_runspec_with_sorted_keys_and_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PackagerConfig::default();
        let path = dir.path().join("superbundle.run.json");
        write_runspec(&cfg, &path, true, false).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.ends_with('\n'));
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["record_type"], "superbundle.run");
        assert_eq!(value["modes"]["local"], true);
    }

    #[test]
    fn handoff_omits_quickstart_cards_for_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PackagerConfig::default();
        let analysis_dir = dir.path().join("analysis");
        fs::create_dir_all(&analysis_dir).unwrap();
        let path = dir.path().join("assistant_handoff.v1.json");

        write_handoff(&cfg, Path::new("design_manifest"), &analysis_dir, &path, true, false).unwrap();
        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        println!("handoff: {value}");
        assert_eq!(value["quickstart"]["start_here"], json!([]));
        assert!(value["paths"]["monolith"].is_null());
    }
}
