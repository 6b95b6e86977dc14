use crate::config::PackagerConfig;
use crate::model::{
    artifact_record, b64, map_path, normalize_prefix, now_rfc3339, sha256_hex, ManifestHeader,
    ModesFlag, PathMode, RepoItem,
};
use crate::python_index::{self, IndexOutput};
use crate::quality;
use crate::scanners::{self, Scanner};
use crate::writer::ManifestWriter;
use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Instant;

/// Counts and timings surfaced to the orchestrator for `run_events.jsonl` and
/// the handoff's `highlights` section.
#[derive(Debug, Default)]
pub struct AssembleSummary {
    pub files: u64,
    pub modules: u64,
    pub edges: u64,
    pub metrics: u64,
    pub scanner_counts: BTreeMap<String, u64>,
}

/// Rewrites path-bearing fields of a scanner/graph record into the active
/// path mode. Shared with the Path Rewriter (C6), which applies the same
/// transform when deriving a second manifest variant from an already-written
/// one.
pub fn rewrite_record_paths(value: &Value, mode: PathMode, prefix: &str) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };
    let mut out = Map::new();
    for (k, v) in map {
        let rewritten = match (k.as_str(), v) {
            ("path" | "src_path" | "dst_path" | "caller_path" | "callee_path", Value::String(s)) => {
                Value::String(map_path(mode, prefix, s))
            }
            ("examples", Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => Value::String(map_path(mode, prefix, s)),
                        other => other.clone(),
                    })
                    .collect(),
            ),
            (_, other) => other.clone(),
        };
        out.insert(k.clone(), rewritten);
    }
    Value::Object(out)
}

/// Orchestrates C1–C4: writes the header, per-file content records, Python
/// module/quality/edge records, and the fixed scanner suite, into a fresh
/// monolithic manifest at `out_path`.
///
/// `[SUPPLEMENT]` Standard-artifact records (spec.md §4.5 step 8) referencing
/// sibling files produced by later pipeline stages (parts, sums, run-spec,
/// handoff) are forward references: this function has not yet run the
/// chunker or handoff writer, so those files' sizes are genuinely unknown at
/// this point. Rather than guess, a single `manifest.parts_index` artifact
/// record is emitted (its filename is known from config); per-part
/// enumeration lives in the parts-index JSON the chunker produces after the
/// monolith is finalized (documented in DESIGN.md).
pub fn assemble(
    cfg: &PackagerConfig,
    items: &[RepoItem],
    root: &std::path::Path,
    path_mode: PathMode,
    out_path: &std::path::Path,
) -> Result<AssembleSummary> {
    let total_start = Instant::now();
    let prefix = normalize_prefix(&cfg.emitted_prefix);
    let writer = ManifestWriter::new(out_path)?;

    let header = ManifestHeader {
        kind: "manifest.header",
        manifest_version: 1,
        generated_at: now_rfc3339(),
        source_root: cfg.source_root.display().to_string(),
        include_globs: cfg.include_globs.clone(),
        exclude_globs: cfg.exclude_globs.clone(),
        segment_excludes: cfg.segment_excludes.clone(),
        case_insensitive: cfg.case_insensitive,
        follow_symlinks: cfg.follow_symlinks,
        modes: ModesFlag {
            local: path_mode == PathMode::Local,
            remote: path_mode == PathMode::Remote,
        },
        tool_versions: json!({"packager": env!("CARGO_PKG_VERSION")}),
    };
    writer.ensure_header(&serde_json::to_value(&header)?)?;

    writer.append_record(&json!({
        "kind": "dir",
        "path": map_path(path_mode, &prefix, ""),
    }))?;

    let mut summary = AssembleSummary::default();
    for item in items {
        emit_file_records(&writer, cfg, item, path_mode, &prefix)?;
        summary.files += 1;
    }

    let index_start = Instant::now();
    let mut edges: Vec<Value> = vec![];
    let mut quality_ms_total = 0u128;
    for item in items.iter().filter(|i| i.rel_path.ends_with(".py")) {
        match python_index::index_file(&item.abs_path, &item.rel_path, cfg.emit_ast) {
            Ok(IndexOutput { module_record, import_edges, ast_extras }) => {
                let mapped = rewrite_record_paths(&module_record, path_mode, &prefix);
                writer.append_record(&mapped)?;
                summary.modules += 1;
                edges.extend(import_edges);
                for extra in ast_extras {
                    writer.append_record(&rewrite_record_paths(&extra, path_mode, &prefix))?;
                }
            }
            Err(e) => {
                eprintln!(
                    "[packager] WARN: python indexer failed on {}: {e}",
                    item.rel_path
                );
            }
        }

        let q_start = Instant::now();
        let metric = quality::quality_for_python(&item.abs_path, &item.rel_path);
        writer.append_record(&rewrite_record_paths(&metric, path_mode, &prefix))?;
        summary.metrics += 1;
        quality_ms_total += q_start.elapsed().as_millis();
    }
    let index_ms = index_start.elapsed().as_millis() - quality_ms_total;

    let graph_start = Instant::now();
    let coalesced = coalesce_edges(edges);
    summary.edges = coalesced.len() as u64;
    for edge in &coalesced {
        writer.append_record(&rewrite_record_paths(edge, path_mode, &prefix))?;
    }
    let graph_ms = graph_start.elapsed().as_millis();

    // Scanners are pure and read-only (spec.md §9 "cyclic analyzer
    // dependencies: none by design"), so they fan out across a bounded pool
    // (spec.md §5: min(cpu_count, 8)) and are buffered per scanner; the
    // writer itself stays single-owner, flushing results back in the fixed
    // scanner order once every scanner has finished.
    let scan_start = Instant::now();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).min(8))
        .build()
        .context("building scanner thread pool")?;
    let all = scanners::all_scanners();
    let results: Vec<(&str, Result<Vec<Value>>)> = pool.install(|| {
        use rayon::prelude::*;
        all.par_iter()
            .map(|scanner| (scanner.name(), scanner.scan(root, items)))
            .collect()
    });
    for (name, result) in results {
        match result {
            Ok(records) => {
                summary.scanner_counts.insert(name.to_string(), records.len() as u64);
                for record in records {
                    writer.append_record(&rewrite_record_paths(&record, path_mode, &prefix))?;
                }
            }
            Err(e) => {
                eprintln!("[packager] WARN: scanner '{name}' failed: {e}");
            }
        }
    }
    let scan_ms = scan_start.elapsed().as_millis();

    emit_standard_artifacts(&writer, cfg)?;

    let mut counts = Map::new();
    counts.insert("files".into(), json!(summary.files));
    counts.insert("modules".into(), json!(summary.modules));
    counts.insert("edges".into(), json!(summary.edges));
    counts.insert("metrics".into(), json!(summary.metrics));
    counts.insert("artifacts".into(), json!(5));
    for (name, n) in &summary.scanner_counts {
        counts.insert(format!("wired.{name}"), json!(n));
    }

    writer.append_record(&json!({
        "kind": "bundle.summary",
        "counts": Value::Object(counts),
        "durations_ms": {
            "index_ms": index_ms,
            "quality_ms": quality_ms_total,
            "graph_ms": graph_ms,
            "scan_ms": scan_ms,
            "total_ms": total_start.elapsed().as_millis(),
        },
    }))?;

    Ok(summary)
}

fn emit_file_records(
    writer: &ManifestWriter,
    cfg: &PackagerConfig,
    item: &RepoItem,
    path_mode: PathMode,
    prefix: &str,
) -> Result<()> {
    let mapped_path = map_path(path_mode, prefix, &item.rel_path);

    if item.bytes > crate::config::ABSOLUTE_MAX_FILE_BYTES {
        let bytes = std::fs::read(&item.abs_path)
            .with_context(|| format!("reading oversized file {}", item.abs_path.display()))?;
        writer.append_record(&json!({
            "kind": "file",
            "path": mapped_path,
            "sha256": sha256_hex(&bytes),
            "size": bytes.len(),
            "notes": ["truncated"],
        }))?;
        return Ok(());
    }

    let bytes = std::fs::read(&item.abs_path)
        .with_context(|| format!("reading {}", item.abs_path.display()))?;
    let file_sha = sha256_hex(&bytes);
    let split_bytes = cfg.transport.split_bytes;

    if !cfg.transport.chunk_policy.should_chunk(bytes.len() as u64, split_bytes) {
        writer.append_record(&json!({
            "kind": "file",
            "path": mapped_path,
            "content_b64": b64(&bytes),
            "sha256": file_sha,
        }))?;
        return Ok(());
    }

    let chunk_size = split_bytes.max(1) as usize;
    let chunks: Vec<&[u8]> = bytes.chunks(chunk_size).collect();
    let chunks_total = chunks.len();
    let mut byte_start = 0usize;
    for (idx, chunk) in chunks.into_iter().enumerate() {
        let byte_end = byte_start + chunk.len();
        writer.append_record(&json!({
            "kind": "file_chunk",
            "path": mapped_path,
            "chunk_index": idx,
            "chunks_total": chunks_total,
            "byte_start": byte_start,
            "byte_end": byte_end,
            "content_b64": b64(chunk),
            "sha256_chunk": sha256_hex(chunk),
            "sha256_file": file_sha,
        }))?;
        byte_start = byte_end;
    }
    Ok(())
}

/// Dedups by `(src_path, dst_module, edge_type)` and sorts for deterministic
/// emission; running this twice on its own output is a no-op (spec.md §8 E5).
pub fn coalesce_edges(edges: Vec<Value>) -> Vec<Value> {
    let mut seen = std::collections::BTreeMap::new();
    for edge in edges {
        let key = (
            edge.get("src_path").and_then(Value::as_str).unwrap_or("").to_string(),
            edge.get("dst_module").and_then(Value::as_str).unwrap_or("").to_string(),
            edge.get("edge_type").and_then(Value::as_str).unwrap_or("import").to_string(),
        );
        seen.entry(key).or_insert(edge);
    }
    seen.into_values().collect()
}

fn emit_standard_artifacts(writer: &ManifestWriter, cfg: &PackagerConfig) -> Result<()> {
    let mp = &cfg.manifest_paths;
    writer.append_record(&artifact_record("manifest.bundle", &format!("{}.jsonl", mp.root_dir), 0))?;
    writer.append_record(&artifact_record("manifest.sums", &mp.checksums_filename, 0))?;
    writer.append_record(&artifact_record("manifest.parts_index", &mp.parts_index_filename, 0))?;
    writer.append_record(&artifact_record("run.spec", &mp.runspec_filename, 0))?;
    writer.append_record(&artifact_record("guide.handoff", &mp.handoff_filename, 0))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn item(dir: &std::path::Path, rel: &str, content: &str) -> RepoItem {
        let abs = dir.join(rel);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&abs, content).unwrap();
        RepoItem { abs_path: abs, rel_path: rel.to_string(), bytes: content.len() as u64 }
    }

    #[test]
    fn e1_two_python_files_header_dir_files_modules_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = PackagerConfig::default();
        cfg.emitted_prefix = "src/".to_string();
        cfg.transport.chunk_policy = crate::config::ChunkPolicy::Never;

        let items = vec![
            item(dir.path(), "a.py", "print(1)\n"),
            item(dir.path(), "b/__init__.py", ""),
        ];

        let out_path = dir.path().join("design_manifest.jsonl");
        let summary = assemble(&cfg, &items, dir.path(), PathMode::Local, &out_path).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.modules, 2);

        let text = fs::read_to_string(&out_path).unwrap();
        let lines: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        println!("first 4 kinds: {:?}", lines.iter().take(4).map(|l| &l["kind"]).collect::<Vec<_>>());

        assert_eq!(lines[0]["kind"], "manifest.header");
        assert_eq!(lines[1]["kind"], "dir");
        assert_eq!(lines[1]["path"], "src/");

        let file_records: Vec<&Value> = lines.iter().filter(|l| l["kind"] == "file").collect();
        assert_eq!(file_records.len(), 2);
        assert_eq!(file_records[0]["path"], "src/a.py");
        assert_eq!(file_records[1]["path"], "src/b/__init__.py");

        let module_records: Vec<&Value> = lines.iter().filter(|l| l["kind"] == "python.module").collect();
        let modules: Vec<&str> = module_records.iter().map(|m| m["module"].as_str().unwrap()).collect();
        assert!(modules.contains(&"a"));
        assert!(modules.contains(&"b"));

        let last = lines.last().unwrap();
        assert_eq!(last["kind"], "bundle.summary");
        assert_eq!(last["counts"]["files"], 2);
    }

    #[test]
    fn edge_coalescing_is_idempotent() {
        let e = vec![
            json!({"kind":"graph.edge","edge_type":"import","src_path":"a.py","dst_module":"os"}),
            json!({"kind":"graph.edge","edge_type":"import","src_path":"a.py","dst_module":"os"}),
        ];
        let once = coalesce_edges(e.clone());
        let twice = coalesce_edges(coalesce_edges(e));
        assert_eq!(once.len(), 1);
        assert_eq!(once, twice);
    }
}
