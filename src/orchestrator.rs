use crate::assembler;
use crate::chunker;
use crate::config::PackagerConfig;
use crate::discovery;
use crate::handoff;
use crate::model::{now_rfc3339, PathMode, RepoItem};
use crate::publish::{local as local_publish, remote as remote_publish, PublishItem};
use crate::rewriter;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Process exit codes per spec.md §6/§7.
#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    Success,
    ConfigError,
    Interrupted,
    Unexpected,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::ConfigError => 2,
            ExitCode::Interrupted => 130,
            ExitCode::Unexpected => 1,
        }
    }
}

/// A fatal configuration problem, detected by the orchestrator's guards
/// before any phase runs. Distinguished from `anyhow::Error` so `run` can map
/// it to exit code 2 rather than the generic "unexpected" code 1.
#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}
impl std::error::Error for ConfigError {}

struct EventLog {
    path: PathBuf,
    run_id: String,
}

impl EventLog {
    fn append(&self, phase: &str, step: &str, status: &str, extra: Value) -> Result<()> {
        let mut record = json!({
            "ts": now_rfc3339(),
            "run_id": self.run_id,
            "type": "phase",
            "phase": phase,
            "step": step,
            "status": status,
        });
        if let (Value::Object(base), Value::Object(more)) = (&mut record, extra) {
            for (k, v) in more {
                base.insert(k, v);
            }
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(f, "{}", serde_json::to_string(&record)?)?;
        Ok(())
    }

    fn begin(&self, phase: &str, step: &str) -> Instant {
        let _ = self.append(phase, step, "begin", json!({}));
        Instant::now()
    }

    fn end_ok(&self, phase: &str, step: &str, start: Instant, outputs: Value) {
        let _ = self.append(
            phase,
            step,
            "end",
            json!({"status_detail": "ok", "dur_ms": start.elapsed().as_millis(), "outputs": outputs}),
        );
    }

    fn end_err(&self, phase: &str, step: &str, start: Instant, err: &anyhow::Error) {
        let _ = self.append(
            phase,
            step,
            "end",
            json!({"status_detail": "error", "dur_ms": start.elapsed().as_millis(), "error": err.to_string()}),
        );
    }
}

fn validate_config(cfg: &PackagerConfig) -> Result<(), ConfigError> {
    if cfg.publish.mode.wants_remote() {
        let gh = &cfg.publish.github;
        if gh.owner.is_empty() || gh.repo.is_empty() || gh.branch.is_empty() {
            return Err(ConfigError(
                "remote publish requires publish.github.{owner,repo,branch}".into(),
            ));
        }
        if cfg.secrets.github_token.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError(
                "remote publish requires a github token (secrets.github_token)".into(),
            ));
        }
    }
    Ok(())
}

fn artifact_root(cfg: &PackagerConfig) -> PathBuf {
    cfg.source_root.join(&cfg.manifest_paths.root_dir)
}

/// Top-level coordinator: reads config, runs C1–C10 in order for each active
/// path-mode, emits `run_events.jsonl`, and returns the process exit code.
/// Grounded in spec.md §4.11's state machine; a pipeline-phase failure aborts
/// the remaining phases of *that* mode but does not abort the sibling mode in
/// `both` (spec.md §7 propagation policy).
pub fn run(cfg: &PackagerConfig, run_id: &str) -> i32 {
    match run_inner(cfg, run_id) {
        Ok(had_failures) => {
            if had_failures {
                ExitCode::Unexpected.code()
            } else {
                ExitCode::Success.code()
            }
        }
        Err(e) => {
            if e.downcast_ref::<ConfigError>().is_some() {
                eprintln!("[packager] ConfigError: {e}");
                ExitCode::ConfigError.code()
            } else {
                eprintln!("[packager] fatal: {e:?}");
                ExitCode::Unexpected.code()
            }
        }
    }
}

fn run_inner(cfg: &PackagerConfig, run_id: &str) -> Result<bool> {
    validate_config(cfg).map_err(anyhow::Error::from)?;

    let root_dir = artifact_root(cfg);
    let events = EventLog { path: root_dir.join(&cfg.manifest_paths.events_filename), run_id: run_id.to_string() };
    let mut failed = false;

    let t = events.begin("discover", "walk");
    let items = match discover_items(cfg) {
        Ok(items) => {
            events.end_ok("discover", "walk", t, json!({"files": items.len()}));
            items
        }
        Err(e) => {
            events.end_err("discover", "walk", t, &e);
            return Err(e).context("discovery failed");
        }
    };

    let source_root = cfg
        .source_root
        .canonicalize()
        .with_context(|| format!("canonicalizing {}", cfg.source_root.display()))?;

    let local_manifest = root_dir.join(format!("{}.jsonl", cfg.manifest_paths.root_dir));
    let t = events.begin("assemble", "local");
    match assembler::assemble(cfg, &items, &source_root, PathMode::Local, &local_manifest) {
        Ok(summary) => events.end_ok(
            "assemble",
            "local",
            t,
            json!({"files": summary.files, "modules": summary.modules, "edges": summary.edges}),
        ),
        Err(e) => {
            events.end_err("assemble", "local", t, &e);
            return Err(e).context("local assembly failed");
        }
    }

    let remote_manifest = root_dir.join(format!("{}.remote.jsonl", cfg.manifest_paths.root_dir));
    if cfg.publish.mode.wants_remote() {
        let t = events.begin("rewrite", "to_remote");
        let prefix = crate::model::normalize_prefix(&cfg.emitted_prefix);
        match rewriter::rewrite_manifest(
            &local_manifest,
            &remote_manifest,
            PathMode::Local,
            PathMode::Remote,
            &prefix,
        ) {
            Ok(()) => events.end_ok("rewrite", "to_remote", t, json!({})),
            Err(e) => {
                events.end_err("rewrite", "to_remote", t, &e);
                return Err(e).context("path rewrite to remote mode failed");
            }
        }
    }

    let parts_dir = root_dir.join("parts");
    let mut local_parts_written = false;
    let mut remote_parts_written = false;

    if cfg.publish.mode.wants_local() {
        let t = events.begin("chunk", "local");
        match chunk_manifest(cfg, &local_manifest, &parts_dir, &root_dir) {
            Ok(n) => {
                local_parts_written = true;
                events.end_ok("chunk", "local", t, json!({"parts": n}));
            }
            Err(e) => {
                events.end_err("chunk", "local", t, &e);
                failed = true;
            }
        }
    }
    if cfg.publish.mode.wants_remote() {
        let t = events.begin("chunk", "remote");
        let remote_parts_dir = root_dir.join("parts_remote");
        match chunk_manifest(cfg, &remote_manifest, &remote_parts_dir, &root_dir) {
            Ok(n) => {
                remote_parts_written = true;
                events.end_ok("chunk", "remote", t, json!({"parts": n}));
            }
            Err(e) => {
                events.end_err("chunk", "remote", t, &e);
                failed = true;
            }
        }
    }

    let analysis_dir = root_dir.join(&cfg.manifest_paths.analysis_subdir);
    if cfg.publish_analysis {
        let t = events.begin("emit_analysis_sidecars", "all");
        match emit_analysis_sidecars(cfg, &local_manifest, &analysis_dir) {
            Ok(families) => events.end_ok("emit_analysis_sidecars", "all", t, json!({"families": families})),
            Err(e) => {
                events.end_err("emit_analysis_sidecars", "all", t, &e);
                eprintln!("[packager] WARN: analysis sidecar emission failed: {e}");
            }
        }
    }

    let runspec_path = root_dir.join(&cfg.manifest_paths.runspec_filename);
    let handoff_path = root_dir.join(&cfg.manifest_paths.handoff_filename);
    let t = events.begin("write_handoff", "all");
    let handoff_result = (|| -> Result<()> {
        handoff::write_runspec(
            cfg,
            &runspec_path,
            cfg.publish.mode.wants_local(),
            cfg.publish.mode.wants_remote(),
        )?;
        handoff::write_handoff(
            cfg,
            &root_dir,
            &analysis_dir,
            &handoff_path,
            local_parts_written || remote_parts_written,
            cfg.transport.preserve_monolith,
        )?;
        Ok(())
    })();
    match handoff_result {
        Ok(()) => events.end_ok("write_handoff", "all", t, json!({})),
        Err(e) => {
            events.end_err("write_handoff", "all", t, &e);
            return Err(e).context("handoff/runspec writing failed");
        }
    }

    if !cfg.transport.preserve_monolith {
        let _ = fs::remove_file(&local_manifest);
        let _ = fs::remove_file(&remote_manifest);
    }

    if cfg.publish.mode.wants_local() {
        let t = events.begin("publish", "local");
        match publish_local_mirror(cfg, &root_dir, &parts_dir, &analysis_dir, &runspec_path, &handoff_path) {
            Ok(n) => events.end_ok("publish", "local", t, json!({"files": n})),
            Err(e) => {
                events.end_err("publish", "local", t, &e);
                eprintln!("[packager] ERROR: local publish failed: {e}");
                failed = true;
            }
        }
    }

    if cfg.publish.mode.wants_remote() {
        let token = cfg.secrets.github_token.clone().unwrap_or_default();
        let remote_parts_dir = root_dir.join("parts_remote");

        if cfg.publish.clean_repo_root {
            let t = events.begin("publish", "remote_clean");
            match remote_publish::clean_remote_repo(&cfg.publish.github, &token, "") {
                Ok(n) => events.end_ok("publish", "remote_clean", t, json!({"deleted": n})),
                Err(e) => {
                    events.end_err("publish", "remote_clean", t, &e);
                    eprintln!("[packager] WARN: remote pre-clean failed: {e}");
                }
            }
        }

        let t = events.begin("publish", "remote");
        match publish_remote_all(cfg, &token, &items, &remote_parts_dir, &analysis_dir, &runspec_path, &handoff_path) {
            Ok(n) => events.end_ok("publish", "remote", t, json!({"files": n})),
            Err(e) => {
                events.end_err("publish", "remote", t, &e);
                eprintln!("[packager] ERROR: remote publish failed: {e}");
                failed = true;
            }
        }

        if cfg.publish.clean_before_publish {
            let t = events.begin("prune_remote", "code_and_artifacts");
            match prune_remote(cfg, &token, &items) {
                Ok(n) => events.end_ok("prune_remote", "code_and_artifacts", t, json!({"deleted": n})),
                Err(e) => {
                    events.end_err("prune_remote", "code_and_artifacts", t, &e);
                    eprintln!("[packager] WARN: remote delta prune failed: {e}");
                }
            }
        }
    }

    Ok(failed)
}

fn discover_items(cfg: &PackagerConfig) -> Result<Vec<RepoItem>> {
    discovery::discover(cfg)
}

fn chunk_manifest(cfg: &PackagerConfig, manifest: &Path, parts_dir: &Path, root_dir: &Path) -> Result<u64> {
    let t = &cfg.transport;
    let (parts, index) = chunker::write_parts_from_jsonl(
        manifest,
        parts_dir,
        &t.part_stem,
        &t.part_ext,
        t.split_bytes,
        t.group_dirs,
        t.dir_suffix_width,
        t.parts_per_dir,
    )?;
    let index_path = parts_dir.join(&cfg.manifest_paths.parts_index_filename);
    chunker::write_parts_index_json(&index, &index_path)?;

    let monolith_bytes = fs::read(manifest).ok();
    let monolith_name = format!("{}.jsonl", t.part_stem);
    let monolith = monolith_bytes.as_deref().map(|b| (monolith_name.as_str(), b));
    let sums_path = root_dir.join(&cfg.manifest_paths.checksums_filename);
    chunker::write_sha256sums(parts_dir, &index_path, &index.parts, monolith, &sums_path)?;
    Ok(parts.len() as u64)
}

/// Groups the local manifest's records by analysis family and writes one
/// JSON sidecar per family plus an `analysis_index.json` roll-up, grounded in
/// `analysis_emitter.py`'s `emit_all`/`emit_analysis_sidecars` backfill
/// strategy (there: reads already-written manifest parts and buckets by
/// family; here: the manifest is still on disk as a single local file at
/// this point in the pipeline, so no part-reassembly is needed).
fn emit_analysis_sidecars(cfg: &PackagerConfig, manifest: &Path, analysis_dir: &Path) -> Result<usize> {
    fs::create_dir_all(analysis_dir)
        .with_context(|| format!("creating {}", analysis_dir.display()))?;
    if !manifest.exists() {
        return Ok(0);
    }
    let text = fs::read_to_string(manifest).with_context(|| format!("reading {}", manifest.display()))?;

    let mut docs = vec![];
    let mut quality = vec![];
    let mut entrypoints = vec![];
    let mut sql = vec![];
    let mut git_records = vec![];
    let mut modules = vec![];
    let mut families: std::collections::BTreeMap<String, u64> = Default::default();

    for line in text.lines() {
        let Ok(value) = serde_json::from_str::<Value>(line) else { continue };
        let kind = value.get("kind").and_then(Value::as_str).unwrap_or("");
        if kind.is_empty() {
            continue;
        }
        let family = kind.split('.').next().unwrap_or(kind).to_string();
        *families.entry(family).or_insert(0) += 1;

        match kind {
            k if k.starts_with("doc_coverage") => docs.push(value),
            "quality.metric" => quality.push(value),
            k if k.starts_with("entrypoints") => entrypoints.push(value),
            k if k.starts_with("sql.") => sql.push(value),
            k if k.starts_with("git.") => git_records.push(value),
            "python.module" => modules.push(value),
            _ => {}
        }
    }

    let mut heavy_files_top: Vec<Value> = quality
        .iter()
        .filter(|q| q.get("cyclomatic").is_some())
        .cloned()
        .collect();
    heavy_files_top.sort_by(|a, b| {
        let ca = a.get("cyclomatic").and_then(Value::as_u64).unwrap_or(0);
        let cb = b.get("cyclomatic").and_then(Value::as_u64).unwrap_or(0);
        cb.cmp(&ca)
    });
    heavy_files_top.truncate(20);

    let write = |filename: &str, value: &Value| -> Result<()> {
        handoff::write_json_atomic(&analysis_dir.join(filename), value)
    };

    if let Some(name) = cfg.analysis_filenames.get("docs") {
        write(name, &json!({"items": docs}))?;
    }
    if let Some(name) = cfg.analysis_filenames.get("quality") {
        write(name, &json!({"items": quality, "heavy_files_top": heavy_files_top}))?;
    }
    if let Some(name) = cfg.analysis_filenames.get("entrypoints") {
        write(name, &json!({"items": entrypoints}))?;
    }
    if let Some(name) = cfg.analysis_filenames.get("sql") {
        write(name, &json!({"items": sql}))?;
    }
    if let Some(name) = cfg.analysis_filenames.get("git") {
        write(name, &json!({"items": git_records}))?;
    }

    let py_summary = json!({"modules": modules.len()});
    write(&cfg.manifest_paths.python_index_filename, &json!({"summary": py_summary, "items": modules}))?;

    let families_value: Value = json!(families
        .iter()
        .map(|(k, v)| (k.clone(), json!({"count": v})))
        .collect::<serde_json::Map<_, _>>());
    write(&cfg.manifest_paths.analysis_index_filename, &json!({"families": families_value}))?;

    Ok(families.len())
}

fn publish_local_mirror(
    cfg: &PackagerConfig,
    root_dir: &Path,
    parts_dir: &Path,
    analysis_dir: &Path,
    runspec_path: &Path,
    handoff_path: &Path,
) -> Result<usize> {
    let mirror_root = root_dir.join("local_publish");
    let mut items = vec![];

    if parts_dir.exists() {
        for entry in walk_files(parts_dir)? {
            let rel = entry.strip_prefix(root_dir).unwrap_or(&entry).to_string_lossy().replace('\\', "/");
            items.push(PublishItem { local_path: entry, dest_rel: rel });
        }
    }
    if cfg.publish_analysis && analysis_dir.exists() {
        for entry in walk_files(analysis_dir)? {
            let rel = entry.strip_prefix(root_dir).unwrap_or(&entry).to_string_lossy().replace('\\', "/");
            items.push(PublishItem { local_path: entry, dest_rel: rel });
        }
    }
    if runspec_path.exists() {
        items.push(PublishItem {
            local_path: runspec_path.to_path_buf(),
            dest_rel: cfg.manifest_paths.runspec_filename.clone(),
        });
    }
    if cfg.publish.publish_handoff && handoff_path.exists() {
        items.push(PublishItem {
            local_path: handoff_path.to_path_buf(),
            dest_rel: cfg.manifest_paths.handoff_filename.clone(),
        });
    }
    let sums_path = root_dir.join(&cfg.manifest_paths.checksums_filename);
    if sums_path.exists() {
        items.push(PublishItem {
            local_path: sums_path,
            dest_rel: cfg.manifest_paths.checksums_filename.clone(),
        });
    }

    let count = items.len();
    local_publish::publish(&items, &mirror_root, cfg.publish.clean_before_publish)?;
    Ok(count)
}

fn publish_remote_all(
    cfg: &PackagerConfig,
    token: &str,
    code_items: &[RepoItem],
    remote_parts_dir: &Path,
    analysis_dir: &Path,
    runspec_path: &Path,
    handoff_path: &Path,
) -> Result<usize> {
    let mut items = vec![];

    if cfg.publish.publish_codebase {
        for item in code_items {
            items.push(PublishItem { local_path: item.abs_path.clone(), dest_rel: item.rel_path.clone() });
        }
    }

    if cfg.publish.publish_transport && remote_parts_dir.exists() {
        for entry in walk_files(remote_parts_dir)? {
            let rel = entry
                .strip_prefix(remote_parts_dir.parent().unwrap_or(remote_parts_dir))
                .unwrap_or(&entry)
                .to_string_lossy()
                .replace('\\', "/");
            items.push(PublishItem { local_path: entry, dest_rel: rel });
        }
    }
    if cfg.publish_analysis && analysis_dir.exists() {
        for entry in walk_files(analysis_dir)? {
            let rel = entry
                .strip_prefix(analysis_dir.parent().unwrap_or(analysis_dir))
                .unwrap_or(&entry)
                .to_string_lossy()
                .replace('\\', "/");
            items.push(PublishItem { local_path: entry, dest_rel: rel });
        }
    }
    if runspec_path.exists() {
        items.push(PublishItem {
            local_path: runspec_path.to_path_buf(),
            dest_rel: cfg.manifest_paths.runspec_filename.clone(),
        });
    }
    if cfg.publish.publish_handoff && handoff_path.exists() {
        items.push(PublishItem {
            local_path: handoff_path.to_path_buf(),
            dest_rel: cfg.manifest_paths.handoff_filename.clone(),
        });
    }

    let commit_prefix = "packager";
    remote_publish::publish(&cfg.publish.github, token, &items, commit_prefix)
}

fn prune_remote(cfg: &PackagerConfig, token: &str, items: &[RepoItem]) -> Result<usize> {
    let keep: BTreeSet<String> = items.iter().map(|i| i.rel_path.clone()).collect();
    let artifacts_root = &cfg.manifest_paths.root_dir;
    let code_deleted = remote_publish::prune_code_delta(
        &cfg.publish.github,
        token,
        "",
        artifacts_root,
        &keep,
    )?;

    let local_basenames: BTreeSet<String> = keep
        .iter()
        .map(|p| p.rsplit('/').next().unwrap_or(p).to_string())
        .collect();
    let artifacts_deleted = remote_publish::prune_artifacts_delta(
        &cfg.publish.github,
        token,
        artifacts_root,
        &local_basenames,
    )?;

    Ok(code_deleted + artifacts_deleted)
}

fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = vec![];
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        for entry in fs::read_dir(&d).with_context(|| format!("reading {}", d.display()))? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PublishMode;

    #[test]
    fn validate_config_rejects_remote_without_token() {
        let mut cfg = PackagerConfig::default();
        cfg.publish.mode = PublishMode::Remote;
        cfg.publish.github.owner = "o".into();
        cfg.publish.github.repo = "r".into();
        let err = validate_config(&cfg).unwrap_err();
        assert!(err.0.contains("token"));
    }

    #[test]
    fn run_local_mode_end_to_end_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "import os\n").unwrap();

        let mut cfg = PackagerConfig::default();
        cfg.source_root = dir.path().to_path_buf();
        cfg.include_globs = vec!["**/*.py".into()];
        cfg.publish.mode = PublishMode::Local;
        cfg.transport.chunk_policy = crate::config::ChunkPolicy::Never;

        let code = run(&cfg, "test-run");
        assert_eq!(code, 0, "expected success exit code");

        let root = artifact_root(&cfg);
        assert!(root.join(&cfg.manifest_paths.events_filename).exists());
        assert!(root.join(&cfg.manifest_paths.handoff_filename).exists());
        assert!(root.join("local_publish").exists());
    }
}
