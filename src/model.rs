use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// A discovered file: its absolute filesystem path plus its repo-relative,
/// forward-slashed path. Never starts with `/` or `./`.
#[derive(Debug, Clone)]
pub struct RepoItem {
    pub abs_path: PathBuf,
    pub rel_path: String,
    pub bytes: u64,
}

/// Local mode prefixes every emitted path with `emitted_prefix`; remote mode
/// leaves paths repo-relative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    Local,
    Remote,
}

/// Builds a `manifest.header` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestHeader {
    pub kind: &'static str,
    pub manifest_version: u32,
    pub generated_at: String,
    pub source_root: String,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub segment_excludes: Vec<String>,
    pub case_insensitive: bool,
    pub follow_symlinks: bool,
    pub modes: ModesFlag,
    pub tool_versions: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModesFlag {
    pub local: bool,
    pub remote: bool,
}

pub fn artifact_record(artifact_kind: &str, path: &str, size: u64) -> Value {
    let mut m = Map::new();
    m.insert("kind".into(), Value::String("artifact".into()));
    m.insert("artifact_kind".into(), Value::String(artifact_kind.into()));
    m.insert("path".into(), Value::String(path.into()));
    m.insert("size".into(), Value::from(size));
    Value::Object(m)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn b64(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.encode(bytes)
}

/// `prefix + rel` in local mode (prefix is the configured, trailing-slash
/// normalized `emitted_prefix`); `rel` unchanged in remote mode.
pub fn map_path(mode: PathMode, prefix: &str, rel: &str) -> String {
    match mode {
        PathMode::Local => format!("{prefix}{rel}"),
        PathMode::Remote => rel.to_string(),
    }
}

/// Normalizes `emitted_prefix` to always carry a trailing slash (spec.md §9
/// Open Question: inconsistently enforced upstream, normalize internally).
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

/// Converts a path emitted under `from_mode` back to repo-relative, then
/// re-maps it into `to_mode`. Used by the Path Rewriter (C6) to flip an
/// already-written manifest between modes without re-running discovery.
pub fn convert_path(path: &str, from_mode: PathMode, to_mode: PathMode, prefix: &str) -> String {
    let rel = match from_mode {
        PathMode::Local => path.strip_prefix(prefix).unwrap_or(path),
        PathMode::Remote => path,
    };
    map_path(to_mode, prefix, rel)
}
