use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Hard safety ceiling: files larger than this are always treated as oversized
/// regardless of config, and recorded with a `notes: ["truncated"]` marker.
pub const ABSOLUTE_MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagerConfig {
    pub source_root: PathBuf,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub segment_excludes: Vec<String>,
    pub emitted_prefix: String,
    pub follow_symlinks: bool,
    pub case_insensitive: bool,
    pub publish_analysis: bool,
    pub emit_ast: bool,
    pub publish: PublishConfig,
    pub transport: TransportConfig,
    pub manifest_paths: ManifestPathsConfig,
    pub analysis_filenames: BTreeMap<String, String>,
    pub secrets: SecretsConfig,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from("."),
            include_globs: vec!["**/*".to_string()],
            exclude_globs: vec![],
            segment_excludes: vec![
                ".git".into(),
                "node_modules".into(),
                "target".into(),
                "dist".into(),
                "build".into(),
                ".venv".into(),
                "__pycache__".into(),
            ],
            emitted_prefix: "output/patch_code_bundles/".to_string(),
            follow_symlinks: true,
            case_insensitive: true,
            publish_analysis: true,
            emit_ast: false,
            publish: PublishConfig::default(),
            transport: TransportConfig::default(),
            manifest_paths: ManifestPathsConfig::default(),
            analysis_filenames: default_analysis_filenames(),
            secrets: SecretsConfig::default(),
        }
    }
}

fn default_analysis_filenames() -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    m.insert("docs".into(), "docs_coverage.json".into());
    m.insert("quality".into(), "quality.json".into());
    m.insert("entrypoints".into(), "entrypoints.json".into());
    m.insert("sql".into(), "sql_index.json".into());
    m.insert("git".into(), "git_info.json".into());
    m.insert("ast_symbols".into(), "ast_symbols.json".into());
    m.insert("ast_imports".into(), "ast_imports.json".into());
    m
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub mode: PublishMode,
    pub publish_codebase: bool,
    pub publish_handoff: bool,
    pub publish_transport: bool,
    pub clean_repo_root: bool,
    pub clean_before_publish: bool,
    pub github: GitHubConfig,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            mode: PublishMode::Local,
            publish_codebase: true,
            publish_handoff: true,
            publish_transport: true,
            clean_repo_root: false,
            clean_before_publish: false,
            github: GitHubConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    Local,
    Remote,
    Both,
}

impl PublishMode {
    pub fn wants_local(self) -> bool {
        matches!(self, PublishMode::Local | PublishMode::Both)
    }
    pub fn wants_remote(self) -> bool {
        matches!(self, PublishMode::Remote | PublishMode::Both)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub base_path: String,
    pub api_base: String,
    pub timeout_secs: u64,
    pub long_timeout_secs: u64,
    pub user_agent: String,
    pub throttle_every: usize,
    pub sleep_secs: f64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            branch: "main".to_string(),
            base_path: String::new(),
            api_base: "https://api.github.com".to_string(),
            timeout_secs: 30,
            long_timeout_secs: 60,
            user_agent: "repo-packager".to_string(),
            throttle_every: 50,
            sleep_secs: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub part_stem: String,
    pub part_ext: String,
    pub parts_per_dir: usize,
    pub split_bytes: u64,
    pub preserve_monolith: bool,
    pub dir_suffix_width: usize,
    pub monolith_ext: String,
    pub parts_index_name: String,
    pub group_dirs: bool,
    pub chunk_policy: ChunkPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            part_stem: "design_manifest".to_string(),
            part_ext: ".txt".to_string(),
            parts_per_dir: 10,
            split_bytes: 150_000,
            preserve_monolith: false,
            dir_suffix_width: 2,
            monolith_ext: ".jsonl".to_string(),
            parts_index_name: "design_manifest_parts_index.json".to_string(),
            group_dirs: true,
            chunk_policy: ChunkPolicy::Auto,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkPolicy {
    Always,
    Never,
    Auto,
}

impl ChunkPolicy {
    pub fn should_chunk(self, size_bytes: u64, split_bytes: u64) -> bool {
        match self {
            ChunkPolicy::Always => true,
            ChunkPolicy::Never => false,
            ChunkPolicy::Auto => size_bytes > split_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestPathsConfig {
    pub root_dir: String,
    pub analysis_subdir: String,
    pub parts_index_filename: String,
    pub checksums_filename: String,
    pub analysis_index_filename: String,
    pub python_index_filename: String,
    pub github_checksums_filename: String,
    pub events_filename: String,
    pub runspec_filename: String,
    pub handoff_filename: String,
}

impl Default for ManifestPathsConfig {
    fn default() -> Self {
        Self {
            root_dir: "design_manifest".to_string(),
            analysis_subdir: "analysis".to_string(),
            parts_index_filename: "design_manifest_parts_index.json".to_string(),
            checksums_filename: "design_manifest.SHA256SUMS".to_string(),
            analysis_index_filename: "analysis_index.json".to_string(),
            python_index_filename: "python_index.json".to_string(),
            github_checksums_filename: "design_manifest.github.SHA256SUMS".to_string(),
            events_filename: "run_events.jsonl".to_string(),
            runspec_filename: "superbundle.run.json".to_string(),
            handoff_filename: "assistant_handoff.v1.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub github_token: Option<String>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self { github_token: None }
    }
}

/// Loads `packager.yaml` from `path`, falling back to documented defaults on
/// any read/parse failure. Fatal configuration errors (missing secrets for a
/// selected remote publish mode) are surfaced later by the orchestrator, not
/// here — the loader itself never fails.
pub fn load_config(path: &Path) -> PackagerConfig {
    let text = std::fs::read_to_string(path);
    let Ok(text) = text else {
        eprintln!(
            "[packager] WARN: no config at {}, using defaults",
            path.display()
        );
        return PackagerConfig::default();
    };
    match serde_yaml::from_str::<PackagerConfig>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!(
                "[packager] WARN: failed to parse {}: {e}, using defaults",
                path.display()
            );
            PackagerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_transport() {
        let cfg = PackagerConfig::default();
        assert_eq!(cfg.transport.split_bytes, 150_000);
        assert!(!cfg.transport.preserve_monolith);
        assert_eq!(cfg.publish.mode, PublishMode::Local);
    }

    #[test]
    fn load_config_falls_back_on_missing_file() {
        let cfg = load_config(Path::new("/nonexistent/packager.yaml"));
        assert_eq!(cfg.transport.part_stem, "design_manifest");
    }

    #[test]
    fn load_config_parses_yaml_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packager.yaml");
        std::fs::write(
            &path,
            "emitted_prefix: \"custom/\"\ntransport:\n  split_bytes: 1000\n",
        )
        .unwrap();
        let cfg = load_config(&path);
        assert_eq!(cfg.emitted_prefix, "custom/");
        assert_eq!(cfg.transport.split_bytes, 1000);
        println!("parsed cfg: {cfg:?}");
    }

    #[test]
    fn chunk_policy_auto_respects_threshold() {
        assert!(ChunkPolicy::Auto.should_chunk(200, 100));
        assert!(!ChunkPolicy::Auto.should_chunk(50, 100));
        assert!(ChunkPolicy::Always.should_chunk(1, 1_000_000));
        assert!(!ChunkPolicy::Never.should_chunk(1_000_000, 1));
    }
}
