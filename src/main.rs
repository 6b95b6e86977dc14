use anyhow::{Context, Result};
use clap::Parser;
use repo_packager::config::{load_config, PackagerConfig};
use repo_packager::orchestrator;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "run_pack")]
#[command(version)]
#[command(about = "Ingests a source tree and publishes a chunked JSONL design manifest with static-analysis sidecars.")]
struct Cli {
    /// Path to packager.yaml. Defaults to ./packager.yaml, falling back to
    /// built-in defaults if absent (spec.md §6 config resolution order).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Source root to package. Overrides `source_root` from config.
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,
}

fn run_id() -> String {
    format!(
        "pack-{}-{:x}",
        chrono::Utc::now().format("%Y%m%d-%H%M%S"),
        std::process::id()
    )
}

fn resolve_config(cli: &Cli) -> PackagerConfig {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("packager.yaml"));
    let mut cfg = load_config(&config_path);
    if let Some(root) = &cli.root {
        cfg.source_root = root.clone();
    }
    cfg
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = resolve_config(&cli);

    cfg.source_root
        .canonicalize()
        .with_context(|| format!("source root unreadable: {}", cfg.source_root.display()))?;

    eprintln!(
        "[packager] starting run: root={} mode={:?}",
        cfg.source_root.display(),
        cfg.publish.mode
    );

    let code = orchestrator::run(&cfg, &run_id());
    std::process::exit(code);
}
