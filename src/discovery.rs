use crate::config::PackagerConfig;
use crate::model::RepoItem;
use anyhow::{Context, Result};
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::path::Path;

/// Builds the glob overrides that drive C1 inclusion/exclusion: `include_globs`
/// act as whitelist patterns, `exclude_globs` and `segment_excludes` as
/// blacklist patterns (segment excludes expand to `**/{name}` + `**/{name}/**`).
fn build_overrides(cfg: &PackagerConfig, root: &Path) -> Result<Override> {
    let mut builder = OverrideBuilder::new(root);

    for pat in &cfg.include_globs {
        builder
            .add(pat)
            .with_context(|| format!("invalid include glob: {pat}"))?;
    }
    for pat in &cfg.exclude_globs {
        builder
            .add(&format!("!{pat}"))
            .with_context(|| format!("invalid exclude glob: {pat}"))?;
    }
    for seg in &cfg.segment_excludes {
        builder
            .add(&format!("!**/{seg}"))
            .with_context(|| format!("invalid segment exclude: {seg}"))?;
        builder
            .add(&format!("!**/{seg}/**"))
            .with_context(|| format!("invalid segment exclude: {seg}"))?;
    }

    builder.build().context("building glob overrides")
}

fn path_relative_to(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let posix = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    Some(posix)
}

/// Depth-first, filter-driven walk of `cfg.source_root`, yielding a
/// stable-ordered (by `rel_path`) list of discovered files. Unreadable
/// directories are logged and skipped, not fatal.
pub fn discover(cfg: &PackagerConfig) -> Result<Vec<RepoItem>> {
    let root = cfg
        .source_root
        .canonicalize()
        .with_context(|| format!("source root unreadable: {}", cfg.source_root.display()))?;

    let overrides = build_overrides(cfg, &root)?;

    let mut walker = WalkBuilder::new(&root);
    walker
        .standard_filters(true)
        // standard_filters also hides dotfiles, but scanners/git.rs needs
        // .gitignore/.gitmodules to show up as discovered items; segment_excludes
        // (".git" among them) still prunes the directories that matter.
        .hidden(false)
        .follow_links(cfg.follow_symlinks)
        .overrides(overrides);

    let mut items = Vec::new();
    for entry in walker.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                eprintln!("[packager] WARN: discovery skip: {e}");
                continue;
            }
        };
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        let abs_path = entry.path().to_path_buf();
        let Some(rel_path) = path_relative_to(&root, &abs_path) else {
            continue;
        };
        let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        items.push(RepoItem {
            abs_path,
            rel_path,
            bytes,
        });
    }

    items.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn cfg_for(root: &Path) -> PackagerConfig {
        let mut cfg = PackagerConfig::default();
        cfg.source_root = root.to_path_buf();
        cfg.include_globs = vec!["**/*.py".to_string()];
        cfg
    }

    #[test]
    fn discovers_sorted_python_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.py"), "print(2)\n").unwrap();
        fs::write(dir.path().join("a.py"), "print(1)\n").unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/__init__.py"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let cfg = cfg_for(dir.path());
        let items = discover(&cfg).unwrap();
        let rels: Vec<_> = items.iter().map(|i| i.rel_path.clone()).collect();
        assert_eq!(rels, vec!["a.py", "b.py", "pkg/__init__.py"]);
        println!("discovered: {rels:?}");
    }

    #[test]
    fn segment_excludes_prune_subtrees() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.py"), "x").unwrap();
        fs::write(dir.path().join("main.py"), "x").unwrap();

        let cfg = cfg_for(dir.path());
        let items = discover(&cfg).unwrap();
        let rels: Vec<_> = items.iter().map(|i| i.rel_path.clone()).collect();
        assert_eq!(rels, vec!["main.py"]);
    }
}
