use super::Scanner;
use crate::model::RepoItem;
use anyhow::Result;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Command;

fn run_git(root: &Path, args: &[&str]) -> Option<String> {
    let out = Command::new("git").arg("-C").arg(root).args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

fn is_repo(root: &Path) -> bool {
    run_git(root, &["rev-parse", "--is-inside-work-tree"]).as_deref() == Some("true")
}

fn collect_repo_info(root: &Path) -> Value {
    let head = run_git(root, &["rev-parse", "HEAD"]);
    let branch = run_git(root, &["rev-parse", "--abbrev-ref", "HEAD"]);
    let describe = run_git(root, &["describe", "--tags", "--always", "--dirty"]);
    let remotes: Vec<Value> = run_git(root, &["remote", "-v"])
        .unwrap_or_default()
        .lines()
        .filter(|l| l.ends_with("(fetch)"))
        .filter_map(|l| {
            let mut parts = l.split_whitespace();
            let name = parts.next()?;
            let url = parts.next()?;
            Some(json!({"name": name, "url": url}))
        })
        .collect();
    let status_lines = run_git(root, &["status", "--porcelain"]).unwrap_or_default();
    let dirty = !status_lines.trim().is_empty();
    let total_commits: u64 = run_git(root, &["rev-list", "--count", "HEAD"])
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let first_commit_at = run_git(root, &["rev-list", "--max-parents=0", "HEAD"])
        .and_then(|hash| run_git(root, &["show", "-s", "--format=%cI", &hash]));
    let tracked: u64 = run_git(root, &["ls-files"])
        .map(|s| s.lines().filter(|l| !l.is_empty()).count() as u64)
        .unwrap_or(0);
    let untracked: u64 = run_git(root, &["ls-files", "--others", "--exclude-standard"])
        .map(|s| s.lines().filter(|l| !l.is_empty()).count() as u64)
        .unwrap_or(0);

    json!({
        "kind": "git.repo",
        "available": true,
        "head": head,
        "branch": branch,
        "describe": describe,
        "remotes": remotes,
        "dirty": dirty,
        "total_commits": total_commits,
        "first_commit_at": first_commit_at,
        "tracked_files": tracked,
        "untracked_files": untracked,
    })
}

fn collect_gitignores(items: &[RepoItem]) -> Vec<Value> {
    let mut records = vec![];
    for item in items {
        let basename = item.rel_path.rsplit('/').next().unwrap_or(&item.rel_path);
        if basename != ".gitignore" {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(&item.abs_path) else {
            continue;
        };
        let patterns: Vec<String> = text
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| l.to_string())
            .collect();
        records.push(json!({
            "kind": "git.ignore",
            "path": item.rel_path,
            "patterns": patterns,
        }));
    }
    records
}

fn collect_submodules(items: &[RepoItem]) -> Vec<Value> {
    let Some(item) = items.iter().find(|i| i.rel_path == ".gitmodules") else {
        return vec![];
    };
    let Ok(text) = std::fs::read_to_string(&item.abs_path) else {
        return vec![];
    };

    let mut records = vec![];
    let mut name: Option<String> = None;
    let mut path: Option<String> = None;
    let mut url: Option<String> = None;

    let flush = |name: &Option<String>, path: &Option<String>, url: &Option<String>, out: &mut Vec<Value>| {
        if let Some(name) = name {
            out.push(json!({
                "kind": "git.submodule",
                "name": name,
                "path": path,
                "url": url,
            }));
        }
    };

    for line in text.lines() {
        let line = line.trim();
        if let Some(section) = line.strip_prefix("[submodule \"").and_then(|s| s.strip_suffix("\"]")) {
            flush(&name, &path, &url, &mut records);
            name = Some(section.to_string());
            path = None;
            url = None;
        } else if let Some(rest) = line.strip_prefix("path = ") {
            path = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("url = ") {
            url = Some(rest.trim().to_string());
        }
    }
    flush(&name, &path, &url, &mut records);
    records
}

/// Collects repository metadata by shelling out to `git`. Fails open: when
/// `git` is missing or the root is not a work tree, emits a single
/// `available: false` summary instead of erroring the whole run.
pub struct GitScanner;

impl Scanner for GitScanner {
    fn name(&self) -> &'static str {
        "git"
    }

    fn scan(&self, root: &Path, items: &[RepoItem]) -> Result<Vec<Value>> {
        if !is_repo(root) {
            return Ok(vec![json!({
                "kind": "git.info.summary",
                "available": false,
            })]);
        }

        let mut records = vec![collect_repo_info(root)];
        records.extend(collect_gitignores(items));
        records.extend(collect_submodules(items));

        records.push(json!({
            "kind": "git.info.summary",
            "available": true,
            "ignore_files": records.iter().filter(|r| r["kind"] == "git.ignore").count() as u64,
            "submodules": records.iter().filter(|r| r["kind"] == "git.submodule").count() as u64,
        }));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_repo_reports_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let records = GitScanner.scan(dir.path(), &[]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["available"], false);
    }

    #[test]
    fn parses_gitignore_patterns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "# comment\ntarget/\n*.log\n").unwrap();
        let item = RepoItem {
            abs_path: dir.path().join(".gitignore"),
            rel_path: ".gitignore".into(),
            bytes: 10,
        };
        let records = collect_gitignores(&[item]);
        assert_eq!(records[0]["patterns"], json!(["target/", "*.log"]));
    }
}
