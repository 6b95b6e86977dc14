use super::PublishItem;
use crate::config::GitHubConfig;
use crate::model::b64;
use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::thread::sleep;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE_SECS: f64 = 0.5;
const BACKOFF_FACTOR: f64 = 2.0;

/// Thin wrapper around the GitHub REST API, grounded in `io/publisher.py`'s
/// `GitHubPublisher` (Contents API) and `execute/github.py` (walk/clean/prune
/// and the Git-Data batch-commit path).
pub struct GitHubClient<'a> {
    cfg: &'a GitHubConfig,
    token: String,
    commits_since_throttle: usize,
}

impl<'a> GitHubClient<'a> {
    pub fn new(cfg: &'a GitHubConfig, token: String) -> Self {
        Self { cfg, token, commits_since_throttle: 0 }
    }

    fn contents_url(&self, path: &str) -> String {
        let full = join_path(&self.cfg.base_path, path);
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.cfg.api_base, self.cfg.owner, self.cfg.repo, full
        )
    }

    fn agent(&self) -> ureq::Agent {
        ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(self.cfg.timeout_secs))
            .build()
    }

    fn auth_headers(req: ureq::Request, token: &str, ua: &str) -> ureq::Request {
        req.set("Authorization", &format!("token {token}"))
            .set("Accept", "application/vnd.github+json")
            .set("User-Agent", ua)
    }

    /// Returns `Ok(None)` on 404 (file absent), the blob SHA otherwise.
    fn get_sha(&self, path: &str) -> Result<Option<String>> {
        let url = self.contents_url(path);
        let req = Self::auth_headers(self.agent().get(&url), &self.token, &self.cfg.user_agent);
        let query = if self.cfg.branch.is_empty() {
            req
        } else {
            req.query("ref", &self.cfg.branch)
        };
        match query.call() {
            Ok(resp) => {
                let body: Value = resp.into_json().context("parsing contents response")?;
                Ok(body.get("sha").and_then(|v| v.as_str()).map(|s| s.to_string()))
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(e) => Err(anyhow!("GET {url} failed: {e}")),
        }
    }

    /// PUTs a single file via the Contents API, retrying on SHA conflicts and
    /// transient 429/5xx responses with exponential backoff. Throttles every
    /// `throttle_every` successful commits.
    pub fn put_file(&mut self, path: &str, content: &[u8], message: &str) -> Result<()> {
        let mut sha = self.get_sha(path)?;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut body = json!({
                "message": message,
                "content": b64(content),
                "branch": self.cfg.branch,
            });
            if let Some(s) = &sha {
                body["sha"] = json!(s);
            }
            let url = self.contents_url(path);
            let req = Self::auth_headers(self.agent().put(&url), &self.token, &self.cfg.user_agent)
                .set("Content-Type", "application/json; charset=utf-8");

            match req.send_json(body) {
                Ok(_) => {
                    self.throttle();
                    return Ok(());
                }
                Err(ureq::Error::Status(code, resp)) if code == 409 || code == 422 => {
                    sha = self.get_sha(path)?;
                    if attempt >= MAX_ATTEMPTS {
                        let text = resp.into_string().unwrap_or_default();
                        bail!("PUT {url} conflict after {attempt} attempts: {text}");
                    }
                    continue;
                }
                Err(ureq::Error::Status(code, _))
                    if matches!(code, 429 | 500 | 502 | 503 | 504) =>
                {
                    if attempt >= MAX_ATTEMPTS {
                        bail!("PUT {url} failed after {attempt} attempts: HTTP {code}");
                    }
                    let backoff = BACKOFF_BASE_SECS * BACKOFF_FACTOR.powi(attempt as i32 - 1);
                    eprintln!(
                        "[packager] WARN: PUT {path} got {code}, retrying in {backoff:.2}s (attempt {attempt})"
                    );
                    sleep(Duration::from_secs_f64(backoff));
                }
                Err(e) => bail!("PUT {url} failed: {e}"),
            }
        }
    }

    fn delete_file(&mut self, path: &str, sha: &str, message: &str) -> Result<()> {
        let url = self.contents_url(path);
        let body = json!({"message": message, "sha": sha, "branch": self.cfg.branch});
        let req = Self::auth_headers(self.agent().delete(&url), &self.token, &self.cfg.user_agent)
            .set("Content-Type", "application/json; charset=utf-8");
        match req.send_json(body) {
            Ok(_) => {
                self.throttle();
                Ok(())
            }
            Err(ureq::Error::Status(404, _)) => Ok(()),
            Err(e) => Err(anyhow!("DELETE {url} failed: {e}")),
        }
    }

    fn throttle(&mut self) {
        self.commits_since_throttle += 1;
        if self.cfg.throttle_every > 0 && self.commits_since_throttle % self.cfg.throttle_every == 0 {
            sleep(Duration::from_secs_f64(self.cfg.sleep_secs));
        }
    }

    /// Recursively walks the remote tree under `path`, returning `(path, sha)`
    /// pairs for every blob found. Mirrors `gh_walk_files`'s stack-based walk
    /// using repeated Contents API directory listings.
    pub fn walk_files(&self, path: &str) -> Result<Vec<(String, String)>> {
        let mut out = vec![];
        let mut stack = vec![path.to_string()];
        while let Some(dir) = stack.pop() {
            let url = self.contents_url(&dir);
            let req = Self::auth_headers(self.agent().get(&url), &self.token, &self.cfg.user_agent);
            let query = if self.cfg.branch.is_empty() { req } else { req.query("ref", &self.cfg.branch) };
            let body: Value = match query.call() {
                Ok(resp) => resp.into_json().context("parsing directory listing")?,
                Err(ureq::Error::Status(404, _)) => continue,
                Err(e) => return Err(anyhow!("GET {url} failed: {e}")),
            };
            let Some(entries) = body.as_array() else { continue };
            for entry in entries {
                let kind = entry.get("type").and_then(|v| v.as_str()).unwrap_or("");
                let entry_path = entry.get("path").and_then(|v| v.as_str()).unwrap_or("").to_string();
                match kind {
                    "dir" => stack.push(entry_path),
                    "file" => {
                        let sha = entry.get("sha").and_then(|v| v.as_str()).unwrap_or("").to_string();
                        out.push((entry_path, sha));
                    }
                    _ => {}
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

fn join_path(base: &str, rel: &str) -> String {
    let base = base.trim_matches('/');
    if base.is_empty() {
        rel.to_string()
    } else {
        format!("{base}/{rel}")
    }
}

/// Publishes `items` one-by-one via the Contents API, in the order given
/// (code files first, then artifacts — the caller is responsible for
/// ordering, matching `publish_to_github`'s candidate-building order).
pub fn publish(cfg: &GitHubConfig, token: &str, items: &[PublishItem], commit_prefix: &str) -> Result<usize> {
    let mut client = GitHubClient::new(cfg, token.to_string());
    let mut count = 0usize;
    for item in items {
        let bytes = std::fs::read(&item.local_path)
            .with_context(|| format!("reading {}", item.local_path.display()))?;
        let message = format!("{commit_prefix}: update {}", item.dest_rel);
        client.put_file(&item.dest_rel, &bytes, &message)?;
        count += 1;
    }
    Ok(count)
}

/// Deletes every remote file under `root_path` whose path isn't present in
/// `keep_dest_rels`, mirroring `github_clean_remote_repo`'s pre-clean pass.
pub fn clean_remote_repo(cfg: &GitHubConfig, token: &str, root_path: &str) -> Result<usize> {
    let mut client = GitHubClient::new(cfg, token.to_string());
    let remote = client.walk_files(root_path)?;
    let mut count = 0usize;
    for (path, sha) in remote {
        client.delete_file(&path, &sha, "packager: pre-clean remote root")?;
        count += 1;
    }
    Ok(count)
}

/// Deletes remote code files (outside the artifacts subtree) absent from the
/// locally-discovered set, honoring `managed_prefixes`/`exclude_prefixes` the
/// same way the original's `prune_remote_code_delta` filters candidates.
pub fn prune_code_delta(
    cfg: &GitHubConfig,
    token: &str,
    code_root: &str,
    artifacts_root: &str,
    keep_dest_rels: &BTreeSet<String>,
) -> Result<usize> {
    let mut client = GitHubClient::new(cfg, token.to_string());
    let remote = client.walk_files(code_root)?;
    let mut count = 0usize;
    for (path, sha) in remote {
        if path.starts_with(artifacts_root) {
            continue;
        }
        if keep_dest_rels.contains(&path) {
            continue;
        }
        client.delete_file(&path, &sha, "packager: prune stale code file")?;
        count += 1;
    }
    Ok(count)
}

/// Deletes remote artifact files whose basename has no local counterpart,
/// mirroring `prune_remote_artifacts_delta`.
pub fn prune_artifacts_delta(
    cfg: &GitHubConfig,
    token: &str,
    artifacts_root: &str,
    keep_basenames: &BTreeSet<String>,
) -> Result<usize> {
    let mut client = GitHubClient::new(cfg, token.to_string());
    let remote = client.walk_files(artifacts_root)?;
    let mut count = 0usize;
    for (path, sha) in remote {
        let basename = path.rsplit('/').next().unwrap_or(&path).to_string();
        if keep_basenames.contains(&basename) {
            continue;
        }
        client.delete_file(&path, &sha, "packager: prune stale artifact")?;
        count += 1;
    }
    Ok(count)
}

/// One entry destined for a Git-Data API blob/tree commit.
pub struct BlobEntry {
    pub dest_rel: String,
    pub content: Vec<u8>,
}

/// Batch-commits `entries` in a single commit via the Git-Data API (blob,
/// tree, commit, ref-update), grounded in
/// `publish_github_design_manifest_memory`'s memory-only path. Grouping of
/// large entry sets into multiple trees is left to the caller; this function
/// commits exactly one tree covering all given entries.
pub fn publish_memory(
    cfg: &GitHubConfig,
    token: &str,
    entries: &[BlobEntry],
    commit_message: &str,
) -> Result<String> {
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(cfg.long_timeout_secs))
        .build();
    let auth = |req: ureq::Request| -> ureq::Request {
        req.set("Authorization", &format!("token {token}"))
            .set("Accept", "application/vnd.github+json")
            .set("User-Agent", &cfg.user_agent)
    };
    let api = format!("{}/repos/{}/{}", cfg.api_base, cfg.owner, cfg.repo);

    let ref_url = format!("{api}/git/ref/heads/{}", cfg.branch);
    let ref_body: Value = auth(agent.get(&ref_url))
        .call()
        .with_context(|| format!("GET {ref_url}"))?
        .into_json()
        .context("parsing ref response")?;
    let head_sha = ref_body
        .get("object")
        .and_then(|o| o.get("sha"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("ref response missing object.sha"))?
        .to_string();

    let commit_url = format!("{api}/git/commits/{head_sha}");
    let commit_body: Value = auth(agent.get(&commit_url))
        .call()
        .with_context(|| format!("GET {commit_url}"))?
        .into_json()
        .context("parsing commit response")?;
    let base_tree = commit_body
        .get("tree")
        .and_then(|t| t.get("sha"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("commit response missing tree.sha"))?
        .to_string();

    let mut tree_entries = vec![];
    for entry in entries {
        let blob_url = format!("{api}/git/blobs");
        let blob_body: Value = auth(agent.post(&blob_url))
            .send_json(json!({"content": b64(&entry.content), "encoding": "base64"}))
            .with_context(|| format!("POST {blob_url} for {}", entry.dest_rel))?
            .into_json()
            .context("parsing blob response")?;
        let blob_sha = blob_body
            .get("sha")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("blob response missing sha"))?
            .to_string();
        tree_entries.push(json!({
            "path": entry.dest_rel,
            "mode": "100644",
            "type": "blob",
            "sha": blob_sha,
        }));
    }

    let tree_url = format!("{api}/git/trees");
    let tree_body: Value = auth(agent.post(&tree_url))
        .send_json(json!({"base_tree": base_tree, "tree": tree_entries}))
        .with_context(|| format!("POST {tree_url}"))?
        .into_json()
        .context("parsing tree response")?;
    let new_tree_sha = tree_body
        .get("sha")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("tree response missing sha"))?
        .to_string();

    let new_commit_url = format!("{api}/git/commits");
    let new_commit_body: Value = auth(agent.post(&new_commit_url))
        .send_json(json!({
            "message": commit_message,
            "tree": new_tree_sha,
            "parents": [head_sha],
        }))
        .with_context(|| format!("POST {new_commit_url}"))?
        .into_json()
        .context("parsing new commit response")?;
    let new_commit_sha = new_commit_body
        .get("sha")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("new commit response missing sha"))?
        .to_string();

    let update_ref_url = format!("{api}/git/refs/heads/{}", cfg.branch);
    auth(agent.patch(&update_ref_url))
        .send_json(json!({"sha": new_commit_sha, "force": false}))
        .with_context(|| format!("PATCH {update_ref_url}"))?;

    Ok(new_commit_sha)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_path_handles_empty_base() {
        assert_eq!(join_path("", "src/a.py"), "src/a.py");
        assert_eq!(join_path("/bundles/", "src/a.py"), "bundles/src/a.py");
    }
}
