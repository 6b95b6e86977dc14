pub mod assets;
pub mod complexity;
pub mod deps;
pub mod doc_coverage;
pub mod entrypoints;
pub mod env;
pub mod git;
pub mod html;
pub mod js_ts;
pub mod license;
pub mod owners;
pub mod secrets;
pub mod sql;
pub mod static_check;

use crate::model::RepoItem;
use anyhow::Result;
use serde_json::Value;
use std::path::Path;

pub trait Scanner {
    fn name(&self) -> &'static str;
    fn scan(&self, root: &Path, items: &[RepoItem]) -> Result<Vec<Value>>;
}

/// Fixed scanner execution order, grounded in the original assembler's
/// wired-scanner list. Records from each scanner appear contiguously; a
/// scanner that errors is logged and skipped, never aborting the run.
pub fn all_scanners() -> Vec<Box<dyn Scanner + Send + Sync>> {
    vec![
        Box::new(doc_coverage::DocCoverageScanner),
        Box::new(complexity::ComplexityScanner),
        Box::new(owners::OwnersScanner),
        Box::new(env::EnvScanner),
        Box::new(entrypoints::EntrypointsScanner),
        Box::new(html::HtmlScanner),
        Box::new(sql::SqlScanner),
        Box::new(js_ts::JsTsScanner),
        Box::new(deps::DepsScanner),
        Box::new(static_check::StaticCheckScanner),
        Box::new(git::GitScanner),
        Box::new(license::LicenseScanner),
        Box::new(secrets::SecretsScanner),
        Box::new(assets::AssetsScanner),
    ]
}

/// Bounded read cap applied by every scanner before touching file contents.
pub const SCANNER_MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

pub fn read_capped(path: &Path, bytes: u64) -> Option<String> {
    if bytes > SCANNER_MAX_FILE_BYTES {
        return None;
    }
    std::fs::read_to_string(path).ok()
}

/// Ranks `(key, count)` pairs by descending count with ascending lexicographic
/// tie-break, matching `Counter.most_common` composed with a documented
/// secondary sort (spec.md §9 Open Question #1).
pub fn rank_top(mut counts: Vec<(String, u64)>, n: usize) -> Vec<(String, u64)> {
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts.truncate(n);
    counts
}
