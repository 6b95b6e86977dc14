use super::{read_capped, Scanner};
use crate::model::RepoItem;
use anyhow::Result;
use regex::Regex;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::OnceLock;

fn script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<script\b").unwrap())
}
fn form_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<form\b").unwrap())
}
fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<a\s+[^>]*href="([^"]+)""#).unwrap())
}

/// Regex-based inventory of HTML files: script/form counts and outbound
/// links, without a full HTML parser.
pub struct HtmlScanner;

impl Scanner for HtmlScanner {
    fn name(&self) -> &'static str {
        "html"
    }

    fn scan(&self, _root: &Path, items: &[RepoItem]) -> Result<Vec<Value>> {
        let mut records = vec![];
        let mut total_links = 0u64;

        for item in items.iter().filter(|i| i.rel_path.ends_with(".html") || i.rel_path.ends_with(".htm")) {
            let Some(text) = read_capped(&item.abs_path, item.bytes) else {
                continue;
            };
            let scripts = script_re().find_iter(&text).count() as u64;
            let forms = form_re().find_iter(&text).count() as u64;
            let links: Vec<String> = link_re()
                .captures_iter(&text)
                .map(|c| c[1].to_string())
                .collect();
            total_links += links.len() as u64;
            records.push(json!({
                "kind": "html.file",
                "path": item.rel_path,
                "scripts": scripts,
                "forms": forms,
                "links": links,
            }));
        }

        records.push(json!({
            "kind": "html.summary",
            "files": records.len() as u64,
            "total_links": total_links,
        }));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_scripts_and_links() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.html"),
            "<html><script></script><a href=\"/x\">x</a></html>",
        )
        .unwrap();
        let item = RepoItem { abs_path: dir.path().join("index.html"), rel_path: "index.html".into(), bytes: 10 };
        let records = HtmlScanner.scan(dir.path(), &[item]).unwrap();
        assert_eq!(records[0]["scripts"], 1);
        assert_eq!(records[0]["links"], json!(["/x"]));
    }
}
