use crate::model::{convert_path, PathMode};
use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

const PATH_FIELDS: &[&str] = &["path", "src_path", "dst_path", "caller_path", "callee_path"];

/// Stream-rewrites a manifest between `local` and `remote` path modes,
/// writing sorted-key JSON lines. Lines that fail to parse pass through
/// verbatim (spec.md §4.6).
pub fn rewrite_manifest(
    src: &Path,
    dst: &Path,
    from_mode: PathMode,
    to_mode: PathMode,
    prefix: &str,
) -> Result<()> {
    let reader = BufReader::new(
        File::open(src).with_context(|| format!("opening {}", src.display()))?,
    );
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(dst).with_context(|| format!("creating {}", dst.display()))?;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(value) => {
                let rewritten = rewrite_line(&value, from_mode, to_mode, prefix);
                let sorted = sort_value(&rewritten);
                writeln!(out, "{}", serde_json::to_string(&sorted)?)?;
            }
            Err(_) => {
                writeln!(out, "{line}")?;
            }
        }
    }
    Ok(())
}

fn rewrite_line(value: &Value, from_mode: PathMode, to_mode: PathMode, prefix: &str) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };
    let mut out = Map::new();
    for (k, v) in map {
        let rewritten = match (k.as_str(), v) {
            (field, Value::String(s)) if PATH_FIELDS.contains(&field) => {
                Value::String(convert_path(s, from_mode, to_mode, prefix))
            }
            ("examples", Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => Value::String(convert_path(s, from_mode, to_mode, prefix)),
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

fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> =
                map.iter().map(|(k, v)| (k.clone(), sort_value(v))).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_local_to_remote_and_back() {
        let dir = tempfile::tempdir().unwrap();
        let local_path = dir.path().join("local.jsonl");
        fs::write(
            &local_path,
            format!(
                "{}\n{}\n",
                json!({"kind":"manifest.header"}),
                json!({"kind":"file","path":"src/a.py","sha256":"abc"})
            ),
        )
        .unwrap();

        let remote_path = dir.path().join("remote.jsonl");
        rewrite_manifest(&local_path, &remote_path, PathMode::Local, PathMode::Remote, "src/").unwrap();
        let remote_text = fs::read_to_string(&remote_path).unwrap();
        assert!(remote_text.contains("\"path\":\"a.py\""));

        let back_path = dir.path().join("back.jsonl");
        rewrite_manifest(&remote_path, &back_path, PathMode::Remote, PathMode::Local, "src/").unwrap();
        let back_text = fs::read_to_string(&back_path).unwrap();
        assert!(back_text.contains("\"path\":\"src/a.py\""));
    }

    #[test]
    fn unparsable_line_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.jsonl");
        fs::write(&src, "not json\n").unwrap();
        let dst = dir.path().join("out.jsonl");
        rewrite_manifest(&src, &dst, PathMode::Local, PathMode::Remote, "src/").unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap().trim(), "not json");
    }
}
