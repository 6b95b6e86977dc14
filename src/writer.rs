use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only JSONL writer. Guarantees header-first ordering and atomic
/// per-record writes (one `write()` call per line).
///
/// Grounded in the original `ManifestAppender`: the target file is created
/// empty on construction, and each append opens the file in append mode for
/// the duration of a single write (no held file handle across the run).
pub struct ManifestWriter {
    path: PathBuf,
}

impl ManifestWriter {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating parent dir for {}", path.display()))?;
        }
        if !path.exists() {
            fs::write(&path, b"").with_context(|| format!("creating {}", path.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Idempotently ensures `header` is the first non-blank line of the
    /// file. No-op if it already is one. Otherwise rewrites the whole file,
    /// inserting the header before the first non-blank line (or writing it
    /// alone if the file is empty).
    pub fn ensure_header(&self, header: &Value) -> Result<()> {
        let existing =
            fs::read_to_string(&self.path).with_context(|| "reading manifest for header check")?;

        let first_nonblank = existing.lines().find(|l| !l.trim().is_empty());
        if let Some(line) = first_nonblank {
            if let Ok(parsed) = serde_json::from_str::<Value>(line) {
                if parsed.get("kind").and_then(Value::as_str) == Some("manifest.header") {
                    return Ok(());
                }
            }
        }

        let header_line = serialize_sorted(header)?;
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut f = fs::File::create(&tmp)
                .with_context(|| format!("creating {}", tmp.display()))?;
            f.write_all(header_line.as_bytes())?;
            f.write_all(b"\n")?;
            f.write_all(existing.as_bytes())?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming {} into place", tmp.display()))?;
        Ok(())
    }

    pub fn append_record(&self, record: &Value) -> Result<()> {
        let line = serialize_sorted(record)?;
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {} for append", self.path.display()))?;
        f.write_all(line.as_bytes())?;
        f.write_all(b"\n")?;
        Ok(())
    }

    pub fn append_many<'a>(&self, records: impl IntoIterator<Item = &'a Value>) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {} for append", self.path.display()))?;
        for record in records {
            let line = serialize_sorted(record)?;
            f.write_all(line.as_bytes())?;
            f.write_all(b"\n")?;
        }
        Ok(())
    }
}

/// Serializes with sorted object keys, matching the manifest's diff-stability
/// invariant (spec.md C2).
fn serialize_sorted(value: &Value) -> Result<String> {
    let sorted = sort_value(value);
    serde_json::to_string(&sorted).context("serializing record")
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
    fn ensure_header_inserts_once() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ManifestWriter::new(dir.path().join("m.jsonl")).unwrap();
        let header = json!({"kind": "manifest.header", "manifest_version": 1});

        writer.ensure_header(&header).unwrap();
        writer.append_record(&json!({"kind": "file", "path": "a"})).unwrap();
        writer.ensure_header(&header).unwrap();

        let text = fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        println!("lines after double ensure_header: {lines:?}");
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("manifest.header"));
    }

    #[test]
    fn append_record_sorts_keys() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ManifestWriter::new(dir.path().join("m.jsonl")).unwrap();
        writer
            .append_record(&json!({"zeta": 1, "alpha": 2}))
            .unwrap();
        let text = fs::read_to_string(writer.path()).unwrap();
        assert!(text.trim().starts_with("{\"alpha\":2,\"zeta\":1}"));
    }
}
