use crate::model::sha256_hex;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct PartMeta {
    pub name: String,
    pub size: u64,
    pub lines: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartsIndex {
    pub total_parts: u64,
    pub split_bytes: u64,
    pub parts: Vec<PartMeta>,
    pub source: String,
}

fn make_name(i: usize, part_stem: &str, part_ext: &str, group_dirs: bool, dir_suffix_width: usize, parts_per_dir: usize) -> String {
    let serial = format!("{:04}", i + 1);
    if group_dirs {
        let group = i / parts_per_dir.max(1);
        let g = format!("{:0width$}", group, width = dir_suffix_width);
        format!("{part_stem}_{g}_{serial}{part_ext}")
    } else {
        format!("{part_stem}_{serial}{part_ext}")
    }
}

/// Splits `src_manifest` into size-bounded, whole-line parts under
/// `dest_dir`, flushing the buffer *before* a line would push it over
/// `split_bytes` (spec.md §4.7, §8 E2). A single oversized line is placed
/// alone in its own part.
pub fn write_parts_from_jsonl(
    src_manifest: &Path,
    dest_dir: &Path,
    part_stem: &str,
    part_ext: &str,
    split_bytes: u64,
    group_dirs: bool,
    dir_suffix_width: usize,
    parts_per_dir: usize,
) -> Result<(Vec<PathBuf>, PartsIndex)> {
    fs::create_dir_all(dest_dir)
        .with_context(|| format!("creating {}", dest_dir.display()))?;

    if !src_manifest.exists() {
        return Ok((
            vec![],
            PartsIndex { total_parts: 0, split_bytes, parts: vec![], source: String::new() },
        ));
    }

    let text = fs::read_to_string(src_manifest)
        .with_context(|| format!("reading {}", src_manifest.display()))?;
    let lines: Vec<String> = text.lines().map(|l| format!("{l}\n")).collect();

    let mut parts = vec![];
    let mut parts_meta = vec![];
    let mut buf = String::new();
    let mut buf_bytes = 0u64;
    let mut part_idx = 0usize;

    let mut flush = |buf: &mut String, buf_bytes: &mut u64, part_idx: &mut usize| -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let name = make_name(*part_idx, part_stem, part_ext, group_dirs, dir_suffix_width, parts_per_dir);
        let path = dest_dir.join(&name);
        fs::write(&path, buf.as_bytes()).with_context(|| format!("writing {}", path.display()))?;
        let lines_in_part = buf.matches('\n').count() as u64;
        parts_meta.push(PartMeta { name, size: *buf_bytes, lines: lines_in_part });
        parts.push(path);
        *part_idx += 1;
        buf.clear();
        *buf_bytes = 0;
        Ok(())
    };

    for line in &lines {
        let line_len = line.len() as u64;
        if !buf.is_empty() && buf_bytes + line_len > split_bytes {
            flush(&mut buf, &mut buf_bytes, &mut part_idx)?;
        }
        buf.push_str(line);
        buf_bytes += line_len;
    }
    flush(&mut buf, &mut buf_bytes, &mut part_idx)?;

    let source = src_manifest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok((
        parts.clone(),
        PartsIndex { total_parts: parts_meta.len() as u64, split_bytes, parts: parts_meta, source },
    ))
}

/// Writes `SHA256SUMS` covering the parts-index file (first) then each part
/// in listed order, matching `write_sha256sums_for_parts`'s
/// `files_to_hash.insert(0, index_path)` ordering. Returns the number of
/// files hashed.
pub fn write_sha256sums(
    parts_dir: &Path,
    parts_index_path: &Path,
    parts: &[PartMeta],
    monolith: Option<(&str, &[u8])>,
    out_sums_path: &Path,
) -> Result<usize> {
    if let Some(parent) = out_sums_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut lines = vec![];
    let mut count = 0usize;

    if parts_index_path.exists() {
        let bytes = fs::read(parts_index_path)
            .with_context(|| format!("reading {}", parts_index_path.display()))?;
        let name = parts_index_path.file_name().unwrap().to_string_lossy();
        lines.push(format!("{}  {}\n", sha256_hex(&bytes), name));
        count += 1;
    }

    for part in parts {
        let path = parts_dir.join(&part.name);
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        lines.push(format!("{}  {}\n", sha256_hex(&bytes), part.name));
        count += 1;
    }

    if let Some((name, bytes)) = monolith {
        lines.push(format!("{}  {}\n", sha256_hex(bytes), name));
        count += 1;
    }

    fs::write(out_sums_path, lines.join(""))
        .with_context(|| format!("writing {}", out_sums_path.display()))?;
    Ok(count)
}

pub fn write_parts_index_json(parts_index: &PartsIndex, path: &Path) -> Result<()> {
    let value = json!({
        "record_type": "parts_index",
        "total_parts": parts_index.total_parts,
        "split_bytes": parts_index.split_bytes,
        "parts": parts_index.parts,
        "source": parts_index.source,
    });
    fs::write(path, serde_json::to_string_pretty(&value)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_evenly_sized_lines_into_size_bounded_parts() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("design_manifest.jsonl");
        let line = "x".repeat(39);
        let content = format!("{line}\n").repeat(9);
        fs::write(&src, &content).unwrap();
        assert_eq!(content.len(), 360);

        let dest = dir.path().join("parts");
        let (parts, index) =
            write_parts_from_jsonl(&src, &dest, "design_manifest", ".txt", 100, true, 2, 10).unwrap();

        println!("part sizes: {:?}", index.parts.iter().map(|p| p.size).collect::<Vec<_>>());
        assert_eq!(parts.len(), index.total_parts as usize);
        for part in &index.parts[..index.parts.len() - 1] {
            assert!(part.size <= 100);
        }
    }

    #[test]
    fn sha256sums_orders_index_before_parts() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("design_manifest.jsonl");
        fs::write(&src, "{\"a\":1}\n{\"b\":2}\n").unwrap();
        let dest = dir.path().join("parts");
        let (_parts, index) =
            write_parts_from_jsonl(&src, &dest, "design_manifest", ".txt", 1000, true, 2, 10).unwrap();

        let index_path = dest.join("design_manifest_parts_index.json");
        write_parts_index_json(&index, &index_path).unwrap();

        let sums_path = dest.join("design_manifest.SHA256SUMS");
        let count = write_sha256sums(&dest, &index_path, &index.parts, None, &sums_path).unwrap();
        assert_eq!(count, 1 + index.parts.len());

        let text = fs::read_to_string(&sums_path).unwrap();
        let first_line = text.lines().next().unwrap();
        assert!(first_line.ends_with("design_manifest_parts_index.json"));
    }
}
