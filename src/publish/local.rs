use super::PublishItem;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Mirrors `items` to `root`. If `clean_before_publish`, deletes all files
/// under `root` first (best-effort, bottom-up). Overwrites existing files
/// unconditionally, creating parent directories as needed.
pub fn publish(items: &[PublishItem], root: &Path, clean_before_publish: bool) -> Result<()> {
    if clean_before_publish && root.exists() {
        clean_dir(root);
    }
    fs::create_dir_all(root).with_context(|| format!("creating {}", root.display()))?;

    for item in items {
        let dest = root.join(&item.dest_rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating parent dir for {}", dest.display()))?;
        }
        fs::copy(&item.local_path, &dest).with_context(|| {
            format!("copying {} to {}", item.local_path.display(), dest.display())
        })?;
    }
    Ok(())
}

fn clean_dir(root: &Path) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(e) = result {
            eprintln!("[packager] WARN: failed to clean {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirrors_files_and_creates_parent_dirs() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let src_file = src_dir.path().join("a.txt");
        fs::write(&src_file, "hello").unwrap();

        let items = vec![PublishItem { local_path: src_file, dest_rel: "nested/a.txt".into() }];
        publish(&items, dst_dir.path(), false).unwrap();

        let text = fs::read_to_string(dst_dir.path().join("nested/a.txt")).unwrap();
        assert_eq!(text, "hello");
    }

    #[test]
    fn clean_before_publish_removes_stale_files() {
        let dst_dir = tempfile::tempdir().unwrap();
        fs::write(dst_dir.path().join("stale.txt"), "old").unwrap();

        let src_dir = tempfile::tempdir().unwrap();
        let src_file = src_dir.path().join("a.txt");
        fs::write(&src_file, "new").unwrap();
        let items = vec![PublishItem { local_path: src_file, dest_rel: "a.txt".into() }];

        publish(&items, dst_dir.path(), true).unwrap();
        assert!(!dst_dir.path().join("stale.txt").exists());
        assert!(dst_dir.path().join("a.txt").exists());
    }
}
