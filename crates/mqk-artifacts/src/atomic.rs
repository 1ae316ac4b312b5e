use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

/// Write-temp-then-rename. The temp file lives in the target directory so
/// the rename never crosses a filesystem; readers see the old bytes or the
/// new bytes, never a prefix.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("no parent directory: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("create dir failed: {}", parent.display()))?;

    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("artifact");
    let tmp = parent.join(format!(".{name}.{}.tmp", Uuid::new_v4()));

    let written = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("create temp failed: {}", tmp.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("write temp failed: {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("fsync temp failed: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("rename into place failed: {}", path.display()))?;
        Ok(())
    })();
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
        return written;
    }

    // Persist the rename itself.
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Pretty JSON with a trailing newline.
pub(crate) fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize json failed")?;
    write_atomic(path, format!("{json}\n").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_content_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("x.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
