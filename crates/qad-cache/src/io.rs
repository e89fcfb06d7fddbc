use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Sibling path with `suffix` appended to the full file name.
pub(crate) fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut sibling = path.as_os_str().to_owned();
    sibling.push(suffix);
    PathBuf::from(sibling)
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    sibling_path(path, ".tmp")
}

/// `<path>.corrupt`, or `<path>.corrupt.N` for the first free N so earlier
/// backups are never overwritten.
pub(crate) fn corrupt_backup_path(path: &Path) -> PathBuf {
    let first = sibling_path(path, ".corrupt");
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| sibling_path(path, &format!(".corrupt.{n}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

/// Write `value` as pretty JSON to `<path>.tmp`, fsync it, then rename it
/// over `path`. Readers see either the old or the new file, never a mix.
pub(crate) fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = tmp_path(path);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .with_context(|| format!("Failed to open temporary cache file: {}", tmp.display()))?;

    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("Failed to serialize cache snapshot: {}", tmp.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush temporary cache file: {}", tmp.display()))?;
    writer
        .get_ref()
        .sync_all()
        .with_context(|| format!("Failed to fsync temporary cache file: {}", tmp.display()))?;
    drop(writer);

    fs::rename(&tmp, path).with_context(|| {
        format!(
            "Failed to atomically replace cache {} from {}",
            path.display(),
            tmp.display()
        )
    })?;

    // Persist the rename itself. Not all filesystems support fsync on a
    // directory handle, so a failure here is ignored.
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Move a corrupt file aside to `<path>.corrupt` and log it.
pub(crate) fn quarantine_corrupt(path: &Path, source_error: &anyhow::Error) -> Result<PathBuf> {
    let backup = corrupt_backup_path(path);
    fs::rename(path, &backup).with_context(|| {
        format!(
            "Failed to backup corrupt cache {} to {}",
            path.display(),
            backup.display()
        )
    })?;
    tracing::warn!(
        error = %source_error,
        path = %path.display(),
        backup = %backup.display(),
        "Recovered corrupt cache snapshot; starting empty"
    );
    Ok(backup)
}
