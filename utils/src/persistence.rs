//! Snapshot persistence helper.
//!
//! Snapshots are written through a temporary file in the target directory
//! and renamed into place, so a crash mid-write never corrupts the previous
//! snapshot.

use std::io::{BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot file error: {0}")]
    File(#[from] std::io::Error),
    #[error("could not move snapshot into place: {0}")]
    Rename(std::io::Error),
    #[error("snapshot location {0} has no parent directory")]
    BadLocation(String),
}

/// Writes a snapshot atomically: the callback fills a temp file which is
/// then renamed over `path`.
pub fn write_snapshot(
    path: &Path,
    write: impl FnOnce(&mut dyn Write) -> std::io::Result<()>,
) -> Result<(), SnapshotError> {
    let directory = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .ok_or_else(|| SnapshotError::BadLocation(path.display().to_string()))?;
    let file = NamedTempFile::new_in(directory)?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)?;
    let file = writer
        .into_inner()
        .map_err(|e| SnapshotError::File(e.into_error()))?;
    file.persist(path).map_err(|e| SnapshotError::Rename(e.error))?;
    tracing::debug!("snapshot written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn snapshot_replaces_previous_content() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("snapshot.txt");

        write_snapshot(&path, |w| writeln!(w, "first")).unwrap();
        write_snapshot(&path, |w| writeln!(w, "second")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "second\n");
    }

    #[test]
    fn failing_writer_leaves_no_snapshot() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("snapshot.txt");

        let result = write_snapshot(&path, |_| {
            Err(std::io::Error::other("writer failed"))
        });
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
