// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Write-with-backup for catalog-like files.
//!
//! The current file moves to `<name>.bkp`, the new content lands
//! under the real name, then the backup is dropped. A reader finding
//! only the backup moves it back into place, so dying between the
//! rename and the write loses nothing.

use crate::{error::IoOp, Error, Result};
use std::{
    io::Write,
    path::{Path, PathBuf},
};

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bkp");
    PathBuf::from(name)
}

/// Replaces `path` with `content`, keeping the old content as a
/// backup until the new file is durable.
pub fn write_with_backup(path: &Path, content: &[u8]) -> Result<()> {
    let bkp = backup_path(path);

    if path.exists() {
        std::fs::rename(path, &bkp).map_err(|e| Error::io(IoOp::Write, path, e))?;
    }

    let write = |target: &Path| -> std::io::Result<()> {
        let mut file = std::fs::File::create(target)?;
        file.write_all(content)?;
        file.sync_all()
    };

    if let Err(e) = write(path) {
        // put the old content back before reporting
        let _ = std::fs::rename(&bkp, path);
        return Err(Error::io(IoOp::Write, path, e));
    }

    let _ = std::fs::remove_file(&bkp);
    Ok(())
}

/// Reads `path`, recovering from an interrupted replacement.
///
/// Returns `None` when neither the file nor a backup exists.
pub fn read_with_recovery(path: &Path) -> Result<Option<Vec<u8>>> {
    let bkp = backup_path(path);

    if !path.exists() {
        if !bkp.exists() {
            return Ok(None);
        }
        log::warn!("recovering {path:?} from backup");
        std::fs::rename(&bkp, path).map_err(|e| Error::io(IoOp::Write, &bkp, e))?;
    }

    std::fs::read(path)
        .map(Some)
        .map_err(|e| Error::io(IoOp::Read, path, e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn replace_leaves_no_backup() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat");

        write_with_backup(&path, b"one")?;
        write_with_backup(&path, b"two")?;

        assert_eq!(b"two".to_vec(), read_with_recovery(&path)?.unwrap());
        assert!(!backup_path(&path).exists());
        Ok(())
    }

    #[test]
    fn interrupted_replace_recovers() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat");

        write_with_backup(&path, b"one")?;
        std::fs::rename(&path, backup_path(&path)).unwrap();

        assert_eq!(b"one".to_vec(), read_with_recovery(&path)?.unwrap());
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn missing_file_reads_none() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_with_recovery(&dir.path().join("cat"))?.is_none());
        Ok(())
    }
}
