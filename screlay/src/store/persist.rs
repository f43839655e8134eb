//! Atomic replacement of small state files.
//!
//! The value is written to a uniquely named temporary file in the target's
//! directory, synced, then renamed over the target. The rename is the only
//! commit point.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::utils::fs::{ensure_dir_all_sync_with_op, io_error, parent_dir};
use crate::{Error, Result};

/// A fully written temporary file that has not replaced its target yet.
///
/// Dropping it without [`StagedWrite::commit`] removes the temporary file
/// and leaves the target untouched.
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    /// Path of the temporary file.
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the temporary file over the target.
    pub fn commit(self) -> Result<()> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| io_error("replacing", &target, e.error))?;
        Ok(())
    }
}

/// Write `bytes` next to `target` without touching `target`.
pub fn stage(target: &Path, bytes: &[u8]) -> Result<StagedWrite> {
    let dir = parent_dir(target);
    ensure_dir_all_sync_with_op("creating state directory", &dir)?;

    let prefix = format!(
        ".{}.tmp-",
        target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string())
    );
    let mut temp = tempfile::Builder::new()
        .prefix(&prefix)
        .tempfile_in(&dir)
        .map_err(|e| io_error("creating temporary file in", &dir, e))?;

    temp.write_all(bytes)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| io_error("writing", temp.path(), e))?;

    Ok(StagedWrite {
        temp,
        target: target.to_path_buf(),
    })
}

/// Stage and commit `bytes` on the blocking pool.
pub async fn write_atomic(target: &Path, bytes: Vec<u8>) -> Result<()> {
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || stage(&target, &bytes)?.commit())
        .await
        .map_err(|e| Error::Other(format!("state write task failed: {e}")))?
}
