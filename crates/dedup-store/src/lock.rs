use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// File name of the advisory lock inside a store root.
pub const LOCK_FILE: &str = "LOCK";

/// Exclusive advisory lock on a store root.
///
/// Each `DedupStore` handle keeps its own in-memory view of the catalog, so
/// only one handle may own a root at a time. The lock is released when the
/// value is dropped, or by the OS when the process exits.
#[derive(Debug)]
pub struct RootLock {
    // Held open for the lifetime of the lock.
    _file: File,
    path: PathBuf,
}

impl RootLock {
    /// Take the lock for `root`, creating the directory if needed.
    ///
    /// Fails with [`StoreError::Locked`] if another handle, in this process
    /// or another, already holds it.
    pub fn acquire(root: &Path) -> StoreResult<Self> {
        fs::create_dir_all(root)?;
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = file.try_lock_exclusive() {
            let contended = fs2::lock_contended_error();
            if e.kind() == contended.kind() || e.raw_os_error() == contended.raw_os_error() {
                return Err(StoreError::Locked(root.to_path_buf()));
            }
            return Err(e.into());
        }
        debug!(path = %path.display(), "store lock acquired");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
