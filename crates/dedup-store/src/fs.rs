use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use dedup_types::Digest;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::SyncMode;
use crate::error::StoreResult;
use crate::traits::{BlobStore, BlobWrite};

/// Filesystem blob store.
///
/// Content lives at `<root>/objects/<2 hex>/<62 hex>`. Writes stream into a
/// temporary file under `<root>/tmp`, are synced, then linked into place
/// with a no-clobber rename. A write that fails or is interrupted drops its
/// temporary file, so a key either holds complete content or nothing.
#[derive(Debug)]
pub struct FsBlobStore {
    objects_dir: PathBuf,
    tmp_dir: PathBuf,
    sync_mode: SyncMode,
}

impl FsBlobStore {
    /// Open (or create) a blob store rooted at `root`.
    pub fn open(root: &Path, sync_mode: SyncMode) -> StoreResult<Self> {
        let objects_dir = root.join("objects");
        let tmp_dir = root.join("tmp");
        fs::create_dir_all(&objects_dir)?;
        fs::create_dir_all(&tmp_dir)?;
        Ok(Self {
            objects_dir,
            tmp_dir,
            sync_mode,
        })
    }

    /// Path holding the content for `digest`.
    pub fn path_for(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        let (fanout, rest) = hex.split_at(2);
        self.objects_dir.join(fanout).join(rest)
    }
}

impl BlobStore for FsBlobStore {
    fn write(&self, digest: &Digest, source: &mut dyn Read) -> StoreResult<BlobWrite> {
        let mut tmp = NamedTempFile::new_in(&self.tmp_dir)?;
        let bytes_written = io::copy(source, &mut tmp)?;
        if self.sync_mode.syncs() {
            tmp.as_file().sync_all()?;
        }

        let path = self.path_for(digest);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let created = match tmp.persist_noclobber(&path) {
            Ok(_) => true,
            // Dropping `e.file` removes the redundant copy.
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => false,
            Err(e) => return Err(e.error.into()),
        };
        if created && self.sync_mode.syncs() {
            if let Some(parent) = path.parent() {
                File::open(parent)?.sync_all()?;
            }
        }

        debug!(digest = %digest.short_hex(), bytes = bytes_written, created, "blob write");
        Ok(BlobWrite {
            bytes_written,
            created,
        })
    }

    fn open(&self, digest: &Digest) -> StoreResult<Option<Box<dyn Read + Send>>> {
        match File::open(self.path_for(digest)) {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, digest: &Digest) -> StoreResult<bool> {
        Ok(self.path_for(digest).try_exists()?)
    }

    fn discard(&self, digest: &Digest) -> StoreResult<bool> {
        match fs::remove_file(self.path_for(digest)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingReader {
        remaining: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::other("device unplugged"));
            }
            let n = buf.len().min(self.remaining);
            buf[..n].fill(0xaa);
            self.remaining -= n;
            Ok(n)
        }
    }

    fn temp_store() -> (tempfile::TempDir, FsBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path(), SyncMode::EveryWrite).unwrap();
        (dir, store)
    }

    fn read_blob(store: &FsBlobStore, digest: &Digest) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        store.open(digest).unwrap()?.read_to_end(&mut out).unwrap();
        Some(out)
    }

    fn tmp_entries(dir: &Path) -> usize {
        fs::read_dir(dir.join("tmp")).unwrap().count()
    }

    #[test]
    fn write_and_read_roundtrip() {
        let (_dir, store) = temp_store();
        let digest = Digest::from_hash([0xab; 32]);
        let written = store.write(&digest, &mut &b"hello"[..]).unwrap();
        assert!(written.created);
        assert_eq!(written.bytes_written, 5);
        assert_eq!(read_blob(&store, &digest).unwrap(), b"hello");
    }

    #[test]
    fn layout_uses_fanout_directory() {
        let (dir, store) = temp_store();
        let digest = Digest::from_hash([0xab; 32]);
        let path = store.path_for(&digest);
        assert_eq!(
            path,
            dir.path().join("objects").join("ab").join("ab".repeat(31))
        );
    }

    #[test]
    fn second_write_does_not_clobber() {
        let (dir, store) = temp_store();
        let digest = Digest::from_hash([1; 32]);
        store.write(&digest, &mut &b"first"[..]).unwrap();
        let second = store.write(&digest, &mut &b"other"[..]).unwrap();
        assert!(!second.created);
        assert_eq!(read_blob(&store, &digest).unwrap(), b"first");
        assert_eq!(tmp_entries(dir.path()), 0);
    }

    #[test]
    fn failed_write_leaves_nothing() {
        let (dir, store) = temp_store();
        let digest = Digest::from_hash([2; 32]);
        let mut source = FailingReader { remaining: 100_000 };
        assert!(store.write(&digest, &mut source).is_err());
        assert!(!store.exists(&digest).unwrap());
        assert_eq!(tmp_entries(dir.path()), 0);
    }

    #[test]
    fn missing_reads_are_none() {
        let (_dir, store) = temp_store();
        let digest = Digest::from_hash([3; 32]);
        assert!(read_blob(&store, &digest).is_none());
        assert!(store.open(&digest).unwrap().is_none());
        assert!(!store.exists(&digest).unwrap());
    }

    #[test]
    fn discard_removes_content() {
        let (_dir, store) = temp_store();
        let digest = Digest::from_hash([4; 32]);
        store.write(&digest, &mut &b"bye"[..]).unwrap();
        assert!(store.discard(&digest).unwrap());
        assert!(!store.exists(&digest).unwrap());
        assert!(!store.discard(&digest).unwrap());
    }

    #[test]
    fn reopen_sees_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let digest = Digest::from_hash([5; 32]);
        {
            let store = FsBlobStore::open(dir.path(), SyncMode::OsDefault).unwrap();
            store.write(&digest, &mut &b"durable"[..]).unwrap();
        }
        let store = FsBlobStore::open(dir.path(), SyncMode::OsDefault).unwrap();
        let mut out = Vec::new();
        store
            .open(&digest)
            .unwrap()
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"durable");
    }
}
