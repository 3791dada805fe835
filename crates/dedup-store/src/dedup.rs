use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dedup_crypto::HashingReader;
use dedup_types::{
    Clock, Digest, ObjectFilter, StorageStats, StoredObject, SystemClock, UploadOutcome,
};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::fs::FsBlobStore;
use crate::journal::JournalCatalog;
use crate::lock::RootLock;
use crate::memory::{InMemoryBlobStore, InMemoryCatalog};
use crate::traits::{BlobStore, BlobWrite, Catalog};

/// File name of the catalog journal inside a store root.
pub const JOURNAL_FILE: &str = "catalog.journal";

/// The single decision point for "is this content already known".
///
/// `DedupStore` is the only writer of catalog rows. For each submission it
/// looks the digest up, and either records another upload of the existing
/// object or writes the bytes once and commits a new row. Submissions for the
/// same digest are serialized through a striped lock, and the catalog's
/// uniqueness constraint backs that up within this handle. A durable root is
/// owned by exactly one handle at a time (see [`RootLock`]).
pub struct DedupStore {
    catalog: Arc<dyn Catalog>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    stripes: Box<[Mutex<()>]>,
    root_lock: Option<RootLock>,
}

impl DedupStore {
    /// Assemble a store from its collaborators.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        config: StoreConfig,
    ) -> Self {
        let stripes = (0..config.lock_stripes.max(1))
            .map(|_| Mutex::new(()))
            .collect();
        Self {
            catalog,
            blobs,
            clock,
            config,
            stripes,
            root_lock: None,
        }
    }

    /// Store with in-memory catalog and blobs.
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::new(
            Arc::new(InMemoryCatalog::new()),
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(SystemClock::new()),
            config,
        )
    }

    /// Open (or create) a durable store rooted at `root`.
    ///
    /// Content goes under `<root>/objects`, the catalog journal is
    /// `<root>/catalog.journal`. The root stays locked until the store is
    /// dropped; opening a root that is already open fails with
    /// [`StoreError::Locked`].
    pub fn open(root: &Path, config: StoreConfig) -> StoreResult<Self> {
        let root_lock = RootLock::acquire(root)?;
        let blobs = FsBlobStore::open(root, config.sync_mode)?;
        let catalog = JournalCatalog::open(&root.join(JOURNAL_FILE), config.sync_mode)?;
        info!(root = %root.display(), objects = catalog.len(), "store opened");
        let mut store = Self::new(
            Arc::new(catalog),
            Arc::new(blobs),
            Arc::new(SystemClock::new()),
            config,
        );
        store.root_lock = Some(root_lock);
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Submit one upload.
    ///
    /// `digest` and `size` must describe exactly the bytes `byte_source`
    /// yields. On the duplicate path `byte_source` is not read at all and the
    /// request's `original_name`/`content_type` are ignored.
    ///
    /// Fails with `StorageWrite` when the content or its row could not be
    /// durably written; in that case nothing was committed and the same
    /// submission can be retried as new.
    pub fn submit<R: Read>(
        &self,
        digest: Digest,
        size: u64,
        original_name: &str,
        content_type: &str,
        byte_source: R,
    ) -> StoreResult<UploadOutcome> {
        let _guard = self.lock_digest(&digest);

        let existing = self
            .catalog
            .get(&digest)
            .map_err(StoreError::into_read_error)?;
        if existing.is_some() {
            return self.record_duplicate(&digest);
        }

        match self.store_new(digest, size, original_name, content_type, byte_source) {
            Ok(object) => {
                info!(digest = %digest.short_hex(), size, name = original_name, "stored new object");
                Ok(UploadOutcome::new_object(object))
            }
            Err(StoreError::DuplicateKey(_)) => {
                // Another writer committed this digest between our lookup and
                // our insert. Its row is the object; ours was never written.
                debug!(digest = %digest.short_hex(), "lost insert race; treating as duplicate");
                self.record_duplicate(&digest)
            }
            Err(e) => Err(e),
        }
    }

    /// Point-in-time physical/logical usage.
    pub fn compute_stats(&self) -> StoreResult<StorageStats> {
        self.catalog.totals().map_err(StoreError::into_read_error)
    }

    /// Look up an object by digest.
    pub fn get(&self, digest: &Digest) -> StoreResult<Option<StoredObject>> {
        self.catalog.get(digest).map_err(StoreError::into_read_error)
    }

    /// Objects matching `filter`, oldest first.
    pub fn list(&self, filter: &ObjectFilter) -> StoreResult<Vec<StoredObject>> {
        filter
            .validate()
            .map_err(|e| StoreError::InvalidFilter(e.to_string()))?;
        self.catalog.list(filter).map_err(StoreError::into_read_error)
    }

    /// Number of uploads that resolved to `digest`.
    pub fn upload_count(&self, digest: &Digest) -> StoreResult<u64> {
        self.catalog
            .upload_count(digest)
            .map_err(StoreError::into_read_error)
    }

    /// Full content of a stored object, buffered. Prefer
    /// [`open_content`](Self::open_content) for large objects.
    pub fn read_content(&self, digest: &Digest) -> StoreResult<Vec<u8>> {
        let (object, mut reader) = self.open_content(digest)?;
        let mut data = Vec::with_capacity(usize::try_from(object.size).unwrap_or(0));
        reader
            .read_to_end(&mut data)
            .map_err(|e| StoreError::from(e).into_read_error())?;
        Ok(data)
    }

    /// Streaming reader over a stored object's content.
    pub fn open_content(&self, digest: &Digest) -> StoreResult<(StoredObject, Box<dyn Read + Send>)> {
        let object = self.require_row(digest)?;
        let reader = self
            .blobs
            .open(digest)
            .map_err(StoreError::into_read_error)?
            .ok_or_else(|| StoreError::Corrupt(format!("content missing for {digest}")))?;
        Ok((object, reader))
    }

    fn require_row(&self, digest: &Digest) -> StoreResult<StoredObject> {
        self.get(digest)?.ok_or(StoreError::NotFound(*digest))
    }

    fn lock_digest(&self, digest: &Digest) -> MutexGuard<'_, ()> {
        let bytes = digest.as_bytes();
        let key = u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        let idx = (key % self.stripes.len() as u64) as usize;
        // The stripe guards no data, so a panic under it leaves nothing torn.
        self.stripes[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn record_duplicate(&self, digest: &Digest) -> StoreResult<UploadOutcome> {
        let existing = self
            .catalog
            .record_duplicate(digest)
            .map_err(|e| e.into_write_error(*digest))?;
        debug!(digest = %digest.short_hex(), saved = existing.size, "duplicate upload");
        Ok(UploadOutcome::duplicate(existing))
    }

    /// Write content then commit its row. Content whose row fails to commit
    /// is discarded again.
    fn store_new<R: Read>(
        &self,
        digest: Digest,
        size: u64,
        original_name: &str,
        content_type: &str,
        byte_source: R,
    ) -> StoreResult<StoredObject> {
        let written = self.write_content(&digest, size, byte_source)?;

        let object = StoredObject::new(
            digest,
            size,
            original_name,
            content_type,
            self.clock.now(),
        );
        if let Err(e) = self.catalog.insert(object.clone()) {
            self.rollback(&digest, written);
            return Err(e.into_write_error(digest));
        }
        Ok(object)
    }

    fn write_content<R: Read>(
        &self,
        digest: &Digest,
        size: u64,
        byte_source: R,
    ) -> StoreResult<BlobWrite> {
        if !self.config.verify_content {
            let mut source = byte_source;
            let written = self
                .blobs
                .write(digest, &mut source)
                .map_err(|e| e.into_write_error(*digest))?;
            if written.bytes_written != size {
                self.rollback(digest, written);
                return Err(StoreError::SizeMismatch {
                    digest: *digest,
                    declared: size,
                    actual: written.bytes_written,
                });
            }
            return Ok(written);
        }

        let mut hashing = HashingReader::new(byte_source);
        let written = self
            .blobs
            .write(digest, &mut hashing)
            .map_err(|e| e.into_write_error(*digest))?;
        let (actual, _) = hashing.finish();
        if actual.digest != *digest || actual.size != size {
            warn!(
                declared = %digest.short_hex(),
                actual = %actual.digest.short_hex(),
                declared_size = size,
                actual_size = actual.size,
                "content does not match declared digest"
            );
            self.rollback(digest, written);
            return Err(StoreError::ContentMismatch {
                declared: *digest,
                declared_size: size,
                actual: actual.digest,
                actual_size: actual.size,
            });
        }
        Ok(written)
    }

    /// Remove bytes this call created. Bytes that were already present are
    /// left alone: they may belong to another writer.
    fn rollback(&self, digest: &Digest, written: BlobWrite) {
        if !written.created {
            return;
        }
        if let Err(e) = self.blobs.discard(digest) {
            warn!(digest = %digest.short_hex(), error = %e, "failed to discard uncommitted content");
        }
    }
}

impl std::fmt::Debug for DedupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupStore")
            .field("config", &self.config)
            .field("stripes", &self.stripes.len())
            .field("locked_root", &self.root_lock.as_ref().map(RootLock::path))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncMode;
    use chrono::{Duration, TimeZone, Utc};
    use dedup_crypto::ContentAddresser;
    use dedup_types::ManualClock;
    use std::io::{self, Cursor};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;
    use std::thread;

    const ADDRESSER: ContentAddresser = ContentAddresser::new();

    fn submit_bytes(store: &DedupStore, name: &str, data: &[u8]) -> StoreResult<UploadOutcome> {
        let addressed = ADDRESSER.digest_bytes(data);
        store.submit(
            addressed.digest,
            addressed.size,
            name,
            "application/octet-stream",
            Cursor::new(data),
        )
    }

    fn memory_store() -> (Arc<InMemoryCatalog>, Arc<InMemoryBlobStore>, DedupStore) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let store = DedupStore::new(
            catalog.clone(),
            blobs.clone(),
            Arc::new(SystemClock::new()),
            StoreConfig::default(),
        );
        (catalog, blobs, store)
    }

    /// Blob store that fails every write after reading part of the source.
    #[derive(Default)]
    struct FlakyBlobStore {
        inner: InMemoryBlobStore,
        failing: AtomicBool,
    }

    impl BlobStore for FlakyBlobStore {
        fn write(&self, digest: &Digest, source: &mut dyn Read) -> StoreResult<BlobWrite> {
            if self.failing.load(Ordering::SeqCst) {
                let mut partial = [0u8; 3];
                let _ = source.read(&mut partial)?;
                return Err(io::Error::other("disk full").into());
            }
            self.inner.write(digest, source)
        }
        fn open(&self, digest: &Digest) -> StoreResult<Option<Box<dyn Read + Send>>> {
            self.inner.open(digest)
        }
        fn exists(&self, digest: &Digest) -> StoreResult<bool> {
            self.inner.exists(digest)
        }
        fn discard(&self, digest: &Digest) -> StoreResult<bool> {
            self.inner.discard(digest)
        }
    }

    /// Catalog whose inserts fail while `failing` is set.
    #[derive(Default)]
    struct FlakyCatalog {
        inner: InMemoryCatalog,
        failing: AtomicBool,
    }

    impl Catalog for FlakyCatalog {
        fn get(&self, digest: &Digest) -> StoreResult<Option<StoredObject>> {
            self.inner.get(digest)
        }
        fn insert(&self, object: StoredObject) -> StoreResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(io::Error::other("catalog unreachable").into());
            }
            self.inner.insert(object)
        }
        fn record_duplicate(&self, digest: &Digest) -> StoreResult<StoredObject> {
            self.inner.record_duplicate(digest)
        }
        fn upload_count(&self, digest: &Digest) -> StoreResult<u64> {
            self.inner.upload_count(digest)
        }
        fn list(&self, filter: &ObjectFilter) -> StoreResult<Vec<StoredObject>> {
            self.inner.list(filter)
        }
        fn totals(&self) -> StoreResult<StorageStats> {
            self.inner.totals()
        }
    }

    /// Catalog that pretends the lookup missed once, to force the
    /// insert-race recovery path.
    #[derive(Default)]
    struct StaleLookupCatalog {
        inner: InMemoryCatalog,
        stale: AtomicBool,
    }

    impl Catalog for StaleLookupCatalog {
        fn get(&self, digest: &Digest) -> StoreResult<Option<StoredObject>> {
            if self.stale.swap(false, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.get(digest)
        }
        fn insert(&self, object: StoredObject) -> StoreResult<()> {
            self.inner.insert(object)
        }
        fn record_duplicate(&self, digest: &Digest) -> StoreResult<StoredObject> {
            self.inner.record_duplicate(digest)
        }
        fn upload_count(&self, digest: &Digest) -> StoreResult<u64> {
            self.inner.upload_count(digest)
        }
        fn list(&self, filter: &ObjectFilter) -> StoreResult<Vec<StoredObject>> {
            self.inner.list(filter)
        }
        fn totals(&self) -> StoreResult<StorageStats> {
            self.inner.totals()
        }
    }

    // -----------------------------------------------------------------------
    // New vs. duplicate
    // -----------------------------------------------------------------------

    #[test]
    fn hello_twice() {
        let (_, _, store) = memory_store();

        let first = submit_bytes(&store, "hello.txt", b"hello").unwrap();
        assert!(!first.is_duplicate);
        assert_eq!(first.bytes_saved, 0);
        assert_eq!(first.object.size, 5);

        let second = submit_bytes(&store, "hello-again.txt", b"hello").unwrap();
        assert!(second.is_duplicate);
        assert_eq!(second.bytes_saved, 5);

        let stats = store.compute_stats().unwrap();
        assert_eq!(stats.total_physical, 5);
        assert_eq!(stats.total_logical, 10);
        assert_eq!(stats.total_savings, 5);
    }

    #[test]
    fn duplicate_keeps_first_metadata() {
        let (_, _, store) = memory_store();
        let addressed = ADDRESSER.digest_bytes(b"same bytes");
        store
            .submit(addressed.digest, addressed.size, "first.txt", "text/plain", Cursor::new(b"same bytes"))
            .unwrap();
        let dup = store
            .submit(addressed.digest, addressed.size, "second.md", "text/markdown", Cursor::new(b"same bytes"))
            .unwrap();
        assert_eq!(dup.object.original_name, "first.txt");
        assert_eq!(dup.object.content_type, "text/plain");
    }

    #[test]
    fn duplicate_does_not_read_source() {
        let (_, _, store) = memory_store();
        submit_bytes(&store, "a", b"payload").unwrap();

        struct Untouchable;
        impl Read for Untouchable {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                panic!("duplicate path must not read the source");
            }
        }
        let addressed = ADDRESSER.digest_bytes(b"payload");
        let outcome = store
            .submit(addressed.digest, addressed.size, "b", "x", Untouchable)
            .unwrap();
        assert!(outcome.is_duplicate);
    }

    #[test]
    fn distinct_content_distinct_rows() {
        let (catalog, blobs, store) = memory_store();
        let a = submit_bytes(&store, "a", b"alpha").unwrap();
        let b = submit_bytes(&store, "b", b"bravo").unwrap();
        assert!(!a.is_duplicate);
        assert!(!b.is_duplicate);
        assert_ne!(a.object.digest, b.object.digest);
        assert_eq!(catalog.len(), 2);
        assert_eq!(blobs.len(), 2);
    }

    #[test]
    fn n_submissions_one_row() {
        let (catalog, blobs, store) = memory_store();
        let outcomes: Vec<_> = (0..7)
            .map(|i| submit_bytes(&store, &format!("copy-{i}"), b"repeat").unwrap())
            .collect();
        assert_eq!(outcomes.iter().filter(|o| o.is_duplicate).count(), 6);
        assert_eq!(catalog.len(), 1);
        assert_eq!(blobs.len(), 1);
        let digest = outcomes[0].object.digest;
        assert_eq!(store.upload_count(&digest).unwrap(), 7);
    }

    #[test]
    fn stats_for_a_b_a() {
        let (_, _, store) = memory_store();
        let a = vec![b'a'; 100];
        let b = vec![b'b'; 200];
        submit_bytes(&store, "a", &a).unwrap();
        submit_bytes(&store, "b", &b).unwrap();
        submit_bytes(&store, "a", &a).unwrap();

        let stats = store.compute_stats().unwrap();
        assert_eq!(stats.total_physical, 300);
        assert_eq!(stats.total_logical, 400);
        assert_eq!(stats.total_savings, 100);
        assert_eq!(stats.object_count, 2);
        assert_eq!(stats.upload_count, 3);
    }

    #[test]
    fn stored_at_comes_from_clock() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = DedupStore::new(
            Arc::new(InMemoryCatalog::new()),
            Arc::new(InMemoryBlobStore::new()),
            clock.clone(),
            StoreConfig::default(),
        );
        let first = submit_bytes(&store, "a", b"one").unwrap();
        clock.advance(Duration::hours(1));
        let dup = submit_bytes(&store, "a", b"one").unwrap();
        assert_eq!(first.object.stored_at, start);
        assert_eq!(dup.object.stored_at, start);
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_same_new_object() {
        let (catalog, blobs, store) = memory_store();
        let store = Arc::new(store);
        let data: Vec<u8> = (0..1024u32).map(|i| (i % 256) as u8).collect();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                let data = data.clone();
                thread::spawn(move || {
                    barrier.wait();
                    submit_bytes(&store, &format!("caller-{i}"), &data).unwrap()
                })
            })
            .collect();
        let outcomes: Vec<UploadOutcome> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .collect();

        assert_eq!(outcomes.iter().filter(|o| o.is_duplicate).count(), 1);
        assert_eq!(catalog.len(), 1);
        assert_eq!(blobs.len(), 1);
        assert_eq!(catalog.list(&ObjectFilter::new()).unwrap()[0].size, 1024);
    }

    #[test]
    fn concurrent_mixed_uploads_keep_ledger_consistent() {
        let (_, _, store) = memory_store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..25u32 {
                        // 5 distinct payloads shared across threads.
                        let payload = format!("payload-{}", (i + t) % 5).into_bytes();
                        submit_bytes(&store, "f", &payload).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = store.compute_stats().unwrap();
        assert_eq!(stats.object_count, 5);
        assert_eq!(stats.upload_count, 200);
        assert_eq!(stats.total_physical, 5 * 9);
        assert_eq!(stats.total_logical, 200 * 9);
    }

    #[test]
    fn stats_snapshots_stay_consistent_under_writers() {
        let (_, _, store) = memory_store();
        let store = Arc::new(store);
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let store = Arc::clone(&store);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut snapshots = 0u32;
                    while !done.load(Ordering::SeqCst) || snapshots == 0 {
                        let stats = store.compute_stats().unwrap();
                        assert!(stats.total_logical >= stats.total_physical, "{stats:?}");
                        assert_eq!(
                            stats.total_savings,
                            stats.total_logical - stats.total_physical,
                            "{stats:?}"
                        );
                        snapshots += 1;
                    }
                })
            })
            .collect();
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..50u32 {
                        let payload = format!("shared-{}-{}", i % 7, "x".repeat((t + i) as usize % 3));
                        submit_bytes(&store, "w", payload.as_bytes()).unwrap();
                    }
                })
            })
            .collect();

        for h in writers {
            h.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        for h in readers {
            h.join().unwrap();
        }
        assert_eq!(store.compute_stats().unwrap().upload_count, 200);
    }

    /// Reader that panics on its first read.
    struct PanickingReader;

    impl Read for PanickingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            panic!("reader blew up");
        }
    }

    #[test]
    fn panicking_source_does_not_wedge_its_digest() {
        let (_, blobs, store) = memory_store();
        let addressed = ADDRESSER.digest_bytes(b"after the panic");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.submit(addressed.digest, addressed.size, "p", "text/plain", PanickingReader)
        }));
        assert!(result.is_err());
        assert_eq!(blobs.len(), 0);

        let outcome = submit_bytes(&store, "ok", b"after the panic").unwrap();
        assert!(!outcome.is_duplicate);
        assert_eq!(outcome.object.original_name, "ok");
        assert_eq!(store.compute_stats().unwrap().upload_count, 1);
    }

    #[test]
    fn lost_insert_race_resolves_as_duplicate() {
        let catalog = Arc::new(StaleLookupCatalog::default());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let store = DedupStore::new(
            catalog.clone(),
            blobs.clone(),
            Arc::new(SystemClock::new()),
            StoreConfig::default(),
        );
        submit_bytes(&store, "a", b"race").unwrap();

        catalog.stale.store(true, Ordering::SeqCst);
        let outcome = submit_bytes(&store, "b", b"race").unwrap();
        assert!(outcome.is_duplicate);
        assert_eq!(outcome.bytes_saved, 4);
        // The pre-existing content was not rolled back.
        assert_eq!(blobs.len(), 1);
        assert_eq!(store.compute_stats().unwrap().total_logical, 8);
    }

    // -----------------------------------------------------------------------
    // Failure atomicity
    // -----------------------------------------------------------------------

    #[test]
    fn write_failure_commits_nothing_and_retry_is_new() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let blobs = Arc::new(FlakyBlobStore::default());
        let store = DedupStore::new(
            catalog.clone(),
            blobs.clone(),
            Arc::new(SystemClock::new()),
            StoreConfig::default(),
        );

        blobs.failing.store(true, Ordering::SeqCst);
        let err = submit_bytes(&store, "big.bin", b"partially written").unwrap_err();
        assert!(matches!(err, StoreError::StorageWrite { .. }));
        assert!(err.is_retryable());
        assert!(catalog.is_empty());
        assert_eq!(store.compute_stats().unwrap(), StorageStats::default());

        blobs.failing.store(false, Ordering::SeqCst);
        let retry = submit_bytes(&store, "big.bin", b"partially written").unwrap();
        assert!(!retry.is_duplicate);
        assert_eq!(store.compute_stats().unwrap().total_logical, 17);
    }

    #[test]
    fn catalog_failure_discards_written_bytes() {
        let catalog = Arc::new(FlakyCatalog::default());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let store = DedupStore::new(
            catalog.clone(),
            blobs.clone(),
            Arc::new(SystemClock::new()),
            StoreConfig::default(),
        );

        catalog.failing.store(true, Ordering::SeqCst);
        let err = submit_bytes(&store, "a", b"orphan?").unwrap_err();
        assert!(matches!(err, StoreError::StorageWrite { .. }));
        assert!(blobs.is_empty());
        assert_eq!(store.compute_stats().unwrap().total_logical, 0);

        catalog.failing.store(false, Ordering::SeqCst);
        assert!(!submit_bytes(&store, "a", b"orphan?").unwrap().is_duplicate);
        assert_eq!(blobs.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Verification
    // -----------------------------------------------------------------------

    #[test]
    fn mismatched_content_is_rejected() {
        let (catalog, blobs, store) = memory_store();
        let claimed = ADDRESSER.digest_bytes(b"expected");
        let err = store
            .submit(claimed.digest, claimed.size, "x", "y", Cursor::new(b"imposter"))
            .unwrap_err();
        assert!(matches!(err, StoreError::ContentMismatch { .. }));
        assert!(catalog.is_empty());
        assert!(blobs.is_empty());
    }

    #[test]
    fn unverified_store_still_checks_size() {
        let config = StoreConfig {
            verify_content: false,
            ..StoreConfig::default()
        };
        let store = DedupStore::in_memory(config);
        let claimed = ADDRESSER.digest_bytes(b"four");
        let err = store
            .submit(claimed.digest, 5, "x", "y", Cursor::new(b"four"))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::SizeMismatch {
                declared: 5,
                actual: 4,
                ..
            }
        ));
        assert_eq!(store.compute_stats().unwrap().object_count, 0);
    }

    #[test]
    fn unverified_store_trusts_digest() {
        let config = StoreConfig {
            verify_content: false,
            ..StoreConfig::default()
        };
        let store = DedupStore::in_memory(config);
        let claimed = ADDRESSER.digest_bytes(b"abcd");
        let outcome = store
            .submit(claimed.digest, 4, "x", "y", Cursor::new(b"wxyz"))
            .unwrap();
        assert!(!outcome.is_duplicate);
    }

    // -----------------------------------------------------------------------
    // Retrieval and queries
    // -----------------------------------------------------------------------

    #[test]
    fn read_content_roundtrip() {
        let (_, _, store) = memory_store();
        let outcome = submit_bytes(&store, "doc", b"document body").unwrap();
        let digest = outcome.object.digest;
        assert_eq!(store.read_content(&digest).unwrap(), b"document body");

        let (object, mut reader) = store.open_content(&digest).unwrap();
        assert_eq!(object.original_name, "doc");
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"document body");
    }

    #[test]
    fn read_unknown_is_not_found() {
        let (_, _, store) = memory_store();
        let err = store.read_content(&Digest::from_hash([1; 32])).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn list_filters_by_type() {
        let (_, _, store) = memory_store();
        let png = ADDRESSER.digest_bytes(b"\x89PNG");
        store
            .submit(png.digest, png.size, "logo.png", "image/png", Cursor::new(b"\x89PNG"))
            .unwrap();
        submit_bytes(&store, "blob", b"raw").unwrap();

        let images = store
            .list(&ObjectFilter::new().content_type("image/png"))
            .unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].original_name, "logo.png");
        assert_eq!(store.list(&ObjectFilter::new()).unwrap().len(), 2);
    }

    #[test]
    fn inverted_size_range_is_rejected() {
        let (_, _, store) = memory_store();
        let err = store
            .list(&ObjectFilter::new().size_range(Some(10), Some(1)))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidFilter(_)));
    }

    // -----------------------------------------------------------------------
    // Durable store
    // -----------------------------------------------------------------------

    #[test]
    fn durable_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            sync_mode: SyncMode::OsDefault,
            ..StoreConfig::default()
        };
        let digest = {
            let store = DedupStore::open(dir.path(), config.clone()).unwrap();
            let outcome = submit_bytes(&store, "hello.txt", b"hello").unwrap();
            submit_bytes(&store, "hello.txt", b"hello").unwrap();
            outcome.object.digest
        };

        let store = DedupStore::open(dir.path(), config).unwrap();
        let stats = store.compute_stats().unwrap();
        assert_eq!(stats.total_physical, 5);
        assert_eq!(stats.total_logical, 10);
        assert_eq!(store.read_content(&digest).unwrap(), b"hello");
        assert!(submit_bytes(&store, "again", b"hello").unwrap().is_duplicate);
    }

    #[test]
    fn second_open_of_a_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let first = DedupStore::open(dir.path(), StoreConfig::default()).unwrap();
        submit_bytes(&first, "a", b"held").unwrap();

        let err = DedupStore::open(dir.path(), StoreConfig::default()).unwrap_err();
        assert!(matches!(err, StoreError::Locked(ref root) if root == dir.path()), "{err:?}");
        assert!(err.to_string().contains("already open"));
        // The refused open left the live handle's journal alone.
        assert_eq!(first.compute_stats().unwrap().upload_count, 1);

        drop(first);
        let reopened = DedupStore::open(dir.path(), StoreConfig::default()).unwrap();
        assert_eq!(reopened.compute_stats().unwrap().upload_count, 1);
    }

    #[test]
    fn durable_store_seekable_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = DedupStore::open(dir.path(), StoreConfig::default()).unwrap();

        let mut spool = tempfile::tempfile().unwrap();
        io::Write::write_all(&mut spool, b"spooled upload").unwrap();
        let addressed = ADDRESSER.digest_seekable(&mut spool).unwrap();
        let outcome = store
            .submit(addressed.digest, addressed.size, "spool", "text/plain", spool)
            .unwrap();
        assert_eq!(outcome.object.size, 14);
        assert_eq!(store.read_content(&addressed.digest).unwrap(), b"spooled upload");
    }

    #[test]
    fn debug_format() {
        let store = DedupStore::in_memory(StoreConfig::default());
        let debug = format!("{store:?}");
        assert!(debug.contains("DedupStore"));
        assert!(debug.contains("stripes"));
    }
}
