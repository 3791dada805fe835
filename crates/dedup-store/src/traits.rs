use std::io::Read;

use dedup_types::{Digest, ObjectFilter, StorageStats, StoredObject};

use crate::error::StoreResult;

/// Durable keyed metadata store plus the upload ledger.
///
/// All implementations must satisfy these invariants:
/// - At most one row per digest. `insert` of an existing digest fails with
///   [`StoreError::DuplicateKey`](crate::StoreError::DuplicateKey) and
///   changes nothing.
/// - Rows are never mutated; only the per-digest upload counter grows.
/// - A row and its ledger contribution become visible together. `totals`
///   never observes one without the other.
/// - A failed call leaves no trace.
pub trait Catalog: Send + Sync {
    /// Look up a row by digest (equality only).
    fn get(&self, digest: &Digest) -> StoreResult<Option<StoredObject>>;

    /// Commit a new row and count its first upload.
    fn insert(&self, object: StoredObject) -> StoreResult<()>;

    /// Count one more upload of an existing digest and return its row.
    ///
    /// Fails with `NotFound` if the digest has no row.
    fn record_duplicate(&self, digest: &Digest) -> StoreResult<StoredObject>;

    /// Number of uploads recorded for `digest` (0 if unknown).
    fn upload_count(&self, digest: &Digest) -> StoreResult<u64>;

    /// Rows matching `filter`, ordered by `stored_at` then digest.
    fn list(&self, filter: &ObjectFilter) -> StoreResult<Vec<StoredObject>>;

    /// Consistent snapshot of the physical and logical totals.
    fn totals(&self) -> StoreResult<StorageStats>;
}

/// Result of a blob write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlobWrite {
    /// Bytes consumed from the source.
    pub bytes_written: u64,
    /// `false` if bytes for this digest were already present and the new
    /// copy was dropped.
    pub created: bool,
}

/// Write-once byte storage keyed by digest.
///
/// A write either lands completely under its key or leaves nothing behind.
/// Existing content is never overwritten.
pub trait BlobStore: Send + Sync {
    /// Drain `source` and store it under `digest`.
    fn write(&self, digest: &Digest, source: &mut dyn Read) -> StoreResult<BlobWrite>;

    /// Open a streaming reader over the content stored under `digest`.
    fn open(&self, digest: &Digest) -> StoreResult<Option<Box<dyn Read + Send>>>;

    /// Check whether content exists under `digest`.
    fn exists(&self, digest: &Digest) -> StoreResult<bool>;

    /// Remove content under `digest`. Returns `true` if it existed.
    ///
    /// Only used to roll back a write whose metadata row failed to commit.
    fn discard(&self, digest: &Digest) -> StoreResult<bool>;
}
