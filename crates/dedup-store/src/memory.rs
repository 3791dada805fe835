use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::RwLock;

use dedup_types::{Digest, ObjectFilter, StorageStats, StoredObject};

use crate::error::{StoreError, StoreResult};
use crate::traits::{BlobStore, BlobWrite, Catalog};

/// A catalog row: the stored object plus how many uploads resolved to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CatalogEntry {
    pub(crate) object: StoredObject,
    pub(crate) uploads: u64,
}

/// Rows and running totals. Shared by the in-memory and journal catalogs.
#[derive(Debug, Default)]
pub(crate) struct CatalogState {
    entries: HashMap<Digest, CatalogEntry>,
    total_physical: u64,
    total_logical: u64,
    upload_count: u64,
}

impl CatalogState {
    pub(crate) fn get(&self, digest: &Digest) -> Option<&StoredObject> {
        self.entries.get(digest).map(|e| &e.object)
    }

    pub(crate) fn contains(&self, digest: &Digest) -> bool {
        self.entries.contains_key(digest)
    }

    /// Add a row counting its first upload. Caller checked uniqueness.
    pub(crate) fn apply_insert(&mut self, object: StoredObject) {
        let size = object.size;
        self.entries
            .insert(object.digest, CatalogEntry { object, uploads: 1 });
        self.total_physical += size;
        self.total_logical += size;
        self.upload_count += 1;
    }

    /// Count one more upload of an existing row.
    pub(crate) fn apply_duplicate(&mut self, digest: &Digest) -> StoreResult<StoredObject> {
        let entry = self
            .entries
            .get_mut(digest)
            .ok_or(StoreError::NotFound(*digest))?;
        entry.uploads += 1;
        self.total_logical += entry.object.size;
        self.upload_count += 1;
        Ok(entry.object.clone())
    }

    pub(crate) fn uploads(&self, digest: &Digest) -> u64 {
        self.entries.get(digest).map_or(0, |e| e.uploads)
    }

    pub(crate) fn list(&self, filter: &ObjectFilter) -> Vec<StoredObject> {
        let mut rows: Vec<StoredObject> = self
            .entries
            .values()
            .map(|e| &e.object)
            .filter(|obj| filter.matches(obj))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.stored_at
                .cmp(&b.stored_at)
                .then_with(|| a.digest.cmp(&b.digest))
        });
        rows
    }

    pub(crate) fn stats(&self) -> StorageStats {
        StorageStats::from_totals(
            self.total_physical,
            self.total_logical,
            self.entries.len() as u64,
            self.upload_count,
        )
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// In-memory, HashMap-based catalog.
///
/// Intended for tests and embedding. Rows and totals live behind one
/// `RwLock`, so a stats snapshot always sees a row together with its ledger
/// contribution.
#[derive(Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.state.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the catalog has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Catalog for InMemoryCatalog {
    fn get(&self, digest: &Digest) -> StoreResult<Option<StoredObject>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.get(digest).cloned())
    }

    fn insert(&self, object: StoredObject) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.contains(&object.digest) {
            return Err(StoreError::DuplicateKey(object.digest));
        }
        state.apply_insert(object);
        Ok(())
    }

    fn record_duplicate(&self, digest: &Digest) -> StoreResult<StoredObject> {
        self.state
            .write()
            .expect("lock poisoned")
            .apply_duplicate(digest)
    }

    fn upload_count(&self, digest: &Digest) -> StoreResult<u64> {
        Ok(self.state.read().expect("lock poisoned").uploads(digest))
    }

    fn list(&self, filter: &ObjectFilter) -> StoreResult<Vec<StoredObject>> {
        Ok(self.state.read().expect("lock poisoned").list(filter))
    }

    fn totals(&self) -> StoreResult<StorageStats> {
        Ok(self.state.read().expect("lock poisoned").stats())
    }
}

impl std::fmt::Debug for InMemoryCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCatalog")
            .field("object_count", &self.len())
            .finish()
    }
}

/// In-memory blob store.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<Digest, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes across all blobs.
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .read()
            .expect("lock poisoned")
            .values()
            .map(|b| b.len() as u64)
            .sum()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn write(&self, digest: &Digest, source: &mut dyn Read) -> StoreResult<BlobWrite> {
        // Drain before taking the lock; a failing source leaves nothing behind.
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        let bytes_written = data.len() as u64;

        let mut map = self.blobs.write().expect("lock poisoned");
        let created = !map.contains_key(digest);
        if created {
            map.insert(*digest, data);
        }
        Ok(BlobWrite {
            bytes_written,
            created,
        })
    }

    fn open(&self, digest: &Digest) -> StoreResult<Option<Box<dyn Read + Send>>> {
        let data = self.blobs.read().expect("lock poisoned").get(digest).cloned();
        Ok(data.map(|data| Box::new(Cursor::new(data)) as Box<dyn Read + Send>))
    }

    fn exists(&self, digest: &Digest) -> StoreResult<bool> {
        Ok(self.blobs.read().expect("lock poisoned").contains_key(digest))
    }

    fn discard(&self, digest: &Digest) -> StoreResult<bool> {
        Ok(self
            .blobs
            .write()
            .expect("lock poisoned")
            .remove(digest)
            .is_some())
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &self.len())
            .finish()
    }
}
