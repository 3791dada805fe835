//! Deduplicating object storage.
//!
//! Every upload is keyed by the digest of its bytes. The first upload of a
//! digest writes the content once and commits a catalog row; every later
//! upload of the same digest is a duplicate that only bumps the logical
//! usage ledger. [`DedupStore`] is the single place that decision is made.
//!
//! # Storage Backends
//!
//! Rows live in a [`Catalog`], bytes in a [`BlobStore`]:
//!
//! - [`InMemoryCatalog`] / [`InMemoryBlobStore`] -- `HashMap`-based, for tests
//!   and embedding
//! - [`JournalCatalog`] -- append-only, CRC-framed journal replayed on open
//! - [`FsBlobStore`] -- one file per digest, written via temp file + rename
//!
//! # Design Rules
//!
//! 1. At most one catalog row and one stored copy per digest.
//! 2. Content is written before its row; a row never points at missing bytes.
//! 3. A failed submission leaves no row and no ledger change.
//! 4. Duplicates never rewrite the first uploader's metadata.
//! 5. `total_physical <= total_logical`, always.
//! 6. One open handle per durable store root, enforced by [`RootLock`].

pub mod config;
pub mod dedup;
pub mod error;
pub mod fs;
pub mod journal;
pub mod lock;
pub mod memory;
pub mod traits;

pub use config::{StoreConfig, SyncMode};
pub use dedup::{DedupStore, JOURNAL_FILE};
pub use error::{StoreError, StoreResult};
pub use fs::FsBlobStore;
pub use journal::{JournalCatalog, JournalRecord};
pub use lock::{RootLock, LOCK_FILE};
pub use memory::{InMemoryBlobStore, InMemoryCatalog};
pub use traits::{BlobStore, BlobWrite, Catalog};
