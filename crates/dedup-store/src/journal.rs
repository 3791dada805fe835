use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use dedup_types::{Digest, ObjectFilter, StorageStats, StoredObject};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SyncMode;
use crate::error::{StoreError, StoreResult};
use crate::memory::CatalogState;
use crate::traits::Catalog;

/// One catalog mutation as persisted in the journal.
///
/// On-disk framing:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of length bytes + payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized JournalRecord)]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalRecord {
    /// A new row, counted as its first upload.
    Inserted(StoredObject),
    /// One more upload of an existing row.
    Duplicate(Digest),
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// CRC over the length field and the payload, so a damaged length is caught
/// like a damaged payload.
fn frame_crc(length: u32, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&length.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Append-only journal file.
struct Journal {
    file: File,
    /// Length of the valid prefix; the next record starts here.
    offset: u64,
}

impl Journal {
    /// Append one framed record. On failure the file is cut back to the last
    /// complete record so a torn frame never precedes later appends.
    fn append(&mut self, record: &JournalRecord, sync_mode: SyncMode) -> StoreResult<u64> {
        let payload =
            bincode::serialize(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let length = u32::try_from(payload.len())
            .map_err(|_| StoreError::Serialization("journal record too large".into()))?;
        let crc = frame_crc(length, &payload);

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&length.to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&payload);

        let entry_offset = self.offset;
        let result = self.file.write_all(&frame).and_then(|()| {
            if sync_mode.syncs() {
                self.file.sync_data()
            } else {
                self.file.flush()
            }
        });
        if let Err(e) = result {
            if let Err(trunc) = self.file.set_len(entry_offset) {
                warn!(offset = entry_offset, error = %trunc, "failed to cut back torn journal frame");
            }
            return Err(e.into());
        }

        self.offset += frame.len() as u64;
        debug!(offset = entry_offset, len = payload.len(), "journal append");
        Ok(entry_offset)
    }
}

/// Outcome of scanning a journal file.
struct Recovery {
    records: Vec<JournalRecord>,
    /// Length of the prefix made of complete frames.
    valid_len: u64,
}

/// Read every intact record. Frames failing the CRC are skipped; a frame
/// running past the end of the file ends the scan. Nothing is modified.
fn recover(path: &Path) -> StoreResult<Recovery> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut offset: u64 = 0;

    while offset + HEADER_SIZE as u64 <= file_len {
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
            warn!(offset, length, file_len, "torn journal tail; stopping recovery");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        reader.read_exact(&mut payload)?;
        offset += HEADER_SIZE as u64 + length as u64;

        let actual_crc = frame_crc(length, &payload);
        if actual_crc != expected_crc {
            warn!(
                offset,
                expected = expected_crc,
                actual = actual_crc,
                "CRC mismatch; skipping journal record"
            );
            continue;
        }

        match bincode::deserialize::<JournalRecord>(&payload) {
            Ok(record) => records.push(record),
            Err(e) => warn!(offset, error = %e, "undecodable journal record; skipping"),
        }
    }

    Ok(Recovery {
        records,
        valid_len: offset,
    })
}

/// Copy everything from `offset` to the end of the journal into a sibling
/// `<name>.corrupt-<offset>` file. Existing copies are never overwritten.
fn preserve_tail(path: &Path, offset: u64) -> StoreResult<PathBuf> {
    let mut source = File::open(path)?;
    source.seek(SeekFrom::Start(offset))?;

    let base = format!(
        "{}.corrupt-{offset}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "journal".into())
    );
    let mut attempt = 0u32;
    let (aside, mut target) = loop {
        let name = if attempt == 0 {
            base.clone()
        } else {
            format!("{base}.{attempt}")
        };
        let candidate = path.with_file_name(name);
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => break (candidate, file),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    };
    io::copy(&mut source, &mut target)?;
    target.sync_all()?;
    Ok(aside)
}

/// Durable catalog backed by an append-only journal.
///
/// Every mutation is framed, CRC-checked and appended to a single file
/// before it is applied to the in-memory view. Opening the catalog replays
/// the journal, so rows and the upload ledger survive restarts. A mutation
/// whose append fails is never applied.
pub struct JournalCatalog {
    path: PathBuf,
    sync_mode: SyncMode,
    journal: Mutex<Journal>,
    state: RwLock<CatalogState>,
}

impl JournalCatalog {
    /// Open (or create) the journal at `path` and replay it.
    pub fn open(path: &Path, sync_mode: SyncMode) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let Recovery { records, valid_len } = recover(path)?;
        let file_len = file.metadata()?.len();
        if file_len > valid_len {
            let aside = preserve_tail(path, valid_len)?;
            warn!(
                valid_len,
                tail_len = file_len - valid_len,
                aside = %aside.display(),
                "unreadable journal tail copied aside and truncated"
            );
            file.set_len(valid_len)?;
        }

        let mut state = CatalogState::default();
        let replayed = records.len();
        for record in records {
            match record {
                JournalRecord::Inserted(object) => {
                    if state.contains(&object.digest) {
                        warn!(digest = %object.digest.short_hex(), "duplicate insert in journal; keeping first");
                    } else {
                        state.apply_insert(object);
                    }
                }
                JournalRecord::Duplicate(digest) => {
                    if state.apply_duplicate(&digest).is_err() {
                        warn!(digest = %digest.short_hex(), "journal references unknown digest; skipping");
                    }
                }
            }
        }
        info!(path = %path.display(), records = replayed, objects = state.len(), "catalog journal replayed");

        Ok(Self {
            path: path.to_path_buf(),
            sync_mode,
            journal: Mutex::new(Journal {
                file,
                offset: valid_len,
            }),
            state: RwLock::new(state),
        })
    }

    /// Path to the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current journal length in bytes.
    pub fn journal_len(&self) -> u64 {
        self.journal.lock().expect("journal mutex poisoned").offset
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.state.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(&self, record: &JournalRecord) -> StoreResult<()> {
        self.journal
            .lock()
            .expect("journal mutex poisoned")
            .append(record, self.sync_mode)
            .map(|_| ())
    }
}

impl Catalog for JournalCatalog {
    fn get(&self, digest: &Digest) -> StoreResult<Option<StoredObject>> {
        Ok(self.state.read().expect("lock poisoned").get(digest).cloned())
    }

    fn insert(&self, object: StoredObject) -> StoreResult<()> {
        // Holding the state lock across the append keeps journal order and
        // view order identical.
        let mut state = self.state.write().expect("lock poisoned");
        if state.contains(&object.digest) {
            return Err(StoreError::DuplicateKey(object.digest));
        }
        self.append(&JournalRecord::Inserted(object.clone()))?;
        state.apply_insert(object);
        Ok(())
    }

    fn record_duplicate(&self, digest: &Digest) -> StoreResult<StoredObject> {
        let mut state = self.state.write().expect("lock poisoned");
        if !state.contains(digest) {
            return Err(StoreError::NotFound(*digest));
        }
        self.append(&JournalRecord::Duplicate(*digest))?;
        state.apply_duplicate(digest)
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

impl std::fmt::Debug for JournalCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalCatalog")
            .field("path", &self.path)
            .field("object_count", &self.len())
            .finish()
    }
}
