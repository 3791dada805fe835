use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// One physically-stored unique object.
///
/// Exactly one `StoredObject` exists per distinct [`Digest`]. The record is
/// created on the first upload of its content and never mutated afterwards:
/// `original_name` and `content_type` belong to the first uploader, and later
/// duplicate uploads do not overwrite them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Hash of the full content. Unique key.
    pub digest: Digest,
    /// Exact byte count that was hashed to produce `digest`.
    pub size: u64,
    /// Display name supplied by the first uploader. Not part of identity.
    pub original_name: String,
    /// Declared MIME type supplied by the first uploader. Not part of identity.
    pub content_type: String,
    /// When the object was first stored.
    pub stored_at: DateTime<Utc>,
}

impl StoredObject {
    pub fn new(
        digest: Digest,
        size: u64,
        original_name: impl Into<String>,
        content_type: impl Into<String>,
        stored_at: DateTime<Utc>,
    ) -> Self {
        Self {
            digest,
            size,
            original_name: original_name.into(),
            content_type: content_type.into(),
            stored_at,
        }
    }
}

/// Result of a single upload attempt. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    /// The object the upload resolved to (new or pre-existing).
    pub object: StoredObject,
    /// `true` if the content was already stored.
    pub is_duplicate: bool,
    /// Bytes not written because of deduplication.
    pub bytes_saved: u64,
}

impl UploadOutcome {
    /// Outcome for content seen for the first time.
    pub fn new_object(object: StoredObject) -> Self {
        Self {
            object,
            is_duplicate: false,
            bytes_saved: 0,
        }
    }

    /// Outcome for content that resolved to an existing object.
    pub fn duplicate(existing: StoredObject) -> Self {
        let bytes_saved = existing.size;
        Self {
            object: existing,
            is_duplicate: true,
            bytes_saved,
        }
    }
}
