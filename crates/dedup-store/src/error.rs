use dedup_types::Digest;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(Digest),

    /// A row for this digest already exists. Raised by the catalog's
    /// uniqueness constraint when two writers race on the same new digest;
    /// [`DedupStore::submit`](crate::DedupStore::submit) recovers from it.
    #[error("duplicate key: {0}")]
    DuplicateKey(Digest),

    /// Content or its metadata row could not be durably written. Nothing
    /// was committed for this digest.
    #[error("failed to store object {digest}: {source}")]
    StorageWrite {
        digest: Digest,
        #[source]
        source: Box<StoreError>,
    },

    /// A lookup or stats query failed.
    #[error("storage read failed: {0}")]
    StorageRead(#[source] Box<StoreError>),

    /// The bytes handed to the store do not match the declared digest/size.
    #[error(
        "content mismatch for {declared}: declared {declared_size} bytes, \
         received {actual_size} bytes addressing to {actual}"
    )]
    ContentMismatch {
        declared: Digest,
        declared_size: u64,
        actual: Digest,
        actual_size: u64,
    },

    /// Declared size does not match the number of bytes received.
    #[error("size mismatch for {digest}: declared {declared}, received {actual}")]
    SizeMismatch {
        digest: Digest,
        declared: u64,
        actual: u64,
    },

    /// Another handle already owns this store root.
    #[error("store at {} is already open (LOCK held by another handle)", .0.display())]
    Locked(std::path::PathBuf),

    /// A list query was rejected before reaching the catalog.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Persisted data is malformed.
    #[error("corrupt store data: {0}")]
    Corrupt(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Wrap a backend failure on the write path for `digest`.
    ///
    /// Errors that already describe the outcome of a submission
    /// (`DuplicateKey`, mismatches, an existing `StorageWrite`) pass through.
    pub fn into_write_error(self, digest: Digest) -> Self {
        match self {
            Self::DuplicateKey(_)
            | Self::StorageWrite { .. }
            | Self::ContentMismatch { .. }
            | Self::SizeMismatch { .. } => self,
            other => Self::StorageWrite {
                digest,
                source: Box::new(other),
            },
        }
    }

    /// Wrap a backend failure on a read path.
    pub fn into_read_error(self) -> Self {
        match self {
            Self::StorageRead(_) | Self::NotFound(_) | Self::InvalidFilter(_) => self,
            other => Self::StorageRead(Box::new(other)),
        }
    }

    /// Returns `true` if the caller may retry the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageWrite { .. } | Self::StorageRead(_) | Self::DuplicateKey(_) | Self::Io(_)
        )
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
