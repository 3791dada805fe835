use serde::{Deserialize, Serialize};

/// Storage-efficiency snapshot.
///
/// `total_logical` counts every upload attempt, duplicates included;
/// `total_physical` counts each unique object once. The difference is what
/// deduplication saved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    /// Bytes actually held in storage (one copy per digest).
    pub total_physical: u64,
    /// Bytes that would be held if every upload were stored independently.
    pub total_logical: u64,
    /// `total_logical - total_physical`.
    pub total_savings: u64,
    /// Number of unique stored objects.
    #[serde(default)]
    pub object_count: u64,
    /// Number of upload attempts, duplicates included.
    #[serde(default)]
    pub upload_count: u64,
}

impl StorageStats {
    /// Build a snapshot from the two running totals.
    ///
    /// A ledger where logical is below physical is a bookkeeping bug; savings
    /// saturate at zero rather than wrap.
    pub fn from_totals(
        total_physical: u64,
        total_logical: u64,
        object_count: u64,
        upload_count: u64,
    ) -> Self {
        debug_assert!(total_logical >= total_physical);
        Self {
            total_physical,
            total_logical,
            total_savings: total_logical.saturating_sub(total_physical),
            object_count,
            upload_count,
        }
    }

    /// Fraction of logical bytes avoided by deduplication, in `[0, 1]`.
    pub fn savings_ratio(&self) -> f64 {
        if self.total_logical == 0 {
            0.0
        } else {
            self.total_savings as f64 / self.total_logical as f64
        }
    }
}
