use serde::{Deserialize, Serialize};

/// Flush/sync strategy for durable backends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` before acknowledging every write (safest, highest latency).
    #[default]
    EveryWrite,
    /// Rely on OS page-cache buffering (fastest, least durable).
    OsDefault,
}

impl SyncMode {
    pub fn syncs(&self) -> bool {
        matches!(self, Self::EveryWrite)
    }
}

/// Configuration for a [`DedupStore`](crate::DedupStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Re-hash new content while writing it and reject bytes that do not
    /// address to the declared digest.
    pub verify_content: bool,
    /// Number of lock stripes serializing submissions per digest.
    pub lock_stripes: usize,
    /// Sync strategy for the blob and journal files.
    pub sync_mode: SyncMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            verify_content: true,
            lock_stripes: 64,
            sync_mode: SyncMode::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert!(c.verify_content);
        assert_eq!(c.lock_stripes, 64);
        assert_eq!(c.sync_mode, SyncMode::EveryWrite);
        assert!(c.sync_mode.syncs());
    }

    #[test]
    fn os_default_does_not_sync() {
        assert!(!SyncMode::OsDefault.syncs());
    }
}
