//! Foundation types for the dedup object store.
//!
//! Every other dedup crate depends on `dedup-types`.
//!
//! # Key Types
//!
//! - [`Digest`] -- content-derived identity (BLAKE3 hash of the full object)
//! - [`StoredObject`] -- One physically-stored unique object
//! - [`UploadOutcome`] -- Transient result of one upload attempt
//! - [`StorageStats`] -- Physical vs. logical usage snapshot
//! - [`ObjectFilter`] -- Read-only metadata query
//! - [`Clock`] -- Timestamp source for `stored_at`

pub mod clock;
pub mod digest;
pub mod error;
pub mod filter;
pub mod object;
pub mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use digest::{Digest, DIGEST_LEN};
pub use error::TypeError;
pub use filter::ObjectFilter;
pub use object::{StoredObject, UploadOutcome};
pub use stats::StorageStats;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn digest_hex_roundtrip(bytes in proptest::array::uniform32(any::<u8>())) {
            let digest = Digest::from_hash(bytes);
            prop_assert_eq!(Digest::from_hex(&digest.to_hex()).unwrap(), digest);
        }

        #[test]
        fn stats_savings_never_negative(physical in 0u64..1 << 40, extra in 0u64..1 << 40) {
            let stats = StorageStats::from_totals(physical, physical + extra, 0, 0);
            prop_assert_eq!(stats.total_savings, extra);
            prop_assert!(stats.total_logical >= stats.total_physical);
        }
    }
}
