//! Content addressing for the dedup object store.
//!
//! [`ContentAddresser`] turns an object's byte stream into a [`Digest`] and
//! an exact byte count, incrementally, so objects of any size can be
//! addressed without buffering them. [`HashingReader`] does the same while
//! the bytes are being copied elsewhere.
//!
//! All hashing wraps the `blake3` crate -- no custom cryptography.
//!
//! [`Digest`]: dedup_types::Digest

pub mod addresser;

pub use addresser::{Addressed, AddressingContext, ContentAddresser, HashingReader};
