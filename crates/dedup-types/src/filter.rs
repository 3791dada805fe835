use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::object::StoredObject;

/// Read-only predicate over [`StoredObject`] metadata.
///
/// Every field is optional; an empty filter matches everything. Range bounds
/// are inclusive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFilter {
    /// Exact match on the declared MIME type.
    pub content_type: Option<String>,
    pub size_min: Option<u64>,
    pub size_max: Option<u64>,
    pub stored_after: Option<DateTime<Utc>>,
    pub stored_before: Option<DateTime<Utc>>,
    /// Case-insensitive substring of `original_name`.
    pub name_contains: Option<String>,
}

impl ObjectFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn size_range(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.size_min = min;
        self.size_max = max;
        self
    }

    pub fn stored_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.stored_after = after;
        self.stored_before = before;
        self
    }

    pub fn name_contains(mut self, needle: impl Into<String>) -> Self {
        self.name_contains = Some(needle.into());
        self
    }

    /// Reject inverted ranges.
    pub fn validate(&self) -> Result<(), TypeError> {
        if let (Some(min), Some(max)) = (self.size_min, self.size_max) {
            if min > max {
                return Err(TypeError::InvalidFilter(format!(
                    "size_min {min} exceeds size_max {max}"
                )));
            }
        }
        if let (Some(after), Some(before)) = (self.stored_after, self.stored_before) {
            if after > before {
                return Err(TypeError::InvalidFilter(format!(
                    "stored_after {after} is later than stored_before {before}"
                )));
            }
        }
        Ok(())
    }

    /// Returns `true` if `object` satisfies every set predicate.
    pub fn matches(&self, object: &StoredObject) -> bool {
        if let Some(ct) = &self.content_type {
            if object.content_type != *ct {
                return false;
            }
        }
        if self.size_min.is_some_and(|min| object.size < min) {
            return false;
        }
        if self.size_max.is_some_and(|max| object.size > max) {
            return false;
        }
        if self.stored_after.is_some_and(|t| object.stored_at < t) {
            return false;
        }
        if self.stored_before.is_some_and(|t| object.stored_at > t) {
            return false;
        }
        if let Some(needle) = &self.name_contains {
            let needle = needle.to_lowercase();
            if !object.original_name.to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }

    /// Returns `true` if no predicate is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
