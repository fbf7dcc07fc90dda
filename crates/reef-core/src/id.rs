//! Process-wide object identity

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for any addressable processor (track or plugin).
///
/// Ids are allocated from a process-wide counter and never reused within
/// a run. Id 0 is reserved as a null value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    pub const NONE: Self = Self(0);

    /// Allocate a fresh process-unique id
    pub fn new() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Rebuild an id from its raw value, e.g. out of a lookup key
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::NONE
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
