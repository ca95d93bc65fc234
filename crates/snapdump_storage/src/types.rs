//! Core type definitions shared by engines and the replication core.

use serde::Serialize;
use std::fmt;

/// A point on the engine's logical clock.
///
/// Ticks are monotonically increasing and never reused. Every committed
/// write and every snapshot is stamped with one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Tick(pub u64);

impl Tick {
    /// Creates a new tick.
    #[must_use]
    pub const fn new(tick: u64) -> Self {
        Self(tick)
    }

    /// Returns the raw tick value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick:{}", self.0)
    }
}

/// Identifier for a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct DatabaseId(pub u64);

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "db:{}", self.0)
    }
}

/// Identifier for a collection.
///
/// Collection IDs are stable and assigned when collections are created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CollectionId(pub u64);

impl CollectionId {
    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "col:{}", self.0)
    }
}

/// Revision of a document.
///
/// A new revision is assigned on every write, so two versions of the same
/// key never share a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    /// Returns the raw revision value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A primary key together with the revision visible at a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyEntry {
    /// Primary key.
    pub key: String,
    /// Revision of the visible version.
    pub revision: Revision,
}

/// A document as stored in a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Primary key.
    pub key: String,
    /// Revision of this version.
    pub revision: Revision,
    /// Document body.
    pub body: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_ordering_and_next() {
        let t = Tick::new(7);
        assert!(t < t.next());
        assert_eq!(t.next().as_u64(), 8);
    }

    #[test]
    fn display_formats() {
        assert_eq!(format!("{}", Tick::new(3)), "tick:3");
        assert_eq!(format!("{}", CollectionId(42)), "col:42");
        assert_eq!(format!("{}", Revision(255)), "ff");
    }
}
