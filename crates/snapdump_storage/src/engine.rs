//! Storage engine trait definitions.

use crate::catalog::{Collection, Database};
use crate::error::StorageResult;
use crate::types::{Document, KeyEntry, Tick};
use std::sync::Arc;

/// A storage engine that can hand out consistent read views.
///
/// The engine owns the database registry and the logical clock. It does not
/// know anything about replication batches, leases or chunking; those live
/// in the replication core.
///
/// # Invariants
///
/// - `snapshot` returns a view whose tick is the last committed write tick
/// - `allocate_tick` never returns the same tick twice
/// - Engines must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryEngine`] - multi-version in-memory engine
pub trait StorageEngine: Send + Sync {
    /// Allocates a fresh, unique tick.
    ///
    /// Used for identifiers that must never collide with each other.
    fn allocate_tick(&self) -> Tick;

    /// Returns the tick of the last committed write.
    fn committed_tick(&self) -> Tick;

    /// Looks up a database by name.
    fn database(&self, name: &str) -> Option<Arc<Database>>;

    /// Returns all databases, ordered by name.
    fn databases(&self) -> Vec<Arc<Database>>;

    /// Begins a read view at the current committed tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot pin a snapshot.
    fn snapshot(&self) -> StorageResult<Arc<dyn ReadView>>;
}

/// A read-only, point-in-time view of the engine.
///
/// # Invariants
///
/// - Every read through a view observes exactly the writes committed at or
///   before [`ReadView::tick`]
/// - A view is never modified after creation
pub trait ReadView: Send + Sync {
    /// Returns the tick this view was taken at.
    fn tick(&self) -> Tick;

    /// Opens an iterator over the collection's primary index.
    ///
    /// The iterator starts at [`IteratorPosition::Start`] and reads at this
    /// view's tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection has been dropped.
    fn iterator(&self, collection: &Arc<Collection>) -> StorageResult<Box<dyn IndexIterator>>;

    /// Resolves a key to the document visible at this view's tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    fn lookup(&self, collection: &Collection, key: &str) -> StorageResult<Option<Document>>;

    /// Counts the documents visible at this view's tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    fn count(&self, collection: &Collection) -> StorageResult<u64>;

    /// Returns the collections of `database` that exist at this view's tick.
    fn collections(&self, database: &Database) -> Vec<Arc<Collection>>;
}

/// Where an [`IndexIterator`] will read next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IteratorPosition {
    /// Before the first key.
    Start,
    /// At the first key greater than or equal to the given key.
    At(String),
    /// At the first key strictly greater than the given key.
    After(String),
    /// Past the last key.
    End,
}

/// A resumable iterator over a collection's primary index.
///
/// Keys are produced in ascending byte order of the primary key. Positions
/// are plain values, so a caller can record one before reading and restore
/// it if the read has to be undone.
pub trait IndexIterator: Send {
    /// Appends up to `limit` further key entries to `out`.
    ///
    /// Returns `true` if more keys remain after the ones appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails. On error nothing is appended and
    /// the position is unchanged.
    fn next_batch(&mut self, limit: usize, out: &mut Vec<KeyEntry>) -> StorageResult<bool>;

    /// Returns the current position.
    fn position(&self) -> IteratorPosition;

    /// Moves the iterator to `position`.
    fn seek(&mut self, position: IteratorPosition);

    /// Moves the iterator back to the start of the key space.
    fn rewind(&mut self) {
        self.seek(IteratorPosition::Start);
    }
}
