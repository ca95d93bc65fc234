//! Per-collection iteration state bound to one snapshot.
//!
//! A [`Cursor`] is advanced only through a [`CursorGuard`], obtained with
//! [`Cursor::try_acquire`]. Acquisition is a test-and-set on an atomic flag:
//! a second caller is turned away with a conflict instead of waiting. The
//! flag is cleared when the guard drops, on success, error and unwind alike.

use crate::error::{ReplicationError, ReplicationResult};
use crate::render::{render, RenderOptions, RenderedDocument};
use parking_lot::{Mutex, MutexGuard};
use snapdump_storage::{
    Collection, CollectionId, IndexIterator, IteratorPosition, KeyEntry, ReadView, Tick,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Number of keys read per step when skipping forward.
const SKIP_BATCH: usize = 1024;

struct CursorState {
    iter: Box<dyn IndexIterator>,
}

/// Iteration state for one collection inside one replication context.
pub struct Cursor {
    collection: Weak<Collection>,
    collection_id: CollectionId,
    name: String,
    view: Arc<dyn ReadView>,
    render: RenderOptions,
    in_use: AtomicBool,
    has_more: AtomicBool,
    /// Keys consumed from the start of the key space.
    offset: AtomicU64,
    /// False after seeking by key, until the next rewind.
    offset_exact: AtomicBool,
    state: Mutex<CursorState>,
}

impl Cursor {
    /// Opens a cursor over `collection`, reading through `view`.
    ///
    /// # Errors
    ///
    /// Returns `Gone` if the collection has been dropped.
    pub(crate) fn open(
        view: Arc<dyn ReadView>,
        collection: &Arc<Collection>,
        render: RenderOptions,
    ) -> ReplicationResult<Self> {
        let iter = view.iterator(collection)?;
        Ok(Self {
            collection: Arc::downgrade(collection),
            collection_id: collection.id(),
            name: collection.name().to_string(),
            view,
            render,
            in_use: AtomicBool::new(false),
            has_more: AtomicBool::new(true),
            offset: AtomicU64::new(0),
            offset_exact: AtomicBool::new(true),
            state: Mutex::new(CursorState { iter }),
        })
    }

    /// Returns the collection ID.
    #[must_use]
    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the snapshot tick reads happen at.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.view.tick()
    }

    /// Returns true while a guard is held.
    #[must_use]
    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Returns whether forward iteration can yield further keys.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.has_more.load(Ordering::Acquire)
    }

    /// Returns the number of keys consumed from the start of the key space.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Returns true if [`Self::offset`] was counted from the start of the
    /// key space rather than set by a seek.
    #[must_use]
    pub fn is_offset_exact(&self) -> bool {
        self.offset_exact.load(Ordering::Acquire)
    }

    /// Returns the rendering options captured at creation.
    #[must_use]
    pub fn render_options(&self) -> &RenderOptions {
        &self.render
    }

    /// Counts the collection's documents at the snapshot tick.
    ///
    /// # Errors
    ///
    /// Returns `Gone` if the collection was dropped, or an internal error
    /// if the read fails.
    pub fn count(&self) -> ReplicationResult<u64> {
        let collection = self.collection()?;
        Ok(self.view.count(&collection)?)
    }

    /// Takes exclusive use of the cursor.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if another caller holds the cursor.
    pub fn try_acquire(&self) -> ReplicationResult<CursorGuard<'_>> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ReplicationError::conflict(format!(
                "cursor for collection {} is in use",
                self.name
            )));
        }
        Ok(CursorGuard {
            cursor: self,
            state: self.state.lock(),
        })
    }

    fn collection(&self) -> ReplicationResult<Arc<Collection>> {
        self.collection
            .upgrade()
            .filter(|c| !c.is_dropped())
            .ok_or_else(|| ReplicationError::gone(format!("collection {}", self.name)))
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("collection", &self.name)
            .field("tick", &self.tick())
            .field("in_use", &self.is_in_use())
            .field("has_more", &self.has_more())
            .field("offset", &self.offset())
            .field("offset_exact", &self.is_offset_exact())
            .finish_non_exhaustive()
    }
}

/// Saved cursor position, used to undo a failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    position: IteratorPosition,
    offset: u64,
    offset_exact: bool,
    has_more: bool,
}

/// Exclusive access to a [`Cursor`].
pub struct CursorGuard<'a> {
    cursor: &'a Cursor,
    state: MutexGuard<'a, CursorState>,
}

impl<'a> CursorGuard<'a> {
    /// Returns the guarded cursor.
    #[must_use]
    pub fn cursor(&self) -> &'a Cursor {
        self.cursor
    }

    /// Records the current position.
    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            position: self.state.iter.position(),
            offset: self.cursor.offset(),
            offset_exact: self.cursor.is_offset_exact(),
            has_more: self.cursor.has_more(),
        }
    }

    /// Moves back to a recorded position.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.state.iter.seek(checkpoint.position);
        self.set_offset(checkpoint.offset);
        self.cursor
            .offset_exact
            .store(checkpoint.offset_exact, Ordering::Release);
        self.cursor
            .has_more
            .store(checkpoint.has_more, Ordering::Release);
    }

    /// Moves to the start of the key space.
    pub fn rewind(&mut self) {
        self.state.iter.rewind();
        self.set_offset(0);
        self.cursor.offset_exact.store(true, Ordering::Release);
        self.cursor.has_more.store(true, Ordering::Release);
    }

    /// Moves to the first key greater than or equal to `key`.
    ///
    /// The offset is no longer exact afterwards. The caller may record the
    /// offset it expects with [`Self::set_offset`], but forward skips must
    /// not rely on it until the next [`Self::rewind`].
    pub fn seek_key(&mut self, key: &str) {
        self.state
            .iter
            .seek(IteratorPosition::At(key.to_string()));
        self.cursor.offset_exact.store(false, Ordering::Release);
        self.cursor.has_more.store(true, Ordering::Release);
    }

    /// Overrides the recorded offset.
    pub fn set_offset(&mut self, offset: u64) {
        self.cursor.offset.store(offset, Ordering::Release);
    }

    /// Appends up to `limit` further keys to `out`.
    ///
    /// Returns whether more keys follow. On error nothing is appended and
    /// the position is unchanged.
    ///
    /// # Errors
    ///
    /// Returns `Gone` if the collection was dropped, or an internal error
    /// if the read fails.
    pub fn read_keys(&mut self, limit: usize, out: &mut Vec<KeyEntry>) -> ReplicationResult<bool> {
        let before = out.len();
        let has_more = self.state.iter.next_batch(limit, out)?;
        let read = (out.len() - before) as u64;
        self.cursor.offset.fetch_add(read, Ordering::AcqRel);
        self.cursor.has_more.store(has_more, Ordering::Release);
        Ok(has_more)
    }

    /// Skips up to `count` keys.
    ///
    /// Returns the number of keys actually skipped, which is smaller than
    /// `count` only at the end of the key space.
    ///
    /// # Errors
    ///
    /// Same as [`Self::read_keys`].
    pub fn skip(&mut self, count: u64) -> ReplicationResult<u64> {
        let mut skipped = 0;
        let mut scratch = Vec::with_capacity(SKIP_BATCH);
        while skipped < count {
            scratch.clear();
            let step = usize::try_from(count - skipped).map_or(SKIP_BATCH, |n| n.min(SKIP_BATCH));
            let has_more = self.read_keys(step, &mut scratch)?;
            skipped += scratch.len() as u64;
            if !has_more {
                break;
            }
        }
        Ok(skipped)
    }

    /// Renders the document stored under `key` at the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Gone` if the collection was dropped, and an internal error
    /// if the key has no document at the snapshot or the read fails.
    pub fn render_key(&self, key: &str) -> ReplicationResult<RenderedDocument> {
        let collection = self.cursor.collection()?;
        let doc = self.cursor.view.lookup(&collection, key)?.ok_or_else(|| {
            ReplicationError::internal(format!(
                "key {key} of collection {} missing at {}",
                self.cursor.name,
                self.cursor.tick()
            ))
        })?;
        render(&doc, &self.cursor.render)
    }

    /// Reads and renders up to `limit` further documents.
    ///
    /// On error the cursor is returned to where the call started, so a retry
    /// yields the same documents.
    ///
    /// # Errors
    ///
    /// Returns `Gone` if the collection was dropped, or an internal error
    /// if a read or render fails.
    pub fn next_documents(&mut self, limit: usize) -> ReplicationResult<Vec<RenderedDocument>> {
        let checkpoint = self.checkpoint();
        let result = self.read_documents(limit);
        if result.is_err() {
            self.restore(checkpoint);
        }
        result
    }

    fn read_documents(&mut self, limit: usize) -> ReplicationResult<Vec<RenderedDocument>> {
        let mut keys = Vec::with_capacity(limit.min(SKIP_BATCH));
        self.read_keys(limit, &mut keys)?;
        keys.iter().map(|entry| self.render_key(&entry.key)).collect()
    }
}

impl Drop for CursorGuard<'_> {
    fn drop(&mut self) {
        self.cursor.in_use.store(false, Ordering::Release);
    }
}

impl fmt::Debug for CursorGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CursorGuard")
            .field(&self.cursor.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use snapdump_storage::{InMemoryEngine, StorageEngine};

    fn setup(n: usize) -> (InMemoryEngine, Cursor) {
        let engine = InMemoryEngine::new();
        engine.create_database("db").unwrap();
        let coll = engine.create_collection("db", "c").unwrap();
        for i in 0..n {
            engine
                .insert("db", "c", &format!("k{i:03}"), json!({ "i": i }))
                .unwrap();
        }
        let view = engine.snapshot().unwrap();
        let cursor = Cursor::open(view, &coll, RenderOptions::default()).unwrap();
        (engine, cursor)
    }

    #[test]
    fn second_acquire_conflicts() {
        let (_engine, cursor) = setup(1);
        let guard = cursor.try_acquire().unwrap();
        assert!(cursor.is_in_use());
        let err = cursor.try_acquire().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
        drop(guard);
        assert!(!cursor.is_in_use());
        assert!(cursor.try_acquire().is_ok());
    }

    #[test]
    fn guard_cleared_after_error() {
        let (engine, cursor) = setup(3);
        engine.set_read_failure(true);
        {
            let mut guard = cursor.try_acquire().unwrap();
            assert!(guard.next_documents(2).is_err());
        }
        assert!(!cursor.is_in_use());
    }

    #[test]
    fn documents_advance_offset() {
        let (_engine, cursor) = setup(5);
        let mut guard = cursor.try_acquire().unwrap();
        let docs = guard.next_documents(3).unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].key, "k000");
        assert_eq!(cursor.offset(), 3);
        assert!(cursor.has_more());

        let rest = guard.next_documents(10).unwrap();
        assert_eq!(rest.len(), 2);
        assert!(!cursor.has_more());
    }

    #[test]
    fn failed_read_restores_position() {
        let (engine, cursor) = setup(6);
        let mut guard = cursor.try_acquire().unwrap();
        guard.next_documents(2).unwrap();

        engine.set_read_failure(true);
        assert!(guard.next_documents(2).is_err());
        assert_eq!(cursor.offset(), 2);

        engine.set_read_failure(false);
        let docs = guard.next_documents(2).unwrap();
        let keys: Vec<_> = docs.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, ["k002", "k003"]);
    }

    #[test]
    fn skip_stops_at_end() {
        let (_engine, cursor) = setup(4);
        let mut guard = cursor.try_acquire().unwrap();
        assert_eq!(guard.skip(3).unwrap(), 3);
        assert_eq!(guard.skip(10).unwrap(), 1);
        assert_eq!(cursor.offset(), 4);

        guard.rewind();
        assert_eq!(cursor.offset(), 0);
        let mut keys = Vec::new();
        guard.read_keys(1, &mut keys).unwrap();
        assert_eq!(keys[0].key, "k000");
    }

    #[test]
    fn seek_key_positions_at_key() {
        let (_engine, cursor) = setup(4);
        let mut guard = cursor.try_acquire().unwrap();
        guard.seek_key("k002");
        let mut keys = Vec::new();
        guard.read_keys(5, &mut keys).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].key, "k002");
    }

    #[test]
    fn seek_makes_offset_inexact_until_rewind() {
        let (_engine, cursor) = setup(4);
        let mut guard = cursor.try_acquire().unwrap();
        let checkpoint = guard.checkpoint();
        guard.seek_key("k002");
        assert!(!cursor.is_offset_exact());

        guard.restore(checkpoint);
        assert!(cursor.is_offset_exact());
        guard.seek_key("k001");
        guard.rewind();
        assert!(cursor.is_offset_exact());
    }

    #[test]
    fn dropped_collection_is_gone() {
        let (engine, cursor) = setup(2);
        engine.drop_collection("db", "c").unwrap();
        let mut guard = cursor.try_acquire().unwrap();
        let err = guard.next_documents(1).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Gone);
        drop(guard);
        assert_eq!(cursor.count().unwrap_err().kind(), crate::error::ErrorKind::Gone);
    }
}
