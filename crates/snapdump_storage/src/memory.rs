//! In-memory multi-version storage engine.

use crate::catalog::{Collection, Database};
use crate::engine::{IndexIterator, IteratorPosition, ReadView, StorageEngine};
use crate::error::{StorageError, StorageResult};
use crate::types::{CollectionId, DatabaseId, Document, KeyEntry, Revision, Tick};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Shared switch used to simulate read failures.
#[derive(Debug, Default)]
struct Faults {
    fail_reads: AtomicBool,
}

impl Faults {
    fn check(&self, what: &str) -> StorageResult<()> {
        if self.fail_reads.load(Ordering::Acquire) {
            return Err(StorageError::Injected(what.to_string()));
        }
        Ok(())
    }
}

/// An in-memory storage engine with snapshot reads.
///
/// This engine keeps every version of every key in memory and is suitable for:
/// - Unit and integration tests
/// - Command-line tooling over fixture data
///
/// Writes are serialized by a single writer lock. Each write is stamped with
/// a fresh tick, and the committed tick is only advanced after the write is
/// in place, so a snapshot never observes a half-applied write.
///
/// # Example
///
/// ```rust
/// use snapdump_storage::{InMemoryEngine, StorageEngine};
/// use serde_json::json;
///
/// let engine = InMemoryEngine::new();
/// engine.create_database("app").unwrap();
/// engine.create_collection("app", "orders").unwrap();
/// let rev = engine.insert("app", "orders", "o-1", json!({"total": 12})).unwrap();
/// assert_eq!(rev.as_u64(), engine.committed_tick().as_u64());
/// ```
pub struct InMemoryEngine {
    /// Last allocated tick.
    last_tick: AtomicU64,
    /// Tick of the last fully applied write.
    committed_tick: AtomicU64,
    /// Next database/collection id.
    next_id: AtomicU64,
    databases: RwLock<BTreeMap<String, Arc<Database>>>,
    /// Write lock - only one writer at a time.
    write_lock: Mutex<()>,
    faults: Arc<Faults>,
    live_snapshots: Arc<AtomicUsize>,
}

impl InMemoryEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_tick: AtomicU64::new(0),
            committed_tick: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            databases: RwLock::new(BTreeMap::new()),
            write_lock: Mutex::new(()),
            faults: Arc::new(Faults::default()),
            live_snapshots: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a database.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the name is taken.
    pub fn create_database(&self, name: &str) -> StorageResult<Arc<Database>> {
        let _guard = self.write_lock.lock();
        let mut databases = self.databases.write();
        if databases.contains_key(name) {
            return Err(StorageError::AlreadyExists(name.to_string()));
        }
        let id = DatabaseId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let tick = self.allocate_tick();
        let database = Arc::new(Database::new(id, name, tick));
        databases.insert(name.to_string(), Arc::clone(&database));
        self.committed_tick.store(tick.as_u64(), Ordering::SeqCst);
        debug!(database = name, %id, "created database");
        Ok(database)
    }

    /// Drops a database.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseInUse` while any [`crate::DatabaseGuard`] is alive.
    pub fn drop_database(&self, name: &str) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        let mut databases = self.databases.write();
        let database = databases
            .get(name)
            .ok_or_else(|| StorageError::DatabaseNotFound(name.to_string()))?;
        let guards = database.guard_count();
        if guards > 0 {
            return Err(StorageError::DatabaseInUse {
                name: name.to_string(),
                guards,
            });
        }
        if let Some(database) = databases.remove(name) {
            let tick = self.allocate_tick();
            database.retire_all(tick);
            self.committed_tick.store(tick.as_u64(), Ordering::SeqCst);
        }
        debug!(database = name, "dropped database");
        Ok(())
    }

    /// Creates a collection in `database`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is missing or the name is taken.
    pub fn create_collection(&self, database: &str, name: &str) -> StorageResult<Arc<Collection>> {
        let _guard = self.write_lock.lock();
        let db = self.require_database(database)?;
        let id = CollectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let tick = self.allocate_tick();
        let collection = Arc::new(Collection::new(id, name, database, tick));
        if !db.insert_collection(Arc::clone(&collection)) {
            return Err(StorageError::AlreadyExists(format!("{database}/{name}")));
        }
        self.committed_tick.store(tick.as_u64(), Ordering::SeqCst);
        debug!(database, collection = name, %id, "created collection");
        Ok(collection)
    }

    /// Drops a collection.
    ///
    /// Outstanding iterators fail from then on. Views taken before the drop
    /// still list the collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database or collection is missing.
    pub fn drop_collection(&self, database: &str, name: &str) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        let db = self.require_database(database)?;
        if db.collection(name).is_none() {
            return Err(StorageError::CollectionNotFound {
                database: database.to_string(),
                name: name.to_string(),
            });
        }
        let tick = self.allocate_tick();
        db.remove_collection(name, tick);
        self.committed_tick.store(tick.as_u64(), Ordering::SeqCst);
        debug!(database, collection = name, "dropped collection");
        Ok(())
    }

    /// Inserts or replaces a document.
    ///
    /// Returns the new revision.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or the target does not exist.
    pub fn insert(
        &self,
        database: &str,
        collection: &str,
        key: &str,
        body: serde_json::Value,
    ) -> StorageResult<Revision> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let _guard = self.write_lock.lock();
        let target = self.require_collection(database, collection)?;
        let tick = self.allocate_tick();
        let revision = target.apply(key, tick, Some(body));
        self.committed_tick.store(tick.as_u64(), Ordering::SeqCst);
        Ok(revision)
    }

    /// Removes a document.
    ///
    /// Returns false if the key was not live.
    ///
    /// # Errors
    ///
    /// Returns an error if the target does not exist.
    pub fn remove(&self, database: &str, collection: &str, key: &str) -> StorageResult<bool> {
        let _guard = self.write_lock.lock();
        let target = self.require_collection(database, collection)?;
        if !target.contains_latest(key) {
            return Ok(false);
        }
        let tick = self.allocate_tick();
        target.apply(key, tick, None);
        self.committed_tick.store(tick.as_u64(), Ordering::SeqCst);
        Ok(true)
    }

    /// Makes every subsequent read fail (or succeed again) for fault-injection tests.
    pub fn set_read_failure(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::Release);
    }

    /// Returns the number of snapshots that have not been released yet.
    #[must_use]
    pub fn live_snapshots(&self) -> usize {
        self.live_snapshots.load(Ordering::Acquire)
    }

    fn require_database(&self, name: &str) -> StorageResult<Arc<Database>> {
        self.database(name)
            .ok_or_else(|| StorageError::DatabaseNotFound(name.to_string()))
    }

    fn require_collection(&self, database: &str, name: &str) -> StorageResult<Arc<Collection>> {
        self.require_database(database)?
            .collection(name)
            .ok_or_else(|| StorageError::CollectionNotFound {
                database: database.to_string(),
                name: name.to_string(),
            })
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEngine")
            .field("committed_tick", &self.committed_tick())
            .field("live_snapshots", &self.live_snapshots())
            .finish_non_exhaustive()
    }
}

impl StorageEngine for InMemoryEngine {
    fn allocate_tick(&self) -> Tick {
        Tick::new(self.last_tick.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn committed_tick(&self) -> Tick {
        Tick::new(self.committed_tick.load(Ordering::SeqCst))
    }

    fn database(&self, name: &str) -> Option<Arc<Database>> {
        self.databases.read().get(name).cloned()
    }

    fn databases(&self) -> Vec<Arc<Database>> {
        self.databases.read().values().cloned().collect()
    }

    fn snapshot(&self) -> StorageResult<Arc<dyn ReadView>> {
        self.live_snapshots.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(MemorySnapshot {
            tick: self.committed_tick(),
            faults: Arc::clone(&self.faults),
            live: Arc::clone(&self.live_snapshots),
        }))
    }
}

/// A pinned read view of an [`InMemoryEngine`].
struct MemorySnapshot {
    tick: Tick,
    faults: Arc<Faults>,
    live: Arc<AtomicUsize>,
}

impl Drop for MemorySnapshot {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ReadView for MemorySnapshot {
    fn tick(&self) -> Tick {
        self.tick
    }

    fn iterator(&self, collection: &Arc<Collection>) -> StorageResult<Box<dyn IndexIterator>> {
        if collection.is_dropped() {
            return Err(StorageError::CollectionDropped(collection.name().to_string()));
        }
        Ok(Box::new(MemoryIterator {
            collection: Arc::downgrade(collection),
            name: collection.name().to_string(),
            tick: self.tick,
            position: IteratorPosition::Start,
            faults: Arc::clone(&self.faults),
        }))
    }

    fn lookup(&self, collection: &Collection, key: &str) -> StorageResult<Option<Document>> {
        self.faults.check(collection.name())?;
        Ok(collection.document_at(key, self.tick))
    }

    fn count(&self, collection: &Collection) -> StorageResult<u64> {
        self.faults.check(collection.name())?;
        Ok(collection.count_at(self.tick))
    }

    fn collections(&self, database: &Database) -> Vec<Arc<Collection>> {
        database.collections_at(self.tick)
    }
}

/// Primary-index iterator over one collection at a fixed tick.
struct MemoryIterator {
    collection: Weak<Collection>,
    name: String,
    tick: Tick,
    position: IteratorPosition,
    faults: Arc<Faults>,
}

impl IndexIterator for MemoryIterator {
    fn next_batch(&mut self, limit: usize, out: &mut Vec<KeyEntry>) -> StorageResult<bool> {
        self.faults.check(&self.name)?;
        let collection = self
            .collection
            .upgrade()
            .filter(|c| !c.is_dropped())
            .ok_or_else(|| StorageError::CollectionDropped(self.name.clone()))?;

        let (has_more, last) = collection.scan(&self.position, self.tick, limit, out);
        match (last, has_more) {
            (Some(key), true) => self.position = IteratorPosition::After(key),
            (_, false) => self.position = IteratorPosition::End,
            (None, true) => {}
        }
        Ok(has_more)
    }

    fn position(&self) -> IteratorPosition {
        self.position.clone()
    }

    fn seek(&mut self, position: IteratorPosition) {
        self.position = position;
    }
}
