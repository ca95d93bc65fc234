//! Replication context.
//!
//! A [`ReplicationContext`] pins one engine snapshot for its whole life and
//! serves every dump-family request of one replication batch from it. Callers
//! bracket each request with a lease:
//!
//! ```text
//! ctx.try_use(ttl, false)   // or ctx.lease(..) for an RAII guard
//! ctx.dump_keys(..)
//! ctx.release()
//! ```
//!
//! ## Locking
//!
//! One mutex guards the lease state, the database binding and the cursor
//! map. It is never held while a cursor reads: cursor operations clone the
//! cursor handle out of the map, drop the mutex and then take the cursor's
//! own in-use flag. Two calls on different collections therefore proceed in
//! parallel, and two calls on the same collection conflict.

use crate::chunk::{ChunkDescriptor, ChunkDumper, ChunkSelector, DocumentBatch};
use crate::clock::{Clock, SystemClock, Timestamp};
use crate::config::ContextConfig;
use crate::cursor::Cursor;
use crate::error::{ErrorKind, ReplicationError, ReplicationResult};
use crate::inventory::{describe_database, Inventory};
use crate::lease::{ContextPhase, LeaseState};
use crate::render::RenderedDocument;
use crate::types::{BatchId, ServerId};
use parking_lot::Mutex;
use serde::Serialize;
use snapdump_storage::{
    Collection, CollectionId, DatabaseGuard, KeyEntry, ReadView, StorageEngine, Tick,
};
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// Result of a `dump` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpBatch {
    /// Rendered documents in key order.
    pub documents: Vec<RenderedDocument>,
    /// Whether the collection has further documents.
    pub has_more: bool,
    /// Snapshot tick the documents were read at.
    pub tick: Tick,
}

struct ContextInner {
    lease: LeaseState,
    /// `None` once the context has been destroyed.
    snapshot: Option<Arc<dyn ReadView>>,
    database: Option<DatabaseGuard>,
    cursors: HashMap<CollectionId, Arc<Cursor>>,
    bound: Option<Weak<Cursor>>,
}

impl ContextInner {
    fn snapshot(&self, id: BatchId) -> ReplicationResult<&Arc<dyn ReadView>> {
        self.snapshot
            .as_ref()
            .ok_or_else(|| ReplicationError::gone(format!("{id} is destroyed")))
    }

    fn database(&self, id: BatchId) -> ReplicationResult<&DatabaseGuard> {
        self.database
            .as_ref()
            .ok_or_else(|| ReplicationError::gone(format!("{id} is destroyed")))
    }

    /// Fails unless `name` is the bound database.
    fn check_database(&self, id: BatchId, name: &str) -> ReplicationResult<()> {
        let current = self.database(id)?;
        if current.name() != name {
            return Err(ReplicationError::bad_parameter(format!(
                "{id} is bound to database {}, not {name}",
                current.name()
            )));
        }
        Ok(())
    }

    /// Resolves a collection by name or numeric ID among those visible at
    /// the snapshot.
    fn resolve(&self, id: BatchId, name: &str) -> ReplicationResult<Arc<Collection>> {
        let snapshot = self.snapshot(id)?;
        let database = self.database(id)?;
        let collections = snapshot.collections(database);
        collections
            .iter()
            .find(|c| c.name() == name)
            .or_else(|| {
                let numeric = name.parse::<u64>().ok()?;
                collections.iter().find(|c| c.id().as_u64() == numeric)
            })
            .cloned()
            .ok_or_else(|| {
                ReplicationError::not_found("collection", format!("{}/{name}", database.name()))
            })
    }

    fn cursor_for(
        &mut self,
        id: BatchId,
        collection: &Arc<Collection>,
        config: &ContextConfig,
    ) -> ReplicationResult<Arc<Cursor>> {
        if let Some(cursor) = self.cursors.get(&collection.id()) {
            return Ok(Arc::clone(cursor));
        }
        let snapshot = Arc::clone(self.snapshot(id)?);
        let cursor = Arc::new(Cursor::open(snapshot, collection, config.render)?);
        self.cursors.insert(collection.id(), Arc::clone(&cursor));
        debug!(batch = %id, collection = collection.name(), "created cursor");
        Ok(cursor)
    }

    /// Finds an open cursor by collection name or numeric ID.
    fn find_cursor(&self, name: &str) -> Option<&Arc<Cursor>> {
        self.cursors
            .values()
            .find(|c| c.name() == name || c.collection_id().as_u64().to_string() == name)
    }

    /// Returns the open cursor for `name`, opening one if needed.
    ///
    /// An open cursor outlives its collection, so later calls fail with
    /// `Gone` rather than `NotFound` once the collection is dropped.
    fn open_cursor(
        &mut self,
        id: BatchId,
        name: &str,
        config: &ContextConfig,
    ) -> ReplicationResult<Arc<Cursor>> {
        self.snapshot(id)?;
        if let Some(cursor) = self.find_cursor(name) {
            return Ok(Arc::clone(cursor));
        }
        let target = self.resolve(id, name)?;
        self.cursor_for(id, &target, config)
    }

    fn teardown(&mut self) {
        self.bound = None;
        self.cursors.clear();
        self.database = None;
        self.snapshot = None;
        self.lease.mark_deleted();
    }
}

/// Snapshot-scoped state of one replication batch.
///
/// Shared between request threads through an `Arc`. All methods take
/// `&self`.
pub struct ReplicationContext {
    id: BatchId,
    origin: ServerId,
    engine: Arc<dyn StorageEngine>,
    clock: Arc<dyn Clock>,
    config: ContextConfig,
    last_tick: Tick,
    inner: Mutex<ContextInner>,
}

impl ReplicationContext {
    /// Starts a batch against `database` using the system clock.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the database does not exist at the snapshot,
    /// and an internal error if the engine cannot take a snapshot.
    pub fn create(
        engine: Arc<dyn StorageEngine>,
        database: &str,
        origin: ServerId,
        config: ContextConfig,
    ) -> ReplicationResult<Arc<Self>> {
        Self::create_with_clock(engine, database, origin, config, Arc::new(SystemClock))
    }

    /// Starts a batch with an explicit time source.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create`].
    pub fn create_with_clock(
        engine: Arc<dyn StorageEngine>,
        database: &str,
        origin: ServerId,
        config: ContextConfig,
        clock: Arc<dyn Clock>,
    ) -> ReplicationResult<Arc<Self>> {
        let snapshot = engine.snapshot()?;
        let last_tick = snapshot.tick();
        let guard = engine
            .database(database)
            .filter(|db| db.created_tick() <= last_tick)
            .ok_or_else(|| ReplicationError::not_found("database", database))?
            .guard();
        let id = BatchId::from(engine.allocate_tick());
        let lease = LeaseState::new(config.ttl, clock.now());

        info!(
            batch = %id,
            %origin,
            database,
            tick = %last_tick,
            ttl_secs = config.ttl.as_secs(),
            "created replication context"
        );

        Ok(Arc::new(Self {
            id,
            origin,
            engine,
            clock,
            config,
            last_tick,
            inner: Mutex::new(ContextInner {
                lease,
                snapshot: Some(snapshot),
                database: Some(guard),
                cursors: HashMap::new(),
                bound: None,
            }),
        }))
    }

    /// Returns the batch ID.
    #[must_use]
    pub fn id(&self) -> BatchId {
        self.id
    }

    /// Returns the server that requested the batch.
    #[must_use]
    pub fn origin(&self) -> ServerId {
        self.origin
    }

    /// Returns the snapshot tick.
    #[must_use]
    pub fn last_tick(&self) -> Tick {
        self.last_tick
    }

    /// Returns the configured TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Returns the context configuration.
    #[must_use]
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Returns the bound database name, or `None` once destroyed.
    #[must_use]
    pub fn database_name(&self) -> Option<String> {
        self.inner
            .lock()
            .database
            .as_ref()
            .map(|db| db.name().to_string())
    }

    // =========================================================================
    // Leasing
    // =========================================================================

    /// Tries to take a lease.
    ///
    /// `ttl` overrides the configured TTL for the new expiry. Returns false,
    /// changing nothing, if the context is deleted or the request collides
    /// with an exclusive lease.
    pub fn try_use(&self, ttl: Option<Duration>, exclusive: bool) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.lease.try_acquire(now, ttl, exclusive) {
            Ok(()) => true,
            Err(denied) => {
                debug!(batch = %self.id, ?denied, exclusive, "lease denied");
                false
            }
        }
    }

    /// Takes a lease that is released when the guard drops.
    ///
    /// # Errors
    ///
    /// Returns `Gone` if the context is deleted and `Conflict` if the
    /// request collides with an exclusive lease.
    pub fn lease(
        self: &Arc<Self>,
        ttl: Option<Duration>,
        exclusive: bool,
    ) -> ReplicationResult<LeaseGuard> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner
            .lease
            .try_acquire(now, ttl, exclusive)
            .map_err(|denied| {
                debug!(batch = %self.id, ?denied, exclusive, "lease denied");
                denied.into_error(self.id)
            })?;
        Ok(LeaseGuard {
            context: Arc::clone(self),
        })
    }

    /// Gives back one lease. Never destroys the context.
    pub fn release(&self) {
        self.inner.lock().lease.release();
    }

    /// Marks the context deleted; it becomes reclaimable once unleased.
    pub fn mark_deleted(&self) {
        self.inner.lock().lease.mark_deleted();
        debug!(batch = %self.id, "marked deleted");
    }

    /// Returns true once marked deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.inner.lock().lease.is_deleted()
    }

    /// Returns the current expiry time.
    #[must_use]
    pub fn expires(&self) -> Timestamp {
        self.inner.lock().lease.expires()
    }

    /// Returns true while any lease is held.
    #[must_use]
    pub fn is_used(&self) -> bool {
        self.inner.lock().lease.is_used()
    }

    /// Returns true if the context may be destroyed now.
    #[must_use]
    pub fn is_reclaimable(&self) -> bool {
        let now = self.clock.now();
        self.inner.lock().lease.is_reclaimable(now)
    }

    /// Returns the lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> ContextPhase {
        let now = self.clock.now();
        self.inner.lock().lease.phase(now)
    }

    // =========================================================================
    // Binding
    // =========================================================================

    /// Checks that `database` is the bound database.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` on a mismatch.
    pub fn bind(&self, database: &str) -> ReplicationResult<()> {
        self.bind_with(database, false)
    }

    /// Binds `database`, optionally switching away from the current one.
    ///
    /// Switching releases the old database guard and every cursor.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` on a mismatch without `allow_change`, and
    /// `NotFound` if the new database does not exist at the snapshot.
    pub fn bind_with(&self, database: &str, allow_change: bool) -> ReplicationResult<()> {
        let mut inner = self.inner.lock();
        match inner.check_database(self.id, database) {
            Ok(()) => return Ok(()),
            Err(err) if !allow_change || err.kind() != ErrorKind::BadParameter => return Err(err),
            Err(_) => {}
        }

        let guard = self
            .engine
            .database(database)
            .filter(|db| db.created_tick() <= self.last_tick)
            .ok_or_else(|| ReplicationError::not_found("database", database))?
            .guard();
        inner.bound = None;
        inner.cursors.clear();
        inner.database = Some(guard);
        info!(batch = %self.id, database, "rebound replication context");
        Ok(())
    }

    /// Binds a collection as the target of the diff-protocol calls.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` on a database mismatch and `NotFound` if the
    /// collection does not exist at the snapshot.
    pub fn bind_collection(&self, database: &str, collection: &str) -> ReplicationResult<()> {
        let mut inner = self.inner.lock();
        inner.check_database(self.id, database)?;
        let target = inner.resolve(self.id, collection)?;
        let cursor = inner.cursor_for(self.id, &target, &self.config)?;
        inner.bound = Some(Arc::downgrade(&cursor));
        debug!(batch = %self.id, collection = target.name(), "bound collection");
        Ok(())
    }

    // =========================================================================
    // Dumping
    // =========================================================================

    /// Counts the bound collection's documents at the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` if no collection is bound and `Gone` if it was
    /// dropped.
    pub fn count(&self) -> ReplicationResult<u64> {
        self.bound_cursor()?.count()
    }

    /// Lists databases and collections as of the snapshot.
    ///
    /// With `global`, every database visible at the snapshot is listed;
    /// otherwise only `database`, which must be the bound one.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` on a database mismatch and an internal error
    /// if counting fails.
    pub fn inventory(
        &self,
        database: &str,
        include_system: bool,
        global: bool,
    ) -> ReplicationResult<Inventory> {
        let (snapshot, databases) = {
            let inner = self.inner.lock();
            let snapshot = Arc::clone(inner.snapshot(self.id)?);
            let databases = if global {
                self.engine
                    .databases()
                    .into_iter()
                    .filter(|db| db.created_tick() <= self.last_tick)
                    .collect()
            } else {
                inner.check_database(self.id, database)?;
                vec![Arc::clone(inner.database(self.id)?.database())]
            };
            (snapshot, databases)
        };

        let databases = databases
            .iter()
            .map(|db| describe_database(snapshot.as_ref(), db, include_system))
            .collect::<ReplicationResult<_>>()?;
        Ok(Inventory {
            tick: self.last_tick,
            databases,
        })
    }

    /// Reads up to `chunk_size` further documents of `collection`.
    ///
    /// The collection's cursor is created on first use and advances with
    /// every call. `chunk_size` is clamped to the configured maximum.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` for a zero `chunk_size` or a database
    /// mismatch, `NotFound` for an unknown collection, `Conflict` if the
    /// cursor is in use, `Gone` if the collection was dropped, and an
    /// internal error if a read fails.
    pub fn dump(
        &self,
        database: &str,
        collection: &str,
        chunk_size: usize,
    ) -> ReplicationResult<DumpBatch> {
        if chunk_size == 0 {
            return Err(ReplicationError::bad_parameter("chunk size must be positive"));
        }
        let cursor = {
            let mut inner = self.inner.lock();
            inner.check_database(self.id, database)?;
            inner.open_cursor(self.id, collection, &self.config)?
        };

        let mut guard = cursor.try_acquire()?;
        let limit = chunk_size.min(self.config.max_dump_batch).max(1);
        let documents = guard.next_documents(limit)?;
        Ok(DumpBatch {
            documents,
            has_more: cursor.has_more(),
            tick: self.last_tick,
        })
    }

    /// Returns whether `collection` has documents left to dump.
    ///
    /// True before the first `dump` of the collection.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown collection.
    pub fn more(&self, collection: &str) -> ReplicationResult<bool> {
        let inner = self.inner.lock();
        inner.snapshot(self.id)?;
        if let Some(cursor) = inner.find_cursor(collection) {
            return Ok(cursor.has_more());
        }
        inner.resolve(self.id, collection)?;
        Ok(true)
    }

    /// Describes every chunk of the bound collection.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` if no collection is bound or `chunk_size` is
    /// zero, and `Conflict` if the cursor is in use.
    pub fn dump_key_chunks(&self, chunk_size: usize) -> ReplicationResult<Vec<ChunkDescriptor>> {
        let cursor = self.bound_cursor()?;
        let mut guard = cursor.try_acquire()?;
        ChunkDumper::new(&mut guard).key_chunks(chunk_size)
    }

    /// Returns the keys and revisions of one chunk of the bound collection.
    ///
    /// # Errors
    ///
    /// See [`ChunkDumper::chunk_keys`]; also `Conflict` if the cursor is in
    /// use.
    pub fn dump_keys(
        &self,
        selector: &ChunkSelector,
        chunk_size: usize,
    ) -> ReplicationResult<Vec<KeyEntry>> {
        let cursor = self.bound_cursor()?;
        let mut guard = cursor.try_acquire()?;
        ChunkDumper::new(&mut guard).chunk_keys(selector, chunk_size)
    }

    /// Renders the requested documents of one chunk of the bound collection.
    ///
    /// # Errors
    ///
    /// See [`ChunkDumper::chunk_documents`]; also `Conflict` if the cursor
    /// is in use.
    pub fn dump_documents(
        &self,
        selector: &ChunkSelector,
        chunk_size: usize,
        offset_in_chunk: usize,
        max_chunk_size: usize,
        ids: &[String],
    ) -> ReplicationResult<DocumentBatch> {
        let cursor = self.bound_cursor()?;
        let mut guard = cursor.try_acquire()?;
        ChunkDumper::new(&mut guard).chunk_documents(
            selector,
            chunk_size,
            offset_in_chunk,
            max_chunk_size,
            ids,
        )
    }

    /// Returns how many keys of the bound collection have been consumed.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` if no collection is bound.
    pub fn last_iterator_offset(&self) -> ReplicationResult<u64> {
        Ok(self.bound_cursor()?.offset())
    }

    /// Returns the cursor of `collection`, opening it if needed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown collection and `Gone` once the
    /// context is destroyed.
    pub fn cursor(&self, collection: &str) -> ReplicationResult<Arc<Cursor>> {
        self.inner
            .lock()
            .open_cursor(self.id, collection, &self.config)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Returns the number of open cursors.
    #[must_use]
    pub fn cursor_count(&self) -> usize {
        self.inner.lock().cursors.len()
    }

    /// Closes the cursor of `collection`.
    ///
    /// Returns false if no cursor was open.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the cursor is in use.
    pub fn release_cursor(&self, collection: &str) -> ReplicationResult<bool> {
        let mut inner = self.inner.lock();
        inner.snapshot(self.id)?;
        let Some(cursor) = inner.find_cursor(collection).cloned() else {
            return Ok(false);
        };
        if cursor.is_in_use() {
            return Err(ReplicationError::conflict(format!(
                "cursor for collection {collection} is in use"
            )));
        }
        inner.cursors.remove(&cursor.collection_id());
        let was_bound = inner
            .bound
            .as_ref()
            .is_some_and(|bound| std::ptr::eq(bound.as_ptr(), Arc::as_ptr(&cursor)));
        if was_bound {
            inner.bound = None;
        }
        debug!(batch = %self.id, collection, "released cursor");
        Ok(true)
    }

    /// Destroys the context, releasing its snapshot, database guard and
    /// cursors. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` while a lease is held.
    pub fn destroy(&self) -> ReplicationResult<()> {
        let mut inner = self.inner.lock();
        if inner.snapshot.is_none() {
            return Ok(());
        }
        if inner.lease.is_used() {
            return Err(ReplicationError::conflict(format!(
                "{} is leased, cannot destroy",
                self.id
            )));
        }
        inner.teardown();
        info!(batch = %self.id, "destroyed replication context");
        Ok(())
    }

    /// Destroys the context if it is reclaimable.
    ///
    /// The check and the teardown happen under one lock, so a lease taken
    /// concurrently either wins and keeps the context alive or is refused.
    /// Returns true if the context is destroyed after the call.
    pub fn reclaim(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if inner.snapshot.is_none() {
            return true;
        }
        if !inner.lease.is_reclaimable(now) {
            return false;
        }
        let expired = !inner.lease.is_deleted();
        inner.teardown();
        info!(batch = %self.id, expired, "reclaimed replication context");
        true
    }

    /// Returns true once the context has been destroyed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().snapshot.is_none()
    }

    fn bound_cursor(&self) -> ReplicationResult<Arc<Cursor>> {
        let inner = self.inner.lock();
        inner.snapshot(self.id)?;
        inner
            .bound
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| {
                ReplicationError::bad_parameter(format!("{} has no bound collection", self.id))
            })
    }
}

impl fmt::Debug for ReplicationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationContext")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("last_tick", &self.last_tick)
            .finish_non_exhaustive()
    }
}

/// A lease on a [`ReplicationContext`], released on drop.
#[derive(Debug)]
pub struct LeaseGuard {
    context: Arc<ReplicationContext>,
}

impl Deref for LeaseGuard {
    type Target = ReplicationContext;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.context.release();
    }
}
