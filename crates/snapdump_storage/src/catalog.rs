//! Database and collection registry entries.
//!
//! A [`Database`] owns its collections through `Arc`s held in its registry
//! map. Dropping a collection moves it from the map to a retired list and
//! stamps it with the drop tick, so views taken before the drop still list
//! it while new reads through it fail.
//!
//! Each collection keeps a version chain per key:
//!
//! ```text
//! key -> [ (tick 3, rev 3, body) , (tick 9, rev 9, tombstone) , ... ]
//! ```
//!
//! A reader at tick `T` sees the newest version with `tick <= T`; a tombstone
//! hides the key.

use crate::engine::IteratorPosition;
use crate::types::{CollectionId, DatabaseId, Document, KeyEntry, Revision, Tick};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Bound, Deref};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// One version of a key.
#[derive(Debug, Clone)]
struct Version {
    tick: Tick,
    revision: Revision,
    /// `None` marks a tombstone.
    body: Option<Arc<serde_json::Value>>,
}

fn visible(chain: &[Version], tick: Tick) -> Option<&Version> {
    chain
        .iter()
        .rev()
        .find(|v| v.tick <= tick)
        .filter(|v| v.body.is_some())
}

/// A named collection of documents.
pub struct Collection {
    id: CollectionId,
    name: String,
    database: String,
    created: Tick,
    /// Drop tick, or 0 while live.
    dropped: AtomicU64,
    versions: RwLock<BTreeMap<String, Vec<Version>>>,
}

impl Collection {
    pub(crate) fn new(id: CollectionId, name: &str, database: &str, created: Tick) -> Self {
        Self {
            id,
            name: name.to_string(),
            database: database.to_string(),
            created,
            dropped: AtomicU64::new(0),
            versions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Returns the collection ID.
    #[must_use]
    pub fn id(&self) -> CollectionId {
        self.id
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the name of the owning database.
    #[must_use]
    pub fn database_name(&self) -> &str {
        &self.database
    }

    /// Returns the tick the collection was created at.
    #[must_use]
    pub fn created_tick(&self) -> Tick {
        self.created
    }

    /// System collections are those whose name starts with `_`.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.name.starts_with('_')
    }

    /// Returns true once the collection has been dropped.
    #[must_use]
    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire) != 0
    }

    /// Returns the tick the collection was dropped at.
    #[must_use]
    pub fn dropped_tick(&self) -> Option<Tick> {
        match self.dropped.load(Ordering::Acquire) {
            0 => None,
            tick => Some(Tick::new(tick)),
        }
    }

    /// Returns true if the collection existed at `tick`.
    #[must_use]
    pub fn exists_at(&self, tick: Tick) -> bool {
        self.created <= tick && self.dropped_tick().map_or(true, |dropped| dropped > tick)
    }

    pub(crate) fn mark_dropped(&self, tick: Tick) {
        // Keep the first drop tick.
        let _ = self
            .dropped
            .compare_exchange(0, tick.as_u64(), Ordering::AcqRel, Ordering::Acquire);
    }

    /// Appends a version for `key`. The revision equals the write tick.
    pub(crate) fn apply(
        &self,
        key: &str,
        tick: Tick,
        body: Option<serde_json::Value>,
    ) -> Revision {
        let revision = Revision(tick.as_u64());
        self.versions
            .write()
            .entry(key.to_string())
            .or_default()
            .push(Version {
                tick,
                revision,
                body: body.map(Arc::new),
            });
        revision
    }

    /// Returns true if the key is currently live (newest version).
    pub(crate) fn contains_latest(&self, key: &str) -> bool {
        self.versions
            .read()
            .get(key)
            .and_then(|chain| chain.last())
            .is_some_and(|v| v.body.is_some())
    }

    pub(crate) fn document_at(&self, key: &str, tick: Tick) -> Option<Document> {
        let versions = self.versions.read();
        let version = visible(versions.get(key)?, tick)?;
        let body = version.body.as_ref()?;
        Some(Document {
            key: key.to_string(),
            revision: version.revision,
            body: (**body).clone(),
        })
    }

    pub(crate) fn count_at(&self, tick: Tick) -> u64 {
        self.versions
            .read()
            .values()
            .filter(|chain| visible(chain, tick).is_some())
            .count() as u64
    }

    /// Reads up to `limit` visible keys starting at `from`.
    ///
    /// Returns whether more keys follow and the last key appended.
    pub(crate) fn scan(
        &self,
        from: &IteratorPosition,
        tick: Tick,
        limit: usize,
        out: &mut Vec<KeyEntry>,
    ) -> (bool, Option<String>) {
        let lower = match from {
            IteratorPosition::Start => Bound::Unbounded,
            IteratorPosition::At(key) => Bound::Included(key.as_str()),
            IteratorPosition::After(key) => Bound::Excluded(key.as_str()),
            IteratorPosition::End => return (false, None),
        };

        let versions = self.versions.read();
        let mut entries = versions
            .range::<str, _>((lower, Bound::Unbounded))
            .filter_map(|(key, chain)| {
                visible(chain, tick).map(|v| KeyEntry {
                    key: key.clone(),
                    revision: v.revision,
                })
            });

        let mut last = None;
        for entry in entries.by_ref().take(limit) {
            last = Some(entry.key.clone());
            out.push(entry);
        }
        (entries.next().is_some(), last)
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("database", &self.database)
            .field("dropped", &self.is_dropped())
            .finish_non_exhaustive()
    }
}

/// A named database holding collections.
pub struct Database {
    id: DatabaseId,
    name: String,
    created: Tick,
    collections: RwLock<BTreeMap<String, Arc<Collection>>>,
    /// Dropped collections, kept for views older than the drop.
    retired: RwLock<Vec<Arc<Collection>>>,
    guards: AtomicUsize,
}

impl Database {
    pub(crate) fn new(id: DatabaseId, name: &str, created: Tick) -> Self {
        Self {
            id,
            name: name.to_string(),
            created,
            collections: RwLock::new(BTreeMap::new()),
            retired: RwLock::new(Vec::new()),
            guards: AtomicUsize::new(0),
        }
    }

    /// Returns the database ID.
    #[must_use]
    pub fn id(&self) -> DatabaseId {
        self.id
    }

    /// Returns the database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tick the database was created at.
    #[must_use]
    pub fn created_tick(&self) -> Tick {
        self.created
    }

    /// System databases are those whose name starts with `_`.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.name.starts_with('_')
    }

    /// Looks up a collection by name.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.read().get(name).cloned()
    }

    /// Returns all collections, ordered by name.
    #[must_use]
    pub fn collections(&self) -> Vec<Arc<Collection>> {
        self.collections.read().values().cloned().collect()
    }

    /// Returns the collections that existed at `tick`, ordered by name.
    ///
    /// Includes collections dropped after `tick`.
    #[must_use]
    pub fn collections_at(&self, tick: Tick) -> Vec<Arc<Collection>> {
        let mut visible: Vec<_> = self
            .collections
            .read()
            .values()
            .chain(self.retired.read().iter())
            .filter(|c| c.exists_at(tick))
            .cloned()
            .collect();
        visible.sort_by(|a, b| a.name().cmp(b.name()));
        visible
    }

    /// Acquires a guard that keeps this database from being dropped.
    #[must_use]
    pub fn guard(self: &Arc<Self>) -> DatabaseGuard {
        self.guards.fetch_add(1, Ordering::AcqRel);
        DatabaseGuard {
            database: Arc::clone(self),
        }
    }

    /// Returns the number of live guards.
    #[must_use]
    pub fn guard_count(&self) -> usize {
        self.guards.load(Ordering::Acquire)
    }

    /// Inserts a collection unless the name is taken.
    pub(crate) fn insert_collection(&self, collection: Arc<Collection>) -> bool {
        let mut collections = self.collections.write();
        if collections.contains_key(collection.name()) {
            return false;
        }
        collections.insert(collection.name().to_string(), collection);
        true
    }

    /// Removes a collection from the registry and retires it at `tick`.
    pub(crate) fn remove_collection(&self, name: &str, tick: Tick) -> Option<Arc<Collection>> {
        let collection = self.collections.write().remove(name)?;
        collection.mark_dropped(tick);
        self.retired.write().push(Arc::clone(&collection));
        Some(collection)
    }

    /// Retires every collection at `tick`.
    pub(crate) fn retire_all(&self, tick: Tick) {
        let mut collections = self.collections.write();
        let mut retired = self.retired.write();
        for (_, collection) in std::mem::take(&mut *collections) {
            collection.mark_dropped(tick);
            retired.push(collection);
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("guards", &self.guard_count())
            .finish_non_exhaustive()
    }
}

/// Keeps a database alive and undroppable for as long as it exists.
pub struct DatabaseGuard {
    database: Arc<Database>,
}

impl DatabaseGuard {
    /// Returns the guarded database handle.
    #[must_use]
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }
}

impl Deref for DatabaseGuard {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.database
    }
}

impl Clone for DatabaseGuard {
    fn clone(&self) -> Self {
        self.database.guard()
    }
}

impl Drop for DatabaseGuard {
    fn drop(&mut self) {
        self.database.guards.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for DatabaseGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DatabaseGuard")
            .field(&self.database.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collection() -> Collection {
        Collection::new(CollectionId(1), "users", "app", Tick::new(1))
    }

    #[test]
    fn newest_version_at_tick_wins() {
        let c = collection();
        c.apply("a", Tick::new(2), Some(json!({"v": 1})));
        c.apply("a", Tick::new(5), Some(json!({"v": 2})));

        assert!(c.document_at("a", Tick::new(1)).is_none());
        assert_eq!(c.document_at("a", Tick::new(3)).unwrap().body, json!({"v": 1}));
        assert_eq!(c.document_at("a", Tick::new(5)).unwrap().revision, Revision(5));
    }

    #[test]
    fn tombstone_hides_key() {
        let c = collection();
        c.apply("a", Tick::new(2), Some(json!(1)));
        c.apply("a", Tick::new(4), None);

        assert_eq!(c.count_at(Tick::new(3)), 1);
        assert_eq!(c.count_at(Tick::new(4)), 0);
        assert!(!c.contains_latest("a"));
    }

    #[test]
    fn scan_respects_position_and_limit() {
        let c = collection();
        for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
            c.apply(key, Tick::new(i as u64 + 2), Some(json!(i)));
        }
        let tick = Tick::new(10);

        let mut out = Vec::new();
        let (more, last) = c.scan(&IteratorPosition::Start, tick, 2, &mut out);
        assert!(more);
        assert_eq!(last.as_deref(), Some("b"));

        out.clear();
        let (more, _) = c.scan(&IteratorPosition::After("b".into()), tick, 5, &mut out);
        assert!(!more);
        assert_eq!(out.len(), 2);

        out.clear();
        c.scan(&IteratorPosition::At("c".into()), tick, 1, &mut out);
        assert_eq!(out[0].key, "c");
    }

    #[test]
    fn guards_are_counted() {
        let db = Arc::new(Database::new(DatabaseId(1), "app", Tick::new(1)));
        let g1 = db.guard();
        let g2 = g1.clone();
        assert_eq!(db.guard_count(), 2);
        drop(g1);
        drop(g2);
        assert_eq!(db.guard_count(), 0);
    }

    #[test]
    fn retired_collection_listed_before_its_drop() {
        let db = Database::new(DatabaseId(1), "app", Tick::new(1));
        db.insert_collection(Arc::new(Collection::new(CollectionId(2), "b", "app", Tick::new(2))));
        db.insert_collection(Arc::new(Collection::new(CollectionId(3), "a", "app", Tick::new(3))));

        let dropped = db.remove_collection("b", Tick::new(6)).unwrap();
        assert_eq!(dropped.dropped_tick(), Some(Tick::new(6)));
        assert!(db.collection("b").is_none());

        let names = |tick| {
            db.collections_at(Tick::new(tick))
                .iter()
                .map(|c| c.name().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(2), ["b"]);
        assert_eq!(names(5), ["a", "b"]);
        assert_eq!(names(6), ["a"]);
    }
}
