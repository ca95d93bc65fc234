//! Test fixtures and engine helpers.
//!
//! Provides populated in-memory engines for context and cursor tests.

use serde_json::{json, Value};
use snapdump_storage::{InMemoryEngine, Revision};
use std::sync::Arc;

/// Database created by every fixture.
pub const TEST_DB: &str = "test";

/// Collection created by every fixture.
pub const TEST_COLLECTION: &str = "docs";

/// Returns the key of the `i`-th fixture document.
///
/// Keys are zero padded, so key order matches numeric order.
#[must_use]
pub fn key(i: usize) -> String {
    format!("k{i:06}")
}

/// Returns the body of the `i`-th fixture document.
#[must_use]
pub fn body(i: usize) -> Value {
    json!({ "index": i, "name": format!("doc-{i}") })
}

/// An in-memory engine with one database and one collection.
pub struct TestEngine {
    /// The engine instance.
    pub engine: Arc<InMemoryEngine>,
}

impl TestEngine {
    /// Creates an engine with an empty [`TEST_COLLECTION`].
    #[must_use]
    pub fn new() -> Self {
        let engine = Arc::new(InMemoryEngine::new());
        engine
            .create_database(TEST_DB)
            .expect("Failed to create test database");
        engine
            .create_collection(TEST_DB, TEST_COLLECTION)
            .expect("Failed to create test collection");
        Self { engine }
    }

    /// Creates an engine whose collection holds documents `0..count`.
    #[must_use]
    pub fn with_documents(count: usize) -> Self {
        let fixture = Self::new();
        fixture.insert_range(TEST_COLLECTION, 0..count);
        fixture
    }

    /// Adds an empty collection to the test database.
    pub fn add_collection(&self, name: &str) {
        self.engine
            .create_collection(TEST_DB, name)
            .expect("Failed to create collection");
    }

    /// Inserts documents for the given indices into `collection`.
    pub fn insert_range(&self, collection: &str, range: std::ops::Range<usize>) {
        for i in range {
            self.engine
                .insert(TEST_DB, collection, &key(i), body(i))
                .expect("Failed to insert document");
        }
    }

    /// Inserts one document.
    pub fn put(&self, collection: &str, key: &str, body: Value) -> Revision {
        self.engine
            .insert(TEST_DB, collection, key, body)
            .expect("Failed to insert document")
    }

    /// Removes one document.
    pub fn delete(&self, collection: &str, key: &str) -> bool {
        self.engine
            .remove(TEST_DB, collection, key)
            .expect("Failed to remove document")
    }

    /// Returns the live keys of [`TEST_COLLECTION`] in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        use snapdump_storage::StorageEngine;

        let view = self.engine.snapshot().expect("Failed to take snapshot");
        let collection = self
            .engine
            .database(TEST_DB)
            .and_then(|db| db.collection(TEST_COLLECTION))
            .expect("Test collection missing");
        let mut iter = view
            .iterator(&collection)
            .expect("Failed to open iterator");
        let mut entries = Vec::new();
        while iter
            .next_batch(1024, &mut entries)
            .expect("Failed to read keys")
        {}
        entries.into_iter().map(|e| e.key).collect()
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestEngine {
    type Target = Arc<InMemoryEngine>;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_sort_numerically() {
        assert!(key(9) < key(10));
        assert_eq!(key(42), "k000042");
    }

    #[test]
    fn populated_engine() {
        let fixture = TestEngine::with_documents(3);
        assert_eq!(fixture.keys(), [key(0), key(1), key(2)]);
        assert!(fixture.delete(TEST_COLLECTION, &key(1)));
        assert_eq!(fixture.keys().len(), 2);
    }
}
