//! # SnapDump Storage
//!
//! Storage engine seam consumed by the SnapDump replication core.
//!
//! The replication core never touches raw storage. It asks a
//! [`StorageEngine`] for a [`ReadView`] (a point-in-time snapshot) and reads
//! collections through [`IndexIterator`]s opened on that view.
//!
//! ## Design Principles
//!
//! - Snapshots are immutable: writes committed after a snapshot's tick are
//!   never visible through it
//! - Iterators walk a collection in primary-key order and can be repositioned
//! - Databases and collections are shared handles; a [`DatabaseGuard`] keeps
//!   a database from being dropped while it is in use
//! - Everything is `Send + Sync` for concurrent access
//!
//! ## Available Engines
//!
//! - [`InMemoryEngine`] - multi-version in-memory engine for tests and tools
//!
//! ## Example
//!
//! ```rust
//! use snapdump_storage::{InMemoryEngine, IteratorPosition, StorageEngine};
//! use serde_json::json;
//!
//! let engine = InMemoryEngine::new();
//! engine.create_database("app").unwrap();
//! let users = engine.create_collection("app", "users").unwrap();
//! engine.insert("app", "users", "alice", json!({"age": 31})).unwrap();
//!
//! let view = engine.snapshot().unwrap();
//! engine.insert("app", "users", "bob", json!({"age": 27})).unwrap();
//!
//! // The snapshot predates "bob".
//! assert_eq!(view.count(&users).unwrap(), 1);
//!
//! let mut iter = view.iterator(&users).unwrap();
//! let mut keys = Vec::new();
//! iter.next_batch(10, &mut keys).unwrap();
//! assert_eq!(keys[0].key, "alice");
//! assert_eq!(iter.position(), IteratorPosition::End);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod engine;
mod error;
mod memory;
mod types;

pub use catalog::{Collection, Database, DatabaseGuard};
pub use engine::{IndexIterator, IteratorPosition, ReadView, StorageEngine};
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryEngine;
pub use types::{CollectionId, DatabaseId, Document, KeyEntry, Revision, Tick};
