//! # SnapDump Core
//!
//! Snapshot-scoped replication contexts.
//!
//! A replication client starts a batch, which pins a consistent snapshot of
//! the storage engine, and then pulls data from it while the engine keeps
//! accepting writes. This crate provides:
//! - [`ReplicationContext`] with lease and TTL bookkeeping
//! - [`Cursor`]s, one per collection, that refuse concurrent advancement
//! - [`ChunkDumper`], the chunk-hash diff protocol (key chunks, keys, documents)
//! - [`sweep`] for reclaiming expired or deleted contexts
//!
//! ## Example
//!
//! ```rust
//! use snapdump_core::{ChunkSelector, ContextConfig, ReplicationContext, ServerId};
//! use snapdump_storage::InMemoryEngine;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let engine = Arc::new(InMemoryEngine::new());
//! engine.create_database("app").unwrap();
//! engine.create_collection("app", "users").unwrap();
//! for i in 0..25 {
//!     engine.insert("app", "users", &format!("u{i:03}"), json!({"n": i})).unwrap();
//! }
//!
//! let ctx = ReplicationContext::create(engine, "app", ServerId(2), ContextConfig::default()).unwrap();
//! let lease = ctx.lease(None, false).unwrap();
//! lease.bind_collection("app", "users").unwrap();
//!
//! let chunks = lease.dump_key_chunks(10).unwrap();
//! assert_eq!(chunks.iter().map(|c| c.count).collect::<Vec<_>>(), [10, 10, 5]);
//!
//! let keys = lease.dump_keys(&ChunkSelector::index(2), 10).unwrap();
//! assert_eq!(keys[0].key, "u020");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod chunk;
mod clock;
mod config;
mod context;
mod cursor;
mod error;
mod inventory;
mod lease;
mod render;
mod sweeper;
mod types;

pub use chunk::{ChunkDescriptor, ChunkDumper, ChunkHash, ChunkHasher, ChunkSelector, DocumentBatch};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::ContextConfig;
pub use context::{DumpBatch, LeaseGuard, ReplicationContext};
pub use cursor::{Checkpoint, Cursor, CursorGuard};
pub use error::{ErrorKind, ReplicationError, ReplicationResult};
pub use inventory::{CollectionInventory, DatabaseInventory, Inventory};
pub use lease::{ContextPhase, LeaseDenied, LeaseState};
pub use render::{render, RenderFormat, RenderOptions, RenderedDocument};
pub use sweeper::{sweep, ContextSource, SweepReport};
pub use types::{BatchId, ServerId};
