//! # SnapDump Testkit
//!
//! Test utilities for SnapDump.
//!
//! This crate provides:
//! - Populated in-memory engines with predictable keys
//! - Property-based test generators using proptest
//! - Helpers for running operations on many threads at once
//!
//! ## Usage
//!
//! ```rust
//! use snapdump_testkit::prelude::*;
//!
//! let engine = TestEngine::with_documents(10);
//! assert_eq!(engine.keys().len(), 10);
//! assert_eq!(engine.keys()[0], key(0));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
