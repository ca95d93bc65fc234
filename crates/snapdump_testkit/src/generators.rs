//! Property-based test generators using proptest.
//!
//! Provides strategies for generating key sets and write histories.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// Strategy for generating valid document keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_-]{1,16}").expect("Invalid regex")
}

/// Strategy for generating a set of distinct keys.
pub fn key_set_strategy(max: usize) -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(key_strategy(), 0..=max)
}

/// Strategy for generating small document bodies.
pub fn body_strategy() -> impl Strategy<Value = Value> {
    (any::<i64>(), "[a-z ]{0,40}").prop_map(|(n, text)| json!({ "n": n, "text": text }))
}

/// A single write against one collection.
#[derive(Debug, Clone)]
pub enum Write {
    /// Insert or replace a document.
    Put(String, Value),
    /// Remove a document.
    Remove(String),
}

/// Strategy for generating a sequence of writes over a small key space.
///
/// The key space is small so that removes and overwrites hit existing keys.
pub fn write_strategy(max_writes: usize) -> impl Strategy<Value = Vec<Write>> {
    let key = (0u32..64).prop_map(|i| format!("w{i:02}"));
    let write = prop_oneof![
        3 => (key.clone(), body_strategy()).prop_map(|(k, v)| Write::Put(k, v)),
        1 => key.prop_map(Write::Remove),
    ];
    prop::collection::vec(write, 0..=max_writes)
}

/// Strategy for generating a chunk size.
pub fn chunk_size_strategy() -> impl Strategy<Value = usize> {
    1usize..=64
}
