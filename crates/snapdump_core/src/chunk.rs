//! Chunked key hashing for the incremental diff protocol.
//!
//! The key space of a collection, as seen by a snapshot, is cut into
//! consecutive chunks of exactly `chunk_size` keys (the last one may be
//! shorter). A peer compares chunk hashes with its own, then asks for the
//! keys of differing chunks, then for the documents it is missing:
//!
//! ```text
//! key_chunks(n)          -> [ {min, max, count, hash}, ... ]
//! chunk_keys(sel, n)     -> [ (key, rev), ... ]            one chunk
//! chunk_documents(...)   -> [ doc, ... ] + next offset      subset of one chunk
//! ```
//!
//! A chunk hash is SHA-256 over, for each key in ascending order, the key
//! length (u64 little-endian), the key bytes and the revision (u64
//! little-endian). It does not depend on anything but the keys and
//! revisions, so two peers holding the same data agree on it.

use crate::cursor::CursorGuard;
use crate::error::{ReplicationError, ReplicationResult};
use crate::render::RenderedDocument;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use snapdump_storage::KeyEntry;
use std::collections::HashSet;
use std::fmt;

/// Upper bound on up-front key buffer allocation.
const PREALLOCATE: usize = 4096;

/// SHA-256 digest identifying a chunk's contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkHash([u8; 32]);

impl ChunkHash {
    /// Returns the raw digest.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({self})")
    }
}

impl Serialize for ChunkHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Incremental chunk hash computation.
#[derive(Clone, Default)]
pub struct ChunkHasher {
    digest: Sha256,
    count: u64,
}

impl ChunkHasher {
    /// Creates an empty hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next key in ascending order.
    pub fn update(&mut self, entry: &KeyEntry) {
        self.digest.update((entry.key.len() as u64).to_le_bytes());
        self.digest.update(entry.key.as_bytes());
        self.digest.update(entry.revision.as_u64().to_le_bytes());
        self.count += 1;
    }

    /// Returns the number of keys fed so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Finishes the hash.
    #[must_use]
    pub fn finish(self) -> ChunkHash {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.digest.finalize());
        ChunkHash(out)
    }

    /// Hashes a whole chunk at once.
    #[must_use]
    pub fn hash_entries(entries: &[KeyEntry]) -> ChunkHash {
        let mut hasher = Self::new();
        for entry in entries {
            hasher.update(entry);
        }
        hasher.finish()
    }
}

impl fmt::Debug for ChunkHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkHasher")
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}

/// Summary of one chunk of the key space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    /// Smallest key in the chunk.
    pub min_key: String,
    /// Largest key in the chunk.
    pub max_key: String,
    /// Hash of the chunk's keys and revisions.
    pub hash: ChunkHash,
    /// Number of keys in the chunk.
    pub count: u64,
}

impl ChunkDescriptor {
    fn from_entries(entries: &[KeyEntry]) -> Option<Self> {
        let first = entries.first()?;
        let last = entries.last()?;
        Some(Self {
            min_key: first.key.clone(),
            max_key: last.key.clone(),
            hash: ChunkHasher::hash_entries(entries),
            count: entries.len() as u64,
        })
    }
}

/// Identifies the chunk a keys or documents request targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSelector {
    /// Zero-based chunk index.
    pub index: usize,
    /// First key of the chunk, if the caller knows it.
    pub low_key: Option<String>,
}

impl ChunkSelector {
    /// Selects a chunk by index alone.
    #[must_use]
    pub fn index(index: usize) -> Self {
        Self {
            index,
            low_key: None,
        }
    }

    /// Selects a chunk by index and first key.
    ///
    /// The cursor seeks straight to `low_key` instead of counting keys.
    #[must_use]
    pub fn at_key(index: usize, low_key: impl Into<String>) -> Self {
        Self {
            index,
            low_key: Some(low_key.into()),
        }
    }
}

/// Result of a documents request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentBatch {
    /// Rendered documents, in request order.
    pub documents: Vec<RenderedDocument>,
    /// Offset into the id list to continue from, if any remain.
    pub next_offset: Option<usize>,
    /// Total encoded size of `documents`.
    pub bytes: usize,
}

/// Chunked enumeration over one cursor.
///
/// Every operation either completes or leaves the cursor where it was.
#[derive(Debug)]
pub struct ChunkDumper<'g, 'c> {
    guard: &'g mut CursorGuard<'c>,
}

impl<'g, 'c> ChunkDumper<'g, 'c> {
    /// Wraps a held cursor.
    pub fn new(guard: &'g mut CursorGuard<'c>) -> Self {
        Self { guard }
    }

    /// Describes every chunk of the key space.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` if `chunk_size` is zero, and a storage error
    /// if reading fails.
    pub fn key_chunks(&mut self, chunk_size: usize) -> ReplicationResult<Vec<ChunkDescriptor>> {
        check_chunk_size(chunk_size)?;
        self.restoring(|guard| {
            guard.rewind();
            let mut chunks = Vec::new();
            let mut entries = Vec::with_capacity(chunk_size.min(PREALLOCATE));
            loop {
                entries.clear();
                let has_more = guard.read_keys(chunk_size, &mut entries)?;
                if let Some(chunk) = ChunkDescriptor::from_entries(&entries) {
                    chunks.push(chunk);
                }
                if !has_more {
                    break;
                }
            }
            Ok(chunks)
        })
    }

    /// Returns the keys and revisions of the selected chunk.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` if `chunk_size` is zero, the chunk lies beyond
    /// the end of the key space, or `low_key` is not the chunk's first key.
    pub fn chunk_keys(
        &mut self,
        selector: &ChunkSelector,
        chunk_size: usize,
    ) -> ReplicationResult<Vec<KeyEntry>> {
        check_chunk_size(chunk_size)?;
        self.restoring(|guard| load_chunk(guard, selector, chunk_size))
    }

    /// Renders the requested documents of the selected chunk.
    ///
    /// Starts at `ids[offset_in_chunk]` and stops before the document that
    /// would push the batch past `max_chunk_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` if `chunk_size` is zero, the chunk cannot be
    /// located, an id is not in the chunk or repeated, `offset_in_chunk`
    /// exceeds `ids.len()`, or the first document alone is larger than
    /// `max_chunk_size`.
    pub fn chunk_documents(
        &mut self,
        selector: &ChunkSelector,
        chunk_size: usize,
        offset_in_chunk: usize,
        max_chunk_size: usize,
        ids: &[String],
    ) -> ReplicationResult<DocumentBatch> {
        check_chunk_size(chunk_size)?;
        if offset_in_chunk > ids.len() {
            return Err(ReplicationError::bad_parameter(format!(
                "offset {offset_in_chunk} past the end of {} ids",
                ids.len()
            )));
        }

        self.restoring(|guard| {
            let keys = load_chunk(guard, selector, chunk_size)?;
            let in_chunk: HashSet<&str> = keys.iter().map(|e| e.key.as_str()).collect();
            let mut seen = HashSet::with_capacity(ids.len());
            for id in ids {
                if !in_chunk.contains(id.as_str()) {
                    return Err(ReplicationError::bad_parameter(format!(
                        "key {id} is not in chunk {}",
                        selector.index
                    )));
                }
                if !seen.insert(id.as_str()) {
                    return Err(ReplicationError::bad_parameter(format!(
                        "key {id} requested twice"
                    )));
                }
            }

            let mut batch = DocumentBatch {
                documents: Vec::new(),
                next_offset: None,
                bytes: 0,
            };
            for (i, id) in ids.iter().enumerate().skip(offset_in_chunk) {
                let doc = guard.render_key(id)?;
                if batch.bytes + doc.len() > max_chunk_size {
                    if batch.documents.is_empty() {
                        return Err(ReplicationError::bad_parameter(format!(
                            "document {id} is {} bytes, larger than the {max_chunk_size} byte limit",
                            doc.len()
                        )));
                    }
                    batch.next_offset = Some(i);
                    break;
                }
                batch.bytes += doc.len();
                batch.documents.push(doc);
            }
            Ok(batch)
        })
    }

    fn restoring<T>(
        &mut self,
        op: impl FnOnce(&mut CursorGuard<'c>) -> ReplicationResult<T>,
    ) -> ReplicationResult<T> {
        let checkpoint = self.guard.checkpoint();
        let result = op(&mut *self.guard);
        if result.is_err() {
            self.guard.restore(checkpoint);
        }
        result
    }
}

fn check_chunk_size(chunk_size: usize) -> ReplicationResult<()> {
    if chunk_size == 0 {
        return Err(ReplicationError::bad_parameter("chunk size must be positive"));
    }
    Ok(())
}

/// Positions the cursor at the selected chunk and reads it.
///
/// Selecting by index continues from the current offset when the chunk
/// lies at or after it and that offset is exact, and rewinds otherwise.
/// Selecting by `low_key` reads in place when the exact offset already
/// equals the chunk start, which also checks that `low_key` belongs to
/// that index; otherwise it seeks, and the offset it records is only
/// trusted again after a rewind.
fn load_chunk(
    guard: &mut CursorGuard<'_>,
    selector: &ChunkSelector,
    chunk_size: usize,
) -> ReplicationResult<Vec<KeyEntry>> {
    let target = selector
        .index
        .checked_mul(chunk_size)
        .map(|t| t as u64)
        .ok_or_else(|| {
            ReplicationError::bad_parameter(format!("chunk index {} out of range", selector.index))
        })?;

    let cursor = guard.cursor();
    let in_place = cursor.is_offset_exact() && cursor.offset() == target;
    match &selector.low_key {
        Some(_) if in_place => {}
        Some(low_key) => {
            guard.seek_key(low_key);
            guard.set_offset(target);
        }
        None => {
            let offset = guard.cursor().offset();
            let from = if target < offset || !guard.cursor().is_offset_exact() {
                guard.rewind();
                0
            } else {
                offset
            };
            let skipped = guard.skip(target - from)?;
            if from + skipped < target {
                return Err(beyond_end(selector.index));
            }
        }
    }

    let mut keys = Vec::with_capacity(chunk_size.min(PREALLOCATE));
    guard.read_keys(chunk_size, &mut keys)?;
    match (keys.first(), &selector.low_key) {
        (None, _) => Err(beyond_end(selector.index)),
        (Some(first), Some(low_key)) if first.key != *low_key => {
            Err(ReplicationError::bad_parameter(format!(
                "chunk {} does not start at key {low_key}",
                selector.index
            )))
        }
        _ => Ok(keys),
    }
}

fn beyond_end(index: usize) -> ReplicationError {
    ReplicationError::bad_parameter(format!("chunk {index} is beyond the end of the key space"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Cursor;
    use crate::error::ErrorKind;
    use crate::render::RenderOptions;
    use serde_json::json;
    use snapdump_storage::{InMemoryEngine, Revision, StorageEngine};

    fn cursor(n: usize) -> (InMemoryEngine, Cursor) {
        let engine = InMemoryEngine::new();
        engine.create_database("db").unwrap();
        let coll = engine.create_collection("db", "c").unwrap();
        for i in 0..n {
            engine
                .insert("db", "c", &format!("k{i:04}"), json!({ "i": i }))
                .unwrap();
        }
        let view = engine.snapshot().unwrap();
        let cursor = Cursor::open(view, &coll, RenderOptions::default()).unwrap();
        (engine, cursor)
    }

    fn entry(key: &str, rev: u64) -> KeyEntry {
        KeyEntry {
            key: key.into(),
            revision: Revision(rev),
        }
    }

    fn ids(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| (*k).to_string()).collect()
    }

    #[test]
    fn hash_is_order_sensitive() {
        let a = ChunkHasher::hash_entries(&[entry("a", 1), entry("b", 2)]);
        let b = ChunkHasher::hash_entries(&[entry("b", 2), entry("a", 1)]);
        assert_ne!(a, b);
    }

    #[test]
    fn hash_sees_revisions() {
        let a = ChunkHasher::hash_entries(&[entry("a", 1)]);
        let b = ChunkHasher::hash_entries(&[entry("a", 2)]);
        assert_ne!(a, b);
    }

    #[test]
    fn hash_separates_key_boundaries() {
        let a = ChunkHasher::hash_entries(&[entry("ab", 1), entry("c", 1)]);
        let b = ChunkHasher::hash_entries(&[entry("a", 1), entry("bc", 1)]);
        assert_ne!(a, b);
    }

    #[test]
    fn hash_renders_as_hex() {
        let hash = ChunkHasher::new().finish();
        let hex = hash.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("e3b0c442"));
        assert_eq!(serde_json::to_value(hash).unwrap(), json!(hex));
    }

    #[test]
    fn chunks_split_key_space() {
        let (_engine, cursor) = cursor(25);
        let mut guard = cursor.try_acquire().unwrap();
        let chunks = ChunkDumper::new(&mut guard).key_chunks(10).unwrap();
        let counts: Vec<_> = chunks.iter().map(|c| c.count).collect();
        assert_eq!(counts, [10, 10, 5]);
        assert_eq!(chunks[1].min_key, "k0010");
        assert_eq!(chunks[1].max_key, "k0019");
    }

    #[test]
    fn empty_collection_has_no_chunks() {
        let (_engine, cursor) = cursor(0);
        let mut guard = cursor.try_acquire().unwrap();
        let mut dumper = ChunkDumper::new(&mut guard);
        assert!(dumper.key_chunks(10).unwrap().is_empty());
        let err = dumper.chunk_keys(&ChunkSelector::index(0), 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParameter);
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let (_engine, cursor) = cursor(3);
        let mut guard = cursor.try_acquire().unwrap();
        let err = ChunkDumper::new(&mut guard).key_chunks(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParameter);
    }

    #[test]
    fn keys_by_index_in_any_order() {
        let (_engine, cursor) = cursor(25);
        let mut guard = cursor.try_acquire().unwrap();
        let mut dumper = ChunkDumper::new(&mut guard);

        let second = dumper.chunk_keys(&ChunkSelector::index(1), 10).unwrap();
        assert_eq!(second.first().unwrap().key, "k0010");
        let last = dumper.chunk_keys(&ChunkSelector::index(2), 10).unwrap();
        assert_eq!(last.len(), 5);
        let first = dumper.chunk_keys(&ChunkSelector::index(0), 10).unwrap();
        assert_eq!(first.first().unwrap().key, "k0000");
        assert_eq!(guard.cursor().offset(), 10);
    }

    #[test]
    fn keys_beyond_end_rejected() {
        let (_engine, cursor) = cursor(20);
        let mut guard = cursor.try_acquire().unwrap();
        let mut dumper = ChunkDumper::new(&mut guard);
        let err = dumper.chunk_keys(&ChunkSelector::index(2), 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParameter);
        let err = dumper.chunk_keys(&ChunkSelector::index(usize::MAX), 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParameter);
    }

    #[test]
    fn keys_by_low_key() {
        let (_engine, cursor) = cursor(25);
        let mut guard = cursor.try_acquire().unwrap();
        let mut dumper = ChunkDumper::new(&mut guard);
        let keys = dumper
            .chunk_keys(&ChunkSelector::at_key(2, "k0020"), 10)
            .unwrap();
        assert_eq!(keys.len(), 5);
        assert_eq!(guard.cursor().offset(), 25);
        assert!(!guard.cursor().is_offset_exact());
    }

    #[test]
    fn low_key_from_another_chunk_does_not_shift_index_reads() {
        let (_engine, cursor) = cursor(60);
        let mut guard = cursor.try_acquire().unwrap();
        let mut dumper = ChunkDumper::new(&mut guard);
        dumper.key_chunks(10).unwrap();

        // Accepted: the offset is not where chunk 0 starts, so nothing
        // can tell the key belongs to chunk 3.
        let keys = dumper
            .chunk_keys(&ChunkSelector::at_key(0, "k0030"), 10)
            .unwrap();
        assert_eq!(keys[0].key, "k0030");
        let keys = dumper.chunk_keys(&ChunkSelector::index(1), 10).unwrap();
        assert_eq!(keys.first().unwrap().key, "k0010");
        assert_eq!(keys.last().unwrap().key, "k0019");

        // The exact offset now sits at chunk 2, so its low key is checked.
        let err = dumper
            .chunk_keys(&ChunkSelector::at_key(2, "k0040"), 10)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParameter);
        assert_eq!(guard.cursor().offset(), 20);
        assert!(guard.cursor().is_offset_exact());
    }

    #[test]
    fn wrong_low_key_rejected() {
        let (_engine, cursor) = cursor(25);
        let mut guard = cursor.try_acquire().unwrap();
        let mut dumper = ChunkDumper::new(&mut guard);
        let err = dumper
            .chunk_keys(&ChunkSelector::at_key(1, "k0010x"), 10)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParameter);
    }

    #[test]
    fn documents_respect_byte_limit() {
        let (_engine, cursor) = cursor(10);
        let mut guard = cursor.try_acquire().unwrap();
        let mut dumper = ChunkDumper::new(&mut guard);
        let wanted = ids(&["k0001", "k0003", "k0005", "k0007"]);

        let one = dumper
            .chunk_documents(&ChunkSelector::index(0), 10, 0, usize::MAX, &wanted[..1])
            .unwrap();
        let size = one.bytes;

        let batch = dumper
            .chunk_documents(&ChunkSelector::index(0), 10, 0, size * 2 + 1, &wanted)
            .unwrap();
        assert_eq!(batch.documents.len(), 2);
        assert_eq!(batch.next_offset, Some(2));
        assert!(batch.bytes <= size * 2 + 1);

        let rest = dumper
            .chunk_documents(&ChunkSelector::index(0), 10, 2, size * 2 + 1, &wanted)
            .unwrap();
        let keys: Vec<_> = rest.documents.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, ["k0005", "k0007"]);
        assert_eq!(rest.next_offset, None);
    }

    #[test]
    fn oversized_first_document_rejected() {
        let (_engine, cursor) = cursor(3);
        let mut guard = cursor.try_acquire().unwrap();
        let err = ChunkDumper::new(&mut guard)
            .chunk_documents(&ChunkSelector::index(0), 3, 0, 4, &ids(&["k0000"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParameter);
    }

    #[test]
    fn foreign_and_duplicate_ids_rejected() {
        let (_engine, cursor) = cursor(20);
        let mut guard = cursor.try_acquire().unwrap();
        let mut dumper = ChunkDumper::new(&mut guard);
        let err = dumper
            .chunk_documents(&ChunkSelector::index(0), 10, 0, 1 << 20, &ids(&["k0015"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParameter);
        let err = dumper
            .chunk_documents(&ChunkSelector::index(0), 10, 0, 1 << 20, &ids(&["k0001", "k0001"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParameter);
    }

    #[test]
    fn offset_past_ids_rejected() {
        let (_engine, cursor) = cursor(5);
        let mut guard = cursor.try_acquire().unwrap();
        let mut dumper = ChunkDumper::new(&mut guard);
        let wanted = ids(&["k0000"]);
        let err = dumper
            .chunk_documents(&ChunkSelector::index(0), 5, 2, 1 << 20, &wanted)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParameter);

        let empty = dumper
            .chunk_documents(&ChunkSelector::index(0), 5, 1, 1 << 20, &wanted)
            .unwrap();
        assert!(empty.documents.is_empty());
        assert_eq!(empty.next_offset, None);
    }

    #[test]
    fn failed_chunk_read_restores_cursor() {
        let (engine, cursor) = cursor(30);
        let mut guard = cursor.try_acquire().unwrap();
        let mut dumper = ChunkDumper::new(&mut guard);
        dumper.chunk_keys(&ChunkSelector::index(1), 10).unwrap();

        engine.set_read_failure(true);
        let err = dumper.chunk_keys(&ChunkSelector::index(2), 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(guard.cursor().offset(), 20);
    }
}
