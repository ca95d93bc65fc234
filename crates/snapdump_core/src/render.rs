//! Document rendering.
//!
//! Dump operations hand out rendered copies of documents, never references
//! into storage. A rendered document is a map holding `_key`, optionally
//! `_rev`, and the body's own attributes, encoded as JSON or canonical CBOR.

use crate::error::{ReplicationError, ReplicationResult};
use serde::Serialize;
use snapdump_storage::{Document, Revision};

/// Output encoding for rendered documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderFormat {
    /// UTF-8 JSON.
    #[default]
    Json,
    /// CBOR.
    Cbor,
}

/// Immutable rendering configuration captured by each cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Output encoding.
    pub format: RenderFormat,
    /// Whether to emit the `_rev` attribute.
    pub include_revision: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            format: RenderFormat::Json,
            include_revision: true,
        }
    }
}

impl RenderOptions {
    /// Creates default options (JSON, with revisions).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the output encoding.
    #[must_use]
    pub const fn format(mut self, format: RenderFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets whether `_rev` is emitted.
    #[must_use]
    pub const fn include_revision(mut self, value: bool) -> Self {
        self.include_revision = value;
        self
    }
}

/// A document rendered for transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedDocument {
    /// Primary key.
    pub key: String,
    /// Revision at the snapshot.
    pub revision: Revision,
    /// Encoded document.
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl RenderedDocument {
    /// Returns the encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the encoding is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Parses JSON output back into a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not JSON.
    pub fn to_json(&self) -> ReplicationResult<serde_json::Value> {
        serde_json::from_slice(&self.bytes).map_err(|e| ReplicationError::internal(e.to_string()))
    }
}

/// Renders `doc` according to `options`.
///
/// # Errors
///
/// Returns an internal error if encoding fails.
pub fn render(doc: &Document, options: &RenderOptions) -> ReplicationResult<RenderedDocument> {
    let mut map = serde_json::Map::new();
    match &doc.body {
        serde_json::Value::Object(fields) => {
            for (name, value) in fields {
                if name != "_key" && name != "_rev" {
                    map.insert(name.clone(), value.clone());
                }
            }
        }
        serde_json::Value::Null => {}
        other => {
            map.insert("value".to_string(), other.clone());
        }
    }
    map.insert("_key".to_string(), doc.key.clone().into());
    if options.include_revision {
        map.insert("_rev".to_string(), doc.revision.to_string().into());
    }
    let value = serde_json::Value::Object(map);

    let bytes = match options.format {
        RenderFormat::Json => {
            serde_json::to_vec(&value).map_err(|e| ReplicationError::internal(e.to_string()))?
        }
        RenderFormat::Cbor => {
            let mut buf = Vec::new();
            ciborium::ser::into_writer(&value, &mut buf)
                .map_err(|e| ReplicationError::internal(e.to_string()))?;
            buf
        }
    };

    Ok(RenderedDocument {
        key: doc.key.clone(),
        revision: doc.revision,
        bytes,
    })
}
