//! Documents command implementation.

use super::dump::to_values;
use super::{open_context, print_json};
use crate::error::CliResult;
use serde::Serialize;
use serde_json::Value;
use snapdump_core::ChunkSelector;
use snapdump_storage::InMemoryEngine;
use std::sync::Arc;
use tracing::info;

/// Output of the documents command.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentsOutput {
    documents: Vec<Value>,
    next_offset: Option<usize>,
    bytes: usize,
}

/// Runs the documents command.
#[allow(clippy::too_many_arguments)]
pub fn run(
    engine: &Arc<InMemoryEngine>,
    database: &str,
    collection: &str,
    selector: &ChunkSelector,
    chunk_size: usize,
    offset: usize,
    max_bytes: usize,
    ids: &[String],
    format: &str,
) -> CliResult<()> {
    info!(
        "Fetching {} documents of chunk {} of {database}/{collection}",
        ids.len(),
        selector.index
    );
    let ctx = open_context(engine, database)?;
    ctx.bind_collection(database, collection)?;
    let batch = ctx.dump_documents(selector, chunk_size, offset, max_bytes, ids)?;

    match format {
        "json" => print_json(&DocumentsOutput {
            documents: to_values(&batch.documents)?,
            next_offset: batch.next_offset,
            bytes: batch.bytes,
        })?,
        _ => {
            for doc in &batch.documents {
                println!("{}", String::from_utf8_lossy(&doc.bytes));
            }
            println!();
            match batch.next_offset {
                Some(next) => println!("{} bytes, continue at offset {next}", batch.bytes),
                None => println!("{} bytes, complete", batch.bytes),
            }
        }
    }
    Ok(())
}
