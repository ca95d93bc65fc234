//! Dump command implementation.

use super::{open_context, print_json};
use crate::error::{CliError, CliResult};
use serde_json::Value;
use snapdump_core::RenderedDocument;
use snapdump_storage::InMemoryEngine;
use std::sync::Arc;
use tracing::{debug, info};

/// Runs the dump command.
///
/// Pages through the whole collection `batch_size` documents at a time.
pub fn run(
    engine: &Arc<InMemoryEngine>,
    database: &str,
    collection: &str,
    batch_size: usize,
    format: &str,
) -> CliResult<()> {
    info!("Dumping {database}/{collection}");
    let ctx = open_context(engine, database)?;

    let mut documents = Vec::new();
    let mut batches = 0;
    loop {
        let batch = ctx.dump(database, collection, batch_size)?;
        batches += 1;
        debug!(batch = batches, documents = batch.documents.len(), "read batch");
        documents.extend(batch.documents);
        if !batch.has_more {
            break;
        }
    }

    match format {
        "json" => print_json(&to_values(&documents)?)?,
        _ => {
            for doc in &documents {
                println!("{}", String::from_utf8_lossy(&doc.bytes));
            }
            println!();
            println!("{} documents in {batches} batches", documents.len());
        }
    }
    Ok(())
}

/// Parses rendered JSON documents back into values for pretty output.
pub fn to_values(documents: &[RenderedDocument]) -> CliResult<Vec<Value>> {
    documents
        .iter()
        .map(|doc| doc.to_json().map_err(CliError::from))
        .collect()
}
