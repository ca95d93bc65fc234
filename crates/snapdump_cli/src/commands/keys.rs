//! Keys command implementation.

use super::{open_context, print_json};
use crate::error::CliResult;
use snapdump_core::ChunkSelector;
use snapdump_storage::InMemoryEngine;
use std::sync::Arc;
use tracing::info;

/// Runs the keys command.
pub fn run(
    engine: &Arc<InMemoryEngine>,
    database: &str,
    collection: &str,
    selector: &ChunkSelector,
    chunk_size: usize,
    format: &str,
) -> CliResult<()> {
    info!("Listing keys of chunk {} of {database}/{collection}", selector.index);
    let ctx = open_context(engine, database)?;
    ctx.bind_collection(database, collection)?;
    let keys = ctx.dump_keys(selector, chunk_size)?;

    match format {
        "json" => print_json(&keys)?,
        _ => {
            for entry in &keys {
                println!("{}  {}", entry.key, entry.revision);
            }
        }
    }
    Ok(())
}
