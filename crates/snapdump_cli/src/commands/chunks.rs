//! Key-chunks command implementation.

use super::{open_context, print_json};
use crate::error::CliResult;
use snapdump_storage::InMemoryEngine;
use std::sync::Arc;
use tracing::info;

/// Runs the chunks command.
pub fn run(
    engine: &Arc<InMemoryEngine>,
    database: &str,
    collection: &str,
    chunk_size: usize,
    format: &str,
) -> CliResult<()> {
    info!("Hashing key chunks of {database}/{collection}");
    let ctx = open_context(engine, database)?;
    ctx.bind_collection(database, collection)?;
    let chunks = ctx.dump_key_chunks(chunk_size)?;

    match format {
        "json" => print_json(&chunks)?,
        _ => {
            for (index, chunk) in chunks.iter().enumerate() {
                println!(
                    "{index:>6}  {:>8}  {}  {} .. {}",
                    chunk.count, chunk.hash, chunk.min_key, chunk.max_key
                );
            }
            println!();
            println!("{} chunks, {} documents", chunks.len(), ctx.count()?);
        }
    }
    Ok(())
}
