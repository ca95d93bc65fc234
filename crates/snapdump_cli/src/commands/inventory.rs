//! Inventory command implementation.

use super::{open_context, print_json};
use crate::error::CliResult;
use snapdump_core::Inventory;
use snapdump_storage::InMemoryEngine;
use std::sync::Arc;
use tracing::info;

/// Runs the inventory command.
pub fn run(
    engine: &Arc<InMemoryEngine>,
    database: &str,
    include_system: bool,
    global: bool,
    format: &str,
) -> CliResult<()> {
    info!("Listing inventory of {database}");
    let ctx = open_context(engine, database)?;
    let inventory = ctx.inventory(database, include_system, global)?;

    match format {
        "json" => print_json(&inventory)?,
        _ => print_text_output(&inventory),
    }
    Ok(())
}

fn print_text_output(inventory: &Inventory) {
    println!("Snapshot: {}", inventory.tick);
    for database in &inventory.databases {
        println!();
        println!("Database {} ({})", database.name, database.id);
        if database.collections.is_empty() {
            println!("  (no collections)");
        }
        for collection in &database.collections {
            let marker = if collection.is_system { " [system]" } else { "" };
            println!(
                "  {:<24} {:>10} documents{marker}",
                collection.name, collection.count
            );
        }
    }
}
