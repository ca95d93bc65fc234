//! CLI command implementations.

pub mod chunks;
pub mod documents;
pub mod dump;
pub mod inventory;
pub mod keys;

use crate::error::CliResult;
use serde::Serialize;
use snapdump_core::{ContextConfig, ReplicationContext, ServerId};
use snapdump_storage::InMemoryEngine;
use std::sync::Arc;

/// Origin reported for contexts started from the command line.
const CLI_ORIGIN: ServerId = ServerId(0);

/// Starts a replication context on `database`.
pub fn open_context(
    engine: &Arc<InMemoryEngine>,
    database: &str,
) -> CliResult<Arc<ReplicationContext>> {
    let ctx = ReplicationContext::create(
        engine.clone(),
        database,
        CLI_ORIGIN,
        ContextConfig::default(),
    )?;
    Ok(ctx)
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
