//! SnapDump CLI
//!
//! Runs replication batches against a JSON fixture loaded into an in-memory
//! engine.
//!
//! # Commands
//!
//! - `inventory` - List databases and collections at the snapshot
//! - `dump` - Page through every document of a collection
//! - `chunks` - Hash the key chunks of a collection
//! - `keys` - List the keys of one chunk
//! - `documents` - Fetch selected documents of one chunk

mod commands;
mod error;
mod fixture;

use clap::{Parser, Subcommand};
use snapdump_core::ChunkSelector;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Snapshot replication tools.
#[derive(Parser)]
#[command(name = "snapdump")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the JSON fixture describing databases and collections
    #[arg(global = true, long)]
    fixture: Option<PathBuf>,

    /// Database to start the batch on (defaults to the only database)
    #[arg(global = true, short, long)]
    database: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List databases and collections visible at the snapshot
    Inventory {
        /// Include system collections
        #[arg(long)]
        include_system: bool,

        /// List every database, not just the bound one
        #[arg(long)]
        global: bool,
    },

    /// Dump every document of a collection in batches
    Dump {
        /// Collection name
        #[arg(short, long)]
        collection: String,

        /// Documents per batch
        #[arg(short, long, default_value = "1000")]
        batch_size: usize,
    },

    /// Hash the key chunks of a collection
    Chunks {
        /// Collection name
        #[arg(short, long)]
        collection: String,

        /// Keys per chunk
        #[arg(long, default_value = "5000")]
        chunk_size: usize,
    },

    /// List the keys and revisions of one chunk
    Keys {
        /// Collection name
        #[arg(short, long)]
        collection: String,

        /// Chunk index
        #[arg(long)]
        chunk: usize,

        /// Keys per chunk
        #[arg(long, default_value = "5000")]
        chunk_size: usize,

        /// First key of the chunk, to seek instead of skipping
        #[arg(long)]
        low_key: Option<String>,
    },

    /// Fetch selected documents of one chunk
    Documents {
        /// Collection name
        #[arg(short, long)]
        collection: String,

        /// Chunk index
        #[arg(long)]
        chunk: usize,

        /// Keys per chunk
        #[arg(long, default_value = "5000")]
        chunk_size: usize,

        /// First key of the chunk, to seek instead of skipping
        #[arg(long)]
        low_key: Option<String>,

        /// Position within the requested keys to resume from
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Byte budget for the response
        #[arg(long, default_value = "1048576")]
        max_bytes: usize,

        /// Keys to fetch, comma separated
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
    },

    /// Show version information
    Version,
}

fn selector(chunk: usize, low_key: Option<String>) -> ChunkSelector {
    match low_key {
        Some(key) => ChunkSelector::at_key(chunk, key),
        None => ChunkSelector::index(chunk),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("SnapDump CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let path = cli.fixture.ok_or("Fixture path required (--fixture)")?;
    let engine = fixture::load(&path)?;
    let database = fixture::choose_database(&engine, cli.database.as_deref())?;
    let format = cli.format.as_str();

    match cli.command {
        Commands::Inventory {
            include_system,
            global,
        } => {
            commands::inventory::run(&engine, &database, include_system, global, format)?;
        }
        Commands::Dump {
            collection,
            batch_size,
        } => {
            commands::dump::run(&engine, &database, &collection, batch_size, format)?;
        }
        Commands::Chunks {
            collection,
            chunk_size,
        } => {
            commands::chunks::run(&engine, &database, &collection, chunk_size, format)?;
        }
        Commands::Keys {
            collection,
            chunk,
            chunk_size,
            low_key,
        } => {
            let selector = selector(chunk, low_key);
            commands::keys::run(&engine, &database, &collection, &selector, chunk_size, format)?;
        }
        Commands::Documents {
            collection,
            chunk,
            chunk_size,
            low_key,
            offset,
            max_bytes,
            ids,
        } => {
            let selector = selector(chunk, low_key);
            commands::documents::run(
                &engine,
                &database,
                &collection,
                &selector,
                chunk_size,
                offset,
                max_bytes,
                &ids,
                format,
            )?;
        }
        Commands::Version => {}
    }

    Ok(())
}
