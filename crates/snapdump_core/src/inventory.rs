//! Snapshot-time listing of databases and collections.

use crate::error::ReplicationResult;
use serde::Serialize;
use snapdump_storage::{CollectionId, Database, DatabaseId, ReadView, Tick};

/// One collection as seen by the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionInventory {
    /// Collection ID.
    pub id: CollectionId,
    /// Collection name.
    pub name: String,
    /// Whether the name marks a system collection.
    pub is_system: bool,
    /// Documents visible at the snapshot tick.
    pub count: u64,
}

/// One database and its collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseInventory {
    /// Database ID.
    pub id: DatabaseId,
    /// Database name.
    pub name: String,
    /// Collections ordered by name.
    pub collections: Vec<CollectionInventory>,
}

/// Result of an inventory request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inventory {
    /// Snapshot tick the listing reflects.
    pub tick: Tick,
    /// Databases ordered by name.
    pub databases: Vec<DatabaseInventory>,
}

impl Inventory {
    /// Returns the listing for the named database.
    #[must_use]
    pub fn database(&self, name: &str) -> Option<&DatabaseInventory> {
        self.databases.iter().find(|d| d.name == name)
    }
}

pub(crate) fn describe_database(
    view: &dyn ReadView,
    database: &Database,
    include_system: bool,
) -> ReplicationResult<DatabaseInventory> {
    let mut collections = Vec::new();
    for collection in view.collections(database) {
        if collection.is_system() && !include_system {
            continue;
        }
        collections.push(CollectionInventory {
            id: collection.id(),
            name: collection.name().to_string(),
            is_system: collection.is_system(),
            count: view.count(&collection)?,
        });
    }
    Ok(DatabaseInventory {
        id: database.id(),
        name: database.name().to_string(),
        collections,
    })
}
