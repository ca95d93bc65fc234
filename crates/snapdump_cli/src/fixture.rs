//! Fixture loading.
//!
//! A fixture is a JSON file shaped like
//!
//! ```json
//! { "app": { "users": [ { "_key": "alice", "age": 31 } ] } }
//! ```
//!
//! Every database, collection and document in it is created in a fresh
//! in-memory engine, in file order.

use crate::error::{CliError, CliResult};
use serde_json::Value;
use snapdump_storage::InMemoryEngine;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Loads a fixture file into a new engine.
pub fn load(path: &Path) -> CliResult<Arc<InMemoryEngine>> {
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)?;
    populate(&value)
}

/// Builds an engine from a parsed fixture.
pub fn populate(fixture: &Value) -> CliResult<Arc<InMemoryEngine>> {
    let databases = fixture
        .as_object()
        .ok_or_else(|| CliError::Fixture("top level must be an object of databases".into()))?;

    let engine = Arc::new(InMemoryEngine::new());
    for (database, collections) in databases {
        engine.create_database(database)?;
        let collections = collections.as_object().ok_or_else(|| {
            CliError::Fixture(format!("database {database} must be an object of collections"))
        })?;

        for (collection, documents) in collections {
            engine.create_collection(database, collection)?;
            let documents = documents.as_array().ok_or_else(|| {
                CliError::Fixture(format!("collection {database}/{collection} must be an array"))
            })?;

            for document in documents {
                let key = document
                    .get("_key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        CliError::Fixture(format!(
                            "document in {database}/{collection} has no string _key"
                        ))
                    })?;
                engine.insert(database, collection, key, document.clone())?;
            }
            debug!(database, collection, documents = documents.len(), "loaded collection");
        }
    }
    Ok(engine)
}

/// Picks the database to work on.
///
/// Falls back to the only database when none is named.
pub fn choose_database(engine: &InMemoryEngine, requested: Option<&str>) -> CliResult<String> {
    use snapdump_storage::StorageEngine;

    if let Some(name) = requested {
        return Ok(name.to_string());
    }
    let databases = engine.databases();
    match databases.as_slice() {
        [only] => Ok(only.name().to_string()),
        _ => Err(CliError::Usage(format!(
            "fixture holds {} databases, pick one with --database",
            databases.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use snapdump_storage::StorageEngine;
    use std::io::Write;

    #[test]
    fn loads_fixture_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"app": {{"users": [{{"_key": "a"}}, {{"_key": "b", "n": 1}}], "_meta": []}}}}"#
        )
        .unwrap();

        let engine = load(file.path()).unwrap();
        let db = engine.database("app").unwrap();
        assert_eq!(db.collections().len(), 2);
        let view = engine.snapshot().unwrap();
        assert_eq!(view.count(&db.collection("users").unwrap()).unwrap(), 2);
    }

    #[test]
    fn missing_key_is_rejected() {
        let err = populate(&json!({"app": {"users": [{"name": "x"}]}})).unwrap_err();
        assert!(matches!(err, CliError::Fixture(_)));
    }

    #[test]
    fn wrong_shape_is_rejected() {
        assert!(matches!(populate(&json!([1, 2])), Err(CliError::Fixture(_))));
        assert!(matches!(
            populate(&json!({"app": {"users": {}}})),
            Err(CliError::Fixture(_))
        ));
    }

    #[test]
    fn single_database_is_default() {
        let engine = populate(&json!({"only": {}})).unwrap();
        assert_eq!(choose_database(&engine, None).unwrap(), "only");

        let engine = populate(&json!({"a": {}, "b": {}})).unwrap();
        assert!(matches!(choose_database(&engine, None), Err(CliError::Usage(_))));
        assert_eq!(choose_database(&engine, Some("b")).unwrap(), "b");
    }
}
