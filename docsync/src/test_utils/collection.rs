use docsync_config::shared::{CollectionInfo, CollectionSyncSpec};
use serde_json::Value;

use crate::types::{Document, Namespace};

/// Builds a collection pair from `db.collection` names.
pub fn collection_pair(source: &str, destination: &str) -> CollectionSyncSpec {
    CollectionSyncSpec::new(collection_info(source), collection_info(destination))
}

/// Returns the namespace of a `db.collection` name.
pub fn namespace(name: &str) -> Namespace {
    Namespace::from(&collection_info(name))
}

/// Converts a JSON object literal into a [`Document`].
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn document(value: Value) -> Document {
    match value {
        Value::Object(document) => document,
        other => panic!("expected a JSON object, got {other}"),
    }
}

fn collection_info(name: &str) -> CollectionInfo {
    let (db, collection) = name
        .split_once('.')
        .unwrap_or_else(|| panic!("collection name `{name}` is not of the form db.collection"));

    CollectionInfo::new(db, collection)
}
