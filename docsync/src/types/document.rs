use std::fmt;

use docsync_config::shared::CollectionInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A document as stored in a collection.
pub type Document = serde_json::Map<String, Value>;

/// Field holding the identity of a document.
pub const ID_FIELD: &str = "_id";

/// Identity of a document, the value of its `_id` field.
///
/// Two identities are equal when their canonical JSON serializations are equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Value);

impl DocumentId {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    /// Extracts the identity of `document`, if it has one.
    pub fn from_document(document: &Document) -> Option<Self> {
        match document.get(ID_FIELD) {
            None | Some(Value::Null) => None,
            Some(value) => Some(Self(value.clone())),
        }
    }

    /// Returns the canonical serialization used to key documents.
    pub fn key(&self) -> String {
        self.0.to_string()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(value) => write!(f, "{value}"),
            other => write!(f, "{other}"),
        }
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(Value::String(value.to_owned()))
    }
}

/// A database and collection pair inside a store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace {
    pub db: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
        }
    }
}

impl From<&CollectionInfo> for Namespace {
    fn from(info: &CollectionInfo) -> Self {
        Self::new(info.db_name.clone(), info.col_name.clone())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.collection)
    }
}

/// Sets the `_id` field of `document` to `id`.
pub fn with_id(mut document: Document, id: &DocumentId) -> Document {
    document.insert(ID_FIELD.to_owned(), id.as_value().clone());
    document
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn identity_ignores_null_ids() {
        let Value::Object(document) = json!({ "_id": null, "name": "a" }) else {
            unreachable!()
        };

        assert!(DocumentId::from_document(&document).is_none());
    }

    #[test]
    fn object_ids_are_keyed_canonically() {
        let left = DocumentId::new(json!({ "$oid": "65e1b0c0aa00000000000001" }));
        let right = DocumentId::new(json!({ "$oid": "65e1b0c0aa00000000000001" }));

        assert_eq!(left.key(), right.key());
        assert_ne!(left.key(), DocumentId::from("65e1b0c0aa00000000000001").key());
    }
}
