use std::fmt;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// A database and collection pair on one side of the replication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Name of the database.
    #[serde(rename = "dbName", alias = "dbname")]
    pub db_name: String,
    /// Name of the collection inside [`CollectionInfo::db_name`].
    #[serde(rename = "colName", alias = "colname")]
    pub col_name: String,
}

impl CollectionInfo {
    pub fn new(db_name: impl Into<String>, col_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            col_name: col_name.into(),
        }
    }
}

impl fmt::Display for CollectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db_name, self.col_name)
    }
}

/// Static configuration of one replicated collection pair.
///
/// One instance exists per configured pair and it never changes for the lifetime of the
/// process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSyncSpec {
    /// Collection the documents and change events are read from.
    #[serde(rename = "s", alias = "source")]
    pub source: CollectionInfo,
    /// Collection the documents are written to.
    #[serde(rename = "d", alias = "destination")]
    pub destination: CollectionInfo,
    /// Whether to run the snapshot copy before streaming.
    #[serde(default)]
    pub copy: bool,
    /// Whether to drop the destination collection before copying.
    #[serde(default)]
    pub drop: bool,
}

impl CollectionSyncSpec {
    pub fn new(source: CollectionInfo, destination: CollectionInfo) -> Self {
        Self {
            source,
            destination,
            copy: false,
            drop: false,
        }
    }

    pub fn with_copy(mut self, copy: bool) -> Self {
        self.copy = copy;
        self
    }

    pub fn with_drop(mut self, drop: bool) -> Self {
        self.drop = drop;
        self
    }

    /// Validates the collection pair at position `index` of the configuration.
    pub fn validate(&self, index: usize) -> Result<(), ValidationError> {
        let fields = [
            (&self.source.db_name, "s.dbName"),
            (&self.source.col_name, "s.colName"),
            (&self.destination.db_name, "d.dbName"),
            (&self.destination.col_name, "d.colName"),
        ];

        for (value, field) in fields {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingCollectionField { index, field });
            }
        }

        Ok(())
    }
}
