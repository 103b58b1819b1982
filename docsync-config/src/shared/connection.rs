use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Connection settings of a document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConnectionConfig {
    /// Connection URI, the scheme selects the store backend.
    pub uri: String,
}

impl StoreConnectionConfig {
    pub fn validate(&self, name: &'static str) -> Result<(), ValidationError> {
        if self.uri.trim().is_empty() {
            return Err(ValidationError::MissingUri(name));
        }

        Ok(())
    }
}

/// Connection settings of the source store and the operations streamed from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Connection URI, the scheme selects the store backend.
    pub uri: String,
    /// Operation types requested from the change feed.
    ///
    /// An empty list streams inserts, updates, replaces and deletes.
    #[serde(default)]
    pub stream: Vec<String>,
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.uri.trim().is_empty() {
            return Err(ValidationError::MissingUri("source"));
        }

        validate_operations("source.stream", &self.stream)
    }
}

/// Operation names a change feed may carry.
pub const KNOWN_OPERATIONS: [&str; 8] = [
    "insert",
    "update",
    "replace",
    "delete",
    "drop",
    "rename",
    "dropDatabase",
    "invalidate",
];

pub(crate) fn validate_operations(
    field: &'static str,
    operations: &[String],
) -> Result<(), ValidationError> {
    for operation in operations {
        if !KNOWN_OPERATIONS.contains(&operation.as_str()) {
            return Err(ValidationError::UnknownOperation {
                field,
                value: operation.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_operations_pass() {
        let operations = vec!["insert".to_owned(), "dropDatabase".to_owned()];

        assert_eq!(validate_operations("source.stream", &operations), Ok(()));
    }

    #[test]
    fn source_without_uri_is_rejected() {
        let source = SourceConfig {
            uri: " ".to_owned(),
            stream: vec![],
        };

        assert_eq!(source.validate(), Err(ValidationError::MissingUri("source")));
    }
}
