use std::fmt;

use crate::types::{Document, DocumentId, Namespace, ResumeToken};

/// Kind of mutation carried by a [`ChangeEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Delete,
    /// Any other operation, for example `drop` or `invalidate`.
    Other(String),
}

impl OperationType {
    pub fn from_name(name: &str) -> Self {
        match name {
            "insert" => Self::Insert,
            "update" => Self::Update,
            "replace" => Self::Replace,
            "delete" => Self::Delete,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of operation types.
///
/// Used both to select the events requested from a change feed and as the list of operations
/// applied to the destination as upserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFilter {
    operations: Vec<OperationType>,
}

impl OperationFilter {
    pub fn new(operations: impl IntoIterator<Item = OperationType>) -> Self {
        let mut filter = Self { operations: vec![] };
        for operation in operations {
            if !filter.contains(&operation) {
                filter.operations.push(operation);
            }
        }

        filter
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self::new(names.iter().map(|name| OperationType::from_name(name.as_ref())))
    }

    /// Inserts, updates and replaces.
    pub fn upserts() -> Self {
        Self::new([
            OperationType::Insert,
            OperationType::Update,
            OperationType::Replace,
        ])
    }

    pub fn contains(&self, operation: &OperationType) -> bool {
        self.operations.contains(operation)
    }

    pub fn names(&self) -> Vec<&str> {
        self.operations.iter().map(OperationType::as_str).collect()
    }
}

impl Default for OperationFilter {
    /// Inserts, updates, replaces and deletes.
    fn default() -> Self {
        Self::new([
            OperationType::Insert,
            OperationType::Update,
            OperationType::Replace,
            OperationType::Delete,
        ])
    }
}

/// One committed change delivered by a change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub operation: OperationType,
    /// Identity of the affected document, absent for collection level events.
    pub document_id: Option<DocumentId>,
    /// Document after the change, absent for deletes.
    pub full_document: Option<Document>,
    pub namespace: Namespace,
    /// Position to resume from to receive the events following this one.
    pub resume_token: ResumeToken,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_map_to_variants() {
        assert_eq!(OperationType::from_name("replace"), OperationType::Replace);
        assert_eq!(
            OperationType::from_name("invalidate"),
            OperationType::Other("invalidate".to_owned())
        );
        assert_eq!(OperationType::Other("drop".to_owned()).as_str(), "drop");
    }

    #[test]
    fn filter_deduplicates_and_checks_membership() {
        let filter = OperationFilter::from_names(&["insert", "delete", "insert"]);

        assert_eq!(filter.names(), vec!["insert", "delete"]);
        assert!(filter.contains(&OperationType::Delete));
        assert!(!filter.contains(&OperationType::Update));
        assert!(!OperationFilter::upserts().contains(&OperationType::Delete));
    }
}
