use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque change feed position issued by a store.
///
/// The pipeline never looks inside a token, it only persists it and hands it back to the store
/// it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(Value);

impl ResumeToken {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
