use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// No collection pair was configured.
    #[error("could not find `collections` in the configuration, at least one collection is required")]
    NoCollections,
    /// A collection pair is missing a database or collection name.
    #[error("collection entry {index} is missing `{field}`")]
    MissingCollectionField { index: usize, field: &'static str },
    /// A connection is missing its URI.
    #[error("`{0}.uri` cannot be empty")]
    MissingUri(&'static str),
    /// `firstOpTime` is not a `YYYY-MM-DD` date.
    #[error("`firstOpTime` must be a `YYYY-MM-DD` date, got `{0}`")]
    InvalidFirstOpTime(String),
    /// The retry delay is zero.
    #[error("`retryDelayMs` cannot be zero")]
    RetryDelayZero,
    /// The cutover basis environment variable holds an unsupported value.
    #[error("`{name}` must be unset, `1` (yesterday) or `2` (firstOpTime), got `{value}`")]
    InvalidCutoverBasis { name: &'static str, value: String },
    /// An operation name is not one the change feed can emit.
    #[error("unknown operation `{value}` in `{field}`")]
    UnknownOperation { field: &'static str, value: String },
}
