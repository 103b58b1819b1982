use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::connection::validate_operations;
use crate::shared::pipeline::to_owned_list;
use crate::shared::{
    CollectionSyncSpec, CutoverBasis, CutoverConfig, DEFAULT_STREAM_OPERATIONS,
    DEFAULT_UPSERT_OPERATIONS, PipelineConfig, SourceConfig, StoreConnectionConfig,
    ValidationError, parse_first_op_time,
};

const fn default_retry_delay_ms() -> u64 {
    5 * 60 * 1000
}

/// Top-level configuration record of the replicator.
///
/// Keys keep the camelCase names of the deployed JSON format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Fallback cutover date in `YYYY-MM-DD` format.
    #[serde(
        rename = "firstOpTime",
        alias = "firstoptime",
        alias = "first_op_time",
        default
    )]
    pub first_op_time: Option<String>,
    /// Store holding the checkpoints.
    pub token: StoreConnectionConfig,
    pub source: SourceConfig,
    pub destination: StoreConnectionConfig,
    #[serde(default)]
    pub collections: Vec<CollectionSyncSpec>,
    /// Operations applied as upserts, defaults to insert, update and replace.
    #[serde(
        rename = "upsertOperations",
        alias = "upsertoperations",
        alias = "upsert_operations",
        default
    )]
    pub upsert_operations: Vec<String>,
    /// Delay in milliseconds before a failed phase is attempted again.
    #[serde(
        rename = "retryDelayMs",
        alias = "retrydelayms",
        alias = "retry_delay_ms",
        default = "default_retry_delay_ms"
    )]
    pub retry_delay_ms: u64,
}

impl SyncConfig {
    /// Validates the whole record.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.collections.is_empty() {
            return Err(ValidationError::NoCollections);
        }

        for (index, collection) in self.collections.iter().enumerate() {
            collection.validate(index)?;
        }

        self.token.validate("token")?;
        self.source.validate()?;
        self.destination.validate("destination")?;
        validate_operations("upsertOperations", &self.upsert_operations)?;

        if let Some(first_op_time) = &self.first_op_time {
            parse_first_op_time(first_op_time)?;
        }

        if self.retry_delay_ms == 0 {
            return Err(ValidationError::RetryDelayZero);
        }

        Ok(())
    }

    /// Builds the [`PipelineConfig`] for the given cutover basis.
    pub fn pipeline_config(&self, basis: CutoverBasis) -> Result<PipelineConfig, ValidationError> {
        self.validate()?;

        let first_op_time = self
            .first_op_time
            .as_deref()
            .map(parse_first_op_time)
            .transpose()?;

        let stream_operations = if self.source.stream.is_empty() {
            to_owned_list(&DEFAULT_STREAM_OPERATIONS)
        } else {
            self.source.stream.clone()
        };

        let upsert_operations = if self.upsert_operations.is_empty() {
            to_owned_list(&DEFAULT_UPSERT_OPERATIONS)
        } else {
            self.upsert_operations.clone()
        };

        Ok(PipelineConfig {
            collections: self.collections.clone(),
            stream_operations,
            upsert_operations,
            cutover: CutoverConfig {
                basis,
                first_op_time,
            },
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::shared::CollectionInfo;

    fn config() -> SyncConfig {
        SyncConfig {
            first_op_time: Some("2024-03-01".to_owned()),
            token: StoreConnectionConfig {
                uri: "memory://tokens".to_owned(),
            },
            source: SourceConfig {
                uri: "memory://source".to_owned(),
                stream: vec![],
            },
            destination: StoreConnectionConfig {
                uri: "memory://destination".to_owned(),
            },
            collections: vec![CollectionSyncSpec::new(
                CollectionInfo::new("shop", "orders"),
                CollectionInfo::new("mirror", "orders"),
            )],
            upsert_operations: vec![],
            retry_delay_ms: default_retry_delay_ms(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert_eq!(config().validate(), Ok(()));
    }

    #[test]
    fn empty_collections_are_rejected() {
        let mut config = config();
        config.collections.clear();

        assert_eq!(config.validate(), Err(ValidationError::NoCollections));
    }

    #[test]
    fn missing_collection_name_is_rejected() {
        let mut config = config();
        config.collections[0].destination.col_name = String::new();

        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingCollectionField {
                index: 0,
                field: "d.colName",
            })
        );
    }

    #[test]
    fn unknown_stream_operation_is_rejected() {
        let mut config = config();
        config.source.stream = vec!["insert".to_owned(), "upsert".to_owned()];

        assert!(matches!(
            config.validate(),
            Err(ValidationError::UnknownOperation { value, .. }) if value == "upsert"
        ));
    }

    #[test]
    fn malformed_first_op_time_is_rejected() {
        let mut config = config();
        config.first_op_time = Some("March 1st".to_owned());

        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidFirstOpTime("March 1st".to_owned()))
        );
    }

    #[test]
    fn zero_retry_delay_is_rejected() {
        let mut config = config();
        config.retry_delay_ms = 0;

        assert_eq!(config.validate(), Err(ValidationError::RetryDelayZero));
    }

    #[test]
    fn pipeline_config_fills_defaults() {
        let pipeline = config().pipeline_config(CutoverBasis::FirstOpTime).unwrap();

        assert_eq!(
            pipeline.stream_operations,
            vec!["insert", "update", "replace", "delete"]
        );
        assert_eq!(pipeline.upsert_operations, vec!["insert", "update", "replace"]);
        assert_eq!(pipeline.cutover.basis, CutoverBasis::FirstOpTime);
        assert_eq!(
            pipeline.cutover.first_op_time,
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(pipeline.retry_delay, Duration::from_secs(300));
    }

    #[test]
    fn deserializes_deployed_format() {
        let raw = r#"{
            "firstOpTime": "2024-03-01",
            "token": { "uri": "memory://tokens" },
            "source": { "uri": "memory://source", "stream": ["insert"] },
            "destination": { "uri": "memory://destination" },
            "collections": [
                { "s": { "dbName": "a", "colName": "b" }, "d": { "dbName": "c", "colName": "d" }, "copy": true }
            ],
            "retryDelayMs": 1000
        }"#;

        let config: SyncConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.retry_delay_ms, 1000);
        assert!(config.collections[0].copy);
        assert!(!config.collections[0].drop);
        assert_eq!(config.collections[0].destination.col_name, "d");
    }
}
