use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::store::checkpoint::{Checkpoint, CheckpointKey, CheckpointStore};
use crate::store::document::Store;
use crate::sync_error;
use crate::types::{Document, DocumentId, Namespace, ResumeToken};

/// Database holding the checkpoint collection.
pub const CHECKPOINT_DB: &str = "token";

/// Collection holding one record per checkpoint key.
pub const CHECKPOINT_COLLECTION: &str = "tokens";

const LAST_MODIFIED_FIELD: &str = "lastModifiedDate";
const TOKEN_FIELD: &str = "token";

/// Checkpoint store persisting positions as documents of a [`Store`].
///
/// Records live in `token.tokens` and have the shape
/// `{ _id: key, lastModifiedDate: date, token: { _data: ... } }`. Dates use the extended JSON
/// `$date` form so that document stores keep them as native dates.
#[derive(Debug, Clone)]
pub struct DocumentCheckpointStore<S> {
    store: S,
    namespace: Namespace,
}

impl<S> DocumentCheckpointStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            namespace: Namespace::new(CHECKPOINT_DB, CHECKPOINT_COLLECTION),
        }
    }

    /// Returns the store the checkpoints are written to.
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> CheckpointStore for DocumentCheckpointStore<S>
where
    S: Store + Sync,
{
    async fn get(&self, key: &CheckpointKey) -> SyncResult<Option<Checkpoint>> {
        let record = self
            .store
            .find_by_id(&self.namespace, &DocumentId::from(key.as_str()))
            .await
            .map_err(|err| {
                sync_error!(
                    ErrorKind::CheckpointReadFailed,
                    "Failed to read checkpoint",
                    key.to_string(),
                    source: err
                )
            })?;

        record.map(|record| parse_record(key, record)).transpose()
    }

    async fn save(&self, key: &CheckpointKey, token: &ResumeToken) -> SyncResult<bool> {
        let id = DocumentId::from(key.as_str());
        let record = build_record(token, Utc::now());

        let applied = self
            .store
            .upsert_by_id(&self.namespace, &id, record)
            .await
            .map_err(|err| {
                sync_error!(
                    ErrorKind::CheckpointWriteFailed,
                    "Failed to save checkpoint",
                    key.to_string(),
                    source: err
                )
            })?;

        debug!(%key, %token, applied, "saved checkpoint");

        Ok(applied)
    }
}

fn build_record(token: &ResumeToken, last_modified: DateTime<Utc>) -> Document {
    let mut record = Document::new();
    record.insert(
        LAST_MODIFIED_FIELD.to_owned(),
        json!({ "$date": last_modified.to_rfc3339_opts(SecondsFormat::Millis, true) }),
    );
    record.insert(TOKEN_FIELD.to_owned(), token.as_value().clone());

    record
}

fn parse_record(key: &CheckpointKey, mut record: Document) -> SyncResult<Checkpoint> {
    let token = record.remove(TOKEN_FIELD).ok_or_else(|| {
        sync_error!(
            ErrorKind::CheckpointReadFailed,
            "Checkpoint record has no token",
            key.to_string()
        )
    })?;

    let last_modified = record
        .get(LAST_MODIFIED_FIELD)
        .and_then(parse_date)
        .ok_or_else(|| -> SyncError {
            sync_error!(
                ErrorKind::CheckpointReadFailed,
                "Checkpoint record has no valid lastModifiedDate",
                key.to_string()
            )
        })?;

    Ok(Checkpoint {
        key: key.clone(),
        token: ResumeToken::new(token),
        last_modified,
    })
}

/// Reads an extended JSON date in either relaxed (`{"$date": "<rfc3339>"}`) or canonical
/// (`{"$date": {"$numberLong": "<millis>"}}`) form.
fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value.get("$date")? {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|date| date.with_timezone(&Utc)),
        Value::Object(canonical) => canonical
            .get("$numberLong")
            .and_then(Value::as_str)
            .and_then(|millis| millis.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis),
        Value::Number(millis) => millis.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}
