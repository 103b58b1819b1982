use bson::oid::ObjectId;
use bson::{Bson, Timestamp, doc};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use mongodb::Client;
use mongodb::change_stream::event::{ChangeStreamEvent, ResumeToken as MongoResumeToken};
use mongodb::options::{ChangeStreamOptions, FullDocumentType};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::store::document::{
    ChangeFeed, HISTORY_LOST_SIGNATURE, RecordStream, StartPosition, Store,
};
use crate::sync_error;
use crate::types::{
    ChangeEvent, Document, DocumentId, ID_FIELD, Namespace, OperationFilter, OperationType,
    ResumeToken, with_id,
};

/// Server error code returned when a change stream cannot resume from the requested position.
const CHANGE_STREAM_HISTORY_LOST_CODE: i32 = 286;

/// [`Store`] backed by a MongoDB deployment.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    /// Connects to the deployment at `uri`.
    ///
    /// The driver connects lazily, so the deployment is pinged to surface unreachable servers at
    /// startup.
    pub async fn connect(uri: &str) -> SyncResult<Self> {
        let client = Client::with_uri_str(uri).await.map_err(|err| {
            sync_error!(
                ErrorKind::StoreConnectionFailed,
                "Failed to create MongoDB client",
                err.to_string(),
                source: err
            )
        })?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|err| {
                sync_error!(
                    ErrorKind::StoreConnectionFailed,
                    "Failed to reach MongoDB deployment",
                    err.to_string(),
                    source: err
                )
            })?;

        info!("connected to mongodb deployment");

        Ok(Self { client })
    }

    fn collection(&self, namespace: &Namespace) -> mongodb::Collection<bson::Document> {
        self.client
            .database(&namespace.db)
            .collection(&namespace.collection)
    }
}

impl Store for MongoStore {
    async fn insert(&self, namespace: &Namespace, document: Document) -> SyncResult<DocumentId> {
        let result = self
            .collection(namespace)
            .insert_one(to_bson_document(document)?)
            .await
            .map_err(|err| write_error(err, "MongoDB insert failed"))?;

        Ok(DocumentId::new(bson_to_json(result.inserted_id)))
    }

    async fn upsert_by_id(
        &self,
        namespace: &Namespace,
        id: &DocumentId,
        document: Document,
    ) -> SyncResult<bool> {
        let filter = doc! { ID_FIELD: id_to_bson(id)? };
        let replacement = to_bson_document(with_id(document, id))?;

        let result = self
            .collection(namespace)
            .replace_one(filter, replacement)
            .upsert(true)
            .await
            .map_err(|err| write_error(err, "MongoDB upsert failed"))?;

        Ok(result.matched_count == 1 || result.modified_count == 1 || result.upserted_id.is_some())
    }

    async fn delete_by_id(&self, namespace: &Namespace, id: &DocumentId) -> SyncResult<bool> {
        let result = self
            .collection(namespace)
            .delete_one(doc! { ID_FIELD: id_to_bson(id)? })
            .await
            .map_err(|err| write_error(err, "MongoDB delete failed"))?;

        Ok(result.deleted_count == 1)
    }

    async fn find_by_id(
        &self,
        namespace: &Namespace,
        id: &DocumentId,
    ) -> SyncResult<Option<Document>> {
        let document = self
            .collection(namespace)
            .find_one(doc! { ID_FIELD: id_to_bson(id)? })
            .await
            .map_err(|err| query_error(err, "MongoDB find failed"))?;

        document.map(from_bson_document).transpose()
    }

    async fn drop_collection(&self, namespace: &Namespace) -> SyncResult<()> {
        self.collection(namespace)
            .drop()
            .await
            .map_err(|err| write_error(err, "MongoDB drop failed"))
    }

    async fn find_before(
        &self,
        namespace: &Namespace,
        cutover: DateTime<Utc>,
    ) -> SyncResult<RecordStream> {
        let boundary = object_id_from_time(cutover);
        let cursor = self
            .collection(namespace)
            .find(doc! { ID_FIELD: { "$lt": boundary } })
            .await
            .map_err(|err| query_error(err, "MongoDB find failed"))?;

        let records = cursor.map(|result| {
            result
                .map_err(|err| query_error(err, "MongoDB cursor failed"))
                .and_then(from_bson_document)
        });

        Ok(records.boxed())
    }

    async fn subscribe_changes(
        &self,
        namespace: &Namespace,
        filter: &OperationFilter,
        start: StartPosition,
    ) -> SyncResult<ChangeFeed> {
        let mut options = ChangeStreamOptions::default();
        options.full_document = Some(FullDocumentType::UpdateLookup);

        match &start {
            StartPosition::After(token) => {
                let token: MongoResumeToken =
                    bson::from_bson(json_to_bson(token.as_value().clone())?).map_err(|err| {
                        sync_error!(
                            ErrorKind::InvalidResumeToken,
                            "Resume token cannot be decoded",
                            token.to_string(),
                            source: err
                        )
                    })?;
                options.start_after = Some(token);
            }
            StartPosition::At(time) => {
                options.start_at_operation_time = Some(Timestamp {
                    time: u32::try_from(time.timestamp()).unwrap_or(0),
                    increment: 0,
                });
            }
            StartPosition::Now => {}
        }

        let pipeline = [doc! {
            "$match": { "operationType": { "$in": filter.names() } }
        }];

        let stream = self
            .collection(namespace)
            .watch()
            .pipeline(pipeline)
            .with_options(options)
            .await
            .map_err(feed_error)?;

        debug!(%namespace, %start, "opened mongodb change stream");

        let feed = stream.map(|result| result.map_err(feed_error).and_then(to_change_event));

        Ok(feed.boxed())
    }
}

fn to_change_event(event: ChangeStreamEvent<bson::Document>) -> SyncResult<ChangeEvent> {
    let resume_token = bson::to_bson(&event.id).map_err(|err| {
        sync_error!(
            ErrorKind::SerializationError,
            "Resume token cannot be encoded",
            err.to_string(),
            source: err
        )
    })?;

    let operation = match bson::to_bson(&event.operation_type) {
        Ok(Bson::String(name)) => OperationType::from_name(&name),
        _ => OperationType::Other(format!("{:?}", event.operation_type)),
    };

    let namespace = event
        .ns
        .map(|ns| Namespace::new(ns.db, ns.coll.unwrap_or_default()))
        .unwrap_or_else(|| Namespace::new("", ""));

    let document_id = event
        .document_key
        .and_then(|key| key.get(ID_FIELD).cloned())
        .map(|id| DocumentId::new(bson_to_json(id)));

    let full_document = event.full_document.map(from_bson_document).transpose()?;

    Ok(ChangeEvent {
        operation,
        document_id,
        full_document,
        namespace,
        resume_token: ResumeToken::new(bson_to_json(resume_token)),
    })
}

/// Builds the smallest object id whose embedded timestamp is `time`.
fn object_id_from_time(time: DateTime<Utc>) -> ObjectId {
    let seconds = u32::try_from(time.timestamp()).unwrap_or(0);

    let mut bytes = [0u8; 12];
    bytes[..4].copy_from_slice(&seconds.to_be_bytes());

    ObjectId::from_bytes(bytes)
}

/// Canonical extended JSON keeps the exact BSON type of every value, relaxed JSON would turn
/// small `Int64`s into `Int32`s on the way back.
fn bson_to_json(value: Bson) -> Value {
    value.into_canonical_extjson()
}

fn json_to_bson(value: Value) -> SyncResult<Bson> {
    Bson::try_from(value).map_err(|err| {
        sync_error!(
            ErrorKind::SerializationError,
            "JSON value cannot be converted to BSON",
            err.to_string(),
            source: err
        )
    })
}

fn id_to_bson(id: &DocumentId) -> SyncResult<Bson> {
    json_to_bson(id.as_value().clone())
}

fn to_bson_document(document: Document) -> SyncResult<bson::Document> {
    match json_to_bson(Value::Object(document))? {
        Bson::Document(document) => Ok(document),
        other => Err(sync_error!(
            ErrorKind::InvalidDocument,
            "Document did not convert to a BSON document",
            format!("{other:?}")
        )),
    }
}

fn from_bson_document(document: bson::Document) -> SyncResult<Document> {
    match bson_to_json(Bson::Document(document)) {
        Value::Object(document) => Ok(document),
        other => Err(sync_error!(
            ErrorKind::InvalidDocument,
            "BSON document did not convert to a JSON object",
            other.to_string()
        )),
    }
}

fn write_error(err: mongodb::error::Error, description: &'static str) -> SyncError {
    sync_error!(ErrorKind::StoreWriteFailed, description, err.to_string(), source: err)
}

fn query_error(err: mongodb::error::Error, description: &'static str) -> SyncError {
    sync_error!(ErrorKind::StoreQueryFailed, description, err.to_string(), source: err)
}

fn feed_error(err: mongodb::error::Error) -> SyncError {
    let code = match err.kind.as_ref() {
        mongodb::error::ErrorKind::Command(command_error) => Some(command_error.code),
        _ => None,
    };

    let detail = err.to_string();
    if code == Some(CHANGE_STREAM_HISTORY_LOST_CODE) || detail.contains(HISTORY_LOST_SIGNATURE) {
        return sync_error!(
            ErrorKind::ChangeFeedHistoryLost,
            "Change stream position is no longer in the oplog",
            detail,
            source: err
        );
    }

    sync_error!(ErrorKind::ChangeFeedFailed, "MongoDB change stream failed", detail, source: err)
}
