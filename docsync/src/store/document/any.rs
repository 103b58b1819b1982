use chrono::{DateTime, Utc};

use crate::error::{ErrorKind, SyncResult};
use crate::store::document::memory::{MEMORY_URI_SCHEME, MemoryStore};
#[cfg(feature = "mongodb")]
use crate::store::document::mongo::MongoStore;
use crate::store::document::{ChangeFeed, RecordStream, StartPosition, Store};
use crate::types::{Document, DocumentId, Namespace, OperationFilter};
use crate::bail;

/// URI schemes served by the MongoDB backend.
pub const MONGODB_URI_SCHEMES: [&str; 2] = ["mongodb://", "mongodb+srv://"];

/// A [`Store`] selected at runtime from the scheme of a connection URI.
#[derive(Debug, Clone)]
pub enum AnyStore {
    Memory(MemoryStore),
    #[cfg(feature = "mongodb")]
    Mongo(MongoStore),
}

impl AnyStore {
    /// Connects to the store named by `uri`.
    ///
    /// `memory://` URIs create an in-process store, `mongodb://` and `mongodb+srv://` URIs
    /// require the `mongodb` feature.
    pub async fn connect(uri: &str) -> SyncResult<Self> {
        if uri.starts_with(MEMORY_URI_SCHEME) {
            return Ok(Self::Memory(MemoryStore::connect(uri)?));
        }

        if MONGODB_URI_SCHEMES
            .iter()
            .any(|scheme| uri.starts_with(scheme))
        {
            #[cfg(feature = "mongodb")]
            return Ok(Self::Mongo(MongoStore::connect(uri).await?));

            #[cfg(not(feature = "mongodb"))]
            bail!(
                ErrorKind::UnsupportedStoreUri,
                "MongoDB support is not compiled in",
                "rebuild with the `mongodb` feature to connect to mongodb:// URIs"
            );
        }

        bail!(
            ErrorKind::UnsupportedStoreUri,
            "Unsupported store URI scheme",
            uri.split("://").next().unwrap_or_default().to_owned()
        );
    }

    /// Returns a short name of the backend, used in logs.
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            #[cfg(feature = "mongodb")]
            Self::Mongo(_) => "mongodb",
        }
    }
}

impl From<MemoryStore> for AnyStore {
    fn from(store: MemoryStore) -> Self {
        Self::Memory(store)
    }
}

impl Store for AnyStore {
    async fn insert(&self, namespace: &Namespace, document: Document) -> SyncResult<DocumentId> {
        match self {
            Self::Memory(store) => store.insert(namespace, document).await,
            #[cfg(feature = "mongodb")]
            Self::Mongo(store) => store.insert(namespace, document).await,
        }
    }

    async fn upsert_by_id(
        &self,
        namespace: &Namespace,
        id: &DocumentId,
        document: Document,
    ) -> SyncResult<bool> {
        match self {
            Self::Memory(store) => store.upsert_by_id(namespace, id, document).await,
            #[cfg(feature = "mongodb")]
            Self::Mongo(store) => store.upsert_by_id(namespace, id, document).await,
        }
    }

    async fn delete_by_id(&self, namespace: &Namespace, id: &DocumentId) -> SyncResult<bool> {
        match self {
            Self::Memory(store) => store.delete_by_id(namespace, id).await,
            #[cfg(feature = "mongodb")]
            Self::Mongo(store) => store.delete_by_id(namespace, id).await,
        }
    }

    async fn find_by_id(
        &self,
        namespace: &Namespace,
        id: &DocumentId,
    ) -> SyncResult<Option<Document>> {
        match self {
            Self::Memory(store) => store.find_by_id(namespace, id).await,
            #[cfg(feature = "mongodb")]
            Self::Mongo(store) => store.find_by_id(namespace, id).await,
        }
    }

    async fn drop_collection(&self, namespace: &Namespace) -> SyncResult<()> {
        match self {
            Self::Memory(store) => store.drop_collection(namespace).await,
            #[cfg(feature = "mongodb")]
            Self::Mongo(store) => store.drop_collection(namespace).await,
        }
    }

    async fn find_before(
        &self,
        namespace: &Namespace,
        cutover: DateTime<Utc>,
    ) -> SyncResult<RecordStream> {
        match self {
            Self::Memory(store) => store.find_before(namespace, cutover).await,
            #[cfg(feature = "mongodb")]
            Self::Mongo(store) => store.find_before(namespace, cutover).await,
        }
    }

    async fn subscribe_changes(
        &self,
        namespace: &Namespace,
        filter: &OperationFilter,
        start: StartPosition,
    ) -> SyncResult<ChangeFeed> {
        match self {
            Self::Memory(store) => store.subscribe_changes(namespace, filter, start).await,
            #[cfg(feature = "mongodb")]
            Self::Mongo(store) => store.subscribe_changes(namespace, filter, start).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn dispatches_on_scheme() {
        let store = AnyStore::connect("memory://source").await.unwrap();
        assert_eq!(store.backend(), "memory");

        let err = AnyStore::connect("postgres://localhost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedStoreUri);
    }
}
