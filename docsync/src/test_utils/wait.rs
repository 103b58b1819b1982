use tokio::time::timeout;

use crate::store::document::memory::MemoryStore;
use crate::test_utils::notify::DEFAULT_NOTIFY_TIMEOUT;
use crate::types::{Document, Namespace};

/// Waits until the documents of `namespace` satisfy `condition` and returns them.
///
/// # Panics
///
/// Panics if the condition does not hold within [`DEFAULT_NOTIFY_TIMEOUT`].
pub async fn wait_for_documents<F>(
    store: &MemoryStore,
    namespace: &Namespace,
    condition: F,
) -> Vec<Document>
where
    F: Fn(&[Document]) -> bool,
{
    let mut revision_rx = store.revision_rx();

    let wait = async {
        loop {
            let documents = store.documents(namespace).await;
            if condition(&documents) {
                return documents;
            }

            if revision_rx.changed().await.is_err() {
                return documents;
            }
        }
    };

    match timeout(DEFAULT_NOTIFY_TIMEOUT, wait).await {
        Ok(documents) => documents,
        Err(_) => panic!(
            "documents of {namespace} did not reach the expected state within {DEFAULT_NOTIFY_TIMEOUT:?}"
        ),
    }
}

/// Waits until `namespace` holds exactly `expected` documents.
pub async fn wait_for_count(store: &MemoryStore, namespace: &Namespace, expected: usize) {
    wait_for_documents(store, namespace, |documents| documents.len() == expected).await;
}
