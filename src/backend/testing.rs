use std::sync::Arc;

use mongodb::bson::{Bson, Document};

use super::{CollectionPath, DocumentStore, MemoryStore, Query, Record, StoreResult};

/// Wraps a [`MemoryStore`] and yields to the scheduler before every call,
/// so concurrent operations interleave the way they do against a remote
/// backend.
pub(crate) struct YieldingStore {
    inner: Arc<MemoryStore>,
}

impl YieldingStore {
    pub(crate) fn new(inner: Arc<MemoryStore>) -> Self {
        YieldingStore { inner }
    }
}

#[rocket::async_trait]
impl DocumentStore for YieldingStore {
    async fn insert(&self, path: &CollectionPath, document: Document) -> StoreResult<String> {
        tokio::task::yield_now().await;
        self.inner.insert(path, document).await
    }

    async fn get(&self, path: &CollectionPath, id: &str) -> StoreResult<Option<Document>> {
        tokio::task::yield_now().await;
        self.inner.get(path, id).await
    }

    async fn query(&self, path: &CollectionPath, query: &Query) -> StoreResult<Vec<Record>> {
        tokio::task::yield_now().await;
        self.inner.query(path, query).await
    }

    async fn set(&self, path: &CollectionPath, id: &str, document: Document) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.set(path, id, document).await
    }

    async fn update(&self, path: &CollectionPath, id: &str, changes: Document) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.update(path, id, changes).await
    }

    async fn set_if_missing(
        &self,
        path: &CollectionPath,
        id: &str,
        field: &str,
        value: Bson,
    ) -> StoreResult<bool> {
        tokio::task::yield_now().await;
        self.inner.set_if_missing(path, id, field, value).await
    }

    async fn increment(
        &self,
        path: &CollectionPath,
        id: &str,
        deltas: Document,
    ) -> StoreResult<Document> {
        tokio::task::yield_now().await;
        self.inner.increment(path, id, deltas).await
    }

    async fn add_to_set(
        &self,
        path: &CollectionPath,
        id: &str,
        field: &str,
        value: Bson,
    ) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.add_to_set(path, id, field, value).await
    }

    async fn remove_from_set(
        &self,
        path: &CollectionPath,
        id: &str,
        field: &str,
        value: Bson,
    ) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.remove_from_set(path, id, field, value).await
    }
}
