use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard};

use indexmap::IndexMap;
use mongodb::bson::{Bson, Document};
use uuid::Uuid;

use super::{CollectionPath, DocumentStore, Query, Record, SortOrder, StoreError, StoreResult};

type Collections = HashMap<String, IndexMap<String, Document>>;

/// Process-local document store with the same semantics as the MongoDB
/// adapter. Used for development and tests; contents are lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<Collections>,
    reject_filtered_queries: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Makes every query carrying a filter fail the way an unindexed query
    /// does on a hosted store. Unfiltered scans keep working.
    pub fn reject_filtered_queries(&self, reject: bool) {
        self.reject_filtered_queries
            .store(reject, AtomicOrdering::SeqCst);
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Collections>> {
        self.collections
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn with_document<T>(
        &self,
        path: &CollectionPath,
        id: &str,
        apply: impl FnOnce(&mut Document) -> T,
    ) -> StoreResult<T> {
        let mut collections = self.lock()?;
        let document = collections
            .get_mut(&path.to_string())
            .and_then(|documents| documents.get_mut(id))
            .ok_or_else(|| StoreError::not_found(path, id))?;
        Ok(apply(document))
    }
}

#[rocket::async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, path: &CollectionPath, document: Document) -> StoreResult<String> {
        let id = Uuid::new_v4().simple().to_string();
        self.lock()?
            .entry(path.to_string())
            .or_default()
            .insert(id.clone(), document);
        Ok(id)
    }

    async fn get(&self, path: &CollectionPath, id: &str) -> StoreResult<Option<Document>> {
        Ok(self
            .lock()?
            .get(&path.to_string())
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn query(&self, path: &CollectionPath, query: &Query) -> StoreResult<Vec<Record>> {
        if !query.filters.is_empty() && self.reject_filtered_queries.load(AtomicOrdering::SeqCst)
        {
            return Err(StoreError::rejected(
                "failed-precondition",
                format!("query on {} requires an index", path),
            ));
        }

        let collections = self.lock()?;
        let Some(documents) = collections.get(&path.to_string()) else {
            return Ok(Vec::new());
        };

        let mut records: Vec<Record> = documents
            .iter()
            .filter(|(_, document)| {
                query
                    .filters
                    .iter()
                    .all(|(field, expected)| field_matches(document.get(field), expected))
            })
            .map(|(id, document)| Record {
                id: id.clone(),
                data: document.clone(),
            })
            .collect();

        if let Some((field, order)) = &query.order_by {
            // Stable ascending sort, reversed for descending so that among
            // equal keys the most recently written document comes first.
            records.sort_by(|a, b| compare_fields(a.data.get(field), b.data.get(field)));
            if *order == SortOrder::Descending {
                records.reverse();
            }
        }

        if let Some(limit) = query.limit {
            records.truncate(limit.max(0) as usize);
        }

        Ok(records)
    }

    async fn set(&self, path: &CollectionPath, id: &str, document: Document) -> StoreResult<()> {
        self.lock()?
            .entry(path.to_string())
            .or_default()
            .insert(id.to_string(), document);
        Ok(())
    }

    async fn update(&self, path: &CollectionPath, id: &str, changes: Document) -> StoreResult<()> {
        self.with_document(path, id, |document| {
            for (key, value) in changes {
                document.insert(key, value);
            }
        })
    }

    async fn set_if_missing(
        &self,
        path: &CollectionPath,
        id: &str,
        field: &str,
        value: Bson,
    ) -> StoreResult<bool> {
        self.with_document(path, id, |document| {
            if document.contains_key(field) {
                return false;
            }
            document.insert(field, value);
            true
        })
    }

    async fn increment(
        &self,
        path: &CollectionPath,
        id: &str,
        deltas: Document,
    ) -> StoreResult<Document> {
        self.with_document(path, id, |document| {
            for (key, delta) in deltas {
                let next = add_numbers(document.get(&key), &delta);
                document.insert(key, next);
            }
            document.clone()
        })
    }

    async fn add_to_set(
        &self,
        path: &CollectionPath,
        id: &str,
        field: &str,
        value: Bson,
    ) -> StoreResult<()> {
        self.with_document(path, id, |document| match document.get_mut(field) {
            Some(Bson::Array(items)) => {
                if !items.contains(&value) {
                    items.push(value);
                }
            }
            _ => {
                document.insert(field, Bson::Array(vec![value]));
            }
        })
    }

    async fn remove_from_set(
        &self,
        path: &CollectionPath,
        id: &str,
        field: &str,
        value: Bson,
    ) -> StoreResult<()> {
        self.with_document(path, id, |document| {
            if let Some(Bson::Array(items)) = document.get_mut(field) {
                items.retain(|item| item != &value);
            }
        })
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(v) => Some(*v),
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        _ => None,
    }
}

fn values_equal(actual: &Bson, expected: &Bson) -> bool {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => actual == expected,
    }
}

fn field_matches(actual: Option<&Bson>, expected: &Bson) -> bool {
    match actual {
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(actual) => values_equal(actual, expected),
        None => matches!(expected, Bson::Null),
    }
}

// Missing and null sort first, like the hosted stores do.
fn compare_fields(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let a = a.filter(|v| !matches!(v, Bson::Null));
    let b = b.filter(|v| !matches!(v, Bson::Null));
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_values(a, b),
    }
}

fn compare_values(a: &Bson, b: &Bson) -> Ordering {
    match (a, b) {
        (Bson::DateTime(a), Bson::DateTime(b)) => a.cmp(b),
        (Bson::String(a), Bson::String(b)) => a.cmp(b),
        (Bson::Boolean(a), Bson::Boolean(b)) => a.cmp(b),
        _ => match (as_number(a), as_number(b)) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

fn add_numbers(current: Option<&Bson>, delta: &Bson) -> Bson {
    let current = current.cloned().unwrap_or(Bson::Int64(0));
    match (&current, delta) {
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            let to_i64 = |value: &Bson| match value {
                Bson::Int32(v) => i64::from(*v),
                Bson::Int64(v) => *v,
                _ => 0,
            };
            Bson::Int64(to_i64(&current) + to_i64(delta))
        }
        _ => Bson::Double(as_number(&current).unwrap_or(0.0) + as_number(delta).unwrap_or(0.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TASKS;
    use mongodb::bson::doc;

    fn tasks() -> CollectionPath {
        CollectionPath::root(TASKS)
    }

    #[tokio::test]
    async fn query_filters_orders_and_limits() {
        let store = MemoryStore::new();
        store.insert(&tasks(), doc! { "status": "open", "n": 2 }).await.unwrap();
        store.insert(&tasks(), doc! { "status": "matched", "n": 9 }).await.unwrap();
        store.insert(&tasks(), doc! { "status": "open", "n": 5 }).await.unwrap();
        store.insert(&tasks(), doc! { "status": "open" }).await.unwrap();

        let query = Query::all()
            .where_eq("status", "open")
            .order_by("n", SortOrder::Descending)
            .limit(2);
        let records = store.query(&tasks(), &query).await.unwrap();
        let ns: Vec<_> = records.iter().map(|r| r.data.get_i32("n").unwrap()).collect();
        assert_eq!(ns, vec![5, 2]);
    }

    #[tokio::test]
    async fn equality_on_array_field_means_contains() {
        let store = MemoryStore::new();
        let chats = CollectionPath::root("chats");
        store
            .insert(&chats, doc! { "participants": ["a", "b"] })
            .await
            .unwrap();
        store
            .insert(&chats, doc! { "participants": ["c", "d"] })
            .await
            .unwrap();

        let found = store
            .query(&chats, &Query::all().where_eq("participants", "b"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn nested_collections_are_scoped_by_parent() {
        let store = MemoryStore::new();
        let first = CollectionPath::nested("chats", "one", "messages");
        let second = CollectionPath::nested("chats", "two", "messages");
        store.insert(&first, doc! { "content": "hi" }).await.unwrap();

        assert_eq!(store.query(&first, &Query::all()).await.unwrap().len(), 1);
        assert!(store.query(&second, &Query::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn increment_treats_missing_fields_as_zero() {
        let store = MemoryStore::new();
        let users = CollectionPath::root("users");
        store.set(&users, "u1", doc! { "postedTasks": 2 }).await.unwrap();

        let updated = store
            .increment(&users, "u1", doc! { "postedTasks": 1_i64, "ratingSum": 4.5 })
            .await
            .unwrap();
        assert_eq!(updated.get_i64("postedTasks").unwrap(), 3);
        assert_eq!(updated.get_f64("ratingSum").unwrap(), 4.5);
    }

    #[tokio::test]
    async fn set_if_missing_never_overwrites() {
        let store = MemoryStore::new();
        let users = CollectionPath::root("users");
        store.set(&users, "u1", doc! { "rating": 4.0 }).await.unwrap();

        assert!(store.set_if_missing(&users, "u1", "ratingSum", Bson::from(12.0)).await.unwrap());
        assert!(!store.set_if_missing(&users, "u1", "ratingSum", Bson::from(3.0)).await.unwrap());
        let user = store.get(&users, "u1").await.unwrap().unwrap();
        assert_eq!(user.get_f64("ratingSum").unwrap(), 12.0);

        let err = store
            .set_if_missing(&users, "nobody", "ratingSum", Bson::from(1.0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not-found");
    }

    #[tokio::test]
    async fn set_operations_keep_values_unique() {
        let store = MemoryStore::new();
        let users = CollectionPath::root("users");
        store.set(&users, "u1", doc! {}).await.unwrap();

        for _ in 0..2 {
            store
                .add_to_set(&users, "u1", "bookmarkedTasks", Bson::from("t1"))
                .await
                .unwrap();
        }
        let user = store.get(&users, "u1").await.unwrap().unwrap();
        assert_eq!(user.get_array("bookmarkedTasks").unwrap().len(), 1);

        store
            .remove_from_set(&users, "u1", "bookmarkedTasks", Bson::from("t1"))
            .await
            .unwrap();
        let user = store.get(&users, "u1").await.unwrap().unwrap();
        assert!(user.get_array("bookmarkedTasks").unwrap().is_empty());
    }

    #[tokio::test]
    async fn updating_missing_document_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update(&tasks(), "nope", doc! { "title": "x" })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not-found");
    }

    #[tokio::test]
    async fn rejected_filtered_queries_still_allow_full_scans() {
        let store = MemoryStore::new();
        store.insert(&tasks(), doc! { "status": "open" }).await.unwrap();
        store.reject_filtered_queries(true);

        assert!(store
            .query(&tasks(), &Query::all().where_eq("status", "open"))
            .await
            .is_err());
        assert_eq!(store.query(&tasks(), &Query::all()).await.unwrap().len(), 1);
    }
}
