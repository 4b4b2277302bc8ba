//! Thin adapter over the managed backend: a document store keyed by
//! collection path + document id, and an object store for binary uploads.
//!
//! Everything above this module talks to `dyn DocumentStore` /
//! `dyn ObjectStore`, so the same services run against MongoDB in
//! production and against [`MemoryStore`] in development and tests.

pub mod memory;
pub mod mongo;
pub mod storage;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::Arc;

use mongodb::bson::{Bson, Document};
use thiserror::Error;

pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use storage::{LocalObjectStore, ObjectStore};

pub const USERS: &str = "users";
pub const TASKS: &str = "tasks";
pub const APPLICATIONS: &str = "applications";
pub const REVIEWS: &str = "reviews";
pub const CHATS: &str = "chats";
pub const MESSAGES: &str = "messages";
pub const TRENDING_SEARCHES: &str = "trending_searches";
pub const SEARCH_HISTORY: &str = "searchHistory";

pub type SharedStore = Arc<dyn DocumentStore>;
pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection}/{id} does not exist")]
    NotFound { collection: String, id: String },

    #[error("backend rejected the request ({code}): {message}")]
    Rejected { code: &'static str, message: String },

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("could not encode document: {0}")]
    Encode(#[from] mongodb::bson::ser::Error),

    #[error("could not decode document: {0}")]
    Decode(#[from] mongodb::bson::de::Error),
}

impl StoreError {
    pub fn not_found(collection: &CollectionPath, id: &str) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn rejected(code: &'static str, message: impl Into<String>) -> Self {
        StoreError::Rejected {
            code,
            message: message.into(),
        }
    }

    /// Backend error identifier, in the vocabulary the client layer matches on.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "not-found",
            StoreError::Rejected { code, .. } => code,
            StoreError::Unavailable(_) => "unavailable",
            StoreError::Encode(_) => "invalid-argument",
            StoreError::Decode(_) => "data-loss",
        }
    }

    /// Readable message for known backend codes, generic wrapper otherwise.
    pub fn user_message(&self) -> String {
        match self.code() {
            "permission-denied" | "unauthorized" => {
                "Access denied. Please sign in again.".to_string()
            }
            "not-found" => "The requested item no longer exists.".to_string(),
            "unavailable" | "retry-limit-exceeded" => {
                "Network error. Please check your internet connection.".to_string()
            }
            "resource-exhausted" => {
                "Storage limit reached. Please try again with a smaller file.".to_string()
            }
            "canceled" => "The upload was canceled.".to_string(),
            "invalid-checksum" => {
                "The file is corrupted. Please try a different file.".to_string()
            }
            _ => format!("Backend error: {}", self),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self.code(), "permission-denied" | "unauthorized")
    }
}

// ============================================================================
// COLLECTION PATHS & QUERIES
// ============================================================================

/// A top-level collection (`tasks`) or one nested under a parent document
/// (`chats/{id}/messages`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath {
    name: String,
    parent: Option<(String, String)>,
}

impl CollectionPath {
    pub fn root(name: &str) -> Self {
        CollectionPath {
            name: name.to_string(),
            parent: None,
        }
    }

    pub fn nested(parent_collection: &str, parent_id: &str, name: &str) -> Self {
        CollectionPath {
            name: name.to_string(),
            parent: Some((parent_collection.to_string(), parent_id.to_string())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent.as_ref().map(|(_, id)| id.as_str())
    }

    /// Flat collection name used by stores without nested collections.
    pub fn storage_name(&self) -> String {
        match &self.parent {
            Some((parent, _)) => format!("{}_{}", parent, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some((parent, id)) => write!(f, "{}/{}/{}", parent, id, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Equality filters, an optional single-field ordering and a limit.
///
/// Equality against an array field matches when the array contains the
/// value, which is how "chats I participate in" is expressed.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Vec<(String, Bson)>,
    pub order_by: Option<(String, SortOrder)>,
    pub limit: Option<i64>,
}

impl Query {
    pub fn all() -> Self {
        Query::default()
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, order: SortOrder) -> Self {
        self.order_by = Some((field.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub data: Document,
}

// ============================================================================
// STORE TRAIT
// ============================================================================

#[rocket::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts a new document under a store-assigned id.
    async fn insert(&self, path: &CollectionPath, document: Document) -> StoreResult<String>;

    async fn get(&self, path: &CollectionPath, id: &str) -> StoreResult<Option<Document>>;

    async fn query(&self, path: &CollectionPath, query: &Query) -> StoreResult<Vec<Record>>;

    /// Creates or fully replaces the document at `id`.
    async fn set(&self, path: &CollectionPath, id: &str, document: Document) -> StoreResult<()>;

    /// Merges `changes` into an existing document. Fails with `NotFound`
    /// when the document does not exist.
    async fn update(&self, path: &CollectionPath, id: &str, changes: Document) -> StoreResult<()>;

    /// Sets `field` to `value` only when the document does not have the
    /// field yet, as one atomic step. Returns whether it wrote. Fails with
    /// `NotFound` when the document does not exist.
    async fn set_if_missing(
        &self,
        path: &CollectionPath,
        id: &str,
        field: &str,
        value: Bson,
    ) -> StoreResult<bool>;

    /// Atomically adds each numeric value in `deltas` to the matching field
    /// (missing fields count as zero) and returns the updated document.
    async fn increment(
        &self,
        path: &CollectionPath,
        id: &str,
        deltas: Document,
    ) -> StoreResult<Document>;

    /// Adds `value` to the array at `field` unless it is already present.
    async fn add_to_set(
        &self,
        path: &CollectionPath,
        id: &str,
        field: &str,
        value: Bson,
    ) -> StoreResult<()>;

    /// Removes every occurrence of `value` from the array at `field`.
    async fn remove_from_set(
        &self,
        path: &CollectionPath,
        id: &str,
        field: &str,
        value: Bson,
    ) -> StoreResult<()>;
}

/// Reads a numeric field regardless of the integer/double width it was
/// stored with.
pub fn number_field(document: &Document, field: &str) -> Option<f64> {
    match document.get(field)? {
        Bson::Double(value) => Some(*value),
        Bson::Int32(value) => Some(f64::from(*value)),
        Bson::Int64(value) => Some(*value as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_paths_flatten_for_storage() {
        let path = CollectionPath::nested(CHATS, "c1", MESSAGES);
        assert_eq!(path.to_string(), "chats/c1/messages");
        assert_eq!(path.storage_name(), "chats_messages");
        assert_eq!(path.parent_id(), Some("c1"));
        assert_eq!(CollectionPath::root(TASKS).storage_name(), "tasks");
    }

    #[test]
    fn known_codes_get_readable_messages() {
        let denied = StoreError::rejected("permission-denied", "missing rule");
        assert!(denied.is_permission_denied());
        assert_eq!(denied.user_message(), "Access denied. Please sign in again.");

        let odd = StoreError::rejected("internal", "boom");
        assert!(odd.user_message().starts_with("Backend error:"));
    }
}
