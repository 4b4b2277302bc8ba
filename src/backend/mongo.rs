use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReplaceOptions, ReturnDocument};
use mongodb::{Client, Collection, Database};
use rocket::futures::TryStreamExt;

use super::{CollectionPath, DocumentStore, Query, Record, SortOrder, StoreError, StoreResult};

/// Holds the parent id of documents living in a nested collection.
const PARENT_FIELD: &str = "_parent";

/// MongoDB-backed document store. Ids are strings (`ObjectId` hex for
/// inserted documents, caller-chosen for `set`), and nested collections
/// are flattened into `{parent}_{name}` scoped by [`PARENT_FIELD`].
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, MongoError> {
        let client = Client::with_uri_str(uri).await?;

        // Test connection
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await?;

        Ok(MongoStore {
            db: client.database(database),
        })
    }

    fn collection(&self, path: &CollectionPath) -> Collection<Document> {
        self.db.collection::<Document>(&path.storage_name())
    }

    fn by_id(path: &CollectionPath, id: &str) -> Document {
        scoped(path, doc! { "_id": id })
    }
}

fn scoped(path: &CollectionPath, mut filter: Document) -> Document {
    if let Some(parent) = path.parent_id() {
        filter.insert(PARENT_FIELD, parent);
    }
    filter
}

fn into_record(mut document: Document) -> Option<Record> {
    let id = match document.remove("_id") {
        Some(Bson::String(id)) => id,
        Some(Bson::ObjectId(id)) => id.to_hex(),
        _ => return None,
    };
    document.remove(PARENT_FIELD);
    Some(Record { id, data: document })
}

#[rocket::async_trait]
impl DocumentStore for MongoStore {
    async fn insert(&self, path: &CollectionPath, mut document: Document) -> StoreResult<String> {
        let id = ObjectId::new().to_hex();
        document.insert("_id", id.clone());
        let document = scoped(path, document);

        self.collection(path).insert_one(document, None).await?;
        Ok(id)
    }

    async fn get(&self, path: &CollectionPath, id: &str) -> StoreResult<Option<Document>> {
        let found = self
            .collection(path)
            .find_one(Self::by_id(path, id), None)
            .await?;
        Ok(found.and_then(into_record).map(|record| record.data))
    }

    async fn query(&self, path: &CollectionPath, query: &Query) -> StoreResult<Vec<Record>> {
        let mut filter = Document::new();
        for (field, value) in &query.filters {
            filter.insert(field.clone(), value.clone());
        }

        let sort = query.order_by.as_ref().map(|(field, order)| {
            let direction = match order {
                SortOrder::Ascending => 1,
                SortOrder::Descending => -1,
            };
            doc! { field: direction }
        });

        let options = FindOptions::builder()
            .sort(sort)
            .limit(query.limit)
            .build();

        let documents: Vec<Document> = self
            .collection(path)
            .find(scoped(path, filter), options)
            .await?
            .try_collect()
            .await?;

        Ok(documents.into_iter().filter_map(into_record).collect())
    }

    async fn set(&self, path: &CollectionPath, id: &str, mut document: Document) -> StoreResult<()> {
        document.insert("_id", id);
        let document = scoped(path, document);
        let options = ReplaceOptions::builder().upsert(true).build();

        self.collection(path)
            .replace_one(Self::by_id(path, id), document, options)
            .await?;
        Ok(())
    }

    async fn update(&self, path: &CollectionPath, id: &str, changes: Document) -> StoreResult<()> {
        let result = self
            .collection(path)
            .update_one(Self::by_id(path, id), doc! { "$set": changes }, None)
            .await?;

        if result.matched_count == 0 {
            return Err(StoreError::not_found(path, id));
        }
        Ok(())
    }

    async fn set_if_missing(
        &self,
        path: &CollectionPath,
        id: &str,
        field: &str,
        value: Bson,
    ) -> StoreResult<bool> {
        let mut filter = Self::by_id(path, id);
        filter.insert(field, doc! { "$exists": false });
        let result = self
            .collection(path)
            .update_one(filter, doc! { "$set": { field: value } }, None)
            .await?;

        if result.matched_count > 0 {
            return Ok(true);
        }
        // No match means either the field exists or the document does not.
        let exists = self
            .collection(path)
            .count_documents(Self::by_id(path, id), None)
            .await?;
        if exists == 0 {
            return Err(StoreError::not_found(path, id));
        }
        Ok(false)
    }

    async fn increment(
        &self,
        path: &CollectionPath,
        id: &str,
        deltas: Document,
    ) -> StoreResult<Document> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.collection(path)
            .find_one_and_update(Self::by_id(path, id), doc! { "$inc": deltas }, options)
            .await?
            .and_then(into_record)
            .map(|record| record.data)
            .ok_or_else(|| StoreError::not_found(path, id))
    }

    async fn add_to_set(
        &self,
        path: &CollectionPath,
        id: &str,
        field: &str,
        value: Bson,
    ) -> StoreResult<()> {
        let result = self
            .collection(path)
            .update_one(
                Self::by_id(path, id),
                doc! { "$addToSet": { field: value } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(StoreError::not_found(path, id));
        }
        Ok(())
    }

    async fn remove_from_set(
        &self,
        path: &CollectionPath,
        id: &str,
        field: &str,
        value: Bson,
    ) -> StoreResult<()> {
        let result = self
            .collection(path)
            .update_one(Self::by_id(path, id), doc! { "$pull": { field: value } }, None)
            .await?;

        if result.matched_count == 0 {
            return Err(StoreError::not_found(path, id));
        }
        Ok(())
    }
}

// Server error codes: 13 Unauthorized, 10334 BSONObjectTooLarge.
impl From<MongoError> for StoreError {
    fn from(err: MongoError) -> Self {
        let message = err.to_string();
        match err.kind.as_ref() {
            ErrorKind::Authentication { .. } => StoreError::rejected("permission-denied", message),
            ErrorKind::Command(command) if command.code == 13 => {
                StoreError::rejected("permission-denied", message)
            }
            ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == 10334 => {
                StoreError::rejected("resource-exhausted", message)
            }
            ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => {
                StoreError::Unavailable(message)
            }
            ErrorKind::BsonSerialization(_) => StoreError::rejected("invalid-argument", message),
            ErrorKind::BsonDeserialization(_) => StoreError::rejected("data-loss", message),
            _ => StoreError::rejected("internal", message),
        }
    }
}
