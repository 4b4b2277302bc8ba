pub mod application;
pub mod chat;
pub mod review;
pub mod search;
pub mod task;
pub mod user;

pub use application::*;
pub use chat::*;
pub use review::*;
pub use search::*;
pub use task::*;
pub use user::*;

use mongodb::bson::Document;
use serde::de::DeserializeOwned;

use crate::backend::{Record, StoreResult};

/// Decodes a stored document into a model.
pub fn decode<T: DeserializeOwned>(document: Document) -> StoreResult<T> {
    Ok(mongodb::bson::from_document(document)?)
}

/// Decodes a record into a model whose `id` field is not part of the stored
/// document.
pub fn decode_record<T, F>(record: Record, set_id: F) -> StoreResult<T>
where
    T: DeserializeOwned,
    F: FnOnce(&mut T, String),
{
    let mut model: T = decode(record.data)?;
    set_id(&mut model, record.id);
    Ok(model)
}
