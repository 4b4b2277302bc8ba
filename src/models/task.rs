use mongodb::bson::{Bson, DateTime, Document};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::backend::{Record, StoreResult};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Open,
    Matched,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::Matched => "matched",
            TaskStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    // Not stored in the document; filled in from the record id on read.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub creator_id: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub created_at: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    // Legacy single-image field, kept for older readers of the collection.
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub applications: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_application_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Task {
    /// Decodes a stored task, normalizing the image fields: `imageUrls` is
    /// always an array of strings and `imageUrl` falls back to its first
    /// element.
    pub fn from_record(record: Record) -> StoreResult<Task> {
        let Record { id, mut data } = record;
        normalize_images(&mut data);
        let mut task: Task = mongodb::bson::from_document(data)?;
        task.id = id;
        Ok(task)
    }

    pub fn created_millis(&self) -> i64 {
        self.created_at.map(|at| at.timestamp_millis()).unwrap_or(0)
    }
}

fn normalize_images(data: &mut Document) {
    let urls: Vec<Bson> = match data.get("imageUrls") {
        Some(Bson::Array(items)) => items
            .iter()
            .filter(|item| matches!(item, Bson::String(_)))
            .cloned()
            .collect(),
        _ => Vec::new(),
    };

    let has_legacy = matches!(data.get("imageUrl"), Some(Bson::String(url)) if !url.is_empty());
    if !has_legacy {
        let first = urls.first().cloned().unwrap_or(Bson::Null);
        data.insert("imageUrl", first);
    }
    data.insert("imageUrls", urls);
}

#[derive(Debug, Deserialize, JsonSchema, Validate, Clone)]
pub struct NewTask {
    #[validate(length(min = 1, max = 120))]
    pub title: String,
    #[validate(length(max = 5000))]
    pub description: String,
    #[validate(length(min = 1))]
    pub category: String,
    #[validate(range(min = 0.0))]
    pub price: f64,
    pub location: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

#[derive(Debug, Default, Clone, FromForm, Deserialize, JsonSchema)]
pub struct TaskFilters {
    pub creator_id: Option<String>,
    pub category: Option<String>,
    pub search: Option<String>,
}

/// A task as shown in listings, with the creator's profile merged in.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TaskListing {
    #[serde(flatten)]
    pub task: Task,
    pub creator_name: String,
    #[serde(rename = "creatorPhotoURL")]
    pub creator_photo_url: String,
    pub creator_rating: f64,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct CompleteTaskDto {
    #[validate(range(min = 1, max = 5))]
    pub rating: i32,
    #[serde(default)]
    pub text: String,
}
