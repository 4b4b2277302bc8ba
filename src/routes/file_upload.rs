use rocket::serde::json::Json;
use rocket::serde::Deserialize;
use rocket::State;
use rocket_okapi::openapi;
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;

use crate::error::ServiceError;
use crate::guards::AuthGuard;
use crate::images::ImageUpload;
use crate::services::Marketplace;
use crate::utils::{ApiError, ApiResponse};

const MAX_BATCH_FILES: usize = 10;

// ============================================================================
// BASE64 UPLOAD STRUCTS
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(crate = "rocket::serde")]
pub struct Base64UploadRequest {
    pub filename: String,
    pub mime_type: String,
    /// Raw base64 or a `data:` URI.
    pub data: String,
}

impl Base64UploadRequest {
    pub fn to_upload(&self) -> Result<ImageUpload, ApiError> {
        ImageUpload::from_base64(&self.filename, &self.mime_type, &self.data)
            .map_err(|e| ApiError::from(ServiceError::from(e)))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(crate = "rocket::serde")]
pub struct BatchImageUploadRequest {
    /// Task the images belong to, if it already exists.
    pub task_id: Option<String>,
    pub files: Vec<Base64UploadRequest>,
}

// ============================================================================
// TASK IMAGE BATCH UPLOAD
// ============================================================================

/// Stores images ahead of creating or editing a task. Files that cannot be
/// processed are skipped; the response lists the stored references.
#[openapi(tag = "Upload")]
#[post("/upload/task-images", data = "<request>")]
pub async fn upload_task_images(
    market: &State<Marketplace>,
    auth: AuthGuard,
    request: Json<BatchImageUploadRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    if request.files.is_empty() {
        return Err(ApiError::bad_request("No files provided"));
    }
    if request.files.len() > MAX_BATCH_FILES {
        return Err(ApiError::bad_request(format!(
            "At most {} images per upload",
            MAX_BATCH_FILES
        )));
    }

    let task_id = request.task_id.as_deref().filter(|id| !id.is_empty());
    if let Some(task_id) = task_id {
        market.tasks.ensure_creator(task_id, &auth.user_id).await?;
    }

    let mut uploads = Vec::with_capacity(request.files.len());
    for file in &request.files {
        match file.to_upload() {
            Ok(upload) => uploads.push(upload),
            Err(e) => warn!("skipping '{}': {}", file.filename, e.message),
        }
    }

    let requested = request.files.len();
    let urls = market.tasks.upload_task_images(task_id, uploads).await;
    if urls.is_empty() {
        return Err(ApiError::bad_request("None of the images could be processed"));
    }

    Ok(Json(ApiResponse::success_with_message(
        format!("{} of {} images uploaded", urls.len(), requested),
        serde_json::json!({ "imageUrls": urls }),
    )))
}
