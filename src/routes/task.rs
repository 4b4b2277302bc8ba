use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use validator::Validate;

use crate::error::ServiceError;
use crate::guards::AuthGuard;
use crate::models::{CompleteTaskDto, NewTask, TaskFilters};
use crate::routes::file_upload::Base64UploadRequest;
use crate::services::Marketplace;
use crate::utils::validation::validate_rating;
use crate::utils::{to_json, ApiError, ApiResponse};

#[openapi(tag = "Task")]
#[post("/tasks", data = "<dto>")]
pub async fn create_task(
    market: &State<Marketplace>,
    auth: AuthGuard,
    dto: Json<NewTask>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate().map_err(ServiceError::from)?;
    let task = market.tasks.create_task(&auth.user_id, &dto).await?;

    Ok(Json(ApiResponse::success_with_message(
        "Task created successfully".to_string(),
        to_json(&task)?,
    )))
}

#[openapi(tag = "Task")]
#[get("/tasks?<filters..>")]
pub async fn list_tasks(
    market: &State<Marketplace>,
    filters: TaskFilters,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let tasks = market.tasks.list_tasks(&filters).await?;
    Ok(Json(ApiResponse::success(to_json(&tasks)?)))
}

#[openapi(tag = "Task")]
#[get("/tasks/<task_id>")]
pub async fn get_task(
    market: &State<Marketplace>,
    task_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let task = market.tasks.get_task(&task_id).await?;
    Ok(Json(ApiResponse::success(to_json(&task)?)))
}

/// Partial update; identity, ownership and workflow fields are ignored.
#[openapi(tag = "Task")]
#[put("/tasks/<task_id>", data = "<patch>")]
pub async fn update_task(
    market: &State<Marketplace>,
    auth: AuthGuard,
    task_id: String,
    patch: Json<serde_json::Value>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    market.tasks.ensure_creator(&task_id, &auth.user_id).await?;
    let patch = mongodb::bson::to_document(&patch.into_inner())
        .map_err(|_| ApiError::bad_request("Update must be a JSON object"))?;

    let task = market.tasks.update_task(&task_id, patch).await?;
    Ok(Json(ApiResponse::success_with_message(
        "Task updated successfully".to_string(),
        to_json(&task)?,
    )))
}

#[openapi(tag = "Task")]
#[post("/tasks/<task_id>/images", data = "<request>")]
pub async fn add_task_image(
    market: &State<Marketplace>,
    auth: AuthGuard,
    task_id: String,
    request: Json<Base64UploadRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    market.tasks.ensure_creator(&task_id, &auth.user_id).await?;
    let upload = request.to_upload()?;
    let image_url = market.tasks.add_task_image(&task_id, upload).await?;

    Ok(Json(ApiResponse::success(serde_json::json!({ "imageUrl": image_url }))))
}

/// Marks a matched task as done and rates the helper.
#[openapi(tag = "Task")]
#[post("/tasks/<task_id>/complete", data = "<dto>")]
pub async fn complete_task(
    market: &State<Marketplace>,
    auth: AuthGuard,
    task_id: String,
    dto: Json<CompleteTaskDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    validate_rating(dto.rating)?;
    market.tasks.ensure_creator(&task_id, &auth.user_id).await?;
    let (review, summary) = market
        .ratings
        .complete_task(&task_id, dto.rating, &dto.text)
        .await?;

    Ok(Json(ApiResponse::success_with_message(
        "Task completed".to_string(),
        serde_json::json!({
            "review": to_json(&review)?,
            "rating": to_json(&summary)?,
        }),
    )))
}
