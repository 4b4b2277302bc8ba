use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use validator::Validate;

use crate::error::ServiceError;
use crate::guards::AuthGuard;
use crate::models::NewApplication;
use crate::services::Marketplace;
use crate::utils::{to_json, ApiError, ApiResponse};

#[openapi(tag = "Application")]
#[post("/tasks/<task_id>/applications", data = "<dto>")]
pub async fn apply_for_task(
    market: &State<Marketplace>,
    auth: AuthGuard,
    task_id: String,
    dto: Json<NewApplication>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate().map_err(ServiceError::from)?;
    let application = market
        .applications
        .apply_for_task(&task_id, &auth.user_id, &dto)
        .await?;

    Ok(Json(ApiResponse::success_with_message(
        "Application sent".to_string(),
        to_json(&application)?,
    )))
}

/// Visible to the task creator only.
#[openapi(tag = "Application")]
#[get("/tasks/<task_id>/applications")]
pub async fn list_applications(
    market: &State<Marketplace>,
    auth: AuthGuard,
    task_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    market.tasks.ensure_creator(&task_id, &auth.user_id).await?;
    let applications = market.applications.applications_for_task(&task_id).await?;
    Ok(Json(ApiResponse::success(to_json(&applications)?)))
}

#[openapi(tag = "Application")]
#[post("/tasks/<task_id>/applications/<application_id>/accept")]
pub async fn accept_application(
    market: &State<Marketplace>,
    auth: AuthGuard,
    task_id: String,
    application_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    market.tasks.ensure_creator(&task_id, &auth.user_id).await?;
    let accepted = market
        .applications
        .accept_application(&application_id, &task_id)
        .await?;

    Ok(Json(ApiResponse::success_with_message(
        "Application accepted".to_string(),
        to_json(&accepted)?,
    )))
}
