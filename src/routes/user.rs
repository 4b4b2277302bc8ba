use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use validator::Validate;

use crate::error::ServiceError;
use crate::guards::AuthGuard;
use crate::models::{CreateProfileDto, UpdateProfileDto, UserProfile};
use crate::routes::file_upload::Base64UploadRequest;
use crate::services::Marketplace;
use crate::utils::{to_json, ApiError, ApiResponse};

fn profile_with_level(profile: &UserProfile) -> Result<serde_json::Value, ApiError> {
    let mut data = to_json(profile)?;
    data["level"] = to_json(&profile.level())?;
    Ok(data)
}

#[openapi(tag = "User")]
#[get("/user/profile")]
pub async fn get_profile(
    market: &State<Marketplace>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let profile = market
        .profiles
        .get_profile(&auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;

    Ok(Json(ApiResponse::success(profile_with_level(&profile)?)))
}

#[openapi(tag = "User")]
#[get("/users/<uid>")]
pub async fn get_public_profile(
    market: &State<Marketplace>,
    uid: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let profile = market
        .profiles
        .get_profile(&uid)
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;

    let mut data = profile_with_level(&profile)?;
    if let Some(fields) = data.as_object_mut() {
        // Private to the owner.
        for key in ["email", "bookmarkedTasks", "ratingSum"] {
            fields.remove(key);
        }
    }
    Ok(Json(ApiResponse::success(data)))
}

#[openapi(tag = "User")]
#[post("/user/profile", data = "<dto>")]
pub async fn create_profile(
    market: &State<Marketplace>,
    auth: AuthGuard,
    dto: Json<CreateProfileDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate().map_err(ServiceError::from)?;
    let mut dto = dto.into_inner();
    if dto.email.is_none() {
        dto.email = auth.email.clone();
    }

    let profile = market.profiles.create_profile(&auth.user_id, &dto).await?;
    Ok(Json(ApiResponse::success(profile_with_level(&profile)?)))
}

#[openapi(tag = "User")]
#[put("/user/profile", data = "<dto>")]
pub async fn update_profile(
    market: &State<Marketplace>,
    auth: AuthGuard,
    dto: Json<UpdateProfileDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate().map_err(ServiceError::from)?;
    let profile = market.profiles.update_profile(&auth.user_id, &dto).await?;

    Ok(Json(ApiResponse::success_with_message(
        "Profile updated successfully".to_string(),
        profile_with_level(&profile)?,
    )))
}

#[openapi(tag = "User")]
#[get("/user/username-exists?<name>")]
pub async fn username_exists(
    market: &State<Marketplace>,
    name: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let exists = market.profiles.username_exists(&name).await;
    Ok(Json(ApiResponse::success(serde_json::json!({ "exists": exists }))))
}

#[openapi(tag = "User")]
#[post("/user/avatar", data = "<request>")]
pub async fn upload_avatar(
    market: &State<Marketplace>,
    auth: AuthGuard,
    request: Json<Base64UploadRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let upload = request.to_upload()?;
    let photo_url = market.profiles.upload_avatar(&auth.user_id, upload).await?;

    Ok(Json(ApiResponse::success_with_message(
        "Profile photo updated".to_string(),
        serde_json::json!({ "photoURL": photo_url }),
    )))
}

#[openapi(tag = "User")]
#[get("/users/<uid>/reviews")]
pub async fn get_user_reviews(
    market: &State<Marketplace>,
    uid: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let reviews = market.ratings.reviews_for_user(&uid).await?;
    Ok(Json(ApiResponse::success(to_json(&reviews)?)))
}

#[openapi(tag = "User")]
#[get("/user/bookmarks")]
pub async fn get_bookmarks(
    market: &State<Marketplace>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let tasks = market.tasks.bookmarked_tasks(&auth.user_id).await?;
    Ok(Json(ApiResponse::success(to_json(&tasks)?)))
}

#[openapi(tag = "User")]
#[get("/user/bookmarks/<task_id>")]
pub async fn is_bookmarked(
    market: &State<Marketplace>,
    auth: AuthGuard,
    task_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let bookmarked = market.tasks.is_task_bookmarked(&auth.user_id, &task_id).await;
    Ok(Json(ApiResponse::success(serde_json::json!({ "bookmarked": bookmarked }))))
}

#[openapi(tag = "User")]
#[post("/user/bookmarks/<task_id>")]
pub async fn add_bookmark(
    market: &State<Marketplace>,
    auth: AuthGuard,
    task_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    market.tasks.bookmark_task(&auth.user_id, &task_id).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({ "bookmarked": true }))))
}

#[openapi(tag = "User")]
#[delete("/user/bookmarks/<task_id>")]
pub async fn remove_bookmark(
    market: &State<Marketplace>,
    auth: AuthGuard,
    task_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    market.tasks.remove_bookmark(&auth.user_id, &task_id).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({ "bookmarked": false }))))
}
