use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use validator::Validate;

use crate::error::ServiceError;
use crate::guards::AuthGuard;
use crate::models::CreateReviewDto;
use crate::services::{Marketplace, NewReview};
use crate::utils::validation::validate_rating;
use crate::utils::{to_json, ApiError, ApiResponse};

#[openapi(tag = "Review")]
#[post("/reviews", data = "<dto>")]
pub async fn create_review(
    market: &State<Marketplace>,
    auth: AuthGuard,
    dto: Json<CreateReviewDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    validate_rating(dto.rating)?;
    dto.validate().map_err(ServiceError::from)?;
    if dto.user_id == auth.user_id {
        return Err(ApiError::bad_request("You cannot review yourself"));
    }

    let (review, summary) = market
        .ratings
        .create_review(NewReview {
            subject_id: &dto.user_id,
            author_id: &auth.user_id,
            task_id: &dto.task_id,
            task_title: dto.task_title.as_deref(),
            rating: dto.rating,
            text: &dto.text,
        })
        .await?;

    Ok(Json(ApiResponse::success_with_message(
        "Review submitted successfully".to_string(),
        serde_json::json!({
            "review": to_json(&review)?,
            "rating": to_json(&summary)?,
        }),
    )))
}
