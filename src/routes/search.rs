use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;

use crate::guards::OptionalAuth;
use crate::models::RecordSearchDto;
use crate::services::Marketplace;
use crate::utils::{to_json, ApiError, ApiResponse};

/// Records a search for the caller (when signed in) and the trending pool.
/// Always succeeds; storage problems are only logged.
#[openapi(tag = "Search")]
#[post("/search/history", data = "<dto>")]
pub async fn record_search(
    market: &State<Marketplace>,
    auth: OptionalAuth,
    dto: Json<RecordSearchDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    market
        .search
        .record_search(auth.user_id.as_deref(), &dto.query, dto.category.as_deref())
        .await;
    Ok(Json(ApiResponse::success(serde_json::json!({ "recorded": true }))))
}

#[openapi(tag = "Search")]
#[get("/search/recent?<limit>")]
pub async fn recent_searches(
    market: &State<Marketplace>,
    auth: OptionalAuth,
    limit: Option<usize>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let searches = market
        .search
        .recent_searches(auth.user_id.as_deref(), limit.map(|l| l.min(50)))
        .await;
    Ok(Json(ApiResponse::success(to_json(&searches)?)))
}
