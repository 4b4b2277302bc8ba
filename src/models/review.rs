use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// The user being rated.
    pub user_id: String,
    #[serde(alias = "reviewerId")]
    pub author_id: String,
    pub task_id: String,
    #[serde(default)]
    pub task_title: Option<String>,
    pub rating: i32, // 1-5
    #[serde(default, alias = "content")]
    pub text: String,
    #[serde(default)]
    pub created_at: Option<DateTime>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReviewWithAuthor {
    #[serde(flatten)]
    pub review: Review,
    pub author_name: String,
    #[serde(rename = "authorPhotoURL", skip_serializing_if = "Option::is_none")]
    pub author_photo_url: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct CreateReviewDto {
    /// The user being rated.
    #[validate(length(min = 1))]
    pub user_id: String,
    #[validate(length(min = 1))]
    pub task_id: String,
    pub task_title: Option<String>,
    #[validate(range(min = 1, max = 5))]
    pub rating: i32,
    #[serde(default)]
    pub text: String,
}

/// Rating state of a user right after a review was applied.
#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub rating: f64,
    pub rating_count: i64,
}
