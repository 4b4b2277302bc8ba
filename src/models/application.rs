use mongodb::bson::DateTime;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    #[default]
    Pending,
    Accepted,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub task_id: String,
    pub applicant_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub status: ApplicationStatus,
    #[serde(default)]
    pub created_at: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate, Clone)]
pub struct NewApplication {
    #[validate(length(max = 2000))]
    #[serde(default)]
    pub message: String,
    #[validate(range(min = 0.0))]
    pub price: f64,
}
