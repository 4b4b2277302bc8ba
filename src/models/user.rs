use mongodb::bson::DateTime;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "photoURL", default)]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_base64: Option<String>,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub rating_count: i64,
    // Accumulator behind `rating`; absent on profiles rated before it existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_sum: Option<f64>,
    #[serde(default)]
    pub completed_tasks: i64,
    #[serde(default)]
    pub posted_tasks: i64,
    #[serde(default)]
    pub bookmarked_tasks: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_updated_at: Option<DateTime>,
}

impl UserProfile {
    pub fn display_name_or_default(&self) -> String {
        self.display_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string())
    }

    pub fn level(&self) -> UserLevel {
        user_level(self.completed_tasks, self.rating)
    }
}

pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous User";

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct CreateProfileDto {
    #[validate(length(min = 1, max = 60))]
    pub display_name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct UpdateProfileDto {
    #[validate(length(min = 1, max = 60))]
    pub display_name: Option<String>,
    pub skills: Option<Vec<String>>,
    pub location: Option<String>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, JsonSchema)]
pub struct UserLevel {
    pub name: &'static str,
    pub min_tasks: i64,
    pub min_rating: f64,
}

pub const USER_LEVELS: [UserLevel; 5] = [
    UserLevel { name: "Task Chick", min_tasks: 0, min_rating: 0.0 },
    UserLevel { name: "DoIt Beginner", min_tasks: 3, min_rating: 3.0 },
    UserLevel { name: "DoIt Pro", min_tasks: 8, min_rating: 3.5 },
    UserLevel { name: "DoIt Ninja", min_tasks: 15, min_rating: 4.0 },
    UserLevel { name: "Superhero", min_tasks: 25, min_rating: 4.5 },
];

/// Highest consecutive level whose task and rating thresholds are both met.
pub fn user_level(completed_tasks: i64, rating: f64) -> UserLevel {
    let mut level = USER_LEVELS[0];
    for candidate in USER_LEVELS {
        if completed_tasks >= candidate.min_tasks && rating >= candidate.min_rating {
            level = candidate;
        } else {
            break;
        }
    }
    level
}
