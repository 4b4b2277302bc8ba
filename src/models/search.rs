use mongodb::bson::DateTime;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const ALL_CATEGORIES: &str = "all";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SearchRecord {
    pub query: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub timestamp: Option<DateTime>,
    /// Only present on trending records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymized: Option<bool>,
}

fn default_category() -> String {
    ALL_CATEGORIES.to_string()
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Personal,
    Trending,
}

#[derive(Debug, Serialize, Clone)]
pub struct RecentSearch {
    pub id: String,
    pub query: String,
    pub category: String,
    pub timestamp: Option<DateTime>,
    pub source: SearchSource,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecordSearchDto {
    pub query: String,
    pub category: Option<String>,
}
