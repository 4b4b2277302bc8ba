use rocket::figment::{Figment, providers::{Env, Format, Toml}};
use rocket::Config as RocketConfig;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    MongoDb,
    Memory,
}

/// Settings read once at startup and managed as Rocket state.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_mongodb_uri")]
    pub mongodb_uri: String,
    #[serde(default = "default_database_name")]
    pub database_name: String,
    #[serde(default = "default_store_backend")]
    pub store_backend: StoreBackend,
    #[serde(default)]
    pub auth_secret: String,
    #[serde(default)]
    pub use_object_storage: bool,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    #[serde(default = "default_upload_url_prefix")]
    pub upload_url_prefix: String,
    #[serde(skip)]
    pub is_development: bool,
}

fn default_mongodb_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_database_name() -> String {
    "doit-marketplace".to_string()
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::MongoDb
}

fn default_upload_dir() -> String {
    "uploads".to_string()
}

fn default_upload_url_prefix() -> String {
    "/uploads".to_string()
}

pub struct Config;

impl Config {
    pub fn profile() -> String {
        env::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string())
    }

    pub fn figment() -> Figment {
        Figment::from(RocketConfig::default())
            .merge(Toml::file("Rocket.toml").nested())
            .select(Self::profile())
            .merge(Env::prefixed("ROCKET_").global())
    }

    pub fn is_development() -> bool {
        Self::profile() == "development"
    }

    pub fn load(figment: &Figment) -> Result<AppConfig, rocket::figment::Error> {
        let mut config: AppConfig = figment.extract()?;
        config.is_development = Self::is_development();
        if config.auth_secret.is_empty() {
            log::warn!("auth_secret is not set, every authenticated request will be rejected");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::figment::providers::Serialized;

    #[test]
    fn extracts_marketplace_settings() {
        let figment = Figment::new().merge(Serialized::defaults(serde_json::json!({
            "store_backend": "memory",
            "auth_secret": "s3cret",
            "use_object_storage": true,
        })));
        let config = Config::load(&figment).unwrap();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert!(config.use_object_storage);
        assert_eq!(config.upload_dir, "uploads");
        assert_eq!(config.database_name, "doit-marketplace");
    }
}
