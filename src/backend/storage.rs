use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::fs;

use super::{StoreError, StoreResult};

#[rocket::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `body` at `path` and returns a URL the object can be fetched from.
    async fn put_object(&self, path: &str, body: Vec<u8>, content_type: &str)
        -> StoreResult<String>;
}

/// Object store on the local filesystem, served back by the HTTP layer
/// under `public_prefix`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    public_prefix: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_prefix: &str) -> Self {
        LocalObjectStore {
            root: root.into(),
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        }
    }

    fn resolve(&self, path: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if path.is_empty() || escapes {
            return Err(StoreError::rejected(
                "invalid-argument",
                format!("invalid object path '{}'", path),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[rocket::async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_object(
        &self,
        path: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> StoreResult<String> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, &body).await?;

        log::debug!(
            "stored object {} ({} bytes, {})",
            path,
            body.len(),
            content_type
        );
        Ok(format!("{}/{}", self.public_prefix, path))
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => StoreError::rejected("unauthorized", err.to_string()),
            io::ErrorKind::StorageFull => {
                StoreError::rejected("resource-exhausted", err.to_string())
            }
            _ => StoreError::rejected("internal", err.to_string()),
        }
    }
}
