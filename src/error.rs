use thiserror::Error;
use validator::ValidationErrors;

use crate::backend::StoreError;
use crate::images::ImageError;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Image(#[from] ImageError),
}

impl ServiceError {
    pub fn not_found(what: &str, id: &str) -> Self {
        ServiceError::NotFound(format!("{} {} not found", what, id))
    }

    /// Message safe to show to an end user.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::Store(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(errors: ValidationErrors) -> Self {
        ServiceError::Validation(format!("Validation error: {}", errors))
    }
}
