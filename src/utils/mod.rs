pub mod response;
pub mod validation;

pub use response::{to_json, ApiError, ApiResponse};
