use std::sync::OnceLock;

use regex::Regex;

use crate::error::{ServiceError, ServiceResult};

pub const SUPPORTED_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/gif"];

const MAX_FILE_NAME_LEN: usize = 50;

pub fn require_id(value: &str, what: &str) -> ServiceResult<()> {
    if value.trim().is_empty() {
        return Err(ServiceError::Validation(format!("{} is required", what)));
    }
    Ok(())
}

pub fn validate_rating(rating: i32) -> ServiceResult<()> {
    if !(1..=5).contains(&rating) {
        return Err(ServiceError::Validation(
            "Rating must be between 1 and 5".to_string(),
        ));
    }
    Ok(())
}

/// Trimmed, lowercased search text, or `None` when nothing is left.
pub fn normalize_query(query: &str) -> Option<String> {
    let normalized = query.trim().to_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Replaces everything outside `[A-Za-z0-9.]` with `_` and caps the length.
pub fn sanitize_file_name(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9.]").expect("valid regex"));
    let cleaned = re.replace_all(name, "_");
    let truncated: String = cleaned.chars().take(MAX_FILE_NAME_LEN).collect();
    if truncated.is_empty() {
        "image".to_string()
    } else {
        truncated
    }
}

pub fn is_supported_image_type(content_type: &str) -> bool {
    SUPPORTED_IMAGE_TYPES.contains(&content_type)
}

pub fn extension_from_mime(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "jpg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_sanitized_and_capped() {
        assert_eq!(sanitize_file_name("my photo (1).png"), "my_photo__1_.png");
        assert_eq!(sanitize_file_name(&"a".repeat(80)).len(), 50);
        assert_eq!(sanitize_file_name(""), "image");
    }

    #[test]
    fn queries_are_trimmed_and_lowercased() {
        assert_eq!(normalize_query("  Garden Help "), Some("garden help".to_string()));
        assert_eq!(normalize_query("   "), None);
    }

    #[test]
    fn ratings_outside_range_are_rejected() {
        assert!(validate_rating(0).is_err());
        assert!(validate_rating(6).is_err());
        assert!(validate_rating(5).is_ok());
    }

    #[test]
    fn only_known_image_types_are_supported() {
        assert!(is_supported_image_type("image/webp"));
        assert!(!is_supported_image_type("image/svg+xml"));
    }
}
