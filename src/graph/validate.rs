use crate::error::{AppError, AppResult};

/// Longest accepted category key.
pub const MAX_CATEGORY_LEN: usize = 64;

/// Validate a category key, returning it trimmed.
///
/// Keys are ASCII alphanumerics plus `_` and `-`, at most
/// [`MAX_CATEGORY_LEN`] characters.
pub fn validate_category_key(category: &str) -> AppResult<String> {
    let trimmed = category.trim();

    if trimmed.is_empty() {
        return Err(AppError::validation("category", "Category is required"));
    }
    if trimmed.len() > MAX_CATEGORY_LEN {
        return Err(AppError::validation(
            "category",
            format!("malformed category: longer than {} characters", MAX_CATEGORY_LEN),
        ));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::validation(
            "category",
            format!("malformed category '{}': only letters, digits, '_' and '-' are allowed", trimmed),
        ));
    }

    Ok(trimmed.to_string())
}

/// Require a non-blank text field, returning it trimmed.
pub fn require_text(field: &str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(field, format!("{} cannot be empty", field)));
    }
    Ok(trimmed.to_string())
}
