//! Shared guardrails for request parameters and traversal limits.

use crate::errors::{OwnersError, OwnersResult};

// Suggestion guards
pub const DEFAULT_SUGGESTION_LIMIT: usize = 10;
pub const MAX_SUGGESTION_LIMIT: usize = 100;

// Import guards
pub const DEFAULT_MAX_IMPORT_DEPTH: usize = 5;
pub const MAX_IMPORT_DEPTH_CAP: usize = 20;

// All-users sampling guards
pub const ACCOUNT_SAMPLE_PAGE_SIZE: usize = 100;
pub const MAX_ACCOUNT_SAMPLE_PAGES: usize = 10;

// Bulk operation guards
pub const MAX_RENAME_FILES: usize = 10_000;

pub fn clamp_int(value: i64, minimum: i64, maximum: i64) -> i64 {
    value.max(minimum).min(maximum)
}

/// Validate a caller supplied result limit; `None` selects the default.
pub fn validate_limit(limit: Option<i64>) -> OwnersResult<usize> {
    match limit {
        None => Ok(DEFAULT_SUGGESTION_LIMIT),
        Some(value) if value <= 0 => Err(OwnersError::invalid_input(format!(
            "limit must be positive, got {value}"
        ))),
        Some(value) => Ok(clamp_int(value, 1, MAX_SUGGESTION_LIMIT as i64) as usize),
    }
}

pub fn validate_start(start: Option<i64>) -> OwnersResult<usize> {
    match start {
        None => Ok(0),
        Some(value) if value < 0 => Err(OwnersError::invalid_input(format!(
            "start must not be negative, got {value}"
        ))),
        Some(value) => Ok(value as usize),
    }
}

pub fn validate_email(email: &str) -> OwnersResult<String> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        return Err(OwnersError::invalid_input("email is required"));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(OwnersError::invalid_input(format!(
            "email '{trimmed}' must not contain whitespace"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn clamp_import_depth(value: usize) -> usize {
    clamp_int(value as i64, 1, MAX_IMPORT_DEPTH_CAP as i64) as usize
}

/// Boolean flag from an environment style value, `None` when unset.
pub fn parse_flag(value: Option<&str>) -> Option<bool> {
    let v = value?.trim().to_lowercase();
    if matches!(v.as_str(), "1" | "true" | "yes" | "on") {
        Some(true)
    } else if matches!(v.as_str(), "0" | "false" | "no" | "off") {
        Some(false)
    } else {
        None
    }
}
