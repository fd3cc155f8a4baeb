//! Error types for the code owners core library.

/// Top-level error enum for the code owners core library.
///
/// Only errors that abort a whole request live here.  Problems that are
/// local to one declaration file (parse failures while walking, unresolved
/// imports, ambiguous emails) are carried as data in the results instead.
#[derive(Debug, thiserror::Error)]
pub enum OwnersError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Code owners functionality is disabled for {0}")]
    Disabled(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OwnersError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        OwnersError::InvalidInput(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        OwnersError::Configuration(message.into())
    }

    /// Whether the error must abort the request rather than degrade.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, OwnersError::Parse { .. })
    }
}

pub type OwnersResult<T> = Result<T, OwnersError>;
