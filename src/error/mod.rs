use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Invalid transition: {message}")]
    InvalidTransition { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl StorageError {
    /// Whether the same call may succeed later.
    ///
    /// Serialization and migration failures come from stored data or schema
    /// state and repeat on every attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Connection { .. } | StorageError::Query { .. } | StorageError::Sqlx(_)
        )
    }
}

/// Coarse classification of an [`AppError`], stable enough to serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    InvalidState,
    InvalidTransition,
    Storage,
    Config,
    Internal,
}

impl AppError {
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        AppError::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        AppError::Conflict {
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        AppError::InvalidState {
            message: message.into(),
        }
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        AppError::InvalidTransition {
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound { .. } => ErrorKind::NotFound,
            AppError::Validation { .. } => ErrorKind::Validation,
            AppError::Conflict { .. } => ErrorKind::Conflict,
            AppError::InvalidState { .. } => ErrorKind::InvalidState,
            AppError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            AppError::Storage(_) => ErrorKind::Storage,
            AppError::Config { .. } => ErrorKind::Config,
            AppError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Storage(e) if e.is_transient())
    }

    /// Message safe to show to an end user.
    ///
    /// Storage and internal failures are reported generically so backend
    /// details never leak; everything else keeps its specific wording.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Storage(e) if e.is_transient() => {
                "A temporary storage problem occurred. Please retry the request.".to_string()
            }
            AppError::Storage(_) => "Stored data could not be processed.".to_string(),
            AppError::Internal { .. } | AppError::Config { .. } => {
                "An unexpected error occurred.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::not_found("Node", "abc");
        assert_eq!(err.to_string(), "Node not found: abc");

        let err = AppError::validation("text", "Node text is required");
        assert_eq!(err.to_string(), "Validation failed: text - Node text is required");

        let err = AppError::conflict("category 'printer' already exists");
        assert_eq!(err.to_string(), "Conflict: category 'printer' already exists");

        let err = AppError::invalid_transition("connection not offered");
        assert_eq!(err.to_string(), "Invalid transition: connection not offered");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Connection {
            message: "failed to connect".to_string(),
        };
        assert_eq!(err.to_string(), "Database connection failed: failed to connect");

        let err = StorageError::Query {
            message: "syntax error".to_string(),
        };
        assert_eq!(err.to_string(), "Query failed: syntax error");

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_storage_error_conversion_to_app_error() {
        let storage_err = StorageError::Query {
            message: "disk I/O error".to_string(),
        };
        let app_err: AppError = storage_err.into();
        assert!(matches!(app_err, AppError::Storage(_)));
        assert_eq!(app_err.kind(), ErrorKind::Storage);
        assert!(app_err.is_retryable());
    }

    #[test]
    fn test_user_message_hides_storage_details() {
        let app_err: AppError = StorageError::Query {
            message: "table nodes is locked".to_string(),
        }
        .into();
        let msg = app_err.user_message();
        assert!(!msg.contains("nodes"));
        assert!(msg.contains("retry"));
    }

    #[test]
    fn test_corrupt_data_is_not_retryable() {
        let app_err: AppError = StorageError::Serialization {
            message: "Corrupt history for session s1: expected value".to_string(),
        }
        .into();
        assert_eq!(app_err.kind(), ErrorKind::Storage);
        assert!(!app_err.is_retryable());
        assert!(!app_err.user_message().contains("retry"));
        assert!(!app_err.user_message().contains("s1"));

        let migration: AppError = StorageError::Migration {
            message: "checksum mismatch".to_string(),
        }
        .into();
        assert!(!migration.is_retryable());
    }

    #[test]
    fn test_user_message_keeps_business_errors_specific() {
        let err = AppError::conflict("category 'printer' already exists");
        assert!(err.user_message().contains("already exists"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(AppError::not_found("Node", "1").kind(), ErrorKind::NotFound);
        assert_eq!(AppError::validation("f", "r").kind(), ErrorKind::Validation);
        assert_eq!(AppError::invalid_state("done").kind(), ErrorKind::InvalidState);
        assert_eq!(
            AppError::invalid_transition("x").kind(),
            ErrorKind::InvalidTransition
        );
    }
}
