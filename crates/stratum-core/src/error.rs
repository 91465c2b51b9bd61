//! Error types for stratum.

use thiserror::Error;

/// Result type alias using stratum's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for stratum operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Task not found (or not visible to the requesting tenant)
    #[error("Task not found: {0}")]
    TaskNotFound(uuid::Uuid),

    /// Tag not found (or not visible to the requesting tenant)
    #[error("Tag not found: {0}")]
    TagNotFound(uuid::Uuid),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Concurrent modification or uniqueness conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Object storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Background job error
    #[error("Job error: {0}")]
    Job(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("test resource".to_string());
        assert_eq!(err.to_string(), "Not found: test resource");
    }

    #[test]
    fn test_error_display_task_not_found() {
        let id = Uuid::nil();
        let err = Error::TaskNotFound(id);
        assert_eq!(err.to_string(), format!("Task not found: {}", id));
    }

    #[test]
    fn test_error_display_tag_not_found() {
        let id = Uuid::new_v4();
        let err = Error::TagNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("unknown match mode: most".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: unknown match mode: most"
        );
    }

    #[test]
    fn test_error_display_conflict() {
        let err = Error::Conflict("duplicate step order".to_string());
        assert_eq!(err.to_string(), "Conflict: duplicate step order");
    }

    #[test]
    fn test_error_display_storage() {
        let err = Error::Storage("bucket unavailable".to_string());
        assert_eq!(err.to_string(), "Storage error: bucket unavailable");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("access denied"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
