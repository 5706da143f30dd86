use thiserror::Error;

/// Errors that can occur when interacting with S3 storage
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object with key {0} not found")]
    ObjectNotFound(String),

    #[error("Access denied for object {0}: {1}")]
    AccessDenied(String, String),

    #[error("Failed to read object {0}: {1}")]
    ReadError(String, String),

    #[error("Failed to write object {0}: {1}")]
    WriteError(String, String),

    #[error("Failed to list objects under {0}: {1}")]
    ListError(String, String),

    #[error("Multipart upload {upload_id} for {key} failed: {reason}")]
    MultipartError {
        key: String,
        upload_id: String,
        reason: String,
    },

    #[error("Failed to presign {0}: {1}")]
    PresignError(String, String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Other storage error: {0}")]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    /// True when the error means the object is absent rather than unreadable
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::ObjectNotFound(_))
    }
}
