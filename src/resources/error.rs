use thiserror::Error;

/// Errors that can occur when interacting with the resource store
#[derive(Error, Debug)]
pub enum ResourceStoreError {
    #[error("Failed to open resource store: {0}")]
    OpenError(String),

    #[error("Resource store operation failed: {0}")]
    OperationError(String),

    #[error("Resource store is locked")]
    Locked,
}
