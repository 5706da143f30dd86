use thiserror::Error;

/// Errors that can occur when interacting with the session registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to open registry: {0}")]
    OpenError(String),

    #[error("Registry operation failed: {0}")]
    OperationError(String),

    #[error("Session {0} not found")]
    SessionNotFound(String),

    #[error("Registry is locked")]
    Locked,
}
