use crate::registry::RegistryError;
use crate::resources::ResourceStoreError;
use crate::s3::StorageError;
use thiserror::Error;

/// Errors surfaced by the reassembly pipeline
///
/// Not-ready sessions are not errors; they come back as an outcome.
#[derive(Error, Debug)]
pub enum ReassemblyError {
    #[error("Invalid trigger event: {0}")]
    InvalidTrigger(String),

    #[error("Manifest {key} is invalid: {reason}")]
    ManifestInvalid { key: String, reason: String },

    #[error("No chunks found for session {session_id}")]
    DiscoveryExhausted {
        booking_id: String,
        session_id: String,
    },

    #[error("Could not find chunks to reassemble")]
    NothingToReassemble { booking_id: String },

    #[error("Failed to reassemble chunks: {0}")]
    MergeFailed(String),

    #[error("Failed to finalize reassembly: {0}")]
    FinalizeFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Resource store error: {0}")]
    Resource(#[from] ResourceStoreError),
}
