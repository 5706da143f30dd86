pub mod availability;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod finalizer;
pub mod manifest;
pub mod ordering;
pub mod pipeline;


pub use error::ReassemblyError;
pub use finalizer::Finalized;
pub use manifest::{booking_id_from_key, is_manifest_key};
pub use pipeline::{ReassemblyOutcome, Reassembler, SessionHints};
