pub mod error;
#[cfg(test)]
pub mod fake;
pub mod models;
pub mod session_store;
pub mod sqlite;


pub use error::RegistryError;
#[cfg(test)]
pub use fake::FakeSessionStore;
pub use models::{ChunkSession, Completion, SessionStatus};
pub use session_store::SessionStore;
pub use sqlite::SqliteSessionStore;
