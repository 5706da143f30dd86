pub mod error;
#[cfg(test)]
pub mod fake;
pub mod models;
pub mod resource_store;
pub mod sqlite;


pub use error::ResourceStoreError;
#[cfg(test)]
pub use fake::FakeResourceStore;
pub use models::{ResourceRecord, GEOTIFF_RESOURCE_TYPE};
pub use resource_store::ResourceStore;
pub use sqlite::SqliteResourceStore;
