use crate::resources::error::ResourceStoreError;
use crate::resources::models::ResourceRecord;
use async_trait::async_trait;
use std::sync::Arc;

/// ResourceStore trait for the records that describe merged files
#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    /// Insert or replace the record with the same resource id
    async fn put_resource(&self, record: ResourceRecord) -> Result<(), ResourceStoreError>;

    async fn get_resource(
        &self,
        resource_id: &str,
    ) -> Result<Option<ResourceRecord>, ResourceStoreError>;

    /// All records of a booking, oldest first
    async fn list_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Vec<ResourceRecord>, ResourceStoreError>;
}

#[async_trait]
impl<T: ResourceStore + ?Sized> ResourceStore for Arc<T> {
    async fn put_resource(&self, record: ResourceRecord) -> Result<(), ResourceStoreError> {
        (**self).put_resource(record).await
    }

    async fn get_resource(
        &self,
        resource_id: &str,
    ) -> Result<Option<ResourceRecord>, ResourceStoreError> {
        (**self).get_resource(resource_id).await
    }

    async fn list_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Vec<ResourceRecord>, ResourceStoreError> {
        (**self).list_for_booking(booking_id).await
    }
}
