use crate::resources::error::ResourceStoreError;
use crate::resources::models::ResourceRecord;
use crate::resources::resource_store::ResourceStore;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// A fake in-memory implementation of the ResourceStore trait for testing
#[derive(Clone, Default)]
pub struct FakeResourceStore {
    records: Arc<RwLock<HashMap<String, ResourceRecord>>>,
    failing: Arc<RwLock<HashSet<String>>>,
    puts: Arc<RwLock<usize>>,
}

impl FakeResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every put for this booking fail
    pub fn fake_fail_booking(&self, booking_id: &str) {
        self.failing.write().unwrap().insert(booking_id.to_string());
    }

    /// Number of successful puts, including overwrites
    pub fn fake_put_count(&self) -> usize {
        *self.puts.read().unwrap()
    }

    pub fn fake_all_records(&self) -> Vec<ResourceRecord> {
        self.records.read().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl ResourceStore for FakeResourceStore {
    async fn put_resource(&self, record: ResourceRecord) -> Result<(), ResourceStoreError> {
        if self.failing.read().unwrap().contains(&record.booking_id) {
            return Err(ResourceStoreError::OperationError(format!(
                "Injected failure for booking {}",
                record.booking_id
            )));
        }
        self.records
            .write()
            .unwrap()
            .insert(record.resource_id.clone(), record);
        *self.puts.write().unwrap() += 1;
        Ok(())
    }

    async fn get_resource(
        &self,
        resource_id: &str,
    ) -> Result<Option<ResourceRecord>, ResourceStoreError> {
        Ok(self.records.read().unwrap().get(resource_id).cloned())
    }

    async fn list_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Vec<ResourceRecord>, ResourceStoreError> {
        let mut records: Vec<ResourceRecord> = self
            .records
            .read()
            .unwrap()
            .values()
            .filter(|r| r.booking_id == booking_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        Ok(records)
    }
}
