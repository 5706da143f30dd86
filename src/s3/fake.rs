use crate::s3::error::StorageError;
use crate::s3::storage::{CompletedSegment, ObjectHead, ObjectSummary, Storage};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// S3 rejects completion when any part but the last is below this size
pub const DEFAULT_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Clone)]
struct FakeObject {
    data: Bytes,
    metadata: HashMap<String, String>,
    content_type: Option<String>,
}

struct FakeUpload {
    key: String,
    content_type: String,
    parts: BTreeMap<i32, (String, Bytes)>,
}

/// `FakeStorage` is an in-memory implementation of the `Storage` trait for testing purposes.
/// It allows simulating various storage scenarios, including successful operations and failures.
#[derive(Clone)]
pub struct FakeStorage {
    data: Arc<Mutex<HashMap<String, FakeObject>>>,
    fail_objects: Arc<Mutex<HashSet<String>>>,
    fail_copies: Arc<Mutex<HashSet<String>>>,
    fail_puts: Arc<Mutex<HashSet<String>>>,
    uploads: Arc<Mutex<HashMap<String, FakeUpload>>>,
    aborted: Arc<Mutex<Vec<String>>>,
    completed: Arc<Mutex<Vec<String>>>,
    downloads: Arc<Mutex<Vec<String>>>,
    next_upload: Arc<AtomicU64>,
    min_part_size: u64,
}

impl FakeStorage {
    /// Create a new empty FakeStorage instance
    pub fn new() -> Self {
        Self::with_min_part_size(DEFAULT_MIN_PART_SIZE)
    }

    /// Create a FakeStorage that enforces a custom minimum part size
    pub fn with_min_part_size(min_part_size: u64) -> Self {
        FakeStorage {
            data: Arc::new(Mutex::new(HashMap::new())),
            fail_objects: Arc::new(Mutex::new(HashSet::new())),
            fail_copies: Arc::new(Mutex::new(HashSet::new())),
            fail_puts: Arc::new(Mutex::new(HashSet::new())),
            uploads: Arc::new(Mutex::new(HashMap::new())),
            aborted: Arc::new(Mutex::new(Vec::new())),
            completed: Arc::new(Mutex::new(Vec::new())),
            downloads: Arc::new(Mutex::new(Vec::new())),
            next_upload: Arc::new(AtomicU64::new(1)),
            min_part_size,
        }
    }

    pub async fn fake_add_object(&self, key: &str, data: impl Into<Bytes>) {
        self.fake_add_object_with_metadata(key, data, HashMap::new())
            .await;
    }

    pub async fn fake_add_object_with_metadata(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        metadata: HashMap<String, String>,
    ) {
        let mut objects = self.data.lock().await;
        objects.insert(
            key.to_string(),
            FakeObject {
                data: data.into(),
                metadata,
                content_type: None,
            },
        );
    }

    /// Simulate a failure for a specific object
    /// After calling this, get_object and head_object will return errors for this key
    pub async fn fake_fail_object(&self, key: &str) {
        self.fail_objects.lock().await.insert(key.to_string());
    }

    /// Make every `upload_part_copy` that reads `source_key` fail
    pub async fn fake_fail_copy(&self, source_key: &str) {
        self.fail_copies.lock().await.insert(source_key.to_string());
    }

    /// Make `put_object` fail for `key`
    pub async fn fake_fail_put(&self, key: &str) {
        self.fail_puts.lock().await.insert(key.to_string());
    }

    /// Clear every simulated failure registered for `key`
    pub async fn fake_heal(&self, key: &str) {
        self.fail_objects.lock().await.remove(key);
        self.fail_copies.lock().await.remove(key);
        self.fail_puts.lock().await.remove(key);
    }

    pub async fn object(&self, key: &str) -> Option<Bytes> {
        self.data.lock().await.get(key).map(|o| o.data.clone())
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.data
            .lock()
            .await
            .get(key)
            .and_then(|o| o.content_type.clone())
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Upload ids that are still open (neither completed nor aborted)
    pub async fn open_uploads(&self) -> Vec<String> {
        self.uploads.lock().await.keys().cloned().collect()
    }

    pub async fn aborted_uploads(&self) -> Vec<String> {
        self.aborted.lock().await.clone()
    }

    pub async fn completed_uploads(&self) -> Vec<String> {
        self.completed.lock().await.clone()
    }

    /// Keys read through `get_object`, in call order
    pub async fn downloaded_keys(&self) -> Vec<String> {
        self.downloads.lock().await.clone()
    }

    async fn check_failure(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_objects.lock().await.contains(key) {
            return Err(StorageError::ReadError(
                key.to_string(),
                "simulated failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FakeStorage {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectSummary>, StorageError> {
        let objects = self.data.lock().await;
        let mut listing: Vec<ObjectSummary> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectSummary::new(key.clone(), object.data.len() as u64))
            .collect();
        listing.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listing)
    }

    async fn head_object(&self, key: &str) -> Result<ObjectHead, StorageError> {
        self.check_failure(key).await?;
        let objects = self.data.lock().await;
        match objects.get(key) {
            Some(object) => Ok(ObjectHead {
                size: object.data.len() as u64,
                metadata: object.metadata.clone(),
            }),
            None => Err(StorageError::ObjectNotFound(key.to_string())),
        }
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, StorageError> {
        self.check_failure(key).await?;
        self.downloads.lock().await.push(key.to_string());
        let objects = self.data.lock().await;
        match objects.get(key) {
            Some(object) => Ok(object.data.clone()),
            None => Err(StorageError::ObjectNotFound(key.to_string())),
        }
    }

    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        if self.fail_puts.lock().await.contains(key) {
            return Err(StorageError::WriteError(
                key.to_string(),
                "simulated failure".to_string(),
            ));
        }
        let mut objects = self.data.lock().await;
        objects.insert(
            key.to_string(),
            FakeObject {
                data,
                metadata: HashMap::new(),
                content_type: Some(content_type.to_string()),
            },
        );
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let upload_id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst));
        self.uploads.lock().await.insert(
            upload_id.clone(),
            FakeUpload {
                key: key.to_string(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part_copy(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source_key: &str,
    ) -> Result<CompletedSegment, StorageError> {
        if self.fail_copies.lock().await.contains(source_key) {
            return Err(StorageError::MultipartError {
                key: key.to_string(),
                upload_id: upload_id.to_string(),
                reason: format!("simulated copy failure for {}", source_key),
            });
        }

        let source = {
            let objects = self.data.lock().await;
            objects
                .get(source_key)
                .map(|o| o.data.clone())
                .ok_or_else(|| StorageError::ObjectNotFound(source_key.to_string()))?
        };

        let mut uploads = self.uploads.lock().await;
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::MultipartError {
                key: key.to_string(),
                upload_id: upload_id.to_string(),
                reason: "NoSuchUpload".to_string(),
            })?;
        let e_tag = format!("\"etag-{}-{}\"", upload_id, part_number);
        upload
            .parts
            .insert(part_number, (e_tag.clone(), source));

        Ok(CompletedSegment { part_number, e_tag })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedSegment],
    ) -> Result<(), StorageError> {
        let multipart_error = |reason: String| StorageError::MultipartError {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            reason,
        };

        let mut uploads = self.uploads.lock().await;
        let upload = uploads
            .get(upload_id)
            .ok_or_else(|| multipart_error("NoSuchUpload".to_string()))?;
        if upload.key != key {
            return Err(multipart_error("upload belongs to another key".to_string()));
        }

        let mut assembled = BytesMut::new();
        for (index, part) in parts.iter().enumerate() {
            let (e_tag, data) = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| multipart_error(format!("InvalidPart {}", part.part_number)))?;
            if e_tag != &part.e_tag {
                return Err(multipart_error(format!("InvalidPart {}", part.part_number)));
            }
            let is_last = index + 1 == parts.len();
            if !is_last && (data.len() as u64) < self.min_part_size {
                return Err(multipart_error(format!(
                    "EntityTooSmall: part {} is {} bytes",
                    part.part_number,
                    data.len()
                )));
            }
            assembled.extend_from_slice(data);
        }

        let content_type = upload.content_type.clone();
        uploads.remove(upload_id);
        drop(uploads);

        self.data.lock().await.insert(
            key.to_string(),
            FakeObject {
                data: assembled.freeze(),
                metadata: HashMap::new(),
                content_type: Some(content_type),
            },
        );
        self.completed.lock().await.push(upload_id.to_string());
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        let removed = self.uploads.lock().await.remove(upload_id);
        match removed {
            Some(_) => {
                self.aborted.lock().await.push(upload_id.to_string());
                Ok(())
            }
            None => Err(StorageError::MultipartError {
                key: key.to_string(),
                upload_id: upload_id.to_string(),
                reason: "NoSuchUpload".to_string(),
            }),
        }
    }

    async fn presign_get(&self, key: &str, validity: Duration) -> Result<String, StorageError> {
        Ok(format!(
            "https://fake-s3.local/{}?X-Amz-Expires={}",
            key,
            validity.as_secs()
        ))
    }
}

impl Default for FakeStorage {
    fn default() -> Self {
        Self::new()
    }
}
