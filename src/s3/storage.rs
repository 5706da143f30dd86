use crate::s3::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One entry of a bucket listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

impl ObjectSummary {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

/// Metadata returned by a HEAD request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    /// User metadata attached at upload time (`x-amz-meta-*`)
    pub metadata: HashMap<String, String>,
}

/// A segment accepted by the store as part of a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSegment {
    pub part_number: i32,
    pub e_tag: String,
}

/// Storage trait defining the interface to S3-compatible object storage
///
/// Every operation returns a typed [`StorageError`]; callers decide whether
/// a failure is retryable.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// List every object whose key starts with `prefix`
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectSummary>, StorageError>;

    /// Fetch size and user metadata without reading the body
    async fn head_object(&self, key: &str) -> Result<ObjectHead, StorageError>;

    /// Get an object by its key
    async fn get_object(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Write an object in a single request
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Open a multipart upload and return its upload id
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError>;

    /// Copy an existing object into the upload as part `part_number`
    ///
    /// The copy happens inside the store; no bytes pass through the caller.
    async fn upload_part_copy(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source_key: &str,
    ) -> Result<CompletedSegment, StorageError>;

    /// Complete an upload from the given parts, in the given order
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedSegment],
    ) -> Result<(), StorageError>;

    /// Abort an upload and discard any copied parts
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str)
        -> Result<(), StorageError>;

    /// Generate a time-bounded GET URL for `key`
    async fn presign_get(&self, key: &str, validity: Duration) -> Result<String, StorageError>;
}

/// Implementation of Storage trait for Arc<T> where T implements Storage
///
/// This allows sharing storage instances across components efficiently.
#[async_trait]
impl<T: Storage + ?Sized> Storage for Arc<T> {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectSummary>, StorageError> {
        (**self).list_objects(prefix).await
    }

    async fn head_object(&self, key: &str) -> Result<ObjectHead, StorageError> {
        (**self).head_object(key).await
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, StorageError> {
        (**self).get_object(key).await
    }

    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        (**self).put_object(key, data, content_type).await
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        (**self).create_multipart_upload(key, content_type).await
    }

    async fn upload_part_copy(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source_key: &str,
    ) -> Result<CompletedSegment, StorageError> {
        (**self)
            .upload_part_copy(key, upload_id, part_number, source_key)
            .await
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedSegment],
    ) -> Result<(), StorageError> {
        (**self)
            .complete_multipart_upload(key, upload_id, parts)
            .await
    }

    async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        (**self).abort_multipart_upload(key, upload_id).await
    }

    async fn presign_get(&self, key: &str, validity: Duration) -> Result<String, StorageError> {
        (**self).presign_get(key, validity).await
    }
}
