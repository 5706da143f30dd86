use crate::config::S3Config;
use crate::s3::error::StorageError;
use crate::s3::storage::{CompletedSegment, ObjectHead, ObjectSummary, Storage};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::{config::Region, Client};
use bytes::Bytes;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, info, warn};

/// SigV4 presigned URLs cannot outlive one week
pub const MAX_PRESIGN_VALIDITY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Real S3 implementation of the Storage trait
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    /// Create a new S3Storage instance from configuration
    pub async fn new(config: &S3Config) -> Result<Self, StorageError> {
        info!(
            "Creating S3Storage with config: endpoint={:?}, region={}, bucket={}",
            config.endpoint, config.region, config.bucket
        );

        if config.bucket.is_empty() {
            return Err(StorageError::ConfigurationError(
                "s3.bucket must not be empty".to_string(),
            ));
        }

        let config_loader = aws_config::from_env().region(Region::new(config.region.clone()));

        // Static credentials win over the default provider chain
        let aws_config = if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "StaticCredentialsProvider",
            );

            config_loader.credentials_provider(credentials).load().await
        } else {
            config_loader.load().await
        };

        let mut client_builder = aws_sdk_s3::config::Builder::from(&aws_config)
            .force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint {
            info!("Setting custom endpoint: {}", endpoint);
            client_builder = client_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(client_builder.build());

        info!("Created S3 client for region {}", config.region);

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// `CopySource` must be URL-encoded; slashes stay as path separators
    fn copy_source(&self, source_key: &str) -> String {
        let encoded: Vec<String> = source_key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}", self.bucket, encoded.join("/"))
    }

    #[cfg(test)]
    pub async fn ensure_bucket_exists(&self) -> Result<(), StorageError> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                info!("Creating bucket '{}'", self.bucket);
                self.client
                    .create_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map_err(|e| {
                        StorageError::ConfigurationError(DisplayErrorContext(&e).to_string())
                    })?;
                Ok(())
            }
            Err(e) => Err(StorageError::ConfigurationError(
                DisplayErrorContext(&e).to_string(),
            )),
        }
    }

    #[cfg(test)]
    pub async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(key, e, StorageError::WriteError))?;
        Ok(())
    }
}

/// Map an SDK failure onto a typed error using the service error code
fn classify<E, R>(
    key: &str,
    err: SdkError<E, R>,
    otherwise: fn(String, String) -> StorageError,
) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err.code() {
        Some("NoSuchKey") | Some("NotFound") => StorageError::ObjectNotFound(key.to_string()),
        Some("AccessDenied") | Some("Forbidden") => {
            StorageError::AccessDenied(key.to_string(), message)
        }
        _ => otherwise(key.to_string(), message),
    }
}

fn multipart_error<E, R>(key: &str, upload_id: &str, err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: Debug,
{
    StorageError::MultipartError {
        key: key.to_string(),
        upload_id: upload_id.to_string(),
        reason: DisplayErrorContext(&err).to_string(),
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectSummary>, StorageError> {
        debug!("Listing objects under prefix: {}", prefix);

        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| classify(prefix, e, StorageError::ListError))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    let size = object.size().unwrap_or(0).max(0) as u64;
                    objects.push(ObjectSummary::new(key, size));
                }
            }
        }

        debug!("Found {} objects under {}", objects.len(), prefix);
        Ok(objects)
    }

    async fn head_object(&self, key: &str) -> Result<ObjectHead, StorageError> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    StorageError::ObjectNotFound(key.to_string())
                } else {
                    classify(key, e, StorageError::ReadError)
                }
            })?;

        Ok(ObjectHead {
            size: response.content_length().unwrap_or(0).max(0) as u64,
            metadata: response.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, StorageError> {
        debug!("Fetching object from S3: {}", key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::ObjectNotFound(key.to_string())
                } else {
                    classify(key, e, StorageError::ReadError)
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::ReadError(key.to_string(), e.to_string()))?
            .into_bytes();

        debug!("Successfully fetched object from S3: {} ({} bytes)", key, data.len());
        Ok(data)
    }

    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        debug!("Uploading {} bytes to {}", data.len(), key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| classify(key, e, StorageError::WriteError))?;
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| classify(key, e, StorageError::WriteError))?;

        response
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| {
                StorageError::WriteError(key.to_string(), "response carried no upload id".into())
            })
    }

    async fn upload_part_copy(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source_key: &str,
    ) -> Result<CompletedSegment, StorageError> {
        let response = self
            .client
            .upload_part_copy()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .copy_source(self.copy_source(source_key))
            .send()
            .await
            .map_err(|e| multipart_error(key, upload_id, e))?;

        let e_tag = response
            .copy_part_result()
            .and_then(|result| result.e_tag())
            .ok_or_else(|| StorageError::MultipartError {
                key: key.to_string(),
                upload_id: upload_id.to_string(),
                reason: format!("part {} copy returned no ETag", part_number),
            })?;

        Ok(CompletedSegment {
            part_number,
            e_tag: e_tag.to_string(),
        })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedSegment],
    ) -> Result<(), StorageError> {
        let completed_parts = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.e_tag)
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| multipart_error(key, upload_id, e))?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| multipart_error(key, upload_id, e))?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, validity: Duration) -> Result<String, StorageError> {
        let validity = if validity > MAX_PRESIGN_VALIDITY {
            warn!(
                "Requested URL validity of {}s exceeds the SigV4 limit, clamping to {}s",
                validity.as_secs(),
                MAX_PRESIGN_VALIDITY.as_secs()
            );
            MAX_PRESIGN_VALIDITY
        } else {
            validity
        };

        let presigning = PresigningConfig::expires_in(validity)
            .map_err(|e| StorageError::PresignError(key.to_string(), e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::PresignError(key.to_string(), e.to_string()))?;

        Ok(request.uri().to_string())
    }
}
