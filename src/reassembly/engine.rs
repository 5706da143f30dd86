use crate::reassembly::error::ReassemblyError;
use crate::s3::{CompletedSegment, Storage, StorageError};
use bytes::BytesMut;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// S3 accepts at most this many parts per multipart upload
pub const MAX_SEGMENTS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Server-side part copies into a multipart upload
    SegmentedCopy,
    /// Download, concatenate in memory, upload once
    Direct,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::SegmentedCopy => f.write_str("segmented copy"),
            MergeStrategy::Direct => f.write_str("direct download"),
        }
    }
}

/// Segmented copy needs every part but the last to reach `min_segment_size`
pub fn select_strategy(sizes: &[u64], min_segment_size: u64) -> MergeStrategy {
    if sizes.len() > MAX_SEGMENTS {
        return MergeStrategy::Direct;
    }
    let leading = &sizes[..sizes.len().saturating_sub(1)];
    if leading.iter().any(|size| *size < min_segment_size) {
        MergeStrategy::Direct
    } else {
        MergeStrategy::SegmentedCopy
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub output_key: String,
    pub strategy: MergeStrategy,
    pub chunk_count: usize,
    pub total_bytes: u64,
}

/// A multipart upload that is aborted unless it was completed
struct OpenUpload<S: Storage> {
    storage: Arc<S>,
    key: String,
    upload_id: String,
    open: bool,
}

impl<S: Storage> OpenUpload<S> {
    fn new(storage: Arc<S>, key: &str, upload_id: String) -> Self {
        Self {
            storage,
            key: key.to_string(),
            upload_id,
            open: true,
        }
    }

    fn completed(mut self) {
        self.open = false;
    }

    async fn abort(mut self) {
        self.open = false;
        match self
            .storage
            .abort_multipart_upload(&self.key, &self.upload_id)
            .await
        {
            Ok(()) => info!("Aborted multipart upload {} for {}", self.upload_id, self.key),
            Err(e) => error!(
                "Failed to abort multipart upload {} for {}: {}",
                self.upload_id, self.key, e
            ),
        }
    }
}

impl<S: Storage> Drop for OpenUpload<S> {
    // Reached only when the merge future is dropped mid-copy
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let storage = Arc::clone(&self.storage);
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Merge into {} interrupted, aborting upload {}", key, upload_id);
                handle.spawn(async move {
                    if let Err(e) = storage.abort_multipart_upload(&key, &upload_id).await {
                        error!("Failed to abort multipart upload {} for {}: {}", upload_id, key, e);
                    }
                });
            }
            Err(_) => error!(
                "Multipart upload {} for {} left open: no runtime to abort it",
                upload_id, key
            ),
        }
    }
}

/// Merges ordered chunk objects into one destination object
pub struct ReassemblyEngine<S: Storage> {
    storage: Arc<S>,
    min_segment_size: u64,
    max_direct_merge_bytes: u64,
    content_type: String,
}

impl<S: Storage> ReassemblyEngine<S> {
    pub fn new(
        storage: Arc<S>,
        min_segment_size: u64,
        max_direct_merge_bytes: u64,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            min_segment_size,
            max_direct_merge_bytes,
            content_type: content_type.into(),
        }
    }

    /// Merge `ordered_keys`, already in part order, into `output_key`
    pub async fn merge(
        &self,
        ordered_keys: &[String],
        output_key: &str,
    ) -> Result<MergeOutcome, ReassemblyError> {
        if ordered_keys.is_empty() {
            return Err(ReassemblyError::MergeFailed("no chunks to merge".to_string()));
        }

        let sizes = self.chunk_sizes(ordered_keys).await?;
        let total_bytes: u64 = sizes.iter().sum();
        let strategy = select_strategy(&sizes, self.min_segment_size);
        info!(
            "Merging {} chunks ({} bytes) into {} by {}",
            ordered_keys.len(),
            total_bytes,
            output_key,
            strategy
        );

        match strategy {
            MergeStrategy::SegmentedCopy => self.segmented_copy(ordered_keys, output_key).await?,
            MergeStrategy::Direct => self.direct(ordered_keys, total_bytes, output_key).await?,
        }

        Ok(MergeOutcome {
            output_key: output_key.to_string(),
            strategy,
            chunk_count: ordered_keys.len(),
            total_bytes,
        })
    }

    async fn chunk_sizes(&self, keys: &[String]) -> Result<Vec<u64>, ReassemblyError> {
        let mut sizes = Vec::with_capacity(keys.len());
        for key in keys {
            let head = self.storage.head_object(key).await.map_err(|e| {
                ReassemblyError::MergeFailed(format!("Could not access chunk {key}: {e}"))
            })?;
            debug!("Chunk {} is {} bytes", key, head.size);
            sizes.push(head.size);
        }
        Ok(sizes)
    }

    async fn segmented_copy(
        &self,
        keys: &[String],
        output_key: &str,
    ) -> Result<(), ReassemblyError> {
        let upload_id = self
            .storage
            .create_multipart_upload(output_key, &self.content_type)
            .await
            .map_err(|e| ReassemblyError::MergeFailed(e.to_string()))?;
        let upload = OpenUpload::new(Arc::clone(&self.storage), output_key, upload_id);

        let copied = self.copy_segments(keys, output_key, &upload.upload_id).await;
        match copied {
            Ok(()) => {
                upload.completed();
                Ok(())
            }
            Err(e) => {
                upload.abort().await;
                Err(ReassemblyError::MergeFailed(e.to_string()))
            }
        }
    }

    async fn copy_segments(
        &self,
        keys: &[String],
        output_key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        let mut segments: Vec<CompletedSegment> = Vec::with_capacity(keys.len());
        // Part numbers follow list position, whatever order the copies finish in
        for (part_number, key) in (1..).zip(keys) {
            debug!("Copying part {} from {}", part_number, key);
            let segment = self
                .storage
                .upload_part_copy(output_key, upload_id, part_number, key)
                .await?;
            segments.push(segment);
        }
        self.storage
            .complete_multipart_upload(output_key, upload_id, &segments)
            .await
    }

    async fn direct(
        &self,
        keys: &[String],
        total_bytes: u64,
        output_key: &str,
    ) -> Result<(), ReassemblyError> {
        if total_bytes > self.max_direct_merge_bytes {
            return Err(ReassemblyError::MergeFailed(format!(
                "{} bytes exceed the direct merge limit of {} bytes",
                total_bytes, self.max_direct_merge_bytes
            )));
        }

        let mut combined = BytesMut::with_capacity(usize::try_from(total_bytes).unwrap_or(0));
        for key in keys {
            debug!("Downloading chunk {}", key);
            let data = self
                .storage
                .get_object(key)
                .await
                .map_err(|e| ReassemblyError::MergeFailed(e.to_string()))?;
            combined.extend_from_slice(&data);
        }

        info!("Uploading combined file of {} bytes to {}", combined.len(), output_key);
        self.storage
            .put_object(output_key, combined.freeze(), &self.content_type)
            .await
            .map_err(|e| ReassemblyError::MergeFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::FakeStorage;

    const MIB: u64 = 1024 * 1024;

    fn engine(storage: Arc<FakeStorage>, max_direct: u64) -> ReassemblyEngine<FakeStorage> {
        ReassemblyEngine::new(storage, 4, max_direct, "image/tiff")
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn small_leading_chunks_select_the_direct_path() {
        assert_eq!(
            select_strategy(&[3 * MIB, 3 * MIB, MIB], 5 * MIB),
            MergeStrategy::Direct
        );
        assert_eq!(
            select_strategy(&[6 * MIB, 6 * MIB, MIB], 5 * MIB),
            MergeStrategy::SegmentedCopy
        );
        assert_eq!(select_strategy(&[MIB], 5 * MIB), MergeStrategy::SegmentedCopy);
        assert_eq!(
            select_strategy(&vec![6 * MIB; MAX_SEGMENTS + 1], 5 * MIB),
            MergeStrategy::Direct
        );
    }

    #[tokio::test]
    async fn segmented_copy_concatenates_in_the_given_order() {
        let storage = Arc::new(FakeStorage::with_min_part_size(4));
        storage.fake_add_object("b1/f.part0", "aaaa").await;
        storage.fake_add_object("b1/f.part1", "bbbb").await;
        storage.fake_add_object("b1/f.part2", "cc").await;

        let outcome = engine(storage.clone(), 1024)
            .merge(&keys(&["b1/f.part0", "b1/f.part1", "b1/f.part2"]), "b1/out.tif")
            .await
            .unwrap();

        assert_eq!(outcome.strategy, MergeStrategy::SegmentedCopy);
        assert_eq!(outcome.total_bytes, 10);
        assert_eq!(
            storage.object("b1/out.tif").await.unwrap(),
            bytes::Bytes::from_static(b"aaaabbbbcc")
        );
        assert_eq!(storage.content_type("b1/out.tif").await.as_deref(), Some("image/tiff"));
        assert!(storage.downloaded_keys().await.is_empty());
        assert!(storage.open_uploads().await.is_empty());
    }

    #[tokio::test]
    async fn direct_path_downloads_and_uploads_once() {
        let storage = Arc::new(FakeStorage::with_min_part_size(4));
        storage.fake_add_object("b1/f.part0", "a").await;
        storage.fake_add_object("b1/f.part1", "bb").await;

        let outcome = engine(storage.clone(), 1024)
            .merge(&keys(&["b1/f.part0", "b1/f.part1"]), "b1/out.tif")
            .await
            .unwrap();

        assert_eq!(outcome.strategy, MergeStrategy::Direct);
        assert_eq!(
            storage.object("b1/out.tif").await.unwrap(),
            bytes::Bytes::from_static(b"abb")
        );
        assert_eq!(storage.downloaded_keys().await, keys(&["b1/f.part0", "b1/f.part1"]));
        assert!(storage.completed_uploads().await.is_empty());
    }

    #[tokio::test]
    async fn failed_part_copy_aborts_the_upload() {
        let storage = Arc::new(FakeStorage::with_min_part_size(4));
        storage.fake_add_object("b1/f.part0", "aaaa").await;
        storage.fake_add_object("b1/f.part1", "bbbb").await;
        storage.fake_fail_copy("b1/f.part1").await;

        let result = engine(storage.clone(), 1024)
            .merge(&keys(&["b1/f.part0", "b1/f.part1"]), "b1/out.tif")
            .await;

        assert!(matches!(result, Err(ReassemblyError::MergeFailed(_))));
        assert_eq!(storage.aborted_uploads().await.len(), 1);
        assert!(storage.open_uploads().await.is_empty());
        assert!(storage.object("b1/out.tif").await.is_none());
    }

    #[tokio::test]
    async fn rejected_completion_aborts_the_upload() {
        // The store enforces a larger minimum than the engine assumed
        let storage = Arc::new(FakeStorage::with_min_part_size(1024));
        storage.fake_add_object("b1/f.part0", "aaaa").await;
        storage.fake_add_object("b1/f.part1", "bbbb").await;

        let result = engine(storage.clone(), 1024)
            .merge(&keys(&["b1/f.part0", "b1/f.part1"]), "b1/out.tif")
            .await;

        assert!(matches!(result, Err(ReassemblyError::MergeFailed(_))));
        assert_eq!(storage.aborted_uploads().await.len(), 1);
        assert!(storage.open_uploads().await.is_empty());
    }

    #[tokio::test]
    async fn direct_merge_above_the_memory_limit_is_refused_before_download() {
        let storage = Arc::new(FakeStorage::with_min_part_size(4));
        storage.fake_add_object("b1/f.part0", "a").await;
        storage.fake_add_object("b1/f.part1", "bb").await;

        let result = engine(storage.clone(), 2)
            .merge(&keys(&["b1/f.part0", "b1/f.part1"]), "b1/out.tif")
            .await;

        assert!(matches!(result, Err(ReassemblyError::MergeFailed(_))));
        assert!(storage.downloaded_keys().await.is_empty());
    }

    #[tokio::test]
    async fn unreadable_chunk_fails_before_any_upload_opens() {
        let storage = Arc::new(FakeStorage::with_min_part_size(4));
        storage.fake_add_object("b1/f.part0", "aaaa").await;
        storage.fake_fail_object("b1/f.part0").await;

        let result = engine(storage.clone(), 1024)
            .merge(&keys(&["b1/f.part0"]), "b1/out.tif")
            .await;

        assert!(matches!(result, Err(ReassemblyError::MergeFailed(_))));
        assert!(storage.open_uploads().await.is_empty());
        assert!(storage.aborted_uploads().await.is_empty());
    }
}
