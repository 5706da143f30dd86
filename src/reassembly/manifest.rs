use crate::reassembly::error::ReassemblyError;
use crate::registry::{ChunkSession, SessionStore};
use crate::s3::Storage;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const MANIFEST_SUFFIX: &str = "_manifest.json";

/// Uploader-written description of one chunked upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub session_id: String,
    pub original_file_name: String,
    pub total_chunks: u32,
    #[serde(default)]
    pub checksum: Option<String>,
    /// Upload start, epoch milliseconds
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl Manifest {
    pub fn parse(key: &str, data: &[u8]) -> Result<Self, ReassemblyError> {
        let invalid = |reason: String| ReassemblyError::ManifestInvalid {
            key: key.to_string(),
            reason,
        };

        let manifest: Manifest =
            serde_json::from_slice(data).map_err(|e| invalid(e.to_string()))?;
        if manifest.session_id.trim().is_empty() {
            return Err(invalid("sessionId is empty".to_string()));
        }
        if manifest.original_file_name.trim().is_empty() {
            return Err(invalid("originalFileName is empty".to_string()));
        }
        Ok(manifest)
    }

    /// The pending registry record this manifest describes
    pub fn to_session(
        &self,
        booking_id: &str,
        manifest_key: &str,
        now: DateTime<Utc>,
    ) -> ChunkSession {
        let mut session = ChunkSession::pending(
            booking_id,
            &self.session_id,
            &self.original_file_name,
            self.total_chunks,
            now,
        );
        session.checksum = self.checksum.clone();
        session.manifest_key = Some(manifest_key.to_string());
        session.timestamp = self.timestamp;
        session
    }
}

pub fn is_manifest_key(key: &str) -> bool {
    key.ends_with(MANIFEST_SUFFIX)
}

/// Bookings are the top-level folder: `{bookingId}/...`
pub fn booking_id_from_key(key: &str) -> Option<&str> {
    match key.split_once('/') {
        Some((booking_id, rest)) if !booking_id.is_empty() && !rest.is_empty() => Some(booking_id),
        _ => None,
    }
}

/// `b1/1700000000000_manifest.json` names session `1700000000000`;
/// in `b1/s1/scan_manifest.json` the folder under the booking is the session
pub fn session_id_from_manifest_key(key: &str) -> Option<String> {
    let stem = key.rsplit('/').next()?.strip_suffix(MANIFEST_SUFFIX)?;
    let segments: Vec<&str> = key.split('/').collect();
    let session_id = match segments.as_slice() {
        [_, folder, _, ..] if !folder.is_empty() => *folder,
        _ => stem,
    };
    (!session_id.is_empty()).then(|| session_id.to_string())
}

/// Fetches manifests, remembers the good ones and registers their sessions
pub struct ManifestResolver<S: Storage, R: SessionStore> {
    storage: Arc<S>,
    sessions: Arc<R>,
    cache: Mutex<LruCache<String, Manifest>>,
}

impl<S: Storage, R: SessionStore> ManifestResolver<S, R> {
    pub fn new(storage: Arc<S>, sessions: Arc<R>, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            storage,
            sessions,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Fetch and parse a manifest
    pub async fn load(&self, key: &str) -> Result<Manifest, ReassemblyError> {
        if let Some(manifest) = self.cache.lock().await.get(key) {
            debug!("Manifest cache hit for {}", key);
            return Ok(manifest.clone());
        }

        let data = self
            .storage
            .get_object(key)
            .await
            .map_err(|e| ReassemblyError::ManifestInvalid {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        let manifest = Manifest::parse(key, &data)?;

        self.cache
            .lock()
            .await
            .put(key.to_string(), manifest.clone());
        Ok(manifest)
    }

    /// Like [`load`](Self::load), but a missing or malformed manifest is
    /// logged and reported as `None`
    pub async fn resolve(&self, key: &str) -> Option<Manifest> {
        match self.load(key).await {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!("{}; falling back to chunk discovery", e);
                None
            }
        }
    }

    /// Resolve the manifest and upsert its session as pending
    ///
    /// A session that already reached a terminal state is returned as stored.
    pub async fn resolve_and_register(
        &self,
        booking_id: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<(Manifest, ChunkSession)>, ReassemblyError> {
        let Some(manifest) = self.resolve(key).await else {
            return Ok(None);
        };

        let session = self
            .sessions
            .upsert_from_manifest(manifest.to_session(booking_id, key, now))
            .await?;
        info!(
            "Registered chunk session {} for booking {} ({} chunks expected)",
            session.session_id, booking_id, manifest.total_chunks
        );
        Ok(Some((manifest, session)))
    }

    /// Look for the session's manifest next to its chunks
    pub async fn find_manifest_key(
        &self,
        booking_id: &str,
        session_id: &str,
    ) -> Result<Option<String>, ReassemblyError> {
        let prefix = format!("{booking_id}/{session_id}");
        let listing = self.storage.list_objects(&prefix).await?;
        Ok(listing
            .into_iter()
            .map(|object| object.key)
            .filter(|key| is_manifest_key(key))
            .max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FakeSessionStore, SessionStatus};
    use crate::s3::FakeStorage;

    const MANIFEST: &str = r#"{"sessionId":"s1","originalFileName":"scan.tif","totalChunks":2,"timestamp":1700000000000}"#;

    fn resolver() -> (
        Arc<FakeStorage>,
        Arc<FakeSessionStore>,
        ManifestResolver<FakeStorage, FakeSessionStore>,
    ) {
        let storage = Arc::new(FakeStorage::new());
        let sessions = Arc::new(FakeSessionStore::new());
        let resolver = ManifestResolver::new(storage.clone(), sessions.clone(), 8);
        (storage, sessions, resolver)
    }

    #[test]
    fn manifest_keys_name_their_booking_and_session() {
        assert!(is_manifest_key("b1/s1_manifest.json"));
        assert!(!is_manifest_key("b1/s1_manifest.json.part0"));
        assert_eq!(booking_id_from_key("b1/s1_manifest.json"), Some("b1"));
        assert_eq!(booking_id_from_key("s1_manifest.json"), None);
        assert_eq!(
            session_id_from_manifest_key("b1/1700000000000_manifest.json"),
            Some("1700000000000".to_string())
        );
        assert_eq!(
            session_id_from_manifest_key("b1/s1/scan_manifest.json"),
            Some("s1".to_string())
        );
        assert_eq!(session_id_from_manifest_key("b1/s1/scan.tif"), None);
        assert_eq!(session_id_from_manifest_key("b1/_manifest.json"), None);
    }

    #[test]
    fn manifest_without_session_is_invalid() {
        let result = Manifest::parse(
            "k",
            br#"{"sessionId":"","originalFileName":"a.tif","totalChunks":1}"#,
        );
        assert!(matches!(result, Err(ReassemblyError::ManifestInvalid { .. })));
        assert!(Manifest::parse("k", b"not json").is_err());
        assert!(Manifest::parse(
            "k",
            br#"{"sessionId":"s","originalFileName":"a.tif","totalChunks":-1}"#
        )
        .is_err());
    }

    #[tokio::test]
    async fn when_manifest_resolves_then_session_is_registered_pending() {
        let (storage, sessions, resolver) = resolver();
        storage.fake_add_object("b1/s1_manifest.json", MANIFEST).await;

        let (manifest, session) = resolver
            .resolve_and_register("b1", "b1/s1_manifest.json", Utc::now())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(manifest.total_chunks, 2);
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.manifest_key.as_deref(), Some("b1/s1_manifest.json"));
        assert_eq!(session.timestamp, Some(1_700_000_000_000));
        assert!(sessions.get_session("b1", "s1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn when_manifest_is_missing_or_corrupt_then_nothing_is_registered() {
        let (storage, sessions, resolver) = resolver();
        storage.fake_add_object("b1/bad_manifest.json", "{").await;

        assert!(resolver
            .resolve_and_register("b1", "b1/bad_manifest.json", Utc::now())
            .await
            .unwrap()
            .is_none());
        assert!(resolver
            .resolve_and_register("b1", "b1/missing_manifest.json", Utc::now())
            .await
            .unwrap()
            .is_none());
        assert!(sessions.fake_all_sessions().is_empty());
    }

    #[tokio::test]
    async fn when_manifest_was_parsed_then_later_loads_use_the_cache() {
        let (storage, _, resolver) = resolver();
        storage.fake_add_object("b1/s1_manifest.json", MANIFEST).await;

        resolver.load("b1/s1_manifest.json").await.unwrap();
        storage.fake_fail_object("b1/s1_manifest.json").await;

        assert!(resolver.load("b1/s1_manifest.json").await.is_ok());
    }

    #[tokio::test]
    async fn when_manifest_is_listed_beside_chunks_then_the_last_key_is_used() {
        let (storage, _, resolver) = resolver();
        storage.fake_add_object("b1/s1/a_manifest.json", MANIFEST).await;
        storage.fake_add_object("b1/s1/b_manifest.json", MANIFEST).await;
        storage.fake_add_object("b1/s1/scan.tif.part0", "x").await;

        let key = resolver.find_manifest_key("b1", "s1").await.unwrap();
        assert_eq!(key.as_deref(), Some("b1/s1/b_manifest.json"));
        assert_eq!(resolver.find_manifest_key("b1", "s2").await.unwrap(), None);
    }
}
