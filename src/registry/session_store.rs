use crate::registry::error::RegistryError;
use crate::registry::models::{ChunkSession, Completion};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// SessionStore trait defining the interface for chunk-session status records
///
/// Terminal records are never rewritten by `upsert_from_manifest`,
/// `insert_if_absent` or `record_progress`; only `restart` leaves a
/// terminal state, and only from `failed`.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn get_session(
        &self,
        booking_id: &str,
        session_id: &str,
    ) -> Result<Option<ChunkSession>, RegistryError>;

    /// Insert the session, or refresh its manifest-derived fields when it
    /// is still pending; progress counters are kept. Returns the stored record.
    async fn upsert_from_manifest(
        &self,
        session: ChunkSession,
    ) -> Result<ChunkSession, RegistryError>;

    /// Insert the session only when no record exists. Returns the stored record.
    async fn insert_if_absent(&self, session: ChunkSession)
        -> Result<ChunkSession, RegistryError>;

    /// Persist the latest chunk count and touch `last_updated`
    async fn record_progress(
        &self,
        booking_id: &str,
        session_id: &str,
        chunks_uploaded: u32,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError>;

    /// Take the merge claim. Succeeds only while the session is pending and
    /// holds no claim younger than `lease`.
    async fn try_claim(
        &self,
        booking_id: &str,
        session_id: &str,
        token: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, RegistryError>;

    /// pending -> completed, only for the holder of `token`
    async fn mark_completed(
        &self,
        booking_id: &str,
        session_id: &str,
        token: &str,
        completion: &Completion,
    ) -> Result<bool, RegistryError>;

    /// pending -> failed, only for the holder of `token`
    async fn mark_failed(
        &self,
        booking_id: &str,
        session_id: &str,
        token: &str,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RegistryError>;

    /// failed -> pending, for an explicit operator restart
    async fn restart(
        &self,
        booking_id: &str,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RegistryError>;

    /// Pending sessions whose `last_updated` is older than `cutoff`, oldest first
    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ChunkSession>, RegistryError>;

    /// Pending sessions of one booking, oldest first
    async fn find_pending_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Vec<ChunkSession>, RegistryError>;

    async fn find_by_final_resource(
        &self,
        booking_id: &str,
        resource_id: &str,
    ) -> Result<Option<ChunkSession>, RegistryError>;
}

/// Implementation of SessionStore trait for Arc<T> where T implements SessionStore
#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn get_session(
        &self,
        booking_id: &str,
        session_id: &str,
    ) -> Result<Option<ChunkSession>, RegistryError> {
        (**self).get_session(booking_id, session_id).await
    }

    async fn upsert_from_manifest(
        &self,
        session: ChunkSession,
    ) -> Result<ChunkSession, RegistryError> {
        (**self).upsert_from_manifest(session).await
    }

    async fn insert_if_absent(
        &self,
        session: ChunkSession,
    ) -> Result<ChunkSession, RegistryError> {
        (**self).insert_if_absent(session).await
    }

    async fn record_progress(
        &self,
        booking_id: &str,
        session_id: &str,
        chunks_uploaded: u32,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        (**self)
            .record_progress(booking_id, session_id, chunks_uploaded, at)
            .await
    }

    async fn try_claim(
        &self,
        booking_id: &str,
        session_id: &str,
        token: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, RegistryError> {
        (**self)
            .try_claim(booking_id, session_id, token, now, lease)
            .await
    }

    async fn mark_completed(
        &self,
        booking_id: &str,
        session_id: &str,
        token: &str,
        completion: &Completion,
    ) -> Result<bool, RegistryError> {
        (**self)
            .mark_completed(booking_id, session_id, token, completion)
            .await
    }

    async fn mark_failed(
        &self,
        booking_id: &str,
        session_id: &str,
        token: &str,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        (**self)
            .mark_failed(booking_id, session_id, token, error_message, at)
            .await
    }

    async fn restart(
        &self,
        booking_id: &str,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        (**self).restart(booking_id, session_id, at).await
    }

    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ChunkSession>, RegistryError> {
        (**self).find_stale_pending(cutoff).await
    }

    async fn find_pending_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Vec<ChunkSession>, RegistryError> {
        (**self).find_pending_for_booking(booking_id).await
    }

    async fn find_by_final_resource(
        &self,
        booking_id: &str,
        resource_id: &str,
    ) -> Result<Option<ChunkSession>, RegistryError> {
        (**self)
            .find_by_final_resource(booking_id, resource_id)
            .await
    }
}
