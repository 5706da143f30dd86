use crate::registry::error::RegistryError;
use crate::registry::models::{ChunkSession, Completion, SessionStatus};
use crate::registry::session_store::SessionStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type SessionKey = (String, String);

/// A fake in-memory implementation of the SessionStore trait for testing
#[derive(Clone, Default)]
pub struct FakeSessionStore {
    sessions: Arc<RwLock<HashMap<SessionKey, ChunkSession>>>,
}

impl FakeSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(booking_id: &str, session_id: &str) -> SessionKey {
        (
            booking_id.to_string(),
            ChunkSession::chunk_id_for(session_id),
        )
    }

    /// Overwrite a record verbatim, bypassing every transition rule
    pub fn fake_put_session(&self, session: ChunkSession) {
        let mut sessions = self.sessions.write().unwrap();
        sessions.insert((session.booking_id.clone(), session.chunk_id.clone()), session);
    }

    pub fn fake_all_sessions(&self) -> Vec<ChunkSession> {
        let sessions = self.sessions.read().unwrap();
        sessions.values().cloned().collect()
    }

    fn sorted_by_last_updated(mut sessions: Vec<ChunkSession>) -> Vec<ChunkSession> {
        sessions.sort_by_key(|s| s.last_updated);
        sessions
    }
}

#[async_trait]
impl SessionStore for FakeSessionStore {
    async fn get_session(
        &self,
        booking_id: &str,
        session_id: &str,
    ) -> Result<Option<ChunkSession>, RegistryError> {
        let sessions = self.sessions.read().unwrap();
        Ok(sessions.get(&Self::key(booking_id, session_id)).cloned())
    }

    async fn upsert_from_manifest(
        &self,
        session: ChunkSession,
    ) -> Result<ChunkSession, RegistryError> {
        let mut sessions = self.sessions.write().unwrap();
        let key = Self::key(&session.booking_id, &session.session_id);
        let stored = match sessions.get_mut(&key) {
            Some(existing) if existing.status == SessionStatus::Pending => {
                existing.original_file_name = session.original_file_name;
                existing.total_chunks = session.total_chunks;
                if session.checksum.is_some() {
                    existing.checksum = session.checksum;
                }
                if session.manifest_key.is_some() {
                    existing.manifest_key = session.manifest_key;
                }
                if session.timestamp.is_some() {
                    existing.timestamp = session.timestamp;
                }
                existing.clone()
            }
            Some(existing) => existing.clone(),
            None => {
                sessions.insert(key, session.clone());
                session
            }
        };
        Ok(stored)
    }

    async fn insert_if_absent(
        &self,
        session: ChunkSession,
    ) -> Result<ChunkSession, RegistryError> {
        let mut sessions = self.sessions.write().unwrap();
        let key = Self::key(&session.booking_id, &session.session_id);
        Ok(sessions.entry(key).or_insert(session).clone())
    }

    async fn record_progress(
        &self,
        booking_id: &str,
        session_id: &str,
        chunks_uploaded: u32,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().unwrap();
        match sessions.get_mut(&Self::key(booking_id, session_id)) {
            Some(session) if session.status.is_terminal() => Ok(()),
            Some(session) => {
                session.chunks_uploaded = chunks_uploaded;
                session.last_updated = at;
                Ok(())
            }
            None => Err(RegistryError::SessionNotFound(session_id.to_string())),
        }
    }

    async fn try_claim(
        &self,
        booking_id: &str,
        session_id: &str,
        token: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, RegistryError> {
        let mut sessions = self.sessions.write().unwrap();
        match sessions.get_mut(&Self::key(booking_id, session_id)) {
            Some(session) if session.is_claimable(now, lease) => {
                session.claim_token = Some(token.to_string());
                session.claimed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_completed(
        &self,
        booking_id: &str,
        session_id: &str,
        token: &str,
        completion: &Completion,
    ) -> Result<bool, RegistryError> {
        let mut sessions = self.sessions.write().unwrap();
        match sessions.get_mut(&Self::key(booking_id, session_id)) {
            Some(session)
                if session.status == SessionStatus::Pending
                    && session.claim_token.as_deref() == Some(token) =>
            {
                session.status = SessionStatus::Completed;
                session.final_resource_id = Some(completion.final_resource_id.clone());
                session.reassembled_url = Some(completion.reassembled_url.clone());
                session.completed_at = Some(completion.completed_at);
                session.last_updated = completion.completed_at;
                session.claim_token = None;
                session.claimed_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(
        &self,
        booking_id: &str,
        session_id: &str,
        token: &str,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        let mut sessions = self.sessions.write().unwrap();
        match sessions.get_mut(&Self::key(booking_id, session_id)) {
            Some(session)
                if session.status == SessionStatus::Pending
                    && session.claim_token.as_deref() == Some(token) =>
            {
                session.status = SessionStatus::Failed;
                session.error_message = Some(error_message.to_string());
                session.failed_at = Some(at);
                session.last_updated = at;
                session.claim_token = None;
                session.claimed_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn restart(
        &self,
        booking_id: &str,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        let mut sessions = self.sessions.write().unwrap();
        match sessions.get_mut(&Self::key(booking_id, session_id)) {
            Some(session) if session.status == SessionStatus::Failed => {
                session.status = SessionStatus::Pending;
                session.error_message = None;
                session.failed_at = None;
                session.last_updated = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ChunkSession>, RegistryError> {
        let sessions = self.sessions.read().unwrap();
        Ok(Self::sorted_by_last_updated(
            sessions
                .values()
                .filter(|s| s.status == SessionStatus::Pending && s.last_updated < cutoff)
                .cloned()
                .collect(),
        ))
    }

    async fn find_pending_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Vec<ChunkSession>, RegistryError> {
        let sessions = self.sessions.read().unwrap();
        Ok(Self::sorted_by_last_updated(
            sessions
                .values()
                .filter(|s| s.status == SessionStatus::Pending && s.booking_id == booking_id)
                .cloned()
                .collect(),
        ))
    }

    async fn find_by_final_resource(
        &self,
        booking_id: &str,
        resource_id: &str,
    ) -> Result<Option<ChunkSession>, RegistryError> {
        let sessions = self.sessions.read().unwrap();
        Ok(sessions
            .values()
            .find(|s| {
                s.booking_id == booking_id && s.final_resource_id.as_deref() == Some(resource_id)
            })
            .cloned())
    }
}
