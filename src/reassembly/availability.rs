use crate::reassembly::ordering::order_chunks;
use crate::registry::{RegistryError, SessionStore};
use crate::s3::Storage;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// Every expected chunk is listed and the first and last are readable
    Ready,
    NotReady { found: usize, expected: u32 },
}

impl Availability {
    pub fn is_ready(&self) -> bool {
        matches!(self, Availability::Ready)
    }
}

pub struct AvailabilityChecker<S: Storage, R: SessionStore> {
    storage: Arc<S>,
    sessions: Arc<R>,
}

impl<S: Storage, R: SessionStore> AvailabilityChecker<S, R> {
    pub fn new(storage: Arc<S>, sessions: Arc<R>) -> Self {
        Self { storage, sessions }
    }

    /// Decide whether `candidates` cover the session
    ///
    /// The observed count is written to the session whatever the verdict.
    pub async fn check(
        &self,
        booking_id: &str,
        session_id: &str,
        expected: u32,
        candidates: &[String],
        now: DateTime<Utc>,
    ) -> Availability {
        let found = candidates.len();
        let verdict = if found < expected as usize {
            info!(
                "Only {}/{} chunks available for session {}, not ready",
                found, expected, session_id
            );
            Availability::NotReady { found, expected }
        } else if self.ends_present(candidates).await {
            info!("All {} chunks of session {} are available", found, session_id);
            Availability::Ready
        } else {
            info!(
                "Chunks of session {} are listed but not readable yet, will retry later",
                session_id
            );
            Availability::NotReady { found, expected }
        };

        let recorded = u32::try_from(found).unwrap_or(u32::MAX).min(expected);
        match self
            .sessions
            .record_progress(booking_id, session_id, recorded, now)
            .await
        {
            Ok(()) => {}
            Err(RegistryError::SessionNotFound(_)) => {
                debug!("Session {} has no registry record yet", session_id)
            }
            Err(e) => warn!("Failed to record progress for session {}: {}", session_id, e),
        }

        verdict
    }

    /// HEAD the first and last chunk in part order
    async fn ends_present(&self, candidates: &[String]) -> bool {
        let ordered = order_chunks(candidates);
        let ends = match (ordered.first(), ordered.last()) {
            (Some(first), Some(last)) if first != last => vec![first, last],
            (Some(only), _) => vec![only],
            _ => return true,
        };

        for key in ends {
            if let Err(e) = self.storage.head_object(key).await {
                warn!("Chunk {} is not accessible: {}", key, e);
                return false;
            }
            debug!("Verified accessibility of chunk {}", key);
        }
        true
    }
}
