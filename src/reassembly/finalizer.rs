use crate::reassembly::error::ReassemblyError;
use crate::reassembly::ordering::clean_file_name;
use crate::registry::{Completion, SessionStatus, SessionStore};
use crate::resources::{ResourceRecord, ResourceStore};
use crate::s3::Storage;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Everything the finalizer needs to know about a finished merge
#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    pub booking_id: String,
    pub session_id: String,
    pub claim_token: String,
    pub resource_id: String,
    pub output_key: String,
    pub file_name: String,
    pub merged_bytes: u64,
    pub original_resource_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    pub record: ResourceRecord,
    /// The session had been completed before; `record` is the stored one
    pub already_completed: bool,
    /// Bookkeeping that failed after the merge itself succeeded
    pub warning: Option<String>,
}

/// Records the merged object and closes the session
pub struct Finalizer<S: Storage, R: SessionStore, P: ResourceStore> {
    storage: Arc<S>,
    sessions: Arc<R>,
    resources: Arc<P>,
    url_validity: Duration,
    content_type: String,
}

impl<S: Storage, R: SessionStore, P: ResourceStore> Finalizer<S, R, P> {
    pub fn new(
        storage: Arc<S>,
        sessions: Arc<R>,
        resources: Arc<P>,
        url_validity: Duration,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            sessions,
            resources,
            url_validity,
            content_type: content_type.into(),
        }
    }

    /// The stored result of a session that is already completed
    pub async fn existing(
        &self,
        booking_id: &str,
        session_id: &str,
    ) -> Result<Option<Finalized>, ReassemblyError> {
        let Some(session) = self.sessions.get_session(booking_id, session_id).await? else {
            return Ok(None);
        };
        if session.status != SessionStatus::Completed {
            return Ok(None);
        }
        let Some(resource_id) = session.final_resource_id.clone() else {
            return Ok(None);
        };

        if let Some(record) = self.resources.get_resource(&resource_id).await? {
            return Ok(Some(Finalized {
                record,
                already_completed: true,
                warning: None,
            }));
        }

        // Completed earlier, but the resource write was lost
        let completed_at = session.completed_at.unwrap_or(session.last_updated);
        let record = ResourceRecord::reassembled(
            &resource_id,
            booking_id,
            session_id,
            &clean_file_name(&session.original_file_name),
            &self.content_type,
            "",
            session.reassembled_url.as_deref().unwrap_or_default(),
            0,
            completed_at,
        );
        Ok(Some(Finalized {
            record,
            already_completed: true,
            warning: Some(format!("Resource record {resource_id} is missing")),
        }))
    }

    /// Write the resource record and mark the session completed
    ///
    /// Calling this for a session that is already completed returns the
    /// stored record and writes nothing.
    pub async fn finalize(&self, request: &FinalizeRequest, now: DateTime<Utc>) -> Finalized {
        match self
            .existing(&request.booking_id, &request.session_id)
            .await
        {
            Ok(Some(existing)) => {
                info!(
                    "Session {} already completed as {}",
                    request.session_id, existing.record.resource_id
                );
                return existing;
            }
            Ok(None) => {}
            Err(e) => warn!("Could not read session {}: {}", request.session_id, e),
        }

        let size = match self.storage.head_object(&request.output_key).await {
            Ok(head) => head.size,
            Err(e) => {
                warn!("Could not read size of {}: {}", request.output_key, e);
                request.merged_bytes
            }
        };

        let url = match self
            .storage
            .presign_get(&request.output_key, self.url_validity)
            .await
        {
            Ok(url) => url,
            Err(e) => {
                warn!("Could not generate URL for {}: {}", request.output_key, e);
                String::new()
            }
        };

        let mut record = ResourceRecord::reassembled(
            &request.resource_id,
            &request.booking_id,
            &request.session_id,
            &request.file_name,
            &self.content_type,
            &request.output_key,
            &url,
            size,
            now,
        );
        record.original_resource_id = request.original_resource_id.clone();

        let completion = Completion {
            final_resource_id: request.resource_id.clone(),
            reassembled_url: url,
            completed_at: now,
        };

        match self
            .sessions
            .mark_completed(
                &request.booking_id,
                &request.session_id,
                &request.claim_token,
                &completion,
            )
            .await
        {
            Ok(true) => self.record_resource(record).await,
            Ok(false) => self.lost_claim(request, record).await,
            Err(e) => {
                let reason = ReassemblyError::FinalizeFailed(e.to_string());
                warn!("{} for session {}", reason, request.session_id);
                let mut finalized = self.record_resource(record).await;
                finalized.warning.get_or_insert(reason.to_string());
                finalized
            }
        }
    }

    async fn record_resource(&self, record: ResourceRecord) -> Finalized {
        let warning = match self.resources.put_resource(record.clone()).await {
            Ok(()) => {
                info!(
                    "Recorded resource {} for booking {}",
                    record.resource_id, record.booking_id
                );
                None
            }
            Err(e) => {
                let reason = ReassemblyError::FinalizeFailed(e.to_string());
                warn!("{} for resource {}", reason, record.resource_id);
                Some(reason.to_string())
            }
        };
        Finalized {
            record,
            already_completed: false,
            warning,
        }
    }

    // Someone else closed the session between our claim and now
    async fn lost_claim(&self, request: &FinalizeRequest, record: ResourceRecord) -> Finalized {
        warn!(
            "Session {} was closed by another worker; {} is unreferenced",
            request.session_id, request.output_key
        );
        if let Ok(Some(existing)) = self
            .existing(&request.booking_id, &request.session_id)
            .await
        {
            return existing;
        }
        Finalized {
            record,
            already_completed: false,
            warning: Some(format!(
                "Session {} no longer holds claim for this merge",
                request.session_id
            )),
        }
    }
}
