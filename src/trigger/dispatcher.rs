use crate::config::SweepConfig;
use crate::reassembly::manifest::session_id_from_manifest_key;
use crate::reassembly::{booking_id_from_key, is_manifest_key, ReassemblyError, Reassembler};
use crate::registry::SessionStore;
use crate::resources::{ResourceStore, GEOTIFF_RESOURCE_TYPE};
use crate::s3::Storage;
use crate::trigger::event::{DirectRequest, Trigger};
use crate::trigger::response::{DispatchResponse, ReassemblyResponse};
use crate::trigger::sweeper::Sweeper;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Routes each invocation to the matching reassembly path
///
/// Every path answers with a structured response, errors included.
pub struct Dispatcher<S: Storage, R: SessionStore, P: ResourceStore> {
    reassembler: Arc<Reassembler<S, R, P>>,
    sweeper: Sweeper<S, R, P>,
    bucket: String,
}

impl<S: Storage, R: SessionStore, P: ResourceStore> Dispatcher<S, R, P> {
    pub fn new(
        reassembler: Arc<Reassembler<S, R, P>>,
        bucket: impl Into<String>,
        sweep: &SweepConfig,
    ) -> Self {
        Self {
            sweeper: Sweeper::new(Arc::clone(&reassembler), sweep),
            reassembler,
            bucket: bucket.into(),
        }
    }

    pub fn sweeper(&self) -> &Sweeper<S, R, P> {
        &self.sweeper
    }

    pub async fn dispatch(&self, event: &Value) -> DispatchResponse {
        match Trigger::classify(event) {
            Ok(trigger) => self.handle(trigger).await,
            Err(e) => {
                warn!("Rejected invocation: {}", e);
                DispatchResponse::Reassembly(ReassemblyResponse::from_error(&e))
            }
        }
    }

    pub async fn handle(&self, trigger: Trigger) -> DispatchResponse {
        match trigger {
            Trigger::Direct(request) => DispatchResponse::Reassembly(self.direct(&request).await),
            Trigger::StorageEvent { bucket, key } => {
                DispatchResponse::Reassembly(self.storage_event(&bucket, &key).await)
            }
            Trigger::Scheduled => match self.sweeper.sweep_once(Utc::now()).await {
                Ok(report) => DispatchResponse::Sweep(report),
                Err(e) => {
                    error!("Error in scheduled check: {}", e);
                    DispatchResponse::Reassembly(ReassemblyResponse::from_error(&e))
                }
            },
        }
    }

    pub async fn direct(&self, request: &DirectRequest) -> ReassemblyResponse {
        info!(
            "Direct request for booking {}, session {:?}",
            request.booking_id, request.session_id
        );
        if let Some(resource_type) = &request.resource_type {
            if resource_type != GEOTIFF_RESOURCE_TYPE {
                warn!(
                    "Resource type {} requested; output is always {}",
                    resource_type, GEOTIFF_RESOURCE_TYPE
                );
            }
        }

        let hints = request.hints();
        let result = match &request.session_id {
            Some(session_id) => {
                self.reassembler
                    .reassemble_session(&request.booking_id, session_id, &hints)
                    .await
            }
            None => {
                self.reassembler
                    .reassemble_booking(&request.booking_id, &hints)
                    .await
            }
        };
        if let Err(e) = &result {
            warn!("Direct request for booking {} failed: {}", request.booking_id, e);
        }
        ReassemblyResponse::from_result(result)
            .with_session(&request.booking_id, request.session_id.as_deref())
    }

    pub async fn storage_event(&self, bucket: &str, key: &str) -> ReassemblyResponse {
        if bucket != self.bucket {
            let e = ReassemblyError::InvalidTrigger(format!(
                "event for bucket {bucket}, expected {}",
                self.bucket
            ));
            warn!("{}", e);
            return ReassemblyResponse::from_error(&e);
        }
        if !is_manifest_key(key) {
            info!("Not a manifest file, ignoring: {}", key);
            return ReassemblyResponse::ignored("Not a manifest file, ignoring");
        }
        let Some(booking_id) = booking_id_from_key(key) else {
            let e = ReassemblyError::InvalidTrigger(format!("Invalid key path format: {key}"));
            error!("{}", e);
            return ReassemblyResponse::from_error(&e);
        };

        info!("Manifest {} written for booking {}", key, booking_id);
        let result = self.reassembler.reassemble_from_manifest(booking_id, key).await;
        if let Err(e) = &result {
            warn!("Reassembly triggered by {} failed: {}", key, e);
        }
        let session_id = session_id_from_manifest_key(key);
        ReassemblyResponse::from_result(result).with_session(booking_id, session_id.as_deref())
    }
}
