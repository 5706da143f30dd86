use crate::config::ReassemblyConfig;
use crate::reassembly::availability::{Availability, AvailabilityChecker};
use crate::reassembly::discovery::{session_from_timestamp_tokens, ChunkDiscovery};
use crate::reassembly::engine::ReassemblyEngine;
use crate::reassembly::error::ReassemblyError;
use crate::reassembly::finalizer::{FinalizeRequest, Finalized, Finalizer};
use crate::reassembly::manifest::{
    is_manifest_key, session_id_from_manifest_key, Manifest, ManifestResolver,
};
use crate::reassembly::ordering::{
    clean_file_name, file_name_of, new_resource_id, order_chunks, output_key,
};
use crate::registry::{ChunkSession, SessionStatus, SessionStore};
use crate::resources::ResourceStore;
use crate::s3::Storage;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Caller-supplied context for one reassembly attempt
#[derive(Debug, Clone, Default)]
pub struct SessionHints {
    pub manifest_key: Option<String>,
    /// Resource id reserved by the uploader; stored on the new record
    pub final_resource_id: Option<String>,
    pub base_file_name: Option<String>,
    /// Mark the session failed when no chunks can be found
    pub terminal_on_missing: bool,
    /// Return a failed session to pending and try again
    pub restart_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyOutcome {
    Completed(Finalized),
    NotReady {
        booking_id: String,
        session_id: String,
        found: usize,
        required: u32,
    },
    /// Another invocation holds the merge claim
    InProgress {
        booking_id: String,
        session_id: String,
    },
    /// The session failed earlier and was not restarted
    Failed {
        booking_id: String,
        session_id: String,
        message: String,
    },
}

struct Target<'a> {
    booking_id: &'a str,
    session_id: &'a str,
    expected_chunks: Option<u32>,
    file_name: Option<String>,
}

/// Drives manifest resolution, discovery, availability, merge and
/// finalization for one session at a time
pub struct Reassembler<S: Storage, R: SessionStore, P: ResourceStore> {
    storage: Arc<S>,
    sessions: Arc<R>,
    resolver: ManifestResolver<S, R>,
    discovery: ChunkDiscovery<S>,
    availability: AvailabilityChecker<S, R>,
    engine: ReassemblyEngine<S>,
    finalizer: Finalizer<S, R, P>,
    claim_lease: Duration,
}

impl<S: Storage, R: SessionStore, P: ResourceStore> Reassembler<S, R, P> {
    pub fn new(
        storage: Arc<S>,
        sessions: Arc<R>,
        resources: Arc<P>,
        config: &ReassemblyConfig,
    ) -> Self {
        let claim_lease =
            Duration::from_std(config.claim_lease()).unwrap_or_else(|_| Duration::minutes(15));
        Self {
            resolver: ManifestResolver::new(
                Arc::clone(&storage),
                Arc::clone(&sessions),
                config.manifest_cache_size,
            ),
            discovery: ChunkDiscovery::new(Arc::clone(&storage), config.session_tag.clone()),
            availability: AvailabilityChecker::new(Arc::clone(&storage), Arc::clone(&sessions)),
            engine: ReassemblyEngine::new(
                Arc::clone(&storage),
                config.min_segment_size_bytes,
                config.max_direct_merge_bytes,
                config.content_type.clone(),
            ),
            finalizer: Finalizer::new(
                Arc::clone(&storage),
                Arc::clone(&sessions),
                resources,
                config.url_validity(),
                config.content_type.clone(),
            ),
            storage,
            sessions,
            claim_lease,
        }
    }

    pub fn sessions(&self) -> &Arc<R> {
        &self.sessions
    }

    /// A manifest was written: register its session and merge if complete
    ///
    /// An unreadable manifest falls back to session discovery, with the
    /// session id taken from the manifest's file name.
    pub async fn reassemble_from_manifest(
        &self,
        booking_id: &str,
        manifest_key: &str,
    ) -> Result<ReassemblyOutcome, ReassemblyError> {
        if let Some((manifest, _)) = self
            .resolver
            .resolve_and_register(booking_id, manifest_key, Utc::now())
            .await?
        {
            return self
                .attempt(Self::manifest_target(booking_id, &manifest), &SessionHints::default())
                .await;
        }

        let session_id = session_id_from_manifest_key(manifest_key).ok_or_else(|| {
            ReassemblyError::ManifestInvalid {
                key: manifest_key.to_string(),
                reason: "no session id in the key".to_string(),
            }
        })?;
        info!(
            "Manifest {} unusable, discovering chunks for session {}",
            manifest_key, session_id
        );
        let target = Target {
            booking_id,
            session_id: &session_id,
            expected_chunks: None,
            file_name: None,
        };
        self.attempt(target, &SessionHints::default()).await
    }

    /// Reassemble a named session, using its manifest when one can be found
    pub async fn reassemble_session(
        &self,
        booking_id: &str,
        session_id: &str,
        hints: &SessionHints,
    ) -> Result<ReassemblyOutcome, ReassemblyError> {
        let existing = self.sessions.get_session(booking_id, session_id).await?;

        if let Some(manifest) = self
            .locate_manifest(booking_id, session_id, existing.as_ref(), hints)
            .await?
        {
            return self
                .attempt(Self::manifest_target(booking_id, &manifest), hints)
                .await;
        }

        // Only a manifest-registered record knows the real chunk count
        let expected_chunks = existing
            .as_ref()
            .filter(|s| s.manifest_key.is_some() && s.total_chunks > 0)
            .map(|s| s.total_chunks);
        let file_name = hints.base_file_name.clone().or_else(|| {
            existing
                .as_ref()
                .map(|s| s.original_file_name.clone())
                .filter(|name| !name.is_empty())
        });
        let target = Target {
            booking_id,
            session_id,
            expected_chunks,
            file_name,
        };
        self.attempt(target, hints).await
    }

    /// Reassemble something for a booking when no session was named
    pub async fn reassemble_booking(
        &self,
        booking_id: &str,
        hints: &SessionHints,
    ) -> Result<ReassemblyOutcome, ReassemblyError> {
        if let Some(resource_id) = &hints.final_resource_id {
            if let Some(session) = self
                .sessions
                .find_by_final_resource(booking_id, resource_id)
                .await?
            {
                info!(
                    "Resource {} belongs to session {}",
                    resource_id, session.session_id
                );
                return self
                    .reassemble_session(booking_id, &session.session_id, hints)
                    .await;
            }
        }

        if let Some(base_file_name) = &hints.base_file_name {
            let listing = self
                .storage
                .list_objects(&format!("{booking_id}/{base_file_name}"))
                .await?;
            if let Some((session_id, keys)) = session_from_timestamp_tokens(&listing) {
                info!(
                    "Inferred session {} from {} objects named {}",
                    session_id,
                    keys.len(),
                    base_file_name
                );
                let mut hints = hints.clone();
                if let Some(manifest_key) = keys.into_iter().filter(|k| is_manifest_key(k)).min() {
                    hints.manifest_key = Some(manifest_key);
                }
                return self.reassemble_session(booking_id, &session_id, &hints).await;
            }
        }

        let pending = self.sessions.find_pending_for_booking(booking_id).await?;
        if let Some(session) = pending.first() {
            info!(
                "Using oldest pending session {} of booking {}",
                session.session_id, booking_id
            );
            return self
                .reassemble_session(booking_id, &session.session_id, hints)
                .await;
        }

        Err(ReassemblyError::NothingToReassemble {
            booking_id: booking_id.to_string(),
        })
    }

    fn manifest_target<'a>(booking_id: &'a str, manifest: &'a Manifest) -> Target<'a> {
        Target {
            booking_id,
            session_id: &manifest.session_id,
            expected_chunks: Some(manifest.total_chunks),
            file_name: Some(manifest.original_file_name.clone()),
        }
    }

    /// Explicit key, then the recorded key, then a listing beside the chunks
    async fn locate_manifest(
        &self,
        booking_id: &str,
        session_id: &str,
        existing: Option<&ChunkSession>,
        hints: &SessionHints,
    ) -> Result<Option<Manifest>, ReassemblyError> {
        let known_key = hints
            .manifest_key
            .clone()
            .or_else(|| existing.and_then(|s| s.manifest_key.clone()));
        let manifest_key = match known_key {
            Some(key) => Some(key),
            None => match self.resolver.find_manifest_key(booking_id, session_id).await {
                Ok(key) => key,
                Err(e) => {
                    warn!("Error searching for manifest of session {}: {}", session_id, e);
                    None
                }
            },
        };
        let Some(manifest_key) = manifest_key else {
            return Ok(None);
        };

        match self
            .resolver
            .resolve_and_register(booking_id, &manifest_key, Utc::now())
            .await?
        {
            Some((manifest, _)) if manifest.session_id == session_id => Ok(Some(manifest)),
            Some((manifest, _)) => {
                warn!(
                    "Manifest {} describes session {}, not {}; ignoring it",
                    manifest_key, manifest.session_id, session_id
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn attempt(
        &self,
        target: Target<'_>,
        hints: &SessionHints,
    ) -> Result<ReassemblyOutcome, ReassemblyError> {
        let Target {
            booking_id,
            session_id,
            ..
        } = target;
        let now = Utc::now();

        if let Some(done) = self.finalizer.existing(booking_id, session_id).await? {
            return Ok(ReassemblyOutcome::Completed(done));
        }
        if let Some(session) = self.sessions.get_session(booking_id, session_id).await? {
            if session.status == SessionStatus::Failed {
                if hints.restart_failed
                    && self.sessions.restart(booking_id, session_id, now).await?
                {
                    info!("Restarted failed session {}", session_id);
                } else {
                    return Ok(ReassemblyOutcome::Failed {
                        booking_id: booking_id.to_string(),
                        session_id: session_id.to_string(),
                        message: session.error_message.unwrap_or_default(),
                    });
                }
            }
        }

        let Some(discovered) = self.discovery.discover(booking_id, session_id).await? else {
            if hints.terminal_on_missing {
                self.fail_missing(booking_id, session_id).await?;
            }
            return Err(ReassemblyError::DiscoveryExhausted {
                booking_id: booking_id.to_string(),
                session_id: session_id.to_string(),
            });
        };

        let ordered = order_chunks(&discovered.keys);
        let expected = target
            .expected_chunks
            .unwrap_or_else(|| u32::try_from(ordered.len()).unwrap_or(u32::MAX));
        let file_name = target
            .file_name
            .unwrap_or_else(|| Self::name_from_chunk(&ordered));

        self.sessions
            .insert_if_absent(ChunkSession::pending(
                booking_id, session_id, &file_name, expected, now,
            ))
            .await?;

        if let Availability::NotReady { found, expected } = self
            .availability
            .check(booking_id, session_id, expected, &discovered.keys, now)
            .await
        {
            return Ok(ReassemblyOutcome::NotReady {
                booking_id: booking_id.to_string(),
                session_id: session_id.to_string(),
                found,
                required: expected,
            });
        }

        let claim_token = Uuid::new_v4().to_string();
        if !self
            .sessions
            .try_claim(booking_id, session_id, &claim_token, now, self.claim_lease)
            .await?
        {
            if let Some(done) = self.finalizer.existing(booking_id, session_id).await? {
                return Ok(ReassemblyOutcome::Completed(done));
            }
            info!("Session {} is being merged elsewhere", session_id);
            return Ok(ReassemblyOutcome::InProgress {
                booking_id: booking_id.to_string(),
                session_id: session_id.to_string(),
            });
        }

        let clean_name = clean_file_name(&file_name);
        let resource_id = new_resource_id(now);
        let output_key = output_key(booking_id, &resource_id, &clean_name);

        let merged = match self.engine.merge(&ordered, &output_key).await {
            Ok(merged) => merged,
            Err(e) => {
                error!("Merge of session {} failed: {}", session_id, e);
                self.record_failure(booking_id, session_id, &claim_token, &e.to_string())
                    .await;
                return Err(e);
            }
        };
        info!(
            "Merged {} chunks of session {} into {} by {}",
            merged.chunk_count, session_id, merged.output_key, merged.strategy
        );

        let request = FinalizeRequest {
            booking_id: booking_id.to_string(),
            session_id: session_id.to_string(),
            claim_token,
            resource_id,
            output_key,
            file_name: clean_name,
            merged_bytes: merged.total_bytes,
            original_resource_id: hints.final_resource_id.clone(),
        };
        Ok(ReassemblyOutcome::Completed(
            self.finalizer.finalize(&request, Utc::now()).await,
        ))
    }

    /// File name of the first chunk without its `.partN` tail
    fn name_from_chunk(ordered: &[String]) -> String {
        ordered
            .first()
            .map(|key| clean_file_name(file_name_of(key)))
            .unwrap_or_else(|| clean_file_name(""))
    }

    async fn record_failure(&self, booking_id: &str, session_id: &str, token: &str, message: &str) {
        match self
            .sessions
            .mark_failed(booking_id, session_id, token, message, Utc::now())
            .await
        {
            Ok(true) => info!("Marked session {} as failed", session_id),
            Ok(false) => warn!("Session {} was no longer ours to mark failed", session_id),
            Err(e) => warn!("Failed to mark session {} as failed: {}", session_id, e),
        }
    }

    async fn fail_missing(
        &self,
        booking_id: &str,
        session_id: &str,
    ) -> Result<(), ReassemblyError> {
        let now = Utc::now();
        self.sessions
            .insert_if_absent(ChunkSession::pending(booking_id, session_id, "", 0, now))
            .await?;
        let token = Uuid::new_v4().to_string();
        if self
            .sessions
            .try_claim(booking_id, session_id, &token, now, self.claim_lease)
            .await?
        {
            self.record_failure(
                booking_id,
                session_id,
                &token,
                &format!("No chunks found for session {session_id}"),
            )
            .await;
        }
        Ok(())
    }
}
