use crate::config::SweepConfig;
use crate::reassembly::{ReassemblyError, Reassembler, SessionHints};
use crate::registry::SessionStore;
use crate::resources::ResourceStore;
use crate::s3::Storage;
use crate::trigger::response::{ReassemblyResponse, SweepReport, SweepResult};
use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Revisits pending sessions nobody has touched for a while
pub struct Sweeper<S: Storage, R: SessionStore, P: ResourceStore> {
    reassembler: Arc<Reassembler<S, R, P>>,
    stale_after: Duration,
    interval: std::time::Duration,
}

impl<S: Storage, R: SessionStore, P: ResourceStore> Sweeper<S, R, P> {
    pub fn new(reassembler: Arc<Reassembler<S, R, P>>, config: &SweepConfig) -> Self {
        Self {
            reassembler,
            stale_after: Duration::from_std(config.stale_after())
                .unwrap_or_else(|_| Duration::minutes(2)),
            interval: config.interval(),
        }
    }

    /// One pass; a failing session never stops the others
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, ReassemblyError> {
        let candidates = self
            .reassembler
            .sessions()
            .find_stale_pending(now - self.stale_after)
            .await?;
        info!("Found {} stale pending sessions", candidates.len());

        let mut results = Vec::with_capacity(candidates.len());
        for session in candidates {
            if session.manifest_key.is_none() {
                debug!(
                    "Session {} has no manifest, discovering chunks",
                    session.session_id
                );
            }
            let hints = SessionHints {
                manifest_key: session.manifest_key.clone(),
                ..SessionHints::default()
            };
            let result = self
                .reassembler
                .reassemble_session(&session.booking_id, &session.session_id, &hints)
                .await;
            if let Err(e) = &result {
                warn!("Sweep of session {} failed: {}", session.session_id, e);
            }
            let result = ReassemblyResponse::from_result(result)
                .with_session(&session.booking_id, Some(&session.session_id));
            results.push(SweepResult {
                session_id: session.session_id,
                booking_id: session.booking_id,
                result,
            });
        }

        Ok(SweepReport::new(results))
    }

    /// Sweep on every tick until ctrl-c
    pub async fn run(&self) {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        info!("Sweeping every {}s", self.interval.as_secs());

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping sweeper");
                    return;
                }
                _ = ticker.tick() => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(report) => info!(
                            "{}, {} reassembled",
                            report.message, report.reassembled
                        ),
                        Err(e) => error!("Sweep failed: {}", e),
                    }
                }
            }
        }
    }
}
