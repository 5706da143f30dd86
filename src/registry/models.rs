use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of an upload session; `Completed` and `Failed` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Pending)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(format!("Invalid session status: {other}")),
        }
    }
}

/// Status record for one chunked upload, keyed by (booking_id, chunk_id)
///
/// Field names serialize in camelCase; the booking-detail read path
/// depends on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSession {
    pub booking_id: String,
    /// Always `"{session_id}_manifest"`
    pub chunk_id: String,
    pub session_id: String,
    pub original_file_name: String,
    pub total_chunks: u32,
    pub chunks_uploaded: u32,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub manifest_key: Option<String>,
    /// Upload start time in epoch milliseconds, as stated by the manifest
    #[serde(default)]
    pub timestamp: Option<i64>,
    pub status: SessionStatus,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_updated: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub final_resource_id: Option<String>,
    #[serde(default)]
    pub reassembled_url: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_token: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl ChunkSession {
    pub fn chunk_id_for(session_id: &str) -> String {
        format!("{session_id}_manifest")
    }

    /// Create a pending session with no progress recorded
    pub fn pending(
        booking_id: &str,
        session_id: &str,
        original_file_name: &str,
        total_chunks: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            booking_id: booking_id.to_string(),
            chunk_id: Self::chunk_id_for(session_id),
            session_id: session_id.to_string(),
            original_file_name: original_file_name.to_string(),
            total_chunks,
            chunks_uploaded: 0,
            checksum: None,
            manifest_key: None,
            timestamp: None,
            status: SessionStatus::Pending,
            last_updated: now,
            completed_at: None,
            failed_at: None,
            final_resource_id: None,
            reassembled_url: None,
            error_message: None,
            claim_token: None,
            claimed_at: None,
        }
    }

    pub fn is_claimable(&self, now: DateTime<Utc>, lease: chrono::Duration) -> bool {
        self.status == SessionStatus::Pending
            && match (&self.claim_token, self.claimed_at) {
                (None, _) => true,
                (Some(_), Some(claimed_at)) => claimed_at < now - lease,
                (Some(_), None) => true,
            }
    }
}

/// What a successful merge writes onto the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub final_resource_id: String,
    pub reassembled_url: String,
    pub completed_at: DateTime<Utc>,
}
