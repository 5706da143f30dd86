use crate::reassembly::{Finalized, ReassemblyError, ReassemblyOutcome};
use serde::Serialize;
use serde_json::{json, Value};

/// Answer to a direct request or a storage event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassemblyResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_chunks: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip)]
    pub status_code: u16,
}

impl ReassemblyResponse {
    pub fn failure(message: impl Into<String>, status_code: u16) -> Self {
        Self {
            success: false,
            message: message.into(),
            status_code,
            ..Self::default()
        }
    }

    /// Acknowledged without doing any work
    pub fn ignored(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            status_code: 200,
            ..Self::default()
        }
    }

    pub fn completed(finalized: Finalized) -> Self {
        let record = finalized.record;
        Self {
            success: true,
            message: format!("Successfully reassembled into {}", record.file_name),
            resource_id: Some(record.resource_id),
            file_name: Some(record.file_name),
            url: Some(record.url),
            blob_key: Some(record.blob_key),
            booking_id: Some(record.booking_id),
            session_id: Some(record.session_id),
            size: Some(record.size),
            warning: finalized.warning,
            status_code: 200,
            ..Self::default()
        }
    }

    pub fn from_outcome(outcome: ReassemblyOutcome) -> Self {
        match outcome {
            ReassemblyOutcome::Completed(finalized) => Self::completed(finalized),
            ReassemblyOutcome::NotReady {
                booking_id,
                session_id,
                found,
                required,
            } => Self {
                booking_id: Some(booking_id),
                session_id: Some(session_id),
                required_chunks: Some(required),
                found_chunks: Some(found),
                ..Self::failure("Manifest registered, waiting for all chunks", 202)
            },
            ReassemblyOutcome::InProgress {
                booking_id,
                session_id,
            } => Self {
                message: format!("Reassembly of session {session_id} is already in progress"),
                booking_id: Some(booking_id),
                session_id: Some(session_id),
                ..Self::failure("", 202)
            },
            ReassemblyOutcome::Failed {
                booking_id,
                session_id,
                message,
            } => Self {
                message: format!("Session {session_id} previously failed: {message}"),
                booking_id: Some(booking_id),
                session_id: Some(session_id),
                ..Self::failure("", 409)
            },
        }
    }

    pub fn from_error(error: &ReassemblyError) -> Self {
        let message = error.to_string();
        match error {
            ReassemblyError::InvalidTrigger(_) | ReassemblyError::ManifestInvalid { .. } => {
                Self::failure(message, 400)
            }
            ReassemblyError::DiscoveryExhausted {
                booking_id,
                session_id,
            } => Self {
                booking_id: Some(booking_id.clone()),
                session_id: Some(session_id.clone()),
                ..Self::failure(message, 404)
            },
            ReassemblyError::NothingToReassemble { booking_id } => Self {
                booking_id: Some(booking_id.clone()),
                ..Self::failure(message, 404)
            },
            _ => Self::failure(message, 500),
        }
    }

    pub fn from_result(result: Result<ReassemblyOutcome, ReassemblyError>) -> Self {
        match result {
            Ok(outcome) => Self::from_outcome(outcome),
            Err(e) => Self::from_error(&e),
        }
    }

    /// Fill in the ids the caller asked about when the result did not carry them
    pub fn with_session(mut self, booking_id: &str, session_id: Option<&str>) -> Self {
        if self.booking_id.is_none() {
            self.booking_id = Some(booking_id.to_string());
        }
        if self.session_id.is_none() {
            self.session_id = session_id.map(str::to_string);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResult {
    pub session_id: String,
    pub booking_id: String,
    pub result: ReassemblyResponse,
}

/// What one pass over the stale pending sessions did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub message: String,
    pub checked: usize,
    pub reassembled: usize,
    pub results: Vec<SweepResult>,
}

impl SweepReport {
    pub fn new(results: Vec<SweepResult>) -> Self {
        let checked = results.len();
        let reassembled = results.iter().filter(|r| r.result.success).count();
        Self {
            message: format!("Checked {checked} candidate sessions"),
            checked,
            reassembled,
            results,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DispatchResponse {
    Reassembly(ReassemblyResponse),
    Sweep(SweepReport),
}

impl DispatchResponse {
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchResponse::Reassembly(response) => response.status_code,
            DispatchResponse::Sweep(_) => 200,
        }
    }

    /// `{statusCode, body}` with the body as a JSON string
    pub fn envelope(&self) -> Result<Value, serde_json::Error> {
        Ok(json!({
            "statusCode": self.status_code(),
            "body": serde_json::to_string(self)?,
        }))
    }
}
