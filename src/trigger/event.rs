use crate::reassembly::{ReassemblyError, SessionHints};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

/// A caller asking for one booking or session to be reassembled
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectRequest {
    pub booking_id: String,
    pub session_id: Option<String>,
    pub manifest_key: Option<String>,
    pub final_resource_id: Option<String>,
    pub base_file_name: Option<String>,
    pub resource_type: Option<String>,
    /// Fail the session instead of leaving it pending when no chunks exist
    pub terminal_on_missing: bool,
}

impl DirectRequest {
    /// Naming a session is the operator's way to retry a failed one
    pub fn hints(&self) -> SessionHints {
        SessionHints {
            manifest_key: self.manifest_key.clone(),
            final_resource_id: self.final_resource_id.clone(),
            base_file_name: self.base_file_name.clone(),
            terminal_on_missing: self.terminal_on_missing,
            restart_failed: self.session_id.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Direct(DirectRequest),
    /// An object was created; only manifests start work
    StorageEvent { bucket: String, key: String },
    Scheduled,
}

impl Trigger {
    /// Classify a raw invocation payload
    pub fn classify(event: &Value) -> Result<Self, ReassemblyError> {
        let fields = match event {
            Value::Null => return Ok(Trigger::Scheduled),
            Value::Object(fields) if fields.is_empty() => return Ok(Trigger::Scheduled),
            Value::Object(fields) => fields,
            _ => return Err(invalid("expected a JSON object")),
        };

        if let Some(body) = fields.get("body") {
            return Self::direct_from_body(body, fields);
        }
        if let Some(records) = fields.get("Records") {
            return Self::storage_event(records);
        }
        let scheduled = fields
            .get("detail-type")
            .and_then(Value::as_str)
            .is_some_and(|kind| kind.to_ascii_lowercase().contains("scheduled"));
        if scheduled {
            return Ok(Trigger::Scheduled);
        }
        if fields.contains_key("bookingId") {
            return Self::direct(event.clone());
        }

        Err(invalid("unrecognized event shape"))
    }

    fn direct_from_body(
        body: &Value,
        fields: &Map<String, Value>,
    ) -> Result<Self, ReassemblyError> {
        let body = match body {
            Value::String(text) => serde_json::from_str(text).unwrap_or_else(|e| {
                warn!("Request body is not valid JSON: {}", e);
                Value::Object(Map::new())
            }),
            Value::Object(_) => body.clone(),
            _ => Value::Object(fields.clone()),
        };
        Self::direct(body)
    }

    fn direct(body: Value) -> Result<Self, ReassemblyError> {
        let request: DirectRequest = serde_json::from_value(body)
            .map_err(|e| invalid(&format!("malformed request: {e}")))?;
        if request.booking_id.trim().is_empty() {
            return Err(invalid("bookingId is required"));
        }
        Ok(Trigger::Direct(request))
    }

    fn storage_event(records: &Value) -> Result<Self, ReassemblyError> {
        let record = records
            .as_array()
            .and_then(|records| records.first())
            .ok_or_else(|| invalid("storage event has no records"))?;
        let bucket = record
            .pointer("/s3/bucket/name")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("storage event has no bucket"))?;
        let raw_key = record
            .pointer("/s3/object/key")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("storage event has no object key"))?;

        Ok(Trigger::StorageEvent {
            bucket: bucket.to_string(),
            key: decode_key(raw_key)?,
        })
    }
}

/// Event keys are form-encoded: `+` stands for a space
pub fn decode_key(raw: &str) -> Result<String, ReassemblyError> {
    urlencoding::decode(&raw.replace('+', " "))
        .map(|key| key.into_owned())
        .map_err(|e| invalid(&format!("object key is not valid UTF-8: {e}")))
}

fn invalid(reason: &str) -> ReassemblyError {
    ReassemblyError::InvalidTrigger(reason.to_string())
}
