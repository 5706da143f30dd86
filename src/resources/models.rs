use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const GEOTIFF_RESOURCE_TYPE: &str = "geotiff";
pub const ACTIVE_STATUS: &str = "active";

/// A merged file as the booking-detail read path sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub resource_id: String,
    pub booking_id: String,
    pub file_name: String,
    pub content_type: String,
    pub resource_type: String,
    pub blob_key: String,
    pub url: String,
    pub size: u64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
    pub status: String,
    pub is_chunked_file: bool,
    pub is_complete: bool,
    pub session_id: String,
    /// The resource id the uploader reserved before chunking, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_resource_id: Option<String>,
}

impl ResourceRecord {
    /// A freshly reassembled GeoTIFF
    #[allow(clippy::too_many_arguments)]
    pub fn reassembled(
        resource_id: &str,
        booking_id: &str,
        session_id: &str,
        file_name: &str,
        content_type: &str,
        blob_key: &str,
        url: &str,
        size: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            booking_id: booking_id.to_string(),
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            resource_type: GEOTIFF_RESOURCE_TYPE.to_string(),
            blob_key: blob_key.to_string(),
            url: url.to_string(),
            size,
            created_at: now,
            updated_at: now,
            status: ACTIVE_STATUS.to_string(),
            is_chunked_file: true,
            is_complete: true,
            session_id: session_id.to_string(),
            original_resource_id: None,
        }
    }
}
