use crate::config::{load_config, Config};
use serde_json::json;
use uuid::Uuid;

/// Check if a test is enabled via environment variable
fn is_test_enabled(env_var: &str) -> bool {
    std::env::var(env_var)
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(false)
}

/// Check if S3 tests are enabled via environment variable
pub fn is_s3_enabled() -> bool {
    is_test_enabled("ENABLE_S3_TESTS")
}

/// Load test configuration from config.toml
pub fn load_test_config() -> Result<Config, anyhow::Error> {
    let config_path = "config.toml";

    load_config(config_path).map_err(|e| anyhow::anyhow!("Failed to load config.toml: {}", e))
}

/// Key prefix no other test run will use
pub fn unique_prefix() -> String {
    format!("reassembler-test-{}", Uuid::new_v4())
}

/// Manifest body as the uploading client writes it
pub fn manifest_json(session_id: &str, original_file_name: &str, total_chunks: u32) -> String {
    json!({
        "sessionId": session_id,
        "originalFileName": original_file_name,
        "totalChunks": total_chunks,
        "timestamp": 1_700_000_000_000u64,
    })
    .to_string()
}

/// A storage notification carrying one object key
pub fn storage_event(bucket: &str, key: &str) -> serde_json::Value {
    json!({
        "Records": [{
            "eventSource": "aws:s3",
            "eventName": "ObjectCreated:Put",
            "s3": {
                "bucket": { "name": bucket },
                "object": { "key": key, "size": 0 }
            }
        }]
    })
}
