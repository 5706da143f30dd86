use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub s3: S3Config,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub reassembly: ReassemblyConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// MinIO and most self-hosted stores need path-style requests
    #[serde(default)]
    pub force_path_style: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// SQLite file holding the chunk-session and resource tables
    pub db_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// Smallest part the store accepts in a multipart upload, last part excepted
    pub min_segment_size_bytes: u64,
    /// Upper bound on the bytes the direct path may hold in memory
    pub max_direct_merge_bytes: u64,
    pub url_validity_seconds: u64,
    /// How long a merge claim blocks other invocations before it can be taken over
    pub claim_lease_seconds: u64,
    /// User-metadata key compared against the session id during discovery
    pub session_tag: String,
    pub content_type: String,
    pub manifest_cache_size: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            min_segment_size_bytes: 5 * 1024 * 1024,
            max_direct_merge_bytes: 1024 * 1024 * 1024,
            url_validity_seconds: 7 * 24 * 60 * 60,
            claim_lease_seconds: 15 * 60,
            session_tag: "timestamp".to_string(),
            content_type: "image/tiff".to_string(),
            manifest_cache_size: 256,
        }
    }
}

impl ReassemblyConfig {
    pub fn url_validity(&self) -> Duration {
        Duration::from_secs(self.url_validity_seconds)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_seconds: u64,
    /// Pending sessions untouched for this long are picked up by the sweeper
    pub stale_after_seconds: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            stale_after_seconds: 120,
        }
    }
}

impl SweepConfig {
    /// Never zero, `tokio::time::interval` panics on a zero period
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub path: String,
    /// Maximum size of one log file in MiB
    pub size: u64,
    pub max_files: usize,
}

pub fn load_config(path: &str) -> Result<Config> {
    let config_text = fs::read_to_string(Path::new(path))?;
    let config: Config = toml::from_str(&config_text)?;
    Ok(config)
}
