use crate::reassembly::manifest::MANIFEST_SUFFIX;
use crate::reassembly::ordering::file_name_of;
use crate::s3::{ObjectSummary, Storage, StorageError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

static PART_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+)\.part\d+$").expect("valid part group pattern"));

/// Which heuristic produced a candidate set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStrategy {
    /// Key contains `{bookingId}/{sessionId}` or the bare session id
    SessionInKey,
    /// A user-metadata tag on the object equals the session id
    MetadataTag,
    /// Largest `.partN` group by basename
    NamingConvention,
}

impl fmt::Display for DiscoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscoveryStrategy::SessionInKey => "session-in-key",
            DiscoveryStrategy::MetadataTag => "metadata-tag",
            DiscoveryStrategy::NamingConvention => "naming-convention",
        };
        f.write_str(name)
    }
}

/// Candidate chunk keys, sorted and free of duplicates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub keys: Vec<String>,
    pub strategy: DiscoveryStrategy,
}

/// Manifests and earlier merge outputs are never chunks
pub fn is_chunk_candidate(key: &str) -> bool {
    !key.contains(MANIFEST_SUFFIX) && !file_name_of(key).starts_with("reassembled_")
}

/// The session id appears in the key, either as the
/// folder under the booking or anywhere in the name
pub fn match_session_in_key(
    listing: &[ObjectSummary],
    booking_id: &str,
    session_id: &str,
) -> BTreeSet<String> {
    if session_id.is_empty() {
        return BTreeSet::new();
    }
    let path = format!("{booking_id}/{session_id}");
    listing
        .iter()
        .map(|object| object.key.as_str())
        .filter(|key| is_chunk_candidate(key))
        .filter(|key| key.contains(&path) || key.contains(session_id))
        .map(str::to_string)
        .collect()
}

/// Group `.partN` keys by the text before the suffix and keep
/// the largest group; ties go to the lexicographically first basename
pub fn match_naming_convention(listing: &[ObjectSummary]) -> BTreeSet<String> {
    let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for object in listing {
        if !is_chunk_candidate(&object.key) {
            continue;
        }
        let lowered = object.key.to_lowercase();
        if let Some(captures) = PART_GROUP.captures(&lowered) {
            groups
                .entry(captures[1].to_string())
                .or_default()
                .insert(object.key.clone());
        }
    }

    let mut best: Option<(String, BTreeSet<String>)> = None;
    for (base, keys) in groups {
        if best.as_ref().map_or(true, |(_, current)| keys.len() > current.len()) {
            best = Some((base, keys));
        }
    }

    match best {
        Some((base, keys)) => {
            debug!("Best naming-convention group {} has {} parts", base, keys.len());
            keys
        }
        None => BTreeSet::new(),
    }
}

/// Uploader session ids are millisecond timestamps embedded in key names
/// as `_`-separated tokens; group keys by the first such token and return
/// the most populated group
pub fn session_from_timestamp_tokens(
    listing: &[ObjectSummary],
) -> Option<(String, Vec<String>)> {
    let mut groups: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for object in listing {
        let token = object
            .key
            .split('_')
            .find(|token| token.len() >= 13 && token.bytes().all(|b| b.is_ascii_digit()));
        if let Some(token) = token {
            groups.entry(token).or_default().push(object.key.clone());
        }
    }

    let mut best: Option<(&str, Vec<String>)> = None;
    for (token, keys) in groups {
        if best.as_ref().map_or(true, |(_, current)| keys.len() > current.len()) {
            best = Some((token, keys));
        }
    }
    best.map(|(token, keys)| (token.to_string(), keys))
}

/// Finds the chunk objects of a session under its booking folder
pub struct ChunkDiscovery<S: Storage> {
    storage: Arc<S>,
    session_tag: String,
}

impl<S: Storage> ChunkDiscovery<S> {
    pub fn new(storage: Arc<S>, session_tag: impl Into<String>) -> Self {
        Self {
            storage,
            session_tag: session_tag.into(),
        }
    }

    /// Run the strategy chain, returning the first non-empty candidate set
    pub async fn discover(
        &self,
        booking_id: &str,
        session_id: &str,
    ) -> Result<Option<Discovered>, StorageError> {
        let listing = self.storage.list_objects(&format!("{booking_id}/")).await?;
        debug!(
            "Discovering chunks for session {} among {} objects of booking {}",
            session_id,
            listing.len(),
            booking_id
        );

        let keys = match_session_in_key(&listing, booking_id, session_id);
        if !keys.is_empty() {
            return Ok(Some(Self::found(session_id, DiscoveryStrategy::SessionInKey, keys)));
        }

        let keys = self.match_metadata_tag(&listing, session_id).await;
        if !keys.is_empty() {
            return Ok(Some(Self::found(session_id, DiscoveryStrategy::MetadataTag, keys)));
        }

        let keys = match_naming_convention(&listing);
        if keys.is_empty() {
            info!("No chunks found for session {}", session_id);
            return Ok(None);
        }
        Ok(Some(Self::found(
            session_id,
            DiscoveryStrategy::NamingConvention,
            keys,
        )))
    }

    fn found(session_id: &str, strategy: DiscoveryStrategy, keys: BTreeSet<String>) -> Discovered {
        info!(
            "Found {} candidate chunks for session {} by {}",
            keys.len(),
            session_id,
            strategy
        );
        Discovered {
            keys: keys.into_iter().collect(),
            strategy,
        }
    }

    /// One HEAD per `part`-named object, comparing the
    /// configured user-metadata tag with the session id
    async fn match_metadata_tag(
        &self,
        listing: &[ObjectSummary],
        session_id: &str,
    ) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        if session_id.is_empty() {
            return keys;
        }

        for object in listing {
            if !is_chunk_candidate(&object.key) || !object.key.to_lowercase().contains("part") {
                continue;
            }
            match self.storage.head_object(&object.key).await {
                Ok(head) => {
                    if head.metadata.get(&self.session_tag).map(String::as_str) == Some(session_id)
                    {
                        keys.insert(object.key.clone());
                    }
                }
                // Unreadable objects simply do not match
                Err(e) => debug!("Skipping metadata of {}: {}", object.key, e),
            }
        }
        keys
    }
}
