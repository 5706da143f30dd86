use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

const DEFAULT_FILE_NAME: &str = "reassembled.tif";

// First match wins
static PART_PATTERNS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"\.part(\d+)$").expect("valid part pattern"),
        Regex::new(r"_part(\d+)_").expect("valid part pattern"),
        Regex::new(r"part(\d+)").expect("valid part pattern"),
    ]
});

static PART_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.part\d+$").expect("valid part suffix pattern"));

/// Part index encoded in a chunk key, or 0 when the key carries none
pub fn part_index(key: &str) -> u64 {
    let lowered = key.to_lowercase();
    PART_PATTERNS
        .iter()
        .filter_map(|pattern| pattern.captures(&lowered))
        .find_map(|captures| captures[1].parse::<u64>().ok())
        .unwrap_or(0)
}

/// Sort chunk keys by part index
///
/// The sort is stable: keys with equal (or missing) indexes keep their
/// input order.
pub fn order_chunks(keys: &[String]) -> Vec<String> {
    let mut ordered = keys.to_vec();
    ordered.sort_by_key(|key| part_index(key));
    ordered
}

/// Last path segment of an object key
pub fn file_name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Output file name for a merged upload: the original name without any
/// `.partN` tail and with a TIFF extension
pub fn clean_file_name(original: &str) -> String {
    let mut name = file_name_of(original.trim()).to_string();

    if let Some(index) = PART_SUFFIX.find(&name).map(|m| m.start()) {
        if index > 0 {
            name.truncate(index);
        }
    }

    if name.is_empty() {
        return DEFAULT_FILE_NAME.to_string();
    }

    let lowered = name.to_ascii_lowercase();
    if !lowered.ends_with(".tif") && !lowered.ends_with(".tiff") {
        name.push_str(".tif");
    }
    name
}

/// `geotiff_{unix seconds}_{8 hex chars}`
pub fn new_resource_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("geotiff_{}_{}", now.timestamp(), &suffix[..8])
}

pub fn output_key(booking_id: &str, resource_id: &str, file_name: &str) -> String {
    format!("{booking_id}/reassembled_{resource_id}_{file_name}")
}
