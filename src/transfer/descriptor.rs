// Classification of host-supplied transfer descriptors.

use url::Url;

use crate::error::{Result, SessionError};

/// Length of a hex-encoded SHA-1 info hash.
pub const INFO_HASH_HEX_LEN: usize = 40;

/// Accept magnet URIs, reject everything else with a message the user can act on.
pub fn validate_descriptor(descriptor: &str) -> Result<&str> {
    let descriptor = descriptor.trim();
    if descriptor.starts_with("magnet:") {
        Ok(descriptor)
    } else if descriptor.starts_with("http://") || descriptor.starts_with("https://") {
        Err(SessionError::DirectLinkUnsupported)
    } else {
        Err(SessionError::InvalidInput(
            "Invalid input format. Please provide a valid magnet URI.".into(),
        ))
    }
}

/// Extract the hex btih info hash of a magnet URI, lowercased.
///
/// Base32 hashes are not decoded here; adapters that need them rely on the
/// engine to report the identifier once metadata is known.
pub fn magnet_info_hash(uri: &str) -> Option<String> {
    let url = Url::parse(uri).ok()?;
    if url.scheme() != "magnet" {
        return None;
    }
    url.query_pairs()
        .filter(|(k, _)| k == "xt")
        .find_map(|(_, v)| v.strip_prefix("urn:btih:").map(str::to_owned))
        .filter(|h| is_hex_info_hash(h))
        .map(|h| h.to_ascii_lowercase())
}

pub fn is_hex_info_hash(s: &str) -> bool {
    s.len() == INFO_HASH_HEX_LEN && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Normalise a caller-supplied identifier for registry lookups.
pub fn normalize_identifier(hash: &str) -> String {
    hash.trim().to_ascii_lowercase()
}
