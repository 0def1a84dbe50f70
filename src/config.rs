use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Maximum time to wait for torrent metadata after adding a magnet (30 s).
pub const METADATA_TIMEOUT_SECS: u64 = 30;

/// Interval between progress checks of a background download monitor (5 s).
pub const PROGRESS_POLL_INTERVAL_MS: u64 = 5_000;

/// Upper bound on graceful HTTP listener shutdown (5 s).
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

/// First port tried for the streaming listener.
pub const PORT_SCAN_BASE: u16 = 8080;

/// Number of consecutive ports tried before giving up.
pub const PORT_SCAN_SPAN: u16 = 100;

/// Subdirectory of the cache dir used when no better download dir is available.
pub const FALLBACK_DOWNLOAD_SUBDIR: &str = "torrentstreamer_downloads";

/// Subdirectory of the cache dir holding engine-internal state.
pub const ENGINE_DATA_SUBDIR: &str = "torrentstreamer_data";

/// Marker file created and removed to prove the download dir is writable.
pub const WRITE_PROBE_FILE: &str = ".write_test";

/// Number of identifier characters prefixed to legacy flat file names.
pub const LEGACY_HASH_PREFIX_LEN: usize = 8;

/// Shared storage Download folder on Android devices.
#[cfg(target_os = "android")]
pub const ANDROID_DOWNLOAD_DIR: &str = "/storage/emulated/0/Download";

/// Networking policy handed to the transfer engine on construction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NetworkPolicy {
    /// Peer discovery through the DHT.
    pub enable_dht: bool,
    /// Ask the gateway to forward the engine's listen port.
    pub upnp_port_forwarding: bool,
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        Self {
            enable_dht: true,
            upnp_port_forwarding: false,
        }
    }
}

/// Top-level configuration for a torrent session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// First port tried for the streaming listener; 0 binds an ephemeral port.
    pub port_scan_base: u16,
    pub port_scan_span: u16,
    pub metadata_timeout_secs: u64,
    pub progress_poll_interval_ms: u64,
    pub shutdown_grace_secs: u64,
    /// Depth limit of the legacy-layout directory walk.
    pub legacy_search_max_depth: usize,
    /// Entry limit of the legacy-layout directory walk.
    pub legacy_search_max_entries: usize,
    /// Preferred download directory when the host passes none.
    pub default_download_dir: Option<PathBuf>,
    pub network: NetworkPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_scan_base: PORT_SCAN_BASE,
            port_scan_span: PORT_SCAN_SPAN,
            metadata_timeout_secs: METADATA_TIMEOUT_SECS,
            progress_poll_interval_ms: PROGRESS_POLL_INTERVAL_MS,
            shutdown_grace_secs: SHUTDOWN_GRACE_SECS,
            legacy_search_max_depth: 8,
            legacy_search_max_entries: 50_000,
            default_download_dir: platform_download_dir(),
            network: NetworkPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn progress_poll_interval(&self) -> Duration {
        Duration::from_millis(self.progress_poll_interval_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(target_os = "android")]
fn platform_download_dir() -> Option<PathBuf> {
    Some(PathBuf::from(ANDROID_DOWNLOAD_DIR))
}

#[cfg(not(target_os = "android"))]
fn platform_download_dir() -> Option<PathBuf> {
    dirs::download_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg = SessionConfig::from_json(
            r#"{"port_scan_base": 0, "network": {"upnp_port_forwarding": true}}"#,
        )
        .unwrap();
        assert_eq!(cfg.port_scan_base, 0);
        assert_eq!(cfg.port_scan_span, PORT_SCAN_SPAN);
        assert_eq!(cfg.metadata_timeout(), Duration::from_secs(30));
        assert!(cfg.network.upnp_port_forwarding);
        assert!(cfg.network.enable_dht);
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let cfg = SessionConfig {
            progress_poll_interval_ms: 0,
            ..SessionConfig::default()
        };
        assert_eq!(cfg.progress_poll_interval(), Duration::from_millis(1));
    }
}
