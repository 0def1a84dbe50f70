// Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ma_torrent_engine::config::SessionConfig;
use ma_torrent_engine::transfer::memory::{MemoryCatalog, MemoryEngineFactory, MemoryTorrent};
use ma_torrent_engine::TorrentSession;
use tempfile::TempDir;

pub const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const UNKNOWN_HASH: &str = "ffffffffffffffffffffffffffffffffffffffff";

pub const VIDEO_SIZE: usize = 1024 * 1024 + 17;

/// Generate deterministic test content.
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ seed).collect()
}

pub fn test_config() -> SessionConfig {
    SessionConfig {
        port_scan_base: 0,
        metadata_timeout_secs: 5,
        progress_poll_interval_ms: 20,
        shutdown_grace_secs: 1,
        default_download_dir: None,
        ..SessionConfig::default()
    }
}

pub struct Harness {
    pub session: Arc<TorrentSession>,
    pub factory: MemoryEngineFactory,
    /// Two-file torrent: a video in a subdirectory and a subtitle.
    pub movie: Arc<MemoryTorrent>,
    pub cache: TempDir,
    pub downloads: TempDir,
}

impl Harness {
    pub fn new(config: SessionConfig) -> Self {
        let catalog = MemoryCatalog::new();
        let movie = catalog.insert(
            HASH_A,
            vec![
                ("Movie/movie.mp4".into(), payload(VIDEO_SIZE, 0)),
                ("Movie/movie.srt".into(), payload(300, 7)),
            ],
        );
        let factory = MemoryEngineFactory::new(catalog);
        Self {
            session: Arc::new(TorrentSession::new(config, Arc::new(factory.clone()))),
            factory,
            movie,
            cache: tempfile::tempdir().unwrap(),
            downloads: tempfile::tempdir().unwrap(),
        }
    }

    pub fn catalog(&self) -> &MemoryCatalog {
        self.factory.catalog()
    }

    pub fn cache_dir(&self) -> &str {
        self.cache.path().to_str().unwrap()
    }

    pub fn download_dir(&self) -> &str {
        self.downloads.path().to_str().unwrap()
    }

    pub async fn init(&self) -> String {
        self.session
            .init(self.cache_dir(), self.download_dir())
            .await
            .unwrap()
    }

    /// Initialise and add the movie torrent; returns its identifier.
    pub async fn with_movie(&self) -> String {
        self.init().await;
        self.session.add_transfer(&self.movie.magnet()).await.unwrap()
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
