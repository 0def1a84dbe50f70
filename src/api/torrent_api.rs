// Host boundary: every call returns an owned String. Failures are rendered as
// "Error: ..." so the app shell can show them verbatim.

use std::sync::Arc;

use flutter_rust_bridge::frb;
use serde::Serialize;

use crate::config::SessionConfig;
use crate::engine::session::TorrentSession;
use crate::error::Result;
use crate::transfer::traits::EngineFactory;

/// Opaque handle the host keeps for the lifetime of the app.
#[frb(opaque)]
pub struct TorrentStreamer {
    session: TorrentSession,
}

impl TorrentStreamer {
    /// Streamer with default configuration and the compiled-in engine.
    #[frb(sync)]
    pub fn new() -> Self {
        Self::with_factory(SessionConfig::default(), default_factory())
    }

    /// Streamer configured from a JSON object; unknown fields are ignored and
    /// missing ones take their defaults.
    #[frb(sync)]
    pub fn from_config_json(config_json: String) -> std::result::Result<Self, String> {
        let config = SessionConfig::from_json(&config_json)
            .map_err(|e| format!("Error: invalid config: {e}"))?;
        Ok(Self::with_factory(config, default_factory()))
    }

    #[frb(ignore)]
    pub fn with_factory(config: SessionConfig, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            session: TorrentSession::new(config, factory),
        }
    }

    #[frb(ignore)]
    pub fn session(&self) -> &TorrentSession {
        &self.session
    }

    pub async fn init_client(&self, cache_dir: String, custom_download_dir: String) -> String {
        render(
            self.session.init(&cache_dir, &custom_download_dir).await,
            |status| status,
        )
    }

    pub async fn shutdown_client(&self) -> String {
        self.session.shutdown().await
    }

    /// Returns the content identifier of the added torrent.
    pub async fn add_torrent(&self, magnet_uri: String) -> String {
        render(self.session.add_transfer(&magnet_uri).await, |id| id)
    }

    pub async fn get_stream_url(&self, info_hash: String, file_index: u32) -> String {
        render(
            self.session
                .stream_url(&info_hash, file_index as usize)
                .await,
            |url| url,
        )
    }

    /// JSON array of `{name, path, size, index, mimeType}`.
    pub async fn list_files(&self, info_hash: String) -> String {
        render_json(self.session.list_files(&info_hash).await, "file list")
    }

    /// Path the file is (or will be) stored at.
    pub async fn download_file(&self, info_hash: String, file_index: u32) -> String {
        render(
            self.session
                .download_file(&info_hash, file_index as usize)
                .await,
            |path| path.to_string_lossy().into_owned(),
        )
    }

    /// JSON object `{completed, total, progress, done[, monitor]}`.
    pub async fn get_download_progress(&self, info_hash: String, file_index: u32) -> String {
        render_json(
            self.session.progress(&info_hash, file_index as usize).await,
            "progress",
        )
    }

    pub async fn cancel_download(&self, info_hash: String, file_index: u32) -> String {
        render(
            self.session
                .cancel_download(&info_hash, file_index as usize)
                .await,
            |was_running| {
                if was_running {
                    "Download monitor cancelled".to_string()
                } else {
                    "No active download monitor".to_string()
                }
            },
        )
    }
}

impl Default for TorrentStreamer {
    fn default() -> Self {
        Self::new()
    }
}

fn render<T>(result: Result<T>, ok: impl FnOnce(T) -> String) -> String {
    match result {
        Ok(value) => ok(value),
        Err(e) => format!("Error: {e}"),
    }
}

fn render_json<T: Serialize>(result: Result<T>, what: &str) -> String {
    render(result, |value| {
        serde_json::to_string(&value)
            .unwrap_or_else(|e| format!("Error: marshaling {what}: {e}"))
    })
}

#[cfg(feature = "rqbit")]
fn default_factory() -> Arc<dyn EngineFactory> {
    Arc::new(crate::transfer::rqbit::RqbitEngineFactory)
}

#[cfg(not(feature = "rqbit"))]
fn default_factory() -> Arc<dyn EngineFactory> {
    Arc::new(crate::transfer::traits::DisabledEngineFactory)
}
