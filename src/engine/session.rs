// Torrent session: one engine generation at a time, its registry, listener and downloads.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::monitor::MonitorState;
use super::progress::DownloadProgress;
use super::registry::{display_path_or_placeholder, file_at, file_entries, FileEntry};
use super::resolver::{destination_path, locate_completed, LegacySearch};
use super::state::{ActiveEngine, SessionState, SharedState};
use super::storage::{create_private_dir, prepare_storage};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::server::handler::StreamServer;
use crate::transfer::descriptor::{normalize_identifier, validate_descriptor};
use crate::transfer::traits::{EngineFactory, EngineOptions, Priority};

/// Session layer over a transfer engine. Cheap to share behind an `Arc`;
/// every operation takes `&self`.
pub struct TorrentSession {
    config: SessionConfig,
    factory: Arc<dyn EngineFactory>,
    state: SharedState,
}

impl TorrentSession {
    pub fn new(config: SessionConfig, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            config,
            factory,
            state: Arc::new(Mutex::new(SessionState::new())),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a fresh engine generation, tearing down any previous one first.
    /// Returns a human-readable status line.
    pub async fn init(&self, cache_dir: &str, custom_download_dir: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        if state.teardown(self.config.shutdown_grace()).await {
            info!("re-initialising: previous engine torn down");
        }

        let layout = prepare_storage(
            cache_dir,
            custom_download_dir,
            self.config.default_download_dir.as_deref(),
        )?;

        let engine = self
            .factory
            .create(EngineOptions {
                download_dir: layout.download_dir.clone(),
                data_dir: layout.data_dir.clone(),
                network: self.config.network.clone(),
            })
            .await?;

        let server = match StreamServer::start(
            Arc::downgrade(&self.state),
            self.config.port_scan_base,
            self.config.port_scan_span,
        )
        .await
        {
            Ok(server) => server,
            Err(e) => {
                engine.close().await;
                return Err(e);
            }
        };

        let status = format!(
            "Torrent client initialized successfully. Download directory: {}, Streaming on port: {}",
            layout.download_dir.display(),
            server.port()
        );
        state.generation += 1;
        state.active = Some(ActiveEngine {
            engine,
            server,
            download_dir: layout.download_dir,
            data_dir: layout.data_dir,
        });
        info!("{}", status);
        Ok(status)
    }

    /// Drop every transfer, close the engine and the listener.
    /// Calling it without an active engine is not an error.
    pub async fn shutdown(&self) -> String {
        let mut state = self.state.lock().await;
        if state.teardown(self.config.shutdown_grace()).await {
            "Torrent client shut down successfully".to_string()
        } else {
            "Torrent client not initialized".to_string()
        }
    }

    /// Add a magnet and wait for its metadata. Returns the content identifier.
    pub async fn add_transfer(&self, descriptor: &str) -> Result<String> {
        let (engine, generation) = {
            let state = self.state.lock().await;
            (state.active()?.engine.clone(), state.generation)
        };
        let magnet = validate_descriptor(descriptor)?;
        info!("adding transfer {}", magnet);

        let handle = engine.add_magnet(magnet).await?;

        // The wait runs without the session lock; peers may take a while.
        let timeout = self.config.metadata_timeout();
        match tokio::time::timeout(timeout, handle.wait_for_metadata()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(SessionError::EngineFailure(e)),
            Err(_) => {
                // The engine keeps fetching in the background; a later add of
                // the same magnet picks the transfer up again.
                warn!("timed out waiting for torrent info: {}", magnet);
                return Err(SessionError::MetadataTimeout(timeout));
            }
        }

        let mut state = self.state.lock().await;
        if state.generation != generation || state.active.is_none() {
            drop(state);
            handle.drop_transfer().await;
            return Err(SessionError::EngineFailure(anyhow!(
                "session was re-initialised while waiting for metadata"
            )));
        }
        let id = state.registry.insert(handle);
        info!("successfully added torrent with hash: {}", id);
        Ok(id)
    }

    /// Local URL a player can stream the file from.
    pub async fn stream_url(&self, hash: &str, file_index: usize) -> Result<String> {
        let state = self.state.lock().await;
        let active = state.active()?;
        let handle = state.registry.require(hash)?;
        file_at(handle.as_ref(), file_index)?;
        Ok(active
            .server
            .url_for(&normalize_identifier(hash), file_index))
    }

    pub async fn list_files(&self, hash: &str) -> Result<Vec<FileEntry>> {
        let state = self.state.lock().await;
        state.active()?;
        let handle = state.registry.require(hash)?;
        Ok(file_entries(handle.as_ref()))
    }

    /// Resolve where a file is (if complete) or will be written, raise its
    /// priority and start a monitor for it while incomplete.
    pub async fn download_file(&self, hash: &str, file_index: usize) -> Result<PathBuf> {
        let (handle, download_dir, generation) = {
            let state = self.state.lock().await;
            let active = state.active()?;
            (
                state.registry.require(hash)?,
                active.download_dir.clone(),
                state.generation,
            )
        };
        let id = normalize_identifier(hash);

        let file = file_at(handle.as_ref(), file_index)?;
        let display_path = display_path_or_placeholder(&file, file_index);
        let destination = destination_path(&download_dir, &display_path);
        if let Some(parent) = destination.parent() {
            create_private_dir(parent)
                .map_err(|e| SessionError::io("Error creating directory structure", e))?;
        }
        info!("download path: {}", destination.display());

        handle.set_priority(file_index, Priority::High);

        let progress = DownloadProgress::measure(handle.as_ref(), file_index);
        if progress.done {
            let limits = LegacySearch {
                max_depth: self.config.legacy_search_max_depth,
                max_entries: self.config.legacy_search_max_entries,
            };
            let (dir, dest, hash_owned, display) = (
                download_dir.clone(),
                destination.clone(),
                id.clone(),
                display_path.clone(),
            );
            let found = tokio::task::spawn_blocking(move || {
                locate_completed(&dir, &dest, &hash_owned, &display, limits)
            })
            .await
            .unwrap_or_else(|e| {
                debug!("legacy search task failed: {}", e);
                None
            });
            if let Some(path) = found {
                return Ok(path);
            }
            warn!(
                "file is reported complete but doesn't exist at expected locations: {}",
                destination.display()
            );
        }

        let mut state = self.state.lock().await;
        if state.generation == generation {
            state.monitors.start(
                (id, file_index),
                handle,
                destination.clone(),
                self.config.progress_poll_interval(),
            );
        }
        Ok(destination)
    }

    pub async fn progress(&self, hash: &str, file_index: usize) -> Result<DownloadProgress> {
        let state = self.state.lock().await;
        state.active()?;
        let handle = state.registry.require(hash)?;
        file_at(handle.as_ref(), file_index)?;
        let monitor = state
            .monitors
            .state(&(normalize_identifier(hash), file_index));
        Ok(DownloadProgress::measure(handle.as_ref(), file_index).with_monitor(monitor))
    }

    /// Stop monitoring a download. Returns `true` if a monitor was running.
    pub async fn cancel_download(&self, hash: &str, file_index: usize) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.active()?;
        if !state.registry.contains(hash) {
            return Err(SessionError::unknown_transfer(hash));
        }
        Ok(state
            .monitors
            .cancel(&(normalize_identifier(hash), file_index)))
    }

    pub async fn monitor_state(&self, hash: &str, file_index: usize) -> Option<MonitorState> {
        let state = self.state.lock().await;
        state.monitors.state(&(normalize_identifier(hash), file_index))
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.active.is_some()
    }

    pub async fn port(&self) -> Option<u16> {
        let state = self.state.lock().await;
        state.active.as_ref().map(|a| a.server.port())
    }

    pub async fn download_dir(&self) -> Option<PathBuf> {
        let state = self.state.lock().await;
        state.active.as_ref().map(|a| a.download_dir.clone())
    }

    pub async fn transfer_count(&self) -> usize {
        self.state.lock().await.registry.len()
    }
}
