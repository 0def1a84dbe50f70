// Background download monitors, one per (identifier, file index).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::progress::DownloadProgress;
use crate::transfer::traits::TransferHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Running,
    Completed,
    Cancelled,
}

pub type MonitorKey = (String, usize);

struct MonitorEntry {
    token: CancellationToken,
    state: Arc<Mutex<MonitorState>>,
}

impl Drop for MonitorEntry {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Monitors of the current session generation.
#[derive(Default)]
pub struct MonitorSet {
    monitors: HashMap<MonitorKey, MonitorEntry>,
}

impl MonitorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a monitor for `key` unless one is already running.
    /// Returns `true` if a new monitor was started.
    pub fn start(
        &mut self,
        key: MonitorKey,
        handle: Arc<dyn TransferHandle>,
        destination: PathBuf,
        interval: Duration,
    ) -> bool {
        if self.state(&key) == Some(MonitorState::Running) {
            debug!("monitor for {}#{} already running", key.0, key.1);
            return false;
        }

        let token = CancellationToken::new();
        let state = Arc::new(Mutex::new(MonitorState::Running));
        tokio::spawn(run_monitor(
            handle,
            key.1,
            destination,
            interval,
            token.clone(),
            state.clone(),
        ));
        self.monitors.insert(key, MonitorEntry { token, state });
        true
    }

    pub fn state(&self, key: &MonitorKey) -> Option<MonitorState> {
        self.monitors.get(key).map(|m| *m.state.lock())
    }

    /// Cancel the monitor for `key`. Returns `true` if it was still running.
    pub fn cancel(&mut self, key: &MonitorKey) -> bool {
        match self.monitors.remove(key) {
            Some(entry) => *entry.state.lock() == MonitorState::Running,
            None => false,
        }
    }

    /// Cancel every monitor and forget them all.
    pub fn cancel_all(&mut self) {
        let running = self
            .monitors
            .values()
            .filter(|m| *m.state.lock() == MonitorState::Running)
            .count();
        self.monitors.clear();
        if running > 0 {
            debug!("cancelled {} running download monitors", running);
        }
    }

    pub fn running(&self) -> usize {
        self.monitors
            .values()
            .filter(|m| *m.state.lock() == MonitorState::Running)
            .count()
    }
}

async fn run_monitor(
    handle: Arc<dyn TransferHandle>,
    index: usize,
    destination: PathBuf,
    interval: Duration,
    token: CancellationToken,
    state: Arc<Mutex<MonitorState>>,
) {
    info!(
        "download monitor started for file {} to {}",
        index,
        destination.display()
    );

    let mut ticker = tokio::time::interval(interval);
    // First tick fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                *state.lock() = MonitorState::Cancelled;
                debug!("download monitor for {} cancelled", destination.display());
                return;
            }
            _ = ticker.tick() => {}
        }

        let progress = DownloadProgress::measure(handle.as_ref(), index);
        if progress.done {
            *state.lock() = MonitorState::Completed;
            info!("download complete for {}", destination.display());
            return;
        }
        info!(
            "download progress: {:.2}% ({}/{} bytes) {}",
            progress.progress,
            progress.completed,
            progress.total,
            destination.display()
        );
    }
}
