// Per-file download progress.

use serde::Serialize;

use super::monitor::MonitorState;
use crate::transfer::traits::TransferHandle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub completed: u64,
    pub total: u64,
    /// Percentage in `0.0..=100.0`; zero while the size is unknown.
    pub progress: f64,
    pub done: bool,
    /// State of the background monitor for this file, if one was started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorState>,
}

impl DownloadProgress {
    pub fn new(completed: u64, total: u64) -> Self {
        let progress = if total > 0 {
            completed as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            completed,
            total,
            progress,
            done: total > 0 && completed == total,
            monitor: None,
        }
    }

    /// Read the current progress of the file at `index` from the engine.
    pub fn measure(handle: &dyn TransferHandle, index: usize) -> Self {
        let total = handle
            .files()
            .get(index)
            .map(|f| f.length)
            .unwrap_or(0);
        Self::new(handle.bytes_completed(index), total)
    }

    pub fn with_monitor(mut self, monitor: Option<MonitorState>) -> Self {
        self.monitor = monitor;
        self
    }
}
