// Mutable session state shared by lifecycle calls and the HTTP handler.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::monitor::MonitorSet;
use super::registry::TransferRegistry;
use crate::error::{Result, SessionError};
use crate::server::handler::StreamServer;
use crate::transfer::traits::{TransferEngine, TransferHandle};

pub type SharedState = Arc<Mutex<SessionState>>;

/// Handle the HTTP handler keeps; it must not keep the session alive.
pub type WeakState = Weak<Mutex<SessionState>>;

/// Everything that exists only between Init and Shutdown. Engine, listener
/// and download dir live and die together.
pub struct ActiveEngine {
    pub engine: Arc<dyn TransferEngine>,
    pub server: StreamServer,
    pub download_dir: PathBuf,
    pub data_dir: PathBuf,
}

#[derive(Default)]
pub struct SessionState {
    pub active: Option<ActiveEngine>,
    pub registry: TransferRegistry,
    pub monitors: MonitorSet,
    /// Bumped on every Init and Shutdown; work started under an older
    /// generation must not touch the current one.
    pub generation: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Result<&ActiveEngine> {
        self.active.as_ref().ok_or(SessionError::NotInitialized)
    }

    /// Look up a registered transfer; `None` when uninitialised or unknown.
    pub fn lookup(&self, hash: &str) -> Option<Arc<dyn TransferHandle>> {
        self.active.as_ref()?;
        self.registry.get(hash)
    }

    /// Tear down the current generation: monitors, transfers, engine, listener.
    /// Returns `false` if nothing was running.
    pub async fn teardown(&mut self, grace: Duration) -> bool {
        self.generation += 1;
        self.monitors.cancel_all();

        let transfers = self.registry.drain();
        let Some(active) = self.active.take() else {
            for handle in transfers {
                handle.drop_transfer().await;
            }
            return false;
        };

        debug!("dropping {} transfers", transfers.len());
        for handle in transfers {
            handle.drop_transfer().await;
        }
        active.engine.close().await;
        active.server.shutdown(grace).await;
        info!(
            "session torn down, download dir was {}",
            active.download_dir.display()
        );
        true
    }
}
