use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncSeek};

use crate::config::NetworkPolicy;

/// Piece scheduling hint for one file of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    None,
    #[default]
    Normal,
    High,
}

/// One file of a transfer as declared by its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path including subdirectories; may be empty for broken metadata.
    pub display_path: String,
    pub length: u64,
}

/// Seekable byte stream over a single file of a transfer.
pub trait FileReader: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> FileReader for T {}

/// Everything an engine needs to come up.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Where transfer payload is materialised.
    pub download_dir: PathBuf,
    /// Engine-private state (piece completion, DHT tables).
    pub data_dir: PathBuf,
    pub network: NetworkPolicy,
}

/// Builds a fresh engine each time the session is (re)initialised.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self, options: EngineOptions) -> Result<Arc<dyn TransferEngine>>;
}

#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Begin adding a magnet. Returns as soon as the engine accepted it;
    /// metadata arrives later, see [`TransferHandle::wait_for_metadata`].
    async fn add_magnet(&self, uri: &str) -> Result<Arc<dyn TransferHandle>>;

    /// Stop all networking and release engine resources.
    async fn close(&self);
}

/// One active transfer. Read methods are only meaningful once metadata is known.
#[async_trait]
pub trait TransferHandle: Send + Sync {
    /// Resolves once the info dictionary has been fetched from peers.
    async fn wait_for_metadata(&self) -> Result<()>;

    /// Lowercase hex content identifier.
    fn info_hash(&self) -> String;

    /// Files in stable ordinal order.
    fn files(&self) -> Vec<FileInfo>;

    /// Verified bytes of the file at `index`.
    fn bytes_completed(&self, index: usize) -> u64;

    fn set_priority(&self, index: usize, priority: Priority);

    /// Open a reader over the logical byte range of the file at `index`.
    async fn open_reader(&self, index: usize) -> Result<Box<dyn FileReader>>;

    /// Remove the transfer from the engine. Payload on disk is kept.
    async fn drop_transfer(&self);
}

/// Factory used when the crate is built without a transfer backend.
pub struct DisabledEngineFactory;

#[async_trait]
impl EngineFactory for DisabledEngineFactory {
    async fn create(&self, _options: EngineOptions) -> Result<Arc<dyn TransferEngine>> {
        Err(anyhow::anyhow!(
            "no transfer engine compiled in (enable the `rqbit` feature)"
        ))
    }
}
