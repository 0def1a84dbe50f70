// In-process transfer engine over in-memory payloads.
//
// Torrents are registered in a shared catalog up front; adding a magnet whose
// hash is not in the catalog is accepted but never yields metadata, the same
// way a real engine behaves with a magnet nobody seeds.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tokio::sync::watch;
use tracing::debug;

use super::descriptor::magnet_info_hash;
use super::traits::{
    EngineFactory, EngineOptions, FileInfo, FileReader, Priority, TransferEngine, TransferHandle,
};

struct MemoryFile {
    display_path: String,
    data: Bytes,
}

/// Payload and live state of one torrent known to a [`MemoryCatalog`].
pub struct MemoryTorrent {
    info_hash: String,
    files: Vec<MemoryFile>,
    completed: Mutex<Vec<u64>>,
    priorities: Mutex<Vec<Priority>>,
    metadata_tx: watch::Sender<bool>,
    /// Readers fail once their position reaches this offset.
    read_limit: Mutex<Option<u64>>,
    gate: Arc<Mutex<ReadGate>>,
    open_readers: Arc<AtomicUsize>,
}

/// Stalls readers at an offset until released.
#[derive(Default)]
struct ReadGate {
    paused_at: Option<u64>,
    waiting: Vec<Waker>,
}

impl MemoryTorrent {
    fn new(info_hash: &str, files: Vec<(String, Vec<u8>)>, metadata_ready: bool) -> Self {
        let count = files.len();
        let (metadata_tx, _) = watch::channel(metadata_ready);
        Self {
            info_hash: info_hash.to_ascii_lowercase(),
            files: files
                .into_iter()
                .map(|(display_path, data)| MemoryFile {
                    display_path,
                    data: Bytes::from(data),
                })
                .collect(),
            completed: Mutex::new(vec![0; count]),
            priorities: Mutex::new(vec![Priority::Normal; count]),
            metadata_tx,
            read_limit: Mutex::new(None),
            gate: Arc::default(),
            open_readers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn info_hash(&self) -> &str {
        &self.info_hash
    }

    /// Magnet URI that resolves to this torrent.
    pub fn magnet(&self) -> String {
        format!("magnet:?xt=urn:btih:{}&dn=memory", self.info_hash)
    }

    /// Make metadata available to every pending and future waiter.
    pub fn release_metadata(&self) {
        self.metadata_tx.send_replace(true);
    }

    pub fn set_completed(&self, index: usize, bytes: u64) {
        let mut completed = self.completed.lock();
        if let (Some(slot), Some(file)) = (completed.get_mut(index), self.files.get(index)) {
            *slot = bytes.min(file.data.len() as u64);
        }
    }

    pub fn complete_all(&self) {
        let mut completed = self.completed.lock();
        for (slot, file) in completed.iter_mut().zip(&self.files) {
            *slot = file.data.len() as u64;
        }
    }

    pub fn priority(&self, index: usize) -> Option<Priority> {
        self.priorities.lock().get(index).copied()
    }

    /// Simulate a peer disconnect once a reader has consumed `offset` bytes.
    pub fn fail_reads_at(&self, offset: u64) {
        *self.read_limit.lock() = Some(offset);
    }

    /// Stall every reader once its position reaches `offset`.
    pub fn pause_reads_at(&self, offset: u64) {
        self.gate.lock().paused_at = Some(offset);
    }

    /// Release readers stalled by [`MemoryTorrent::pause_reads_at`].
    pub fn resume_reads(&self) {
        let waiting = {
            let mut gate = self.gate.lock();
            gate.paused_at = None;
            std::mem::take(&mut gate.waiting)
        };
        for waker in waiting {
            waker.wake();
        }
    }

    /// Number of readers currently alive.
    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::SeqCst)
    }
}

/// Torrents the memory engine can "download", shared across engine generations.
#[derive(Clone, Default)]
pub struct MemoryCatalog {
    torrents: Arc<RwLock<HashMap<String, Arc<MemoryTorrent>>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a torrent whose metadata is immediately available.
    pub fn insert(&self, info_hash: &str, files: Vec<(String, Vec<u8>)>) -> Arc<MemoryTorrent> {
        self.insert_torrent(MemoryTorrent::new(info_hash, files, true))
    }

    /// Register a torrent whose metadata arrives only after
    /// [`MemoryTorrent::release_metadata`].
    pub fn insert_pending(
        &self,
        info_hash: &str,
        files: Vec<(String, Vec<u8>)>,
    ) -> Arc<MemoryTorrent> {
        self.insert_torrent(MemoryTorrent::new(info_hash, files, false))
    }

    pub fn get(&self, info_hash: &str) -> Option<Arc<MemoryTorrent>> {
        self.torrents.read().get(&info_hash.to_ascii_lowercase()).cloned()
    }

    fn insert_torrent(&self, torrent: MemoryTorrent) -> Arc<MemoryTorrent> {
        let torrent = Arc::new(torrent);
        self.torrents
            .write()
            .insert(torrent.info_hash.clone(), torrent.clone());
        torrent
    }
}

/// Factory handing out [`MemoryEngine`]s over one catalog.
#[derive(Clone, Default)]
pub struct MemoryEngineFactory {
    catalog: MemoryCatalog,
    engines: Arc<Mutex<Vec<Arc<MemoryEngine>>>>,
}

impl MemoryEngineFactory {
    pub fn new(catalog: MemoryCatalog) -> Self {
        Self {
            catalog,
            engines: Arc::default(),
        }
    }

    pub fn catalog(&self) -> &MemoryCatalog {
        &self.catalog
    }

    /// Every engine this factory created, oldest first.
    pub fn engines(&self) -> Vec<Arc<MemoryEngine>> {
        self.engines.lock().clone()
    }

    /// Engines not yet closed.
    pub fn open_engines(&self) -> usize {
        self.engines.lock().iter().filter(|e| !e.is_closed()).count()
    }
}

#[async_trait]
impl EngineFactory for MemoryEngineFactory {
    async fn create(&self, options: EngineOptions) -> Result<Arc<dyn TransferEngine>> {
        let engine = Arc::new(MemoryEngine::new(self.catalog.clone(), options));
        self.engines.lock().push(engine.clone());
        Ok(engine)
    }
}

pub struct MemoryEngine {
    catalog: MemoryCatalog,
    options: EngineOptions,
    handles: Mutex<HashMap<String, Arc<MemoryHandle>>>,
    closed: AtomicBool,
}

impl MemoryEngine {
    pub fn new(catalog: MemoryCatalog, options: EngineOptions) -> Self {
        Self {
            catalog,
            options,
            handles: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Transfers currently added and not dropped.
    pub fn active_transfers(&self) -> usize {
        self.handles
            .lock()
            .values()
            .filter(|h| !h.dropped.load(Ordering::SeqCst))
            .count()
    }
}

#[async_trait]
impl TransferEngine for MemoryEngine {
    async fn add_magnet(&self, uri: &str) -> Result<Arc<dyn TransferHandle>> {
        if self.is_closed() {
            return Err(anyhow!("engine closed"));
        }
        let info_hash =
            magnet_info_hash(uri).ok_or_else(|| anyhow!("magnet has no hex btih: {}", uri))?;

        let mut handles = self.handles.lock();
        if let Some(existing) = handles.get(&info_hash) {
            if !existing.dropped.load(Ordering::SeqCst) {
                return Ok(existing.clone());
            }
        }

        // Unknown torrents never produce metadata.
        let torrent = self
            .catalog
            .get(&info_hash)
            .unwrap_or_else(|| Arc::new(MemoryTorrent::new(&info_hash, Vec::new(), false)));
        let handle = Arc::new(MemoryHandle {
            torrent,
            dropped: AtomicBool::new(false),
        });
        handles.insert(info_hash.clone(), handle.clone());
        debug!("memory engine added {}", info_hash);
        Ok(handle)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for handle in self.handles.lock().drain().map(|(_, h)| h) {
            handle.dropped.store(true, Ordering::SeqCst);
        }
    }
}

pub struct MemoryHandle {
    torrent: Arc<MemoryTorrent>,
    dropped: AtomicBool,
}

#[async_trait]
impl TransferHandle for MemoryHandle {
    async fn wait_for_metadata(&self) -> Result<()> {
        let mut rx = self.torrent.metadata_tx.subscribe();
        rx.wait_for(|ready| *ready)
            .await
            .map_err(|_| anyhow!("metadata channel closed"))?;
        Ok(())
    }

    fn info_hash(&self) -> String {
        self.torrent.info_hash.clone()
    }

    fn files(&self) -> Vec<FileInfo> {
        if !*self.torrent.metadata_tx.borrow() {
            return Vec::new();
        }
        self.torrent
            .files
            .iter()
            .map(|f| FileInfo {
                display_path: f.display_path.clone(),
                length: f.data.len() as u64,
            })
            .collect()
    }

    fn bytes_completed(&self, index: usize) -> u64 {
        self.torrent.completed.lock().get(index).copied().unwrap_or(0)
    }

    fn set_priority(&self, index: usize, priority: Priority) {
        if let Some(slot) = self.torrent.priorities.lock().get_mut(index) {
            *slot = priority;
        }
    }

    async fn open_reader(&self, index: usize) -> Result<Box<dyn FileReader>> {
        if self.dropped.load(Ordering::SeqCst) {
            return Err(anyhow!("transfer {} was dropped", self.torrent.info_hash));
        }
        let file = self
            .torrent
            .files
            .get(index)
            .ok_or_else(|| anyhow!("no file at index {}", index))?;
        let limit = *self.torrent.read_limit.lock();
        Ok(Box::new(MemoryReader::new(
            file.data.clone(),
            limit,
            self.torrent.gate.clone(),
            self.torrent.open_readers.clone(),
        )))
    }

    async fn drop_transfer(&self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// Cursor over a file's bytes that keeps the torrent's open-reader count.
struct MemoryReader {
    inner: io::Cursor<Bytes>,
    limit: Option<u64>,
    gate: Arc<Mutex<ReadGate>>,
    open: Arc<AtomicUsize>,
}

impl MemoryReader {
    fn new(
        data: Bytes,
        limit: Option<u64>,
        gate: Arc<Mutex<ReadGate>>,
        open: Arc<AtomicUsize>,
    ) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self {
            inner: io::Cursor::new(data),
            limit,
            gate,
            open,
        }
    }
}

impl Drop for MemoryReader {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for MemoryReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let position = self.inner.position();
        let mut stop = u64::MAX;

        if let Some(limit) = self.limit {
            if position >= limit {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "peer disconnected",
                )));
            }
            stop = limit;
        }

        {
            let mut gate = self.gate.lock();
            if let Some(paused_at) = gate.paused_at {
                if position >= paused_at {
                    gate.waiting.push(cx.waker().clone());
                    return Poll::Pending;
                }
                stop = stop.min(paused_at);
            }
        }

        // Reads never cross a failure or pause offset.
        let data = self.inner.get_ref();
        let from = (position as usize).min(data.len());
        let to = (stop.min(data.len() as u64) as usize).min(from + buf.remaining());
        buf.put_slice(&data[from..to]);
        self.inner.set_position(to as u64);
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for MemoryReader {
    fn start_seek(mut self: Pin<&mut Self>, position: io::SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.inner).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.inner).poll_complete(cx)
    }
}
