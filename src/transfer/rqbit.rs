// librqbit-backed transfer engine.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use librqbit::api::TorrentIdOrHash;
use librqbit::{
    AddTorrent, AddTorrentOptions, AddTorrentResponse, ManagedTorrent, Session, SessionOptions,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::descriptor::magnet_info_hash;
use super::traits::{
    EngineFactory, EngineOptions, FileInfo, FileReader, Priority, TransferEngine, TransferHandle,
};

type AddOutcome = Option<std::result::Result<(usize, Arc<ManagedTorrent>), String>>;

pub struct RqbitEngineFactory;

#[async_trait]
impl EngineFactory for RqbitEngineFactory {
    async fn create(&self, options: EngineOptions) -> Result<Arc<dyn TransferEngine>> {
        let policy = &options.network;
        let session_opts = SessionOptions {
            disable_dht: !policy.enable_dht,
            enable_upnp_port_forwarding: policy.upnp_port_forwarding,
            ..Default::default()
        };
        debug!(
            "rqbit session policy dht={} upnp={}",
            policy.enable_dht, policy.upnp_port_forwarding
        );
        let session = Session::new_with_opts(options.download_dir.clone(), session_opts).await?;
        info!(
            "rqbit session started, output={}",
            options.download_dir.display()
        );
        Ok(Arc::new(RqbitEngine { session }))
    }
}

pub struct RqbitEngine {
    session: Arc<Session>,
}

#[async_trait]
impl TransferEngine for RqbitEngine {
    async fn add_magnet(&self, uri: &str) -> Result<Arc<dyn TransferHandle>> {
        let (tx, rx) = watch::channel::<AddOutcome>(None);
        let session = self.session.clone();
        let owned_uri = uri.to_owned();

        // rqbit resolves magnet metadata inside add_torrent; run it detached so
        // the caller owns the wait and its timeout.
        tokio::spawn(async move {
            let opts = AddTorrentOptions {
                overwrite: true,
                ..Default::default()
            };
            let outcome = match session
                .add_torrent(AddTorrent::from_url(owned_uri), Some(opts))
                .await
            {
                Ok(AddTorrentResponse::Added(id, handle))
                | Ok(AddTorrentResponse::AlreadyManaged(id, handle)) => Ok((id, handle)),
                Ok(AddTorrentResponse::ListOnly(_)) => {
                    Err("unexpected list-only response".to_string())
                }
                Err(e) => Err(format!("{e:#}")),
            };
            if let Err(e) = &outcome {
                warn!("rqbit add_torrent failed: {}", e);
            }
            tx.send_replace(Some(outcome));
        });

        Ok(Arc::new(RqbitHandle {
            session: self.session.clone(),
            magnet_hash: magnet_info_hash(uri).unwrap_or_default(),
            outcome: rx,
        }))
    }

    async fn close(&self) {
        self.session.stop().await;
    }
}

pub struct RqbitHandle {
    session: Arc<Session>,
    magnet_hash: String,
    outcome: watch::Receiver<AddOutcome>,
}

impl RqbitHandle {
    fn managed(&self) -> Option<(usize, Arc<ManagedTorrent>)> {
        match &*self.outcome.borrow() {
            Some(Ok((id, handle))) => Some((*id, handle.clone())),
            _ => None,
        }
    }

    fn torrent(&self) -> Result<Arc<ManagedTorrent>> {
        self.managed()
            .map(|(_, h)| h)
            .ok_or_else(|| anyhow!("torrent metadata not available yet"))
    }
}

#[async_trait]
impl TransferHandle for RqbitHandle {
    async fn wait_for_metadata(&self) -> Result<()> {
        let mut rx = self.outcome.clone();
        let outcome = rx
            .wait_for(|o| o.is_some())
            .await
            .map_err(|_| anyhow!("add task vanished"))?
            .clone();
        // The add task only resolves once the info dictionary is known; the
        // initial piece check may still be running and is awaited by readers.
        match outcome {
            Some(Ok((_, handle))) => handle.with_metadata(|_| ()),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Err(anyhow!("add task finished without outcome")),
        }
    }

    fn info_hash(&self) -> String {
        match self.managed() {
            Some((_, h)) => h.info_hash().as_string().to_ascii_lowercase(),
            None => self.magnet_hash.clone(),
        }
    }

    fn files(&self) -> Vec<FileInfo> {
        let Some((_, handle)) = self.managed() else {
            return Vec::new();
        };
        handle
            .with_metadata(|m| {
                m.file_infos
                    .iter()
                    .map(|fi| FileInfo {
                        display_path: fi.relative_filename.to_string_lossy().into_owned(),
                        length: fi.len,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn bytes_completed(&self, index: usize) -> u64 {
        self.managed()
            .and_then(|(_, h)| h.stats().file_progress.get(index).copied())
            .unwrap_or(0)
    }

    fn set_priority(&self, index: usize, priority: Priority) {
        // rqbit prioritises pieces under open streams itself.
        debug!(
            "rqbit priority hint ignored hash={} file={} priority={:?}",
            self.magnet_hash, index, priority
        );
    }

    async fn open_reader(&self, index: usize) -> Result<Box<dyn FileReader>> {
        let torrent = self.torrent()?;
        torrent.wait_until_initialized().await?;
        let stream = torrent.stream(index)?;
        Ok(Box::new(stream))
    }

    async fn drop_transfer(&self) {
        if let Some((id, _)) = self.managed() {
            if let Err(e) = self.session.delete(TorrentIdOrHash::Id(id), false).await {
                warn!("rqbit delete torrent {} failed: {:#}", id, e);
            }
        }
    }
}
