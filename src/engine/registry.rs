// Transfer registry: content identifier -> live transfer handle.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::detect::mime::mime_for_path;
use crate::error::{Result, SessionError};
use crate::transfer::descriptor::normalize_identifier;
use crate::transfer::traits::{FileInfo, TransferHandle};

#[derive(Default)]
pub struct TransferRegistry {
    transfers: HashMap<String, Arc<dyn TransferHandle>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under its own identifier, replacing any previous
    /// handle for the same content. Returns the identifier.
    pub fn insert(&mut self, handle: Arc<dyn TransferHandle>) -> String {
        let id = normalize_identifier(&handle.info_hash());
        self.transfers.insert(id.clone(), handle);
        id
    }

    pub fn get(&self, hash: &str) -> Option<Arc<dyn TransferHandle>> {
        self.transfers.get(&normalize_identifier(hash)).cloned()
    }

    /// Like [`get`](Self::get) but with the caller-facing not-found error.
    pub fn require(&self, hash: &str) -> Result<Arc<dyn TransferHandle>> {
        self.get(hash)
            .ok_or_else(|| SessionError::unknown_transfer(hash))
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.transfers.contains_key(&normalize_identifier(hash))
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Remove and return every handle.
    pub fn drain(&mut self) -> Vec<Arc<dyn TransferHandle>> {
        self.transfers.drain().map(|(_, h)| h).collect()
    }
}

/// One file of a transfer as reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub index: usize,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// Display path to use for a file, substituting a placeholder for empty paths.
pub fn display_path_or_placeholder(file: &FileInfo, index: usize) -> String {
    if file.display_path.is_empty() {
        format!("Unknown_File_{index}")
    } else {
        file.display_path.clone()
    }
}

/// Fetch the file at `index`, rejecting indices outside the transfer.
pub fn file_at(handle: &dyn TransferHandle, index: usize) -> Result<FileInfo> {
    let mut files = handle.files();
    if index >= files.len() {
        return Err(SessionError::FileIndexOutOfRange {
            index: index as i64,
            count: files.len(),
        });
    }
    Ok(files.swap_remove(index))
}

/// List every file of a transfer in ordinal order.
pub fn file_entries(handle: &dyn TransferHandle) -> Vec<FileEntry> {
    let files = handle.files();
    if files.is_empty() {
        warn!("no files found in torrent {}", handle.info_hash());
        return Vec::new();
    }

    files
        .iter()
        .enumerate()
        .map(|(index, file)| {
            let path = display_path_or_placeholder(file, index);
            let name = Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone());
            FileEntry {
                mime_type: mime_for_path(&path).to_string(),
                name,
                path,
                size: file.length,
                index,
            }
        })
        .collect()
}
