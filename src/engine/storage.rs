// Download directory selection and preparation.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{ENGINE_DATA_SUBDIR, FALLBACK_DOWNLOAD_SUBDIR, WRITE_PROBE_FILE};
use crate::error::{Result, SessionError};

/// Directories a session generation works in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub download_dir: PathBuf,
    pub data_dir: PathBuf,
}

/// Pick the download directory: the caller's choice, else the platform
/// default when it exists and accepts writes, else a folder in the cache dir.
pub fn resolve_download_dir(
    cache_dir: &Path,
    custom_download_dir: &str,
    platform_default: Option<&Path>,
) -> PathBuf {
    let custom = custom_download_dir.trim();
    if !custom.is_empty() {
        info!("using custom download directory: {}", custom);
        return PathBuf::from(custom);
    }

    if let Some(default) = platform_default {
        if default.is_dir() && probe_writable(default).is_ok() {
            info!("using default download directory: {}", default.display());
            return default.to_path_buf();
        }
        debug!(
            "platform download directory {} unusable, falling back to cache",
            default.display()
        );
    }

    let fallback = cache_dir.join(FALLBACK_DOWNLOAD_SUBDIR);
    info!("using fallback download directory: {}", fallback.display());
    fallback
}

/// Create `path` and missing parents, owner-only on unix.
pub fn create_private_dir(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}

/// Create and delete a marker file to prove `dir` accepts writes.
pub fn probe_writable(dir: &Path) -> io::Result<()> {
    let marker = dir.join(WRITE_PROBE_FILE);
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&marker)?;
    file.write_all(b"test")?;
    drop(file);
    fs::remove_file(&marker)
}

/// Resolve, create and verify the directories for a new session generation.
pub fn prepare_storage(
    cache_dir: &str,
    custom_download_dir: &str,
    platform_default: Option<&Path>,
) -> Result<StorageLayout> {
    let cache_dir = cache_dir.trim();
    if cache_dir.is_empty() {
        return Err(SessionError::InvalidInput(
            "Cache directory path is empty".into(),
        ));
    }
    let cache_dir = Path::new(cache_dir);

    let download_dir = resolve_download_dir(cache_dir, custom_download_dir, platform_default);
    create_private_dir(&download_dir)
        .map_err(|e| SessionError::io("Error creating download dir", e))?;
    probe_writable(&download_dir).map_err(|source| SessionError::StorageUnwritable {
        path: download_dir.clone(),
        source,
    })?;

    let data_dir = cache_dir.join(ENGINE_DATA_SUBDIR);
    create_private_dir(&data_dir)
        .map_err(|e| SessionError::io("Error creating torrent data dir", e))?;

    Ok(StorageLayout {
        download_dir,
        data_dir,
    })
}
