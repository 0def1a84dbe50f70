// Download resolution: where a transfer's file lives (or will live) on disk.
//
// Files are written under `download_dir/<display path>`. Older releases wrote
// a flat `<hash[..8]>_<basename>` layout or dropped the bare basename into the
// download dir; completed files in those layouts are still found here. Nothing
// writes those layouts any more, so the fallback can go once installs that
// predate the structured layout have been migrated.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::config::LEGACY_HASH_PREFIX_LEN;

/// Limits of the legacy-layout directory walk.
#[derive(Debug, Clone, Copy)]
pub struct LegacySearch {
    pub max_depth: usize,
    pub max_entries: usize,
}

/// Expected location of a file: `download_dir` joined with the display path.
///
/// Only normal components are kept, so `..` or absolute paths declared by a
/// torrent cannot escape the download directory.
pub fn destination_path(download_dir: &Path, display_path: &str) -> PathBuf {
    let mut dest = download_dir.to_path_buf();
    for component in Path::new(display_path).components() {
        if let Component::Normal(part) = component {
            dest.push(part);
        }
    }
    dest
}

/// Flat file names older releases used, in lookup order.
pub fn legacy_candidates(download_dir: &Path, hash: &str, display_path: &str) -> Vec<PathBuf> {
    let Some(basename) = Path::new(display_path).file_name() else {
        return Vec::new();
    };
    let basename = basename.to_string_lossy();
    let prefix = hash.get(..LEGACY_HASH_PREFIX_LEN).unwrap_or(hash);
    vec![
        download_dir.join(format!("{prefix}_{basename}")),
        download_dir.join(basename.as_ref()),
    ]
}

/// Walk `root` for the first regular file named `basename`.
///
/// Unreadable entries are skipped, not reported.
pub fn find_by_basename(root: &Path, basename: &OsStr, limits: LegacySearch) -> Option<PathBuf> {
    WalkDir::new(root)
        .max_depth(limits.max_depth)
        .sort_by_file_name()
        .into_iter()
        .take(limits.max_entries)
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("legacy search skipped entry: {}", e);
                None
            }
        })
        .find(|entry| entry.file_type().is_file() && entry.file_name() == basename)
        .map(walkdir::DirEntry::into_path)
}

/// Locate a file the engine reports as complete, trying the structured
/// destination first and the legacy layouts after it.
pub fn locate_completed(
    download_dir: &Path,
    destination: &Path,
    hash: &str,
    display_path: &str,
    limits: LegacySearch,
) -> Option<PathBuf> {
    if destination.is_file() {
        return Some(destination.to_path_buf());
    }

    if let Some(found) = legacy_candidates(download_dir, hash, display_path)
        .into_iter()
        .find(|candidate| candidate.is_file())
    {
        debug!("found legacy download at {}", found.display());
        return Some(found);
    }

    let basename = Path::new(display_path).file_name()?;
    let found = find_by_basename(download_dir, basename, limits);
    if let Some(path) = &found {
        debug!("found download by directory walk at {}", path.display());
    }
    found
}
