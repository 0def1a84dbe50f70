// Host-facing surface: everything the app shell calls across the bridge.

pub mod simple;
pub mod torrent_api;
