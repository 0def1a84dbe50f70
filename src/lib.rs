pub mod api;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod server;
pub mod transfer;

pub use engine::session::TorrentSession;
pub use error::{ErrorKind, Result, SessionError};
