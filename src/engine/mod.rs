// Session orchestration: engine lifecycle, transfer registry and download resolution.

pub mod monitor;
pub mod progress;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod state;
pub mod storage;
