// Transfer engine abstraction: the opaque torrent backend and its adapters.

pub mod descriptor;
pub mod memory;
#[cfg(feature = "rqbit")]
pub mod rqbit;
pub mod traits;
