//! Tunnel handles and the registry that owns running tunnels.

mod error;
mod registry;
pub mod types;

pub use error::{BridgeError, BridgeResult, STATUS_GENERIC_FAILURE, STATUS_SPECIFIC_FAILURE};
pub use registry::{TunnelEntry, TunnelRegistry};
pub use types::TunnelHandle;
