//! Error types for bring-up and the entry points.

use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::ipc::IpcError;
use crate::tun::TunError;
use crate::tunnel::types::TunnelHandle;

/// Status returned to the host for generic failures.
pub const STATUS_GENERIC_FAILURE: i32 = -1;

/// Status returned to the host for a bad descriptor or rejected settings.
pub const STATUS_SPECIFIC_FAILURE: i32 = -2;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error types that can occur in bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A required argument was missing or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The supplied descriptor is unusable
    #[error("Bad descriptor: {0}")]
    BadDescriptor(TunError),

    /// The engine rejected the initial settings
    #[error("Configuration rejected: {0}")]
    ConfigRejected(EngineError),

    /// No free tunnel handle
    #[error("No free tunnel handle (limit {0})")]
    CapacityExhausted(i32),

    /// Logging or socket introspection failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Tunnel handle not registered
    #[error("Tunnel not found: {0}")]
    NotFound(TunnelHandle),

    /// Interface construction failure
    #[error("Interface error: {0}")]
    Interface(TunError),

    /// Control socket failure
    #[error("Control socket error: {0}")]
    Ipc(#[from] IpcError),

    /// Engine failure
    #[error("Engine error: {0}")]
    Engine(EngineError),

    /// Bridge configuration failure
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

impl BridgeError {
    /// Status code reported across the C boundary.
    ///
    /// Only a bad descriptor and rejected settings are distinguished; the
    /// host should not retry either with the same input.
    pub fn status_code(&self) -> i32 {
        match self {
            BridgeError::BadDescriptor(_) | BridgeError::ConfigRejected(_) => {
                STATUS_SPECIFIC_FAILURE
            }
            _ => STATUS_GENERIC_FAILURE,
        }
    }
}

impl From<TunError> for BridgeError {
    fn from(err: TunError) -> Self {
        match err {
            TunError::BadDescriptor(_) => BridgeError::BadDescriptor(err),
            other => BridgeError::Interface(other),
        }
    }
}

impl From<EngineError> for BridgeError {
    fn from(err: EngineError) -> Self {
        BridgeError::Engine(err)
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Other(err.to_string())
    }
}
