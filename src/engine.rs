//! The tunnel engine seam.
//!
//! Cryptography, peers and the configuration protocol live in the engine,
//! which the embedding application provides. The bridge only needs the
//! operations below.

use std::fmt;
use std::io::{self, BufRead};
use std::os::unix::io::RawFd;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UnixStream;

use crate::logging::EngineLogger;
use crate::tun::TunDevice;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error type reported by an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration text was rejected
    #[error("Configuration rejected: {0}")]
    Config(String),

    /// The engine has no socket bound for the requested family
    #[error("No {0} socket bound")]
    NoSocket(AddressFamily),

    /// The engine is closed
    #[error("Engine closed")]
    Closed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error
    #[error("Engine error: {0}")]
    Other(String),
}

/// Address family of a transport socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "IPv4"),
            AddressFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// A running tunnel instance bound to one virtual interface.
///
/// Implementations must be safe to share between the registry, the control
/// listener's accept loop and the introspection entry points.
#[async_trait]
pub trait TunnelEngine: Send + Sync {
    /// Apply configuration-protocol text ("set" operation).
    fn apply_config(&self, settings: &mut dyn BufRead) -> EngineResult<()>;

    /// Dump the current configuration ("get" operation).
    fn get_config(&self) -> EngineResult<String>;

    /// Bring the interface up and start moving packets.
    fn up(&self) -> EngineResult<()>;

    /// Stop the engine and release the interface. Idempotent.
    fn close(&self);

    /// Descriptor of the transport socket currently bound for `family`.
    fn socket_fd(&self, family: AddressFamily) -> EngineResult<RawFd>;

    /// Serve configuration requests on one control connection until it ends.
    async fn handle_control_connection(&self, stream: UnixStream);
}

/// Creates engine instances.
pub trait EngineFactory: Send + Sync {
    fn create(&self, device: TunDevice, logger: EngineLogger) -> Arc<dyn TunnelEngine>;
}

impl<F> EngineFactory for F
where
    F: Fn(TunDevice, EngineLogger) -> Arc<dyn TunnelEngine> + Send + Sync,
{
    fn create(&self, device: TunDevice, logger: EngineLogger) -> Arc<dyn TunnelEngine> {
        self(device, logger)
    }
}
