//! Mobile tunnel bridge for CoentroVPN.
//!
//! The host VPN service opens a TUN descriptor and hands it over together
//! with the tunnel settings. This crate wraps the descriptor, starts an
//! engine on it, exposes a per-interface control socket and returns a small
//! integer handle the host later uses to query or tear down the tunnel.
//! The engine itself (handshakes, encryption, peer state) is supplied by the
//! embedding application through [`engine::EngineFactory`].

pub mod bridge;
pub mod config;
pub mod engine;
pub mod ffi;
pub mod ipc;
pub mod logging;
pub mod tun;
pub mod tunnel;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for convenience
pub use bridge::{install, installed, Bridge, BridgeBuilder};
pub use config::{BridgeConfig, ConfigError};
pub use engine::{AddressFamily, EngineError, EngineFactory, EngineResult, TunnelEngine};
pub use logging::{EngineLogger, LogLevel, LogSink};
pub use tun::{TunDevice, TunError, TunFactory};
pub use tunnel::{BridgeError, BridgeResult, TunnelHandle};
