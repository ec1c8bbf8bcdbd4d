//! Shared doubles for unit tests.

use std::io::{self, BufRead};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::net::UnixStream;

use crate::engine::{AddressFamily, EngineError, EngineResult, TunnelEngine};
use crate::logging::{LogLevel, LogSink};

/// Sink that keeps every record in memory.
#[derive(Default)]
pub(crate) struct MemorySink {
    pub(crate) records: Mutex<Vec<(LogLevel, String, String)>>,
}

impl LogSink for MemorySink {
    fn write(&self, level: LogLevel, tag: &str, message: &str) -> io::Result<()> {
        self.records
            .lock()
            .unwrap()
            .push((level, tag.to_string(), message.to_string()));
        Ok(())
    }
}

/// Engine that does nothing but remember whether it was closed.
#[derive(Default)]
pub(crate) struct NullEngine {
    pub(crate) closed: AtomicBool,
}

impl NullEngine {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelEngine for NullEngine {
    fn apply_config(&self, _: &mut dyn BufRead) -> EngineResult<()> {
        Ok(())
    }

    fn get_config(&self) -> EngineResult<String> {
        Ok(String::new())
    }

    fn up(&self) -> EngineResult<()> {
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn socket_fd(&self, family: AddressFamily) -> EngineResult<RawFd> {
        Err(EngineError::NoSocket(family))
    }

    async fn handle_control_connection(&self, _: UnixStream) {}
}
