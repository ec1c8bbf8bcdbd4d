//! Control socket plumbing.
//!
//! Each tunnel may expose a Unix domain socket named after its interface.
//! Connections on it carry the engine's textual configuration protocol; this
//! module only opens the socket, accepts connections and hands each one to
//! the engine on its own task.

use std::fs::{self, DirBuilder, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::os::unix::net::{UnixListener as StdUnixListener, UnixStream as StdUnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::TunnelEngine;

/// Result type for control socket operations
pub type IpcResult<T> = Result<T, IpcError>;

/// Error type for control socket operations
#[derive(Error, Debug)]
pub enum IpcError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Another live process already serves this socket
    #[error("Control socket {0} is already in use")]
    AddrInUse(PathBuf),

    /// The listener has been closed
    #[error("Control listener closed")]
    Closed,
}

/// Path of the control socket for `interface_name` inside `dir`.
pub fn socket_path(dir: &Path, interface_name: &str) -> PathBuf {
    dir.join(format!("{interface_name}.sock"))
}

/// Removes the socket file once, when closed or dropped.
#[derive(Debug)]
struct SocketFile {
    path: PathBuf,
    removed: AtomicBool,
}

impl SocketFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            removed: AtomicBool::new(false),
        }
    }

    fn remove(&self) {
        if !self.removed.swap(true, Ordering::AcqRel) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

impl Drop for SocketFile {
    fn drop(&mut self) {
        self.remove();
    }
}

/// A bound control socket that is not serving yet.
///
/// Dropping the channel closes the socket and removes its file.
#[derive(Debug)]
pub struct ControlChannel {
    listener: StdUnixListener,
    file: SocketFile,
}

impl ControlChannel {
    /// Bind the control socket for `interface_name` under `dir`.
    ///
    /// A leftover socket file nobody answers on is replaced; one that still
    /// accepts connections makes this fail with [`IpcError::AddrInUse`].
    pub fn open(dir: &Path, interface_name: &str) -> IpcResult<Self> {
        DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(dir)
            .map_err(|e| {
                IpcError::Connection(format!(
                    "Failed to create socket directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;

        let path = socket_path(dir, interface_name);

        if fs::symlink_metadata(&path).is_ok() {
            if StdUnixStream::connect(&path).is_ok() {
                return Err(IpcError::AddrInUse(path));
            }
            debug!(path = %path.display(), "Removing stale control socket");
            fs::remove_file(&path).map_err(|e| {
                IpcError::Connection(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        let listener = StdUnixListener::bind(&path)
            .map_err(|e| IpcError::Connection(format!("Failed to bind to socket: {}", e)))?;
        let channel = ControlChannel {
            listener,
            file: SocketFile::new(path),
        };

        // Only the owning user may talk to the engine.
        fs::set_permissions(&channel.file.path, Permissions::from_mode(0o600)).map_err(|e| {
            IpcError::Connection(format!("Failed to set socket permissions: {}", e))
        })?;

        Ok(channel)
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

/// A control socket registered with the runtime and ready to accept.
#[derive(Debug)]
pub struct ControlListener {
    listener: UnixListener,
    file: SocketFile,
    closed: CancellationToken,
}

impl ControlListener {
    /// Start serving `channel` on the current tokio runtime.
    ///
    /// On failure the channel is dropped, which closes it.
    pub fn listen(channel: ControlChannel) -> IpcResult<Self> {
        if Handle::try_current().is_err() {
            return Err(IpcError::Connection(
                "Control listener requires a running tokio runtime".to_string(),
            ));
        }

        let ControlChannel { listener, file } = channel;
        listener.set_nonblocking(true)?;
        let listener = UnixListener::from_std(listener)?;

        info!(path = %file.path.display(), "Control socket listening");
        Ok(Self {
            listener,
            file,
            closed: CancellationToken::new(),
        })
    }

    /// Wait for the next control connection.
    ///
    /// Returns [`IpcError::Closed`] once [`close`](Self::close) was called.
    pub async fn accept(&self) -> IpcResult<UnixStream> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(IpcError::Closed),
            result = self.listener.accept() => result
                .map(|(stream, _)| stream)
                .map_err(|e| IpcError::Connection(format!("Failed to accept connection: {}", e))),
        }
    }

    /// Stop accepting and remove the socket file. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
        self.file.remove();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

/// Serve `listener` on `runtime` until it is closed.
///
/// Every accepted connection is handed to the engine on its own task, so a
/// slow client cannot hold up the others. Any accept error ends the loop.
pub fn spawn_accept_loop(
    runtime: &Handle,
    listener: Arc<ControlListener>,
    engine: Arc<dyn TunnelEngine>,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        loop {
            match listener.accept().await {
                Ok(stream) => {
                    let engine = Arc::clone(&engine);
                    tokio::spawn(async move {
                        engine.handle_control_connection(stream).await;
                    });
                }
                Err(e) => {
                    debug!(
                        path = %listener.path().display(),
                        reason = %e,
                        "Control accept loop finished"
                    );
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AddressFamily, EngineError, EngineResult};
    use async_trait::async_trait;
    use std::io::BufRead;
    use std::os::unix::io::RawFd;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    /// Engine that answers every control connection with "errno=0".
    struct EchoEngine {
        served: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl TunnelEngine for EchoEngine {
        fn apply_config(&self, _: &mut dyn BufRead) -> EngineResult<()> {
            Ok(())
        }

        fn get_config(&self) -> EngineResult<String> {
            Ok(String::new())
        }

        fn up(&self) -> EngineResult<()> {
            Ok(())
        }

        fn close(&self) {}

        fn socket_fd(&self, family: AddressFamily) -> EngineResult<RawFd> {
            Err(EngineError::NoSocket(family))
        }

        async fn handle_control_connection(&self, mut stream: UnixStream) {
            let _ = stream.write_all(b"errno=0\n\n").await;
            let _ = self.served.send(());
        }
    }

    #[test]
    fn test_open_binds_private_socket() {
        let dir = tempdir().unwrap();
        let channel = ControlChannel::open(dir.path(), "wg0").unwrap();

        let path = socket_path(dir.path(), "wg0");
        assert_eq!(channel.path(), path);
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        drop(channel);
        assert!(!path.exists());
    }

    #[test]
    fn test_open_replaces_stale_socket() {
        let dir = tempdir().unwrap();
        let path = socket_path(dir.path(), "wg0");
        drop(StdUnixListener::bind(&path).unwrap());
        assert!(path.exists());

        assert!(ControlChannel::open(dir.path(), "wg0").is_ok());
    }

    #[test]
    fn test_open_refuses_live_socket() {
        let dir = tempdir().unwrap();
        let _live = ControlChannel::open(dir.path(), "wg0").unwrap();

        let result = ControlChannel::open(dir.path(), "wg0");
        assert!(matches!(result, Err(IpcError::AddrInUse(_))));
    }

    #[test]
    fn test_listen_without_runtime_fails() {
        let dir = tempdir().unwrap();
        let channel = ControlChannel::open(dir.path(), "wg0").unwrap();
        let path = channel.path().to_path_buf();

        assert!(ControlListener::listen(channel).is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_accept_loop_serves_until_closed() {
        let dir = tempdir().unwrap();
        let channel = ControlChannel::open(dir.path(), "wg0").unwrap();
        let listener = Arc::new(ControlListener::listen(channel).unwrap());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine: Arc<dyn TunnelEngine> = Arc::new(EchoEngine { served: tx });
        let task = spawn_accept_loop(&Handle::current(), listener.clone(), engine);

        let mut client = UnixStream::connect(listener.path()).await.unwrap();
        let mut reply = String::new();
        client.read_to_string(&mut reply).await.unwrap();
        assert_eq!(reply, "errno=0\n\n");
        timeout(Duration::from_secs(5), rx.recv()).await.unwrap();

        let path = listener.path().to_path_buf();
        listener.close();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();

        assert!(listener.is_closed());
        assert!(!path.exists());
        assert!(matches!(listener.accept().await, Err(IpcError::Closed)));
    }
}
