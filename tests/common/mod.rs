//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::io::{self, BufRead, Read};
use std::os::fd::{IntoRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use coentro_mobile::engine::{AddressFamily, EngineError, EngineFactory, EngineResult, TunnelEngine};
use coentro_mobile::logging::{EngineLogger, LogLevel, LogSink};
use coentro_mobile::tun::{TunDevice, TunError, TunFactory, TunResult};
use coentro_mobile::{Bridge, BridgeConfig};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

/// Sink that keeps every record in memory.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<(LogLevel, String)>>,
}

impl MemorySink {
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }
}

impl LogSink for MemorySink {
    fn write(&self, level: LogLevel, _tag: &str, message: &str) -> io::Result<()> {
        self.records
            .lock()
            .unwrap()
            .push((level, message.to_string()));
        Ok(())
    }
}

/// Knobs for the engines a [`MockEngineFactory`] creates.
#[derive(Debug, Clone, Default)]
pub struct EngineBehavior {
    pub fail_up: bool,
    pub socket_v4: Option<RawFd>,
    pub socket_v6: Option<RawFd>,
}

/// Engine double. Accepts settings made of `key=value` lines.
pub struct MockEngine {
    behavior: EngineBehavior,
    device: Mutex<Option<TunDevice>>,
    pub mtu: usize,
    pub interface: String,
    pub applied: Mutex<String>,
    pub is_up: AtomicBool,
    pub closed: AtomicBool,
    pub connections: AtomicUsize,
    pub logger: EngineLogger,
}

impl MockEngine {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_up(&self) -> bool {
        self.is_up.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelEngine for MockEngine {
    fn apply_config(&self, settings: &mut dyn BufRead) -> EngineResult<()> {
        let mut text = String::new();
        settings.read_to_string(&mut text)?;

        if let Some(line) = text.lines().find(|l| !l.is_empty() && !l.contains('=')) {
            return Err(EngineError::Config(format!("invalid line: {line}")));
        }
        self.applied.lock().unwrap().push_str(&text);
        Ok(())
    }

    fn get_config(&self) -> EngineResult<String> {
        Ok(self.applied.lock().unwrap().clone())
    }

    fn up(&self) -> EngineResult<()> {
        if self.behavior.fail_up {
            return Err(EngineError::Other("interface refused to come up".into()));
        }
        self.is_up.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.is_up.store(false, Ordering::SeqCst);
        self.device.lock().unwrap().take();
    }

    fn socket_fd(&self, family: AddressFamily) -> EngineResult<RawFd> {
        let fd = match family {
            AddressFamily::V4 => self.behavior.socket_v4,
            AddressFamily::V6 => self.behavior.socket_v6,
        };
        fd.ok_or(EngineError::NoSocket(family))
    }

    async fn handle_control_connection(&self, mut stream: UnixStream) {
        self.connections.fetch_add(1, Ordering::SeqCst);
        let _ = stream.write_all(b"errno=0\n\n").await;
    }
}

/// Engine factory that remembers every engine it built.
#[derive(Default)]
pub struct MockEngineFactory {
    pub behavior: EngineBehavior,
    pub engines: Mutex<Vec<Arc<MockEngine>>>,
}

impl MockEngineFactory {
    pub fn with_behavior(behavior: EngineBehavior) -> Self {
        Self {
            behavior,
            engines: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> Vec<Arc<MockEngine>> {
        self.engines.lock().unwrap().clone()
    }

    pub fn last(&self) -> Arc<MockEngine> {
        self.engines.lock().unwrap().last().cloned().expect("no engine created")
    }
}

impl EngineFactory for MockEngineFactory {
    fn create(&self, device: TunDevice, logger: EngineLogger) -> Arc<dyn TunnelEngine> {
        let engine = Arc::new(MockEngine {
            behavior: self.behavior.clone(),
            mtu: device.mtu(),
            interface: device.name().to_string(),
            device: Mutex::new(Some(device)),
            applied: Mutex::new(String::new()),
            is_up: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
            logger,
        });
        self.engines.lock().unwrap().push(engine.clone());
        engine
    }
}

/// Interface factory that accepts any descriptor and names it `tunN`.
#[derive(Default)]
pub struct MockTunFactory {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl TunFactory for MockTunFactory {
    fn from_fd(&self, fd: OwnedFd, mtu: usize) -> TunResult<TunDevice> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TunError::Device("not a TUN device".into()));
        }
        Ok(TunDevice::new(fd, format!("tun{n}"), mtu))
    }
}

/// Everything a bring-up test needs, wired into one bridge.
pub struct Harness {
    pub bridge: Bridge,
    pub engines: Arc<MockEngineFactory>,
    pub tuns: Arc<MockTunFactory>,
    pub sink: Arc<MemorySink>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(EngineBehavior::default(), MockTunFactory::default(), |_| {})
    }

    pub fn build(
        behavior: EngineBehavior,
        tuns: MockTunFactory,
        adjust: impl FnOnce(&mut BridgeConfig),
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BridgeConfig {
            socket_dir: dir.path().join("sockets"),
            worker_threads: 1,
            ..BridgeConfig::default()
        };
        adjust(&mut config);

        let engines = Arc::new(MockEngineFactory::with_behavior(behavior));
        let tuns = Arc::new(tuns);
        let sink = Arc::new(MemorySink::default());

        let bridge = Bridge::builder(engines.clone())
            .config(config)
            .tun_factory(tuns.clone())
            .log_sink(sink.clone())
            .build()
            .unwrap();

        Self {
            bridge,
            engines,
            tuns,
            sink,
            dir,
        }
    }

    pub fn socket_dir(&self) -> &Path {
        &self.bridge.config().socket_dir
    }
}

/// A fresh open descriptor standing in for a TUN device.
pub fn tun_fd() -> RawFd {
    let (a, _b) = StdUnixStream::pair().unwrap();
    a.into_raw_fd()
}

/// Poll `cond` until it holds or five seconds pass.
pub fn wait_for(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

pub const SETTINGS: &str = "private_key=0000\nlisten_port=51820\n";
