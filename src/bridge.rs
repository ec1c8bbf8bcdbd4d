//! Tunnel bring-up and the operations behind the C entry points.
//!
//! A [`Bridge`] owns everything a host needs to run tunnels: the handle
//! registry, the interface and engine factories, the platform log sink and
//! the runtime that serves control sockets. The C ABI addresses tunnels by
//! bare integers, so one bridge is installed per process with [`install`];
//! tests build their own.

use std::os::unix::io::RawFd;
use std::sync::{Arc, OnceLock};

use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::engine::{AddressFamily, EngineFactory, TunnelEngine};
use crate::ipc::{self, ControlChannel, ControlListener};
use crate::logging::{self, platform_sink, EngineLogger, LogOptions, LogSink};
use crate::tun::{self, TunFactory, UnmonitoredTunFactory, DEFAULT_MTU};
use crate::tunnel::{BridgeError, BridgeResult, TunnelEntry, TunnelHandle, TunnelRegistry};

static BRIDGE: OnceLock<Bridge> = OnceLock::new();

/// Install the process-wide bridge used by the C entry points.
///
/// The first bridge installed stays for the life of the process; later
/// calls hand their bridge back.
pub fn install(bridge: Bridge) -> Result<(), Bridge> {
    BRIDGE.set(bridge)
}

/// The process-wide bridge, if one was installed.
pub fn installed() -> Option<&'static Bridge> {
    BRIDGE.get()
}

/// Set up logging and install a bridge configured from the environment.
///
/// This is what an embedding application calls once at load time, passing
/// its engine implementation.
pub fn init(engines: Arc<dyn EngineFactory>) -> BridgeResult<()> {
    let config = BridgeConfig::from_env()?;
    logging::init_logging(LogOptions {
        tag: config.log_tag.clone(),
        ..Default::default()
    });

    let bridge = Bridge::builder(engines).config(config).build()?;
    install(bridge).map_err(|_| BridgeError::Other("a bridge is already installed".to_string()))
}

/// Builder for [`Bridge`].
pub struct BridgeBuilder {
    config: BridgeConfig,
    engines: Arc<dyn EngineFactory>,
    tuns: Arc<dyn TunFactory>,
    sink: Arc<dyn LogSink>,
}

impl BridgeBuilder {
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tun_factory(mut self, tuns: Arc<dyn TunFactory>) -> Self {
        self.tuns = tuns;
        self
    }

    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> BridgeResult<Bridge> {
        self.config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.worker_threads)
            .thread_name("coentro-control")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        Ok(Bridge {
            registry: TunnelRegistry::with_capacity(self.config.max_tunnels),
            config: self.config,
            engines: self.engines,
            tuns: self.tuns,
            sink: self.sink,
            runtime: Some(runtime),
            handle,
        })
    }
}

/// Owner of every running tunnel.
pub struct Bridge {
    config: BridgeConfig,
    registry: TunnelRegistry,
    engines: Arc<dyn EngineFactory>,
    tuns: Arc<dyn TunFactory>,
    sink: Arc<dyn LogSink>,
    runtime: Option<Runtime>,
    handle: Handle,
}

impl Bridge {
    /// Start building a bridge around an engine factory.
    ///
    /// Defaults: configuration defaults, [`UnmonitoredTunFactory`] and the
    /// platform log sink.
    pub fn builder(engines: Arc<dyn EngineFactory>) -> BridgeBuilder {
        BridgeBuilder {
            config: BridgeConfig::default(),
            engines,
            tuns: Arc::new(UnmonitoredTunFactory),
            sink: platform_sink(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &TunnelRegistry {
        &self.registry
    }

    /// Bring up a tunnel on a descriptor opened by the host.
    ///
    /// Steps, each of which may end the bring-up: validate arguments, wrap
    /// the descriptor, create the engine, expose the control socket (best
    /// effort), apply `settings`, register a handle, bring the engine up.
    /// Whatever was acquired before a failing step is released before
    /// returning, so a failed call leaves nothing registered. `settings` is
    /// handed to the engine as raw bytes.
    pub fn turn_on_with_fd(
        &self,
        interface_name: Option<&str>,
        mtu: i32,
        settings: Option<&[u8]>,
        fd: RawFd,
        log_level: i32,
    ) -> BridgeResult<TunnelHandle> {
        let logger = EngineLogger::new(self.config.log_tag.as_str(), self.sink.clone(), log_level);

        let Some(requested_name) = interface_name else {
            logger.error(format_args!("Interface name is null"));
            return Err(BridgeError::InvalidArgument("interface name is null".to_string()));
        };
        let Some(settings) = settings else {
            logger.error(format_args!("Settings are null"));
            return Err(BridgeError::InvalidArgument("settings are null".to_string()));
        };

        let device = match tun::claim_fd(fd)
            .and_then(|owned| self.tuns.from_fd(owned, normalize_mtu(mtu)))
        {
            Ok(device) => device,
            Err(e) => {
                logger.error(format_args!("Failed to create TUN device from descriptor {fd}: {e}"));
                return Err(e.into());
            }
        };
        let name = device.name().to_string();
        debug!(requested = requested_name, interface = %name, fd, "TUN device ready");

        let engine = self.engines.create(device, logger.clone());
        let control = self.start_control_listener(&name, &engine, &logger);
        let entry = TunnelEntry::new(engine.clone(), control);

        let mut reader = settings;
        if let Err(e) = engine.apply_config(&mut reader) {
            logger.error(format_args!("Failed to apply settings to {name}: {e}"));
            entry.shutdown();
            return Err(BridgeError::ConfigRejected(e));
        }

        let handle = match self.registry.allocate_and_register(entry) {
            Ok(handle) => handle,
            Err(entry) => {
                logger.error(format_args!("No free tunnel handle for {name}"));
                entry.shutdown();
                return Err(BridgeError::CapacityExhausted(self.registry.capacity()));
            }
        };

        if let Err(e) = engine.up() {
            logger.error(format_args!("Failed to bring up {name}: {e}"));
            match self.registry.remove_if_runs(handle, &engine) {
                Some(entry) => entry.shutdown(),
                None => engine.close(),
            }
            return Err(BridgeError::Engine(e));
        }

        // A concurrent turn_off may have claimed the handle while the engine
        // was starting; the handle may even belong to a newer tunnel by now.
        if !self.registry.is_bound_to(handle, &engine) {
            logger.error(format_args!("Tunnel {name} was turned off while coming up"));
            engine.close();
            return Err(BridgeError::NotFound(handle));
        }

        logger.info(format_args!("Tunnel {name} is up with handle {handle}"));
        info!(handle = %handle, interface = %name, "Tunnel up");
        Ok(handle)
    }

    /// Open the control socket for `name` and start serving it.
    ///
    /// Failures are logged and the tunnel continues without one.
    fn start_control_listener(
        &self,
        name: &str,
        engine: &Arc<dyn TunnelEngine>,
        logger: &EngineLogger,
    ) -> Option<Arc<ControlListener>> {
        let channel = match ControlChannel::open(&self.config.socket_dir, name) {
            Ok(channel) => channel,
            Err(e) => {
                logger.error(format_args!("Failed to open control socket for {name}: {e}"));
                return None;
            }
        };

        let _guard = self.handle.enter();
        // A failed listen drops, and so closes, the channel.
        let listener = match ControlListener::listen(channel) {
            Ok(listener) => Arc::new(listener),
            Err(e) => {
                logger.error(format_args!("Failed to start the control listener for {name}: {e}"));
                return None;
            }
        };

        ipc::spawn_accept_loop(&self.handle, listener.clone(), engine.clone());
        Some(listener)
    }

    /// Tear down a tunnel: unregister it, close its control listener and
    /// close the engine. The handle becomes free for reuse.
    pub fn turn_off(&self, handle: TunnelHandle) -> BridgeResult<()> {
        let entry = self
            .registry
            .remove(handle)
            .ok_or(BridgeError::NotFound(handle))?;
        entry.shutdown();
        info!(handle = %handle, "Tunnel turned off");
        Ok(())
    }

    /// Transport socket the engine currently uses for `family`.
    pub fn socket_fd(&self, handle: TunnelHandle, family: AddressFamily) -> BridgeResult<RawFd> {
        let entry = self
            .registry
            .lookup(handle)
            .ok_or(BridgeError::NotFound(handle))?;
        entry
            .engine()
            .socket_fd(family)
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    /// Current configuration of a tunnel in the engine's text format.
    pub fn get_config(&self, handle: TunnelHandle) -> BridgeResult<String> {
        let entry = self
            .registry
            .lookup(handle)
            .ok_or(BridgeError::NotFound(handle))?;
        Ok(entry.engine().get_config()?)
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        let entries = self.registry.drain();
        if !entries.is_empty() {
            warn!(count = entries.len(), "Bridge dropped with live tunnels, closing them");
        }
        for (_, entry) in entries {
            entry.shutdown();
        }

        // Never block here: the bridge may be dropped from inside async code.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn normalize_mtu(mtu: i32) -> usize {
    usize::try_from(mtu)
        .ok()
        .filter(|&mtu| mtu > 0)
        .unwrap_or(DEFAULT_MTU)
}
