//! Logging module for the mobile bridge.
//!
//! Two things live here. The first is the platform logging bridge: a set of
//! leveled writers that turn a plain `write(bytes)` into exactly one record
//! on the platform log (Android's `liblog` on device). The engine receives
//! these as an [`EngineLogger`]. The second is the crate-wide `tracing`
//! setup, which on Android is routed through the same bridge.

mod sink;

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use tracing::{Level, Metadata};
use tracing_subscriber::{fmt::MakeWriter, prelude::*, EnvFilter};

pub use sink::{platform_sink, LogSink, TracingLogSink};
#[cfg(target_os = "android")]
pub use sink::AndroidLogSink;

/// Default destination tag for platform log records.
pub const DEFAULT_LOG_TAG: &str = "coentrovpn";

/// Severity of a platform log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Error,
}

impl LogLevel {
    /// Priority value used by the Android log facility.
    pub fn android_priority(self) -> i32 {
        match self {
            LogLevel::Debug => 3,
            LogLevel::Info => 4,
            LogLevel::Error => 6,
        }
    }
}

impl From<&Level> for LogLevel {
    fn from(level: &Level) -> Self {
        if *level >= Level::DEBUG {
            // TRACE and DEBUG compare greater than INFO in tracing's ordering
            LogLevel::Debug
        } else if *level == Level::INFO {
            LogLevel::Info
        } else {
            LogLevel::Error
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// A byte sink bound to one severity and one tag.
///
/// Every `write` call becomes one platform record. The writer reports the
/// full buffer length as written; a muted writer drops the bytes but still
/// reports them as accepted.
#[derive(Clone)]
pub struct PlatformLogWriter {
    level: LogLevel,
    tag: Arc<str>,
    sink: Arc<dyn LogSink>,
    enabled: bool,
}

impl PlatformLogWriter {
    /// Create a writer forwarding to `sink` with the given severity and tag.
    pub fn new(level: LogLevel, tag: impl Into<Arc<str>>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            level,
            tag: tag.into(),
            sink,
            enabled: true,
        }
    }

    /// Return a copy of this writer that accepts but discards every record.
    pub fn muted(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn emit(&self, buf: &[u8]) -> io::Result<usize> {
        if !self.enabled {
            return Ok(buf.len());
        }

        let text = String::from_utf8_lossy(buf);
        let line = text.trim_end_matches(|c: char| c == '\n' || c == '\r');
        self.sink.write(self.level, &self.tag, line)?;
        Ok(buf.len())
    }
}

impl fmt::Debug for PlatformLogWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformLogWriter")
            .field("level", &self.level)
            .field("tag", &self.tag)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Write for PlatformLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.emit(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for &PlatformLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.emit(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The leveled log streams handed to a tunnel engine.
#[derive(Debug, Clone)]
pub struct EngineLogger {
    debug: PlatformLogWriter,
    info: PlatformLogWriter,
    error: PlatformLogWriter,
}

impl EngineLogger {
    /// Build the three writers for `tag`.
    ///
    /// `min_priority` uses the Android priority numbering. Writers whose
    /// priority is below it are muted; anything at or below DEBUG (including
    /// zero) enables every stream.
    pub fn new(tag: impl Into<Arc<str>>, sink: Arc<dyn LogSink>, min_priority: i32) -> Self {
        let tag = tag.into();
        let writer = |level: LogLevel| {
            let writer = PlatformLogWriter::new(level, tag.clone(), sink.clone());
            if level.android_priority() < min_priority {
                writer.muted()
            } else {
                writer
            }
        };

        Self {
            debug: writer(LogLevel::Debug),
            info: writer(LogLevel::Info),
            error: writer(LogLevel::Error),
        }
    }

    /// Writer for one severity.
    pub fn writer(&self, level: LogLevel) -> &PlatformLogWriter {
        match level {
            LogLevel::Debug => &self.debug,
            LogLevel::Info => &self.info,
            LogLevel::Error => &self.error,
        }
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Debug, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }

    /// Format the whole message first so it reaches the sink as one write.
    pub fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        let line = args.to_string();
        let mut writer = self.writer(level);
        if let Err(e) = writer.write(line.as_bytes()) {
            tracing::warn!(level = %level, error = %e, "Failed to write platform log record");
        }
    }
}

/// `MakeWriter` that picks the platform writer matching each event's level.
#[derive(Clone)]
pub struct PlatformMakeWriter {
    tag: Arc<str>,
    sink: Arc<dyn LogSink>,
}

impl PlatformMakeWriter {
    pub fn new(tag: impl Into<Arc<str>>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            tag: tag.into(),
            sink,
        }
    }
}

impl<'a> MakeWriter<'a> for PlatformMakeWriter {
    type Writer = PlatformLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        PlatformLogWriter::new(LogLevel::Info, self.tag.clone(), self.sink.clone())
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        PlatformLogWriter::new(
            LogLevel::from(meta.level()),
            self.tag.clone(),
            self.sink.clone(),
        )
    }
}

/// Log initialization options.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Log level (default: INFO)
    pub level: Level,

    /// Tag used for platform log records (default: "coentrovpn")
    pub tag: String,

    /// Route output through the platform log instead of stdout
    /// (default: true on Android, false elsewhere)
    pub to_platform: bool,

    /// Whether to include file and line information (default: false)
    pub include_file_line: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        LogOptions {
            level: Level::INFO,
            tag: DEFAULT_LOG_TAG.to_string(),
            to_platform: cfg!(target_os = "android"),
            include_file_line: false,
        }
    }
}

/// Install the process-wide `tracing` subscriber.
///
/// Safe to call more than once; only the first call takes effect. Platform
/// output must not be combined with [`TracingLogSink`], which would feed
/// records back into the subscriber.
pub fn init_logging(options: LogOptions) {
    let filter = EnvFilter::from_default_env().add_directive(options.level.into());

    let layer = tracing_subscriber::fmt::layer()
        .with_file(options.include_file_line)
        .with_line_number(options.include_file_line)
        .with_target(true);

    let layer = if options.to_platform {
        layer
            .with_ansi(false)
            .without_time()
            .with_writer(PlatformMakeWriter::new(options.tag, platform_sink()))
            .boxed()
    } else {
        layer.boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init();
}
