//! Destinations for platform log records.

use std::io;
use std::sync::Arc;

use tracing::{debug, error, info};

use super::LogLevel;

/// A system-wide log facility keyed by (severity, tag, message).
pub trait LogSink: Send + Sync {
    /// Issue one record. An error means the record could not be issued.
    fn write(&self, level: LogLevel, tag: &str, message: &str) -> io::Result<()>;
}

/// Sink that re-emits records as `tracing` events.
///
/// Used off-device, where there is no platform log to write to.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn write(&self, level: LogLevel, tag: &str, message: &str) -> io::Result<()> {
        match level {
            LogLevel::Debug => debug!(target: "coentro_mobile::engine", tag = %tag, "{}", message),
            LogLevel::Info => info!(target: "coentro_mobile::engine", tag = %tag, "{}", message),
            LogLevel::Error => error!(target: "coentro_mobile::engine", tag = %tag, "{}", message),
        }
        Ok(())
    }
}

#[cfg(target_os = "android")]
mod android {
    use std::ffi::CString;
    use std::io;
    use std::os::raw::{c_char, c_int};

    use super::{LogLevel, LogSink};

    #[link(name = "log")]
    extern "C" {
        fn __android_log_write(prio: c_int, tag: *const c_char, text: *const c_char) -> c_int;
    }

    /// Sink writing to Android's `liblog`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct AndroidLogSink;

    impl LogSink for AndroidLogSink {
        fn write(&self, level: LogLevel, tag: &str, message: &str) -> io::Result<()> {
            let tag = CString::new(tag)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let text = CString::new(message)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

            // SAFETY: both pointers come from live CStrings and liblog copies the text.
            let rc = unsafe {
                __android_log_write(level.android_priority(), tag.as_ptr(), text.as_ptr())
            };
            if rc < 0 {
                return Err(io::Error::from_raw_os_error(-rc));
            }
            Ok(())
        }
    }
}

#[cfg(target_os = "android")]
pub use android::AndroidLogSink;

/// The native log facility for the current target.
pub fn platform_sink() -> Arc<dyn LogSink> {
    #[cfg(target_os = "android")]
    {
        Arc::new(AndroidLogSink)
    }

    #[cfg(not(target_os = "android"))]
    {
        Arc::new(TracingLogSink)
    }
}
