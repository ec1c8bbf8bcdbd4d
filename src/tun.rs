//! Virtual interface construction from a host-supplied descriptor.
//!
//! The host opens the TUN device (on Android through `VpnService.Builder`)
//! and hands us the raw descriptor. We claim it, wrap it as a [`TunDevice`]
//! and pass it on to the engine. Link monitoring stays with the host.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use thiserror::Error;
use tracing::debug;

/// MTU used when the host does not supply a usable one.
pub const DEFAULT_MTU: usize = 1280;

/// Result type for interface construction.
pub type TunResult<T> = Result<T, TunError>;

/// Error type for interface construction.
#[derive(Debug, Error)]
pub enum TunError {
    /// The descriptor is not open. It was not closed again.
    #[error("Bad file descriptor: {0}")]
    BadDescriptor(RawFd),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TUN device error
    #[error("TUN device error: {0}")]
    Device(String),
}

impl From<Errno> for TunError {
    fn from(errno: Errno) -> Self {
        TunError::Io(io::Error::from(errno))
    }
}

/// Take ownership of a raw descriptor received from the host.
///
/// A descriptor that is negative or not open yields
/// [`TunError::BadDescriptor`] and is left alone, so a stale number that the
/// process has since reused is never closed by mistake.
pub fn claim_fd(fd: RawFd) -> TunResult<OwnedFd> {
    if fd < 0 {
        return Err(TunError::BadDescriptor(fd));
    }

    match fcntl(fd, FcntlArg::F_GETFD) {
        Err(Errno::EBADF) => Err(TunError::BadDescriptor(fd)),
        // SAFETY: the descriptor is open and the host transferred it to us.
        _ => Ok(unsafe { OwnedFd::from_raw_fd(fd) }),
    }
}

/// A TUN interface backed by a descriptor we own.
#[derive(Debug)]
pub struct TunDevice {
    fd: OwnedFd,
    name: String,
    mtu: usize,
}

impl TunDevice {
    pub fn new(fd: OwnedFd, name: impl Into<String>, mtu: usize) -> Self {
        Self {
            fd,
            name: name.into(),
            mtu,
        }
    }

    /// Interface name as resolved from the descriptor.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Give up the device, returning the descriptor.
    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }
}

impl AsFd for TunDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for TunDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl IntoRawFd for TunDevice {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

/// Builds a [`TunDevice`] from a claimed descriptor.
///
/// On error the descriptor has been dropped, and therefore closed.
pub trait TunFactory: Send + Sync {
    fn from_fd(&self, fd: OwnedFd, mtu: usize) -> TunResult<TunDevice>;
}

/// Factory for TUN descriptors opened by the host.
///
/// Switches the descriptor to non-blocking mode and asks the kernel for the
/// interface name. It does not watch the link for changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnmonitoredTunFactory;

impl TunFactory for UnmonitoredTunFactory {
    fn from_fd(&self, fd: OwnedFd, mtu: usize) -> TunResult<TunDevice> {
        let raw = fd.as_raw_fd();

        let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
        fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;

        let name = interface_name(raw)?;
        debug!(fd = raw, interface = %name, mtu, "Wrapped TUN descriptor");

        Ok(TunDevice::new(fd, name, mtu))
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn interface_name(fd: RawFd) -> TunResult<String> {
    use std::ffi::CStr;
    use std::os::raw::{c_char, c_short};

    // _IOR('T', 210, unsigned int)
    const TUNGETIFF: u32 = 0x8004_54d2;
    const IFNAMSIZ: usize = 16;

    #[repr(C)]
    struct IfReq {
        name: [c_char; IFNAMSIZ],
        flags: c_short,
        _pad: [u8; 22],
    }

    let mut req = IfReq {
        name: [0; IFNAMSIZ],
        flags: 0,
        _pad: [0; 22],
    };

    // SAFETY: `req` is a properly sized ifreq that outlives the call.
    let rc = unsafe { libc::ioctl(fd, TUNGETIFF as _, &mut req as *mut IfReq) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        return Err(TunError::Device(format!(
            "descriptor {fd} is not a TUN interface: {err}"
        )));
    }

    // The kernel always NUL-terminates within IFNAMSIZ.
    let name = unsafe { CStr::from_ptr(req.name.as_ptr()) };
    Ok(name.to_string_lossy().into_owned())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn interface_name(fd: RawFd) -> TunResult<String> {
    Err(TunError::Device(format!(
        "resolving the interface name of descriptor {fd} is not supported on this platform"
    )))
}
