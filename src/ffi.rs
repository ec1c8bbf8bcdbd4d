//! C entry points called by the host VPN service.
//!
//! Handles and descriptors cross the boundary as plain integers. Failures
//! are reported through sentinels only: `-1` for anything generic, `-2` from
//! bring-up when the descriptor is bad or the settings were rejected, and a
//! NULL pointer where a string is returned.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use tracing::error;

use crate::bridge::{installed, Bridge};
use crate::engine::AddressFamily;
use crate::tunnel::{TunnelHandle, STATUS_GENERIC_FAILURE};

static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// Borrow the bytes of a C string from the host. NULL becomes `None`.
///
/// # Safety
///
/// `ptr` must be NULL or point to a NUL-terminated string that stays valid
/// for `'a`.
unsafe fn c_bytes<'a>(ptr: *const c_char) -> Option<&'a [u8]> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_bytes())
}

/// Run `f` against the installed bridge, returning `fallback` when there is
/// none or when `f` panics. Panics must not unwind into the host.
fn with_bridge<T>(entry_point: &str, fallback: T, f: impl FnOnce(&Bridge) -> T) -> T {
    let Some(bridge) = installed() else {
        error!(entry_point, "Called before a bridge was installed");
        return fallback;
    };

    match catch_unwind(AssertUnwindSafe(|| f(bridge))) {
        Ok(value) => value,
        Err(_) => {
            error!(entry_point, "Panic while serving entry point");
            fallback
        }
    }
}

/// Bring up a tunnel on `fd`.
///
/// Returns the tunnel handle (>= 0), `-2` if the descriptor is bad or the
/// settings were rejected, `-1` on any other failure. `log_fd` is accepted
/// for ABI compatibility and ignored; `log_level` is the minimum Android log
/// priority forwarded from the engine.
///
/// # Safety
///
/// `interface_name` and `settings` must each be NULL or a valid
/// NUL-terminated string for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn coentro_turn_on_with_fd(
    interface_name: *const c_char,
    mtu: c_int,
    settings: *const c_char,
    fd: c_int,
    log_fd: c_int,
    log_level: c_int,
) -> i32 {
    let _ = log_fd;

    // Neither argument has to be UTF-8: the name is informational and the
    // settings go to the engine as bytes.
    let interface_name = unsafe { c_bytes(interface_name) }.map(String::from_utf8_lossy);
    let settings = unsafe { c_bytes(settings) };

    with_bridge("coentro_turn_on_with_fd", STATUS_GENERIC_FAILURE, |bridge| {
        match bridge.turn_on_with_fd(interface_name.as_deref(), mtu, settings, fd, log_level) {
            Ok(handle) => handle.get(),
            Err(e) => e.status_code(),
        }
    })
}

/// Tear down the tunnel behind `handle`. Unknown handles are ignored.
#[no_mangle]
pub extern "C" fn coentro_turn_off(handle: i32) {
    let Some(handle) = TunnelHandle::new(handle) else {
        return;
    };
    with_bridge("coentro_turn_off", (), |bridge| {
        let _ = bridge.turn_off(handle);
    });
}

/// IPv4 transport socket of the tunnel, or `-1`.
#[no_mangle]
pub extern "C" fn coentro_get_socket_v4(handle: i32) -> i32 {
    get_socket("coentro_get_socket_v4", handle, AddressFamily::V4)
}

/// IPv6 transport socket of the tunnel, or `-1`.
#[no_mangle]
pub extern "C" fn coentro_get_socket_v6(handle: i32) -> i32 {
    get_socket("coentro_get_socket_v6", handle, AddressFamily::V6)
}

fn get_socket(entry_point: &str, handle: i32, family: AddressFamily) -> i32 {
    let Some(handle) = TunnelHandle::new(handle) else {
        return -1;
    };
    with_bridge(entry_point, -1, |bridge| {
        bridge.socket_fd(handle, family).unwrap_or(-1)
    })
}

/// Current configuration of the tunnel, or NULL.
///
/// The returned string must be released with [`coentro_free_string`].
#[no_mangle]
pub extern "C" fn coentro_get_config(handle: i32) -> *mut c_char {
    let Some(handle) = TunnelHandle::new(handle) else {
        return ptr::null_mut();
    };
    with_bridge("coentro_get_config", ptr::null_mut(), |bridge| {
        bridge
            .get_config(handle)
            .ok()
            .and_then(|config| CString::new(config).ok())
            .map_or(ptr::null_mut(), CString::into_raw)
    })
}

/// Release a string returned by this library.
///
/// # Safety
///
/// `s` must be NULL or a pointer obtained from [`coentro_get_config`] that
/// has not been freed yet.
#[no_mangle]
pub unsafe extern "C" fn coentro_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

/// Library version as a static NUL-terminated string.
#[no_mangle]
pub extern "C" fn coentro_version() -> *const c_char {
    VERSION.as_ptr().cast()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_bytes_null_and_raw() {
        assert_eq!(unsafe { c_bytes(ptr::null()) }, None);

        let s = CString::new(b"wg\xe9".to_vec()).unwrap();
        assert_eq!(unsafe { c_bytes(s.as_ptr()) }, Some(&b"wg\xe9"[..]));
    }

    #[test]
    fn test_negative_handles_are_rejected() {
        assert_eq!(coentro_get_socket_v4(-1), -1);
        assert_eq!(coentro_get_socket_v6(-7), -1);
        assert!(coentro_get_config(-1).is_null());
        coentro_turn_off(-1);
    }

    #[test]
    fn test_version_string() {
        let version = unsafe { CStr::from_ptr(coentro_version()) };
        assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_free_null_string() {
        unsafe { coentro_free_string(ptr::null_mut()) };
    }
}
