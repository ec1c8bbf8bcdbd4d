//! Type definitions for the tunnel module.

use std::fmt;

/// Identifier of a registered tunnel, as seen by the host.
///
/// Always non-negative; the C ABI carries it as an `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TunnelHandle(i32);

impl TunnelHandle {
    /// Wrap a raw handle, rejecting negative values.
    pub fn new(raw: i32) -> Option<Self> {
        (raw >= 0).then_some(TunnelHandle(raw))
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for TunnelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TunnelHandle> for i32 {
    fn from(handle: TunnelHandle) -> Self {
        handle.0
    }
}
