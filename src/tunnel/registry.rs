//! Tunnel handle registry.
//!
//! Maps the small integers handed to the host onto running engines. A
//! handle is present exactly while its engine is alive, and entries only
//! ever go in as complete units.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::engine::TunnelEngine;
use crate::ipc::ControlListener;
use crate::tunnel::types::TunnelHandle;

/// One registered tunnel.
#[derive(Clone)]
pub struct TunnelEntry {
    engine: Arc<dyn TunnelEngine>,
    control: Option<Arc<ControlListener>>,
}

impl TunnelEntry {
    pub(crate) fn new(
        engine: Arc<dyn TunnelEngine>,
        control: Option<Arc<ControlListener>>,
    ) -> Self {
        Self { engine, control }
    }

    /// The running engine.
    pub fn engine(&self) -> &Arc<dyn TunnelEngine> {
        &self.engine
    }

    /// Control socket listener, shared with its accept loop.
    pub fn control(&self) -> Option<&Arc<ControlListener>> {
        self.control.as_ref()
    }

    fn runs(&self, engine: &Arc<dyn TunnelEngine>) -> bool {
        // Compare data pointers only; vtable pointers may differ per codegen unit.
        std::ptr::eq(
            Arc::as_ptr(&self.engine) as *const (),
            Arc::as_ptr(engine) as *const (),
        )
    }

    /// Close the control listener, then the engine.
    pub(crate) fn shutdown(&self) {
        if let Some(control) = &self.control {
            control.close();
        }
        self.engine.close();
    }
}

impl fmt::Debug for TunnelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelEntry")
            .field("engine", &"dyn TunnelEngine")
            .field("control", &self.control.as_ref().map(|c| c.path().to_path_buf()))
            .finish()
    }
}

/// Table of live tunnels.
pub struct TunnelRegistry {
    entries: RwLock<BTreeMap<TunnelHandle, TunnelEntry>>,
    capacity: i32,
}

impl TunnelRegistry {
    /// Registry spanning the whole non-negative `i32` range.
    pub fn new() -> Self {
        Self::with_capacity(i32::MAX)
    }

    /// Registry handing out handles `0..capacity`.
    pub fn with_capacity(capacity: i32) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            capacity: capacity.max(0),
        }
    }

    pub fn capacity(&self) -> i32 {
        self.capacity
    }

    /// Bind `entry` to the smallest free handle.
    ///
    /// The scan and the insert happen under one write lock. When every handle
    /// is taken, the entry is handed back untouched so the caller can shut it
    /// down.
    pub(crate) fn allocate_and_register(
        &self,
        entry: TunnelEntry,
    ) -> Result<TunnelHandle, TunnelEntry> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let Some(handle) = first_free(&entries, self.capacity) else {
            return Err(entry);
        };

        entries.insert(handle, entry);
        debug!(handle = %handle, live = entries.len(), "Registered tunnel");
        Ok(handle)
    }

    /// Look up a registered tunnel.
    pub fn lookup(&self, handle: TunnelHandle) -> Option<TunnelEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
    }

    /// Remove a tunnel, returning its entry.
    pub(crate) fn remove(&self, handle: TunnelHandle) -> Option<TunnelEntry> {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
        if removed.is_some() {
            debug!(handle = %handle, "Unregistered tunnel");
        }
        removed
    }

    /// Remove `handle` only while it is still bound to `engine`.
    ///
    /// A handle freed by a concurrent teardown may already belong to a newer
    /// tunnel, which must be left alone.
    pub(crate) fn remove_if_runs(
        &self,
        handle: TunnelHandle,
        engine: &Arc<dyn TunnelEngine>,
    ) -> Option<TunnelEntry> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.get(&handle).is_some_and(|entry| entry.runs(engine)) {
            return None;
        }
        let removed = entries.remove(&handle);
        debug!(handle = %handle, "Unregistered tunnel");
        removed
    }

    /// Whether `handle` is currently bound to `engine`.
    pub(crate) fn is_bound_to(&self, handle: TunnelHandle, engine: &Arc<dyn TunnelEngine>) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .is_some_and(|entry| entry.runs(engine))
    }

    pub fn contains(&self, handle: TunnelHandle) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&handle)
    }

    /// Registered handles in ascending order.
    pub fn handles(&self) -> Vec<TunnelHandle> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry. Used when the owning bridge goes away.
    pub(crate) fn drain(&self) -> Vec<(TunnelHandle, TunnelEntry)> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *entries).into_iter().collect()
    }
}

impl Default for TunnelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest handle in `0..capacity` missing from `entries`.
fn first_free(
    entries: &BTreeMap<TunnelHandle, TunnelEntry>,
    capacity: i32,
) -> Option<TunnelHandle> {
    // Keys are sorted, so the first gap in 0, 1, 2, ... is the answer.
    let mut candidate = 0;
    for handle in entries.keys() {
        if handle.get() != candidate {
            break;
        }
        candidate += 1;
    }

    if candidate < capacity {
        TunnelHandle::new(candidate)
    } else {
        None
    }
}
