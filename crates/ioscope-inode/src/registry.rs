//! Shared monitor registry.
//!
//! The registry is the context object every tracer instance receives at
//! construction. It owns the notification backend, the trace sink handle,
//! and one shared slot for the monitor: the first `acquire` runs the
//! compatibility check and creates the monitor, later acquires share it,
//! and any setup failure latches the monitor permanently Absent.

use crate::backend::NotifyBackend;
use crate::error::MonitorError;
use crate::monitor::{CompatSignature, FsMonitor};
use crate::types::ObjectKey;
use ioscope_events::TraceSink;
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

#[derive(Default)]
struct Slot {
    monitor: Weak<FsMonitor>,
    disabled: bool,
}

/// Locator for the process-wide shared monitor.
pub struct MonitorRegistry {
    backend: Arc<dyn NotifyBackend>,
    sink: Arc<dyn TraceSink>,
    compat: CompatSignature,
    slot: Mutex<Slot>,
}

impl MonitorRegistry {
    /// Creates a registry over the given backend, sink, and signature.
    pub fn new(
        backend: Arc<dyn NotifyBackend>,
        sink: Arc<dyn TraceSink>,
        compat: CompatSignature,
    ) -> Self {
        Self {
            backend,
            sink,
            compat,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// The trace sink instances emit through.
    pub fn sink(&self) -> &Arc<dyn TraceSink> {
        &self.sink
    }

    /// Returns the shared monitor, creating it on first demand. `None`
    /// means the monitor path is Absent — permanently, once any setup
    /// step has failed.
    pub fn acquire(&self) -> Option<Arc<FsMonitor>> {
        let mut slot = self.slot.lock().expect("lock poisoned");
        if slot.disabled {
            return None;
        }
        if let Some(monitor) = slot.monitor.upgrade() {
            return Some(monitor);
        }

        if !self.compat.matches() {
            let e = MonitorError::IncompatibleSignature {
                built: self.compat.built.clone(),
                running: self.compat.running.clone(),
            };
            warn!("cannot set up fs monitor: {}", e);
            slot.disabled = true;
            return None;
        }
        if let Err(e) = self.backend.probe() {
            warn!("cannot set up fs monitor: {}", e);
            slot.disabled = true;
            return None;
        }

        match FsMonitor::create(self.backend.clone(), self.sink.clone()) {
            Ok(monitor) => {
                slot.monitor = Arc::downgrade(&monitor);
                Some(monitor)
            }
            Err(e) => {
                warn!("cannot set up fs monitor: {}", e);
                slot.disabled = true;
                None
            }
        }
    }

    /// Whether the monitor path has been latched Absent.
    pub fn is_disabled(&self) -> bool {
        self.slot.lock().expect("lock poisoned").disabled
    }

    /// Arms a watch on `object` if the monitor is present; no-op
    /// otherwise. Convenience for callers that do not hold a monitor
    /// reference of their own.
    pub fn watch(&self, object: ObjectKey) {
        if let Some(monitor) = self.acquire() {
            monitor.watch(object);
        }
    }
}
