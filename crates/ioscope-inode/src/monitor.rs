//! Filesystem-change monitor.
//!
//! One `FsMonitor` exists system-wide (shared through the registry). It
//! wraps a single subscription group, arms watches, and turns delivered
//! notifications into file-lifecycle trace records. The cache is never
//! touched from this path: staleness is handled lazily by the cache's
//! ctime check, so the synchronous and asynchronous write paths stay
//! disjoint.

use crate::backend::{
    EventHandler, EventMask, EventPayload, GroupId, MarkOutcome, NotifyBackend,
};
use crate::error::MonitorError;
use crate::types::{ObjectKey, ObjectStamp};
use ioscope_events::{emit, now_ns, FileEvent, FsEventKind, RecordBody, TraceSink};
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, trace};

/// Build/runtime compatibility signature. The monitor path is enabled
/// only when the signature the library was built against matches the
/// running environment's.
#[derive(Clone, Debug)]
pub struct CompatSignature {
    /// Signature compiled into the library.
    pub built: String,
    /// Signature reported by the running environment.
    pub running: String,
}

impl CompatSignature {
    /// Signature of the current environment, for both sides.
    pub fn current() -> Self {
        let signature = format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH);
        Self {
            built: signature.clone(),
            running: signature,
        }
    }

    /// Builds a signature pair explicitly.
    pub fn new(built: impl Into<String>, running: impl Into<String>) -> Self {
        Self {
            built: built.into(),
            running: running.into(),
        }
    }

    /// Whether the monitor path may be enabled.
    pub fn matches(&self) -> bool {
        self.built == self.running
    }
}

// The backend holds the handler weakly and the handler holds the monitor
// weakly, so the only strong edge is monitor -> handler: dropping the
// last monitor reference tears the chain down.
struct GroupHandler {
    monitor: RwLock<Weak<FsMonitor>>,
}

impl EventHandler for GroupHandler {
    fn on_event(&self, watched: ObjectKey, mask: EventMask, payload: EventPayload) {
        let monitor = self.monitor.read().expect("lock poisoned").upgrade();
        if let Some(monitor) = monitor {
            monitor.handle_event(watched, mask, payload);
        }
    }
}

/// The shared filesystem monitor: one subscription group plus its marks.
pub struct FsMonitor {
    group: GroupId,
    backend: Arc<dyn NotifyBackend>,
    sink: Arc<dyn TraceSink>,
    // Keeps the backend's weak handler reference alive.
    _handler: Arc<GroupHandler>,
}

impl FsMonitor {
    pub(crate) fn create(
        backend: Arc<dyn NotifyBackend>,
        sink: Arc<dyn TraceSink>,
    ) -> Result<Arc<Self>, MonitorError> {
        let handler = Arc::new(GroupHandler {
            monitor: RwLock::new(Weak::new()),
        });
        let handler_dyn: Arc<dyn EventHandler> = handler.clone();
        let weak: Weak<dyn EventHandler> = Arc::downgrade(&handler_dyn);
        let group = backend.subscribe(weak)?;

        let monitor = Arc::new(FsMonitor {
            group,
            backend,
            sink,
            _handler: handler.clone(),
        });
        *handler.monitor.write().expect("lock poisoned") = Arc::downgrade(&monitor);
        debug!("fs monitor created, group {}", monitor.group);
        Ok(monitor)
    }

    /// The subscription group this monitor owns.
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Registers interest in all event classes for `object`, so events on
    /// the object and its children are delivered. Idempotent; a failed
    /// registration (object already gone) is dropped, not an error.
    pub fn watch(&self, object: ObjectKey) {
        match self.backend.add_mark(self.group, object) {
            Ok(MarkOutcome::Added(mark)) => {
                debug!("mark {} added, object {}:{}", mark, object.device, object.object);
            }
            Ok(MarkOutcome::AlreadyExists) => {
                trace!("mark already set, object {}:{}", object.device, object.object);
            }
            Err(e) => {
                debug!(
                    "mark registration dropped, object {}:{}: {}",
                    object.device, object.object, e
                );
            }
        }
    }

    fn handle_event(&self, watched: ObjectKey, mask: EventMask, payload: EventPayload) {
        let Some(child) = payload.stamp() else {
            trace!("event without payload on {}:{}, mask {:?}", watched.device, watched.object, mask);
            return;
        };

        if mask.contains(EventMask::MOVED_FROM) {
            self.emit_event(&child, FsEventKind::MoveFrom);
        }
        if mask.contains(EventMask::MOVED_TO) {
            self.emit_event(&child, FsEventKind::MoveTo);
        }
        if mask.contains(EventMask::CREATE) {
            self.watch(child.key);
            self.emit_event(&child, FsEventKind::Create);
        }
        if mask.contains(EventMask::DELETE_SELF) {
            // No parent context is available here; the record carries only
            // the object identity.
            self.emit_event(&child, FsEventKind::Delete);
        }
        if mask.contains(EventMask::OPEN) {
            self.watch(child.key);
        }
    }

    fn emit_event(&self, stamp: &ObjectStamp, kind: FsEventKind) {
        let body = RecordBody::FileEvent(FileEvent {
            device_id: stamp.key.device,
            file: stamp.file_ref(),
            kind,
        });
        if let Err(e) = emit(self.sink.as_ref(), now_ns(), body) {
            debug!("file event dropped: {}", e);
        }
    }
}

impl Drop for FsMonitor {
    fn drop(&mut self) {
        debug!("destroying fs monitor, group {}", self.group);
        // The backend drains in-flight callbacks for the group.
        self.backend.unsubscribe(self.group);
    }
}
