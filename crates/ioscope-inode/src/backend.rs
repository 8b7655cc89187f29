//! Pluggable notification backend.
//!
//! The monitor consumes change notifications through this interface. Two
//! implementations exist: `InProcessBackend`, which delivers events
//! synchronously on whatever thread calls `deliver` (modeling the
//! asynchronous callback path of a real notification subsystem), and
//! `DisabledBackend`, which fails the probe so the monitor stays Absent.

use crate::types::{ObjectKey, ObjectStamp};
use bitflags::bitflags;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::debug;

bitflags! {
    /// Event classes a mark can report.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u32 {
        /// Child moved out of a watched directory.
        const MOVED_FROM = 1 << 0;
        /// Child moved into a watched directory.
        const MOVED_TO = 1 << 1;
        /// Child created in a watched directory.
        const CREATE = 1 << 2;
        /// The watched object itself was deleted.
        const DELETE_SELF = 1 << 3;
        /// The object was opened; used only to extend watch coverage.
        const OPEN = 1 << 4;
    }
}

/// The four event classes that produce trace records.
pub const COLLECTED_EVENTS: EventMask = EventMask::MOVED_FROM
    .union(EventMask::MOVED_TO)
    .union(EventMask::CREATE)
    .union(EventMask::DELETE_SELF);

/// Event payload, by delivery shape.
#[derive(Clone, Copy, Debug)]
pub enum EventPayload {
    /// Child object resolved through a path-shaped notification.
    Path(ObjectStamp),
    /// Child object delivered directly.
    Object(ObjectStamp),
    /// No payload; nothing to trace.
    None,
}

impl EventPayload {
    /// The child stamp, if the payload carries one.
    pub fn stamp(&self) -> Option<ObjectStamp> {
        match self {
            EventPayload::Path(stamp) | EventPayload::Object(stamp) => Some(*stamp),
            EventPayload::None => None,
        }
    }
}

/// Subscription group identifier.
pub type GroupId = u64;
/// Watch (mark) identifier.
pub type MarkId = u64;

/// Outcome of a mark registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkOutcome {
    /// A new mark was registered.
    Added(MarkId),
    /// A mark for `(group, object)` already existed; nothing was done.
    AlreadyExists,
}

/// Backend failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend is not usable in this environment.
    #[error("notification backend unavailable")]
    Unavailable,

    /// The group is not registered with this backend.
    #[error("unknown subscription group {0}")]
    UnknownGroup(GroupId),

    /// The object disappeared before the mark could be registered.
    #[error("object no longer exists")]
    ObjectGone,
}

/// Receiver of delivered events. Implementations must tolerate concurrent
/// invocation from arbitrary threads.
pub trait EventHandler: Send + Sync {
    /// Called once per delivered event.
    fn on_event(&self, watched: ObjectKey, mask: EventMask, payload: EventPayload);
}

/// Notification backend operations.
pub trait NotifyBackend: Send + Sync {
    /// One-time availability check. An error permanently disables the
    /// monitor path; it is never retried.
    fn probe(&self) -> Result<(), BackendError>;

    /// Creates a subscription group delivering to `handler`. The backend
    /// holds the handler weakly; a dead handler turns deliveries into
    /// no-ops.
    fn subscribe(&self, handler: Weak<dyn EventHandler>) -> Result<GroupId, BackendError>;

    /// Registers interest in all event classes for `object`. Idempotent
    /// per `(group, object)`.
    fn add_mark(&self, group: GroupId, object: ObjectKey) -> Result<MarkOutcome, BackendError>;

    /// Removes the mark for `(group, object)`, if any.
    fn remove_mark(&self, group: GroupId, object: ObjectKey) -> Result<(), BackendError>;

    /// Destroys a group and its marks. Does not return while a delivery
    /// for this group is in flight on another thread; a call made from
    /// inside the group's own callback returns immediately and the
    /// callback completes afterwards.
    fn unsubscribe(&self, group: GroupId);
}

thread_local! {
    // Groups whose delivery callback is on the current thread's stack.
    static DELIVERING: RefCell<Vec<GroupId>> = const { RefCell::new(Vec::new()) };
}

struct GroupState {
    handler: Weak<dyn EventHandler>,
    in_flight: Arc<AtomicUsize>,
}

/// In-process notification backend: internally locked group and mark
/// tables, events injected via [`InProcessBackend::deliver`] from any
/// thread.
#[derive(Default)]
pub struct InProcessBackend {
    groups: DashMap<GroupId, GroupState>,
    marks: DashMap<(GroupId, ObjectKey), MarkId>,
    next_group: AtomicU64,
    next_mark: AtomicU64,
}

impl InProcessBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers one event to `group`, synchronously on the calling
    /// thread. No-op if the group is gone or its handler has died. A
    /// `DELETE_SELF` delivery also retires every mark on the object.
    pub fn deliver(
        &self,
        group: GroupId,
        watched: ObjectKey,
        mask: EventMask,
        payload: EventPayload,
    ) {
        let (handler, in_flight) = match self.groups.get(&group) {
            Some(state) => {
                // Counted while the map guard is held, so an unsubscribe
                // that wins the map removal cannot miss this delivery.
                state.in_flight.fetch_add(1, Ordering::AcqRel);
                (state.handler.clone(), state.in_flight.clone())
            }
            None => return,
        };
        // The map guard is released before the callback runs, so the
        // handler may re-enter the backend (e.g. to add a mark).
        DELIVERING.with(|d| d.borrow_mut().push(group));
        if let Some(handler) = handler.upgrade() {
            handler.on_event(watched, mask, payload);
        }
        DELIVERING.with(|d| {
            let mut d = d.borrow_mut();
            if let Some(pos) = d.iter().rposition(|&g| g == group) {
                d.remove(pos);
            }
        });
        in_flight.fetch_sub(1, Ordering::AcqRel);

        if mask.contains(EventMask::DELETE_SELF) {
            if let Some(stamp) = payload.stamp() {
                self.marks.retain(|&(_, key), _| key != stamp.key);
            }
        }
    }

    /// Number of registered marks, across all groups.
    pub fn mark_count(&self) -> usize {
        self.marks.len()
    }

    /// Whether `(group, object)` has a mark.
    pub fn has_mark(&self, group: GroupId, object: ObjectKey) -> bool {
        self.marks.contains_key(&(group, object))
    }

    /// Number of live subscription groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

impl NotifyBackend for InProcessBackend {
    fn probe(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn subscribe(&self, handler: Weak<dyn EventHandler>) -> Result<GroupId, BackendError> {
        let group = self.next_group.fetch_add(1, Ordering::Relaxed) + 1;
        self.groups.insert(
            group,
            GroupState {
                handler,
                in_flight: Arc::new(AtomicUsize::new(0)),
            },
        );
        debug!("subscription group {} created", group);
        Ok(group)
    }

    fn add_mark(&self, group: GroupId, object: ObjectKey) -> Result<MarkOutcome, BackendError> {
        if !self.groups.contains_key(&group) {
            return Err(BackendError::UnknownGroup(group));
        }
        match self.marks.entry((group, object)) {
            Entry::Occupied(_) => Ok(MarkOutcome::AlreadyExists),
            Entry::Vacant(vacant) => {
                let mark = self.next_mark.fetch_add(1, Ordering::Relaxed) + 1;
                vacant.insert(mark);
                Ok(MarkOutcome::Added(mark))
            }
        }
    }

    fn remove_mark(&self, group: GroupId, object: ObjectKey) -> Result<(), BackendError> {
        self.marks.remove(&(group, object));
        Ok(())
    }

    fn unsubscribe(&self, group: GroupId) {
        let state = match self.groups.remove(&group) {
            Some((_, state)) => state,
            None => return,
        };
        self.marks.retain(|&(g, _), _| g != group);

        // Fence: deliveries on other threads must drain before the group
        // is considered gone. Deliveries above us on this thread's own
        // stack complete after we return.
        let own = DELIVERING.with(|d| d.borrow().iter().filter(|&&g| g == group).count());
        while state.in_flight.load(Ordering::Acquire) > own {
            std::thread::yield_now();
        }
        debug!("subscription group {} destroyed", group);
    }
}

/// Backend whose probe always fails; the monitor path stays disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledBackend;

impl NotifyBackend for DisabledBackend {
    fn probe(&self) -> Result<(), BackendError> {
        Err(BackendError::Unavailable)
    }

    fn subscribe(&self, _handler: Weak<dyn EventHandler>) -> Result<GroupId, BackendError> {
        Err(BackendError::Unavailable)
    }

    fn add_mark(&self, _group: GroupId, _object: ObjectKey) -> Result<MarkOutcome, BackendError> {
        Err(BackendError::Unavailable)
    }

    fn remove_mark(&self, _group: GroupId, _object: ObjectKey) -> Result<(), BackendError> {
        Ok(())
    }

    fn unsubscribe(&self, _group: GroupId) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use ioscope_events::Ctime;
    use std::sync::Mutex;

    struct Recorder {
        events: Mutex<Vec<(ObjectKey, EventMask)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }
    }

    impl EventHandler for Recorder {
        fn on_event(&self, watched: ObjectKey, mask: EventMask, _payload: EventPayload) {
            self.events.lock().unwrap().push((watched, mask));
        }
    }

    fn key(id: u64) -> ObjectKey {
        ObjectKey::new(1, id)
    }

    fn payload(id: u64) -> EventPayload {
        EventPayload::Object(ObjectStamp::new(key(id), Ctime::new(1, 0)))
    }

    #[test]
    fn subscribe_and_deliver_reaches_handler() {
        let backend = InProcessBackend::new();
        let recorder = Recorder::new();
        let recorder_dyn: Arc<dyn EventHandler> = recorder.clone();
        let weak: Weak<dyn EventHandler> = Arc::downgrade(&recorder_dyn);
        let group = backend.subscribe(weak).unwrap();

        backend.deliver(group, key(10), EventMask::CREATE, payload(11));

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], (key(10), EventMask::CREATE));
    }

    #[test]
    fn deliver_to_dead_handler_is_noop() {
        let backend = InProcessBackend::new();
        let recorder = Recorder::new();
        let recorder_dyn: Arc<dyn EventHandler> = recorder.clone();
        let weak: Weak<dyn EventHandler> = Arc::downgrade(&recorder_dyn);
        let group = backend.subscribe(weak).unwrap();
        drop(recorder);

        backend.deliver(group, key(10), EventMask::CREATE, payload(11));
    }

    #[test]
    fn add_mark_is_idempotent() {
        let backend = InProcessBackend::new();
        let recorder = Recorder::new();
        let recorder_dyn: Arc<dyn EventHandler> = recorder.clone();
        let weak: Weak<dyn EventHandler> = Arc::downgrade(&recorder_dyn);
        let group = backend.subscribe(weak).unwrap();

        let first = backend.add_mark(group, key(5)).unwrap();
        assert!(matches!(first, MarkOutcome::Added(_)));
        let second = backend.add_mark(group, key(5)).unwrap();
        assert_eq!(second, MarkOutcome::AlreadyExists);
        assert_eq!(backend.mark_count(), 1);
    }

    #[test]
    fn add_mark_on_unknown_group_fails() {
        let backend = InProcessBackend::new();
        let err = backend.add_mark(99, key(5)).unwrap_err();
        assert_eq!(err, BackendError::UnknownGroup(99));
    }

    #[test]
    fn unsubscribe_drops_the_groups_marks() {
        let backend = InProcessBackend::new();
        let recorder = Recorder::new();
        let recorder_dyn: Arc<dyn EventHandler> = recorder.clone();
        let weak: Weak<dyn EventHandler> = Arc::downgrade(&recorder_dyn);
        let group = backend.subscribe(weak).unwrap();
        backend.add_mark(group, key(5)).unwrap();
        backend.add_mark(group, key(6)).unwrap();

        backend.unsubscribe(group);

        assert_eq!(backend.group_count(), 0);
        assert_eq!(backend.mark_count(), 0);
        backend.deliver(group, key(10), EventMask::CREATE, payload(11));
    }

    #[test]
    fn delete_self_retires_marks_on_the_object() {
        let backend = InProcessBackend::new();
        let recorder = Recorder::new();
        let recorder_dyn: Arc<dyn EventHandler> = recorder.clone();
        let weak: Weak<dyn EventHandler> = Arc::downgrade(&recorder_dyn);
        let group = backend.subscribe(weak).unwrap();
        backend.add_mark(group, key(7)).unwrap();

        backend.deliver(group, key(7), EventMask::DELETE_SELF, payload(7));

        assert!(!backend.has_mark(group, key(7)));
    }

    #[test]
    fn disabled_backend_probe_fails() {
        assert_eq!(
            DisabledBackend.probe().unwrap_err(),
            BackendError::Unavailable
        );
    }

    #[test]
    fn collected_events_exclude_open() {
        assert!(COLLECTED_EVENTS.contains(EventMask::CREATE));
        assert!(COLLECTED_EVENTS.contains(EventMask::DELETE_SELF));
        assert!(!COLLECTED_EVENTS.contains(EventMask::OPEN));
    }
}
