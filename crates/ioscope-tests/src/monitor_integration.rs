//! Monitor event-flow integration tests.

use crate::harness::{init_test_logging, TestRig};
use ioscope_events::{Ctime, FsEventKind, RecordBody};
use ioscope_inode::backend::{EventMask, EventPayload};
use ioscope_inode::{CompatSignature, ObjectKey, ObjectStamp, TracerConfig, TracerInstance};

fn event_kinds(rig: &TestRig) -> Vec<FsEventKind> {
    rig.sink
        .records()
        .into_iter()
        .filter_map(|r| match r.body {
            RecordBody::FileEvent(ev) => Some(ev.kind),
            _ => None,
        })
        .collect()
}

#[test]
fn create_in_watched_directory_emits_and_extends_coverage() {
    init_test_logging();
    let rig = TestRig::new();
    let instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry).unwrap();
    let group = instance.monitor().unwrap().group();

    let dir = ObjectKey::new(1, 10);
    instance.monitor().unwrap().watch(dir);

    let child = ObjectStamp::new(ObjectKey::new(1, 11), Ctime::new(50, 0));
    rig.backend
        .deliver(group, dir, EventMask::CREATE, EventPayload::Object(child));

    assert_eq!(event_kinds(&rig), vec![FsEventKind::Create]);
    // The new child is itself watched now.
    assert!(rig.backend.has_mark(group, child.key));
}

#[test]
fn rename_delivers_move_from_and_move_to() {
    let rig = TestRig::new();
    let instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry).unwrap();
    let group = instance.monitor().unwrap().group();

    let child = ObjectStamp::new(ObjectKey::new(1, 11), Ctime::new(50, 0));
    rig.backend.deliver(
        group,
        ObjectKey::new(1, 10),
        EventMask::MOVED_FROM,
        EventPayload::Path(child),
    );
    rig.backend.deliver(
        group,
        ObjectKey::new(1, 20),
        EventMask::MOVED_TO,
        EventPayload::Path(child),
    );

    assert_eq!(
        event_kinds(&rig),
        vec![FsEventKind::MoveFrom, FsEventKind::MoveTo]
    );
}

#[test]
fn deletion_emits_record_but_leaves_cache_entry_for_lazy_eviction() {
    // Intended behavior: deletion does not purge the cache; the stale
    // entry is caught by the ctime check at the next lookup.
    let rig = TestRig::new();
    let file = rig.add_object(9, "victim", false, 300, None);

    let mut instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry).unwrap();
    instance.trace_io(&rig.meta, file);
    assert_eq!(instance.cached(), 1);
    rig.sink.drain();

    let group = instance.monitor().unwrap().group();
    rig.backend.deliver(
        group,
        file.key,
        EventMask::DELETE_SELF,
        EventPayload::Object(file),
    );
    rig.meta.remove(file.key);

    assert_eq!(event_kinds(&rig), vec![FsEventKind::Delete]);
    // Still cached: nothing purged it.
    assert_eq!(instance.cached(), 1);

    // A reused id with a fresh ctime misses and retires the entry.
    let reused = ObjectStamp::new(file.key, Ctime::new(999, 0));
    rig.meta.insert(file.key, "newcomer", false, Ctime::new(999, 0), None);
    instance.trace_io(&rig.meta, reused);
    assert_eq!(instance.cache_stats().stale_evictions, 1);
}

#[test]
fn absent_monitor_produces_no_records_and_no_marks() {
    let rig = TestRig::with_compat(CompatSignature::new("built-a", "running-b"));
    let mut instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry).unwrap();
    assert!(!instance.has_monitor());
    assert!(rig.registry.is_disabled());

    // Notifications go nowhere: no group was ever subscribed.
    assert_eq!(rig.backend.group_count(), 0);
    let child = ObjectStamp::new(ObjectKey::new(1, 11), Ctime::new(50, 0));
    rig.backend.deliver(
        1,
        ObjectKey::new(1, 10),
        EventMask::CREATE,
        EventPayload::Object(child),
    );
    assert!(rig.sink.is_empty());
    assert_eq!(rig.backend.mark_count(), 0);

    // Walks never try to arm watches.
    let root = rig.add_object(2, "/", true, 100, None);
    let file = rig.add_object(9, "f", false, 300, Some(root.key));
    instance.trace_io(&rig.meta, file);
    assert_eq!(rig.backend.mark_count(), 0);

    // The ctime staleness defense still functions.
    rig.sink.drain();
    rig.meta.set_ctime(file.key, Ctime::new(777, 0));
    instance.trace_io(&rig.meta, ObjectStamp::new(file.key, Ctime::new(777, 0)));
    assert_eq!(instance.cache_stats().stale_evictions, 1);
}

#[test]
fn open_event_only_extends_coverage() {
    let rig = TestRig::new();
    let instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry).unwrap();
    let group = instance.monitor().unwrap().group();

    let child = ObjectStamp::new(ObjectKey::new(1, 11), Ctime::new(50, 0));
    rig.backend
        .deliver(group, child.key, EventMask::OPEN, EventPayload::Path(child));

    assert!(rig.sink.is_empty());
    assert!(rig.backend.has_mark(group, child.key));
}

#[test]
fn combined_mask_create_and_open_emits_once() {
    let rig = TestRig::new();
    let instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry).unwrap();
    let group = instance.monitor().unwrap().group();

    let child = ObjectStamp::new(ObjectKey::new(1, 11), Ctime::new(50, 0));
    rig.backend.deliver(
        group,
        ObjectKey::new(1, 10),
        EventMask::CREATE | EventMask::OPEN,
        EventPayload::Object(child),
    );

    assert_eq!(event_kinds(&rig), vec![FsEventKind::Create]);
    assert!(rig.backend.has_mark(group, child.key));
}

#[test]
fn monitor_events_race_cleanly_with_walks() {
    // The monitor path and the cache path share no state; a delivery
    // arriving between two walks must not disturb the cache.
    let rig = TestRig::new();
    let root = rig.add_object(2, "/", true, 100, None);
    let file = rig.add_object(9, "f", false, 300, Some(root.key));

    let mut instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry).unwrap();
    instance.trace_io(&rig.meta, file);
    let cached_before = instance.cached();

    let group = instance.monitor().unwrap().group();
    let other = ObjectStamp::new(ObjectKey::new(1, 77), Ctime::new(5, 0));
    rig.backend.deliver(
        group,
        ObjectKey::new(1, 2),
        EventMask::CREATE,
        EventPayload::Object(other),
    );

    assert_eq!(instance.cached(), cached_before);
    let outcome = instance.trace_io(&rig.meta, file);
    assert_eq!(outcome.records_emitted, 0);
}
