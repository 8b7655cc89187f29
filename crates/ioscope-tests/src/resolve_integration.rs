//! Resolution-walk integration tests.

use crate::harness::{init_test_logging, TestRig};
use ioscope_events::{FileRef, RecordBody};
use ioscope_inode::{TracerConfig, TracerInstance, WalkEnd};

fn name_record_ids(rig: &TestRig) -> Vec<(u64, u64)> {
    rig.sink
        .records()
        .into_iter()
        .filter_map(|r| match r.body {
            RecordBody::FileName(ev) => Some((ev.file.id, ev.parent.id)),
            _ => None,
        })
        .collect()
}

#[test]
fn uncached_chain_to_mount_root_emits_two_records() {
    init_test_logging();
    let rig = TestRig::new();
    // G is the mount root: P names it as parent, but G itself has no
    // resolvable record, so the walk ends at P.
    let g = ioscope_inode::ObjectKey::new(1, 10);
    let p = rig.add_object(20, "data", true, 200, Some(g));
    let o = rig.add_object(30, "blob.bin", false, 300, Some(p.key));

    let mut instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry).unwrap();
    let outcome = instance.trace_io(&rig.meta, o);

    assert_eq!(outcome.records_emitted, 2);
    // O -> P, then P with a terminal parent (G never stamped).
    assert_eq!(name_record_ids(&rig), vec![(30, 20), (20, 0)]);
    assert_eq!(instance.cached(), 2);

    // Immediately re-resolving O emits nothing further.
    rig.sink.drain();
    let outcome = instance.trace_io(&rig.meta, o);
    assert_eq!(outcome.records_emitted, 0);
    assert_eq!(outcome.end, WalkEnd::CacheHit);
    assert!(rig.sink.is_empty());
}

#[test]
fn walk_through_resolvable_root_emits_terminal_record() {
    let rig = TestRig::new();
    let root = rig.add_object(2, "/", true, 100, None);
    let file = rig.add_object(3, "swapfile", false, 300, Some(root.key));

    let mut instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry).unwrap();
    let outcome = instance.trace_io(&rig.meta, file);

    assert_eq!(outcome.end, WalkEnd::Root);
    assert_eq!(outcome.records_emitted, 2);
    let records = name_record_ids(&rig);
    assert_eq!(records[1], (2, 0));

    // The root's record carries a zeroed parent reference.
    let last = rig.sink.records().pop().unwrap();
    if let RecordBody::FileName(ev) = last.body {
        assert_eq!(ev.parent, FileRef::NONE);
    } else {
        panic!("expected a naming record");
    }
}

#[test]
fn directory_parents_get_watched_during_the_walk() {
    let rig = TestRig::new();
    let root = rig.add_object(2, "/", true, 100, None);
    let dir = rig.add_object(5, "logs", true, 150, Some(root.key));
    let file = rig.add_object(9, "app.log", false, 300, Some(dir.key));

    let mut instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry).unwrap();
    instance.trace_io(&rig.meta, file);

    let group = instance.monitor().unwrap().group();
    assert!(rig.backend.has_mark(group, dir.key));
    assert!(rig.backend.has_mark(group, root.key));
}

#[test]
fn file_parents_are_not_watched() {
    let rig = TestRig::new();
    // A parent that is (unusually) not a directory must not be marked.
    let odd_parent = rig.add_object(5, "weird", false, 150, None);
    let file = rig.add_object(9, "child", false, 300, Some(odd_parent.key));

    let mut instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry).unwrap();
    instance.trace_io(&rig.meta, file);

    assert_eq!(rig.backend.mark_count(), 0);
}

#[test]
fn deep_chain_is_walked_once_then_amortized() {
    let rig = TestRig::new();
    let mut parent = None;
    for depth in 0..16u64 {
        let stamp = rig.add_object(100 + depth, &format!("d{}", depth), true, depth as i64, parent);
        parent = Some(stamp.key);
    }
    let leaf = rig.add_object(500, "leaf", false, 999, parent);

    let mut instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry).unwrap();
    let outcome = instance.trace_io(&rig.meta, leaf);
    assert_eq!(outcome.records_emitted, 17);

    // A second leaf under the same deepest directory re-walks to depth 1.
    rig.sink.drain();
    let leaf2 = rig.add_object(501, "leaf2", false, 999, parent);
    let outcome = instance.trace_io(&rig.meta, leaf2);
    assert_eq!(outcome.records_emitted, 1);
    assert_eq!(outcome.end, WalkEnd::CacheHit);
}

#[test]
fn unlinked_origin_aborts_without_tracing() {
    let rig = TestRig::new();
    let file = rig.add_object(9, "scratch", false, 300, None);
    let mut instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry).unwrap();

    rig.meta.remove(file.key);
    let outcome = instance.trace_io(&rig.meta, file);

    assert_eq!(outcome.end, WalkEnd::Unresolvable);
    assert_eq!(outcome.records_emitted, 0);
    assert_eq!(instance.cached(), 0);
    assert!(rig.sink.is_empty());
}

#[test]
fn vanished_ancestor_degrades_to_a_terminal_parent() {
    let rig = TestRig::new();
    let root = rig.add_object(2, "/", true, 100, None);
    let dir = rig.add_object(5, "tmp", true, 150, Some(root.key));
    let file = rig.add_object(9, "scratch", false, 300, Some(dir.key));

    let mut instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry).unwrap();
    // The directory vanished before the leaf was resolved: the leaf's
    // record carries a terminal parent and the walk ends there.
    rig.meta.remove(dir.key);
    let outcome = instance.trace_io(&rig.meta, file);

    assert_eq!(outcome.end, WalkEnd::Root);
    assert_eq!(outcome.records_emitted, 1);
    assert_eq!(name_record_ids(&rig), vec![(9, 0)]);
    assert_eq!(instance.cached(), 1);
}

#[test]
fn long_names_are_truncated_in_records() {
    let rig = TestRig::new();
    let long_name = "x".repeat(200);
    let file = rig.add_object(9, &long_name, false, 300, None);

    let mut instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry).unwrap();
    instance.trace_io(&rig.meta, file);

    let records = rig.sink.records();
    if let RecordBody::FileName(ev) = records[0].body {
        assert_eq!(ev.name.as_bytes().len(), ioscope_events::FILE_NAME_MAX - 1);
    } else {
        panic!("expected a naming record");
    }
}

#[test]
fn record_shape_is_stable_over_serde() {
    let rig = TestRig::new();
    let file = rig.add_object(9, "stable.bin", false, 300, None);
    let mut instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry).unwrap();
    instance.trace_io(&rig.meta, file);

    let record = rig.sink.records()[0];
    let json = serde_json::to_value(record).unwrap();
    assert_eq!(json["body"]["FileName"]["file"]["id"], 9);
    assert_eq!(json["header"]["kind"], "FileName");
}
