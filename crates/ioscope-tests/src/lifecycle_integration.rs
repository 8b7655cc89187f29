//! Shared-monitor lifecycle integration tests.

use crate::harness::TestRig;
use anyhow::Result;
use ioscope_inode::{TracerConfig, TracerInstance, TracerSet};
use std::sync::Arc;

#[test]
fn sibling_instances_share_one_monitor() -> Result<()> {
    let rig = TestRig::new();
    let a = TracerInstance::create(0, &TracerConfig::default(), &rig.registry)?;
    let b = TracerInstance::create(1, &TracerConfig::default(), &rig.registry)?;

    let ma = a.monitor().expect("monitor present");
    let mb = b.monitor().expect("monitor present");
    assert!(Arc::ptr_eq(ma, mb));
    assert_eq!(rig.backend.group_count(), 1);
    Ok(())
}

#[test]
fn last_instance_release_destroys_the_group() -> Result<()> {
    let rig = TestRig::new();
    let a = TracerInstance::create(0, &TracerConfig::default(), &rig.registry)?;
    let b = TracerInstance::create(1, &TracerConfig::default(), &rig.registry)?;
    assert_eq!(rig.backend.group_count(), 1);

    drop(a);
    assert_eq!(rig.backend.group_count(), 1, "one holder remains");
    drop(b);
    assert_eq!(rig.backend.group_count(), 0, "last release tears down");
    Ok(())
}

#[test]
fn marks_die_with_the_group() -> Result<()> {
    let rig = TestRig::new();
    let root = rig.add_object(2, "/", true, 100, None);
    let file = rig.add_object(9, "f", false, 300, Some(root.key));

    let mut instance = TracerInstance::create(0, &TracerConfig::default(), &rig.registry)?;
    instance.trace_io(&rig.meta, file);
    assert!(rig.backend.mark_count() > 0);

    drop(instance);
    assert_eq!(rig.backend.mark_count(), 0);
    Ok(())
}

#[test]
fn a_late_instance_redemands_the_monitor() -> Result<()> {
    let rig = TestRig::new();
    let first = TracerInstance::create(0, &TracerConfig::default(), &rig.registry)?;
    drop(first);
    assert_eq!(rig.backend.group_count(), 0);

    // The registry was never latched; a new demand recreates the monitor.
    let second = TracerInstance::create(1, &TracerConfig::default(), &rig.registry)?;
    assert!(second.has_monitor());
    assert_eq!(rig.backend.group_count(), 1);
    Ok(())
}

#[test]
fn tracer_set_shares_monitor_across_all_shards() -> Result<()> {
    let rig = TestRig::new();
    let config = TracerConfig { cache_entries: 64 };
    let mut set = TracerSet::create(8, &config, &rig.registry)?;
    assert_eq!(set.len(), 8);
    assert_eq!(rig.backend.group_count(), 1);

    let first_group = set.get_mut(0).unwrap().monitor().unwrap().group();
    for context in 1..8 {
        let group = set.get_mut(context).unwrap().monitor().unwrap().group();
        assert_eq!(group, first_group);
    }

    drop(set);
    assert_eq!(rig.backend.group_count(), 0);
    Ok(())
}

#[test]
fn shards_keep_independent_caches() -> Result<()> {
    let rig = TestRig::new();
    let root = rig.add_object(2, "/", true, 100, None);
    let file = rig.add_object(9, "f", false, 300, Some(root.key));

    let config = TracerConfig { cache_entries: 64 };
    let mut set = TracerSet::create(2, &config, &rig.registry)?;

    let outcome = set.get_mut(0).unwrap().trace_io(&rig.meta, file);
    assert_eq!(outcome.records_emitted, 2);

    // The second shard knows nothing of the first shard's walk.
    let outcome = set.get_mut(1).unwrap().trace_io(&rig.meta, file);
    assert_eq!(outcome.records_emitted, 2);
    Ok(())
}
