//! Ancestor-walk path resolution.
//!
//! For a just-traced object the walk emits one naming record per
//! uncached ancestor, arming a watch on each directory parent, and stops
//! at the first cache hit (the chain above it is already recorded
//! transitively) or at the mount root. A stable chain therefore re-walks
//! to depth 1 after its first successful trace; deeper re-walks happen
//! only after eviction or id reuse.

use crate::cache::IdentityCache;
use crate::meta::MetadataProvider;
use crate::monitor::FsMonitor;
use crate::types::ObjectStamp;
use ioscope_events::{emit, now_ns, FileName, FileNameEvent, FileRef, RecordBody, TraceSink};
use tracing::trace;

/// How a resolution walk ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkEnd {
    /// Stopped at a cached ancestor.
    CacheHit,
    /// Reached an object with no parent (mount root).
    Root,
    /// An object in the chain could not be resolved; the remainder of
    /// the walk was skipped without tracing or cache mutation.
    Unresolvable,
    /// The sink was full; the failing object was not cached, so the walk
    /// will be retried by a later I/O.
    SinkFull,
}

/// Result of one resolution walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalkOutcome {
    /// Naming records emitted during this walk.
    pub records_emitted: u32,
    /// Termination cause.
    pub end: WalkEnd,
}

pub(crate) fn walk(
    cache: &mut IdentityCache,
    monitor: Option<&FsMonitor>,
    sink: &dyn TraceSink,
    provider: &dyn MetadataProvider,
    origin: ObjectStamp,
) -> WalkOutcome {
    let mut current = origin;
    let mut records_emitted = 0u32;

    loop {
        if cache.lookup(&current) {
            return WalkOutcome {
                records_emitted,
                end: WalkEnd::CacheHit,
            };
        }

        let Some(meta) = provider.resolve(current.key) else {
            trace!(
                "object {}:{} unresolvable, walk ends",
                current.key.device,
                current.key.object
            );
            return WalkOutcome {
                records_emitted,
                end: WalkEnd::Unresolvable,
            };
        };

        if let Some(parent) = meta.parent {
            if meta.parent_is_dir {
                if let Some(monitor) = monitor {
                    monitor.watch(parent.key);
                }
            }
        }

        let body = RecordBody::FileName(FileNameEvent {
            device_id: meta.stamp.key.device,
            file: meta.stamp.file_ref(),
            parent: meta.parent.map(|p| p.file_ref()).unwrap_or(FileRef::NONE),
            name: FileName::truncate_from(meta.name.as_bytes()),
        });
        if emit(sink, now_ns(), body).is_err() {
            return WalkOutcome {
                records_emitted,
                end: WalkEnd::SinkFull,
            };
        }
        records_emitted += 1;
        cache.insert(&meta.stamp);

        match meta.parent {
            Some(parent) => current = parent,
            None => {
                return WalkOutcome {
                    records_emitted,
                    end: WalkEnd::Root,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::MemoryMetadata;
    use crate::types::ObjectKey;
    use ioscope_events::{Ctime, RingSink};

    fn key(id: u64) -> ObjectKey {
        ObjectKey::new(1, id)
    }

    fn stamp(id: u64, secs: i64) -> ObjectStamp {
        ObjectStamp::new(key(id), Ctime::new(secs, 0))
    }

    // dir(2) -> file(3); dir's parent key(1) is never inserted, so the
    // provider reports dir with a terminal parent.
    fn two_level_tree() -> MemoryMetadata {
        let meta = MemoryMetadata::new();
        meta.insert(key(2), "var", true, Ctime::new(20, 0), None);
        meta.insert(key(3), "app.log", false, Ctime::new(30, 0), Some(key(2)));
        meta
    }

    fn name_records(sink: &RingSink) -> Vec<FileNameEvent> {
        sink.records()
            .into_iter()
            .filter_map(|r| match r.body {
                RecordBody::FileName(ev) => Some(ev),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn walk_emits_chain_and_caches_it() {
        let meta = two_level_tree();
        let sink = RingSink::with_capacity(16);
        let mut cache = IdentityCache::with_capacity(16).unwrap();

        let outcome = walk(&mut cache, None, &sink, &meta, stamp(3, 30));
        assert_eq!(outcome.records_emitted, 2);
        assert_eq!(outcome.end, WalkEnd::Root);

        let records = name_records(&sink);
        assert_eq!(records[0].file.id, 3);
        assert_eq!(records[0].parent.id, 2);
        assert_eq!(records[0].name.as_bytes(), b"app.log");
        assert_eq!(records[1].file.id, 2);
        assert_eq!(records[1].parent, FileRef::NONE);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn second_walk_stops_on_cache_hit_with_no_records() {
        let meta = two_level_tree();
        let sink = RingSink::with_capacity(16);
        let mut cache = IdentityCache::with_capacity(16).unwrap();

        walk(&mut cache, None, &sink, &meta, stamp(3, 30));
        sink.drain();

        let outcome = walk(&mut cache, None, &sink, &meta, stamp(3, 30));
        assert_eq!(outcome.records_emitted, 0);
        assert_eq!(outcome.end, WalkEnd::CacheHit);
        assert!(sink.is_empty());
    }

    #[test]
    fn cached_parent_limits_rewalk_to_depth_one() {
        let meta = two_level_tree();
        let sink = RingSink::with_capacity(16);
        let mut cache = IdentityCache::with_capacity(16).unwrap();
        walk(&mut cache, None, &sink, &meta, stamp(3, 30));
        sink.drain();

        // A sibling under the same cached parent: one record only.
        meta.insert(key(4), "other.log", false, Ctime::new(40, 0), Some(key(2)));
        let outcome = walk(&mut cache, None, &sink, &meta, stamp(4, 40));
        assert_eq!(outcome.records_emitted, 1);
        assert_eq!(outcome.end, WalkEnd::CacheHit);
    }

    #[test]
    fn unresolvable_origin_aborts_without_side_effects() {
        let meta = MemoryMetadata::new();
        let sink = RingSink::with_capacity(16);
        let mut cache = IdentityCache::with_capacity(16).unwrap();

        let outcome = walk(&mut cache, None, &sink, &meta, stamp(9, 0));
        assert_eq!(outcome.records_emitted, 0);
        assert_eq!(outcome.end, WalkEnd::Unresolvable);
        assert!(sink.is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn full_sink_aborts_without_caching_the_failed_object() {
        let meta = two_level_tree();
        let mut cache = IdentityCache::with_capacity(16).unwrap();

        // One slot: the leaf's record fits, the parent's does not, and
        // only the leaf is cached.
        let sink = RingSink::with_capacity(1);
        let outcome = walk(&mut cache, None, &sink, &meta, stamp(3, 30));
        assert_eq!(outcome.end, WalkEnd::SinkFull);
        assert_eq!(outcome.records_emitted, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup(&stamp(3, 30)));
        assert!(!cache.lookup(&stamp(2, 20)));
    }

    #[test]
    fn already_full_sink_emits_and_caches_nothing() {
        let meta = two_level_tree();
        let mut cache = IdentityCache::with_capacity(16).unwrap();
        let sink = RingSink::with_capacity(1);
        // Occupy the only slot.
        meta.insert(key(7), "filler", false, Ctime::new(1, 0), None);
        walk(&mut cache, None, &sink, &meta, stamp(7, 1));
        let mut fresh = IdentityCache::with_capacity(16).unwrap();

        let outcome = walk(&mut fresh, None, &sink, &meta, stamp(3, 30));
        assert_eq!(outcome.end, WalkEnd::SinkFull);
        assert_eq!(outcome.records_emitted, 0);
        assert!(fresh.is_empty());
    }

    #[test]
    fn id_reuse_misses_stale_entry_and_retraces() {
        let meta = two_level_tree();
        let sink = RingSink::with_capacity(16);
        let mut cache = IdentityCache::with_capacity(16).unwrap();
        walk(&mut cache, None, &sink, &meta, stamp(3, 30));
        sink.drain();

        // Same id, new generation.
        meta.set_ctime(key(3), Ctime::new(99, 0));
        let outcome = walk(&mut cache, None, &sink, &meta, stamp(3, 99));
        assert_eq!(outcome.records_emitted, 1);
        assert_eq!(outcome.end, WalkEnd::CacheHit);
        assert_eq!(cache.stats().stale_evictions, 1);
    }
}
