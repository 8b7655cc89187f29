//! Fixed-arena identity cache with LRU eviction.
//!
//! The arena is sized once at construction and never grows. Free and
//! mapped entries share one LRU list, so allocation is always "take the
//! LRU tail" in O(1) with no per-operation allocation. A cached identity
//! is valid only while its ctime matches; a ctime mismatch means the
//! object id was reused, and the stale entry is retired during the
//! bucket scan that finds it.
//!
//! Single-writer: an instance must only be used from its owning
//! execution context. `&mut self` on every operation enforces this at
//! the type level; there is no internal synchronization.

use crate::error::TracerError;
use crate::types::{ObjectKey, ObjectStamp};
use ioscope_events::Ctime;
use tracing::{debug, trace};

/// Default arena size: 2048 buckets x 4 entries per bucket.
pub const DEFAULT_CACHE_ENTRIES: usize = 8192;

const ENTRIES_PER_BUCKET: usize = 4;
const NIL: u32 = u32::MAX;

#[derive(Clone, Copy)]
struct Entry {
    key: ObjectKey,
    ctime: Ctime,
    mapped: bool,
    lru_prev: u32,
    lru_next: u32,
    bucket_prev: u32,
    bucket_next: u32,
}

impl Entry {
    fn unused() -> Self {
        Self {
            key: ObjectKey::new(0, 0),
            ctime: Ctime::ZERO,
            mapped: false,
            lru_prev: NIL,
            lru_next: NIL,
            bucket_prev: NIL,
            bucket_next: NIL,
        }
    }
}

/// Hit/miss/eviction counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Mapped entries displaced by an insert.
    pub evictions: u64,
    /// Entries retired because their ctime no longer matched.
    pub stale_evictions: u64,
}

/// Fixed-capacity map from object identity to "already traced".
pub struct IdentityCache {
    entries: Vec<Entry>,
    buckets: Vec<u32>,
    bucket_shift: u32,
    lru_head: u32,
    lru_tail: u32,
    mapped: usize,
    stats: CacheStats,
}

impl IdentityCache {
    /// Creates a cache with the default arena size.
    pub fn new() -> Result<Self, TracerError> {
        Self::with_capacity(DEFAULT_CACHE_ENTRIES)
    }

    /// Creates a cache holding at most `entries` identities. The bucket
    /// table is sized so that entries = 4 x buckets, keeping the average
    /// chain short. Fails only if the arena cannot be allocated.
    pub fn with_capacity(entries: usize) -> Result<Self, TracerError> {
        let entries = entries.max(1);
        let bucket_count = (entries / ENTRIES_PER_BUCKET).next_power_of_two().max(1);

        let mut arena: Vec<Entry> = Vec::new();
        arena.try_reserve_exact(entries)?;
        let mut buckets: Vec<u32> = Vec::new();
        buckets.try_reserve_exact(bucket_count)?;

        arena.resize(entries, Entry::unused());
        buckets.resize(bucket_count, NIL);

        let mut cache = Self {
            entries: arena,
            buckets,
            bucket_shift: 64 - bucket_count.trailing_zeros(),
            lru_head: NIL,
            lru_tail: NIL,
            mapped: 0,
            stats: CacheStats::default(),
        };

        // All entries start free, linked into the LRU list in arbitrary order.
        for i in 0..cache.entries.len() as u32 {
            cache.lru_push_front(i);
        }

        Ok(cache)
    }

    fn bucket_of(&self, key: &ObjectKey) -> usize {
        if self.buckets.len() == 1 {
            return 0;
        }
        let h = (key.object ^ key.device.rotate_left(32)).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        (h >> self.bucket_shift) as usize
    }

    fn lru_unlink(&mut self, i: u32) {
        let (prev, next) = (self.entries[i as usize].lru_prev, self.entries[i as usize].lru_next);
        match prev {
            NIL => self.lru_head = next,
            p => self.entries[p as usize].lru_next = next,
        }
        match next {
            NIL => self.lru_tail = prev,
            n => self.entries[n as usize].lru_prev = prev,
        }
        self.entries[i as usize].lru_prev = NIL;
        self.entries[i as usize].lru_next = NIL;
    }

    fn lru_push_front(&mut self, i: u32) {
        self.entries[i as usize].lru_prev = NIL;
        self.entries[i as usize].lru_next = self.lru_head;
        match self.lru_head {
            NIL => self.lru_tail = i,
            h => self.entries[h as usize].lru_prev = i,
        }
        self.lru_head = i;
    }

    fn lru_push_back(&mut self, i: u32) {
        self.entries[i as usize].lru_next = NIL;
        self.entries[i as usize].lru_prev = self.lru_tail;
        match self.lru_tail {
            NIL => self.lru_head = i,
            t => self.entries[t as usize].lru_next = i,
        }
        self.lru_tail = i;
    }

    fn bucket_unlink(&mut self, i: u32) {
        let bucket = self.bucket_of(&self.entries[i as usize].key);
        let (prev, next) = (
            self.entries[i as usize].bucket_prev,
            self.entries[i as usize].bucket_next,
        );
        match prev {
            NIL => self.buckets[bucket] = next,
            p => self.entries[p as usize].bucket_next = next,
        }
        if next != NIL {
            self.entries[next as usize].bucket_prev = prev;
        }
        self.entries[i as usize].bucket_prev = NIL;
        self.entries[i as usize].bucket_next = NIL;
    }

    fn bucket_push_front(&mut self, bucket: usize, i: u32) {
        let head = self.buckets[bucket];
        self.entries[i as usize].bucket_prev = NIL;
        self.entries[i as usize].bucket_next = head;
        if head != NIL {
            self.entries[head as usize].bucket_prev = i;
        }
        self.buckets[bucket] = i;
    }

    /// Maps `stamp` into the cache. Always succeeds: the victim is the
    /// current LRU tail, whether free or holding an unrelated mapping.
    pub fn insert(&mut self, stamp: &ObjectStamp) {
        let victim = self.lru_tail;
        self.lru_unlink(victim);
        if self.entries[victim as usize].mapped {
            debug!(
                "evicting {}:{}",
                self.entries[victim as usize].key.device,
                self.entries[victim as usize].key.object
            );
            self.bucket_unlink(victim);
            self.stats.evictions += 1;
            self.mapped -= 1;
        }

        let entry = &mut self.entries[victim as usize];
        entry.key = stamp.key;
        entry.ctime = stamp.ctime;
        entry.mapped = true;

        let bucket = self.bucket_of(&stamp.key);
        self.bucket_push_front(bucket, victim);
        self.lru_push_front(victim);
        self.mapped += 1;
        trace!("map {}:{}", stamp.key.device, stamp.key.object);
    }

    /// Looks up `stamp`. A key match with the same ctime is a hit and is
    /// promoted to most-recently-used. A key match with a different
    /// ctime is a reused object id: the stale entry is returned to the
    /// free end of the LRU list and the scan continues.
    pub fn lookup(&mut self, stamp: &ObjectStamp) -> bool {
        let bucket = self.bucket_of(&stamp.key);
        let mut i = self.buckets[bucket];
        while i != NIL {
            let next = self.entries[i as usize].bucket_next;
            if self.entries[i as usize].key == stamp.key {
                if self.entries[i as usize].ctime == stamp.ctime {
                    self.lru_unlink(i);
                    self.lru_push_front(i);
                    self.stats.hits += 1;
                    trace!("hit {}:{}", stamp.key.device, stamp.key.object);
                    return true;
                }
                debug!(
                    "stale entry for reused id {}:{}",
                    stamp.key.device, stamp.key.object
                );
                self.bucket_unlink(i);
                self.entries[i as usize].mapped = false;
                self.lru_unlink(i);
                self.lru_push_back(i);
                self.mapped -= 1;
                self.stats.stale_evictions += 1;
            }
            i = next;
        }
        self.stats.misses += 1;
        trace!("miss {}:{}", stamp.key.device, stamp.key.object);
        false
    }

    /// Number of live mappings.
    pub fn len(&self) -> usize {
        self.mapped
    }

    /// Whether no identity is currently mapped.
    pub fn is_empty(&self) -> bool {
        self.mapped == 0
    }

    /// Arena size; the maximum number of live mappings.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(id: u64, secs: i64) -> ObjectStamp {
        ObjectStamp::new(ObjectKey::new(1, id), Ctime::new(secs, 0))
    }

    #[test]
    fn insert_then_lookup_same_ctime_hits() {
        let mut cache = IdentityCache::with_capacity(16).unwrap();
        cache.insert(&stamp(7, 100));
        assert!(cache.lookup(&stamp(7, 100)));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn lookup_unknown_key_misses() {
        let mut cache = IdentityCache::with_capacity(16).unwrap();
        assert!(!cache.lookup(&stamp(7, 100)));
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn same_id_on_other_device_is_distinct() {
        let mut cache = IdentityCache::with_capacity(16).unwrap();
        cache.insert(&ObjectStamp::new(ObjectKey::new(1, 7), Ctime::new(5, 0)));
        assert!(!cache.lookup(&ObjectStamp::new(ObjectKey::new(2, 7), Ctime::new(5, 0))));
    }

    #[test]
    fn overfilling_evicts_the_first_inserted_key() {
        let mut cache = IdentityCache::with_capacity(3).unwrap();
        cache.insert(&stamp(1, 0));
        cache.insert(&stamp(2, 0));
        cache.insert(&stamp(3, 0));
        cache.insert(&stamp(4, 0));

        assert!(!cache.lookup(&stamp(1, 0)));
        assert!(cache.lookup(&stamp(2, 0)));
        assert!(cache.lookup(&stamp(3, 0)));
        assert!(cache.lookup(&stamp(4, 0)));
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn lookup_promotes_recency_so_eviction_skips_it() {
        let mut cache = IdentityCache::with_capacity(3).unwrap();
        cache.insert(&stamp(1, 0)); // A
        cache.insert(&stamp(2, 0)); // B
        cache.insert(&stamp(3, 0)); // C
        assert!(cache.lookup(&stamp(1, 0))); // promote A
        cache.insert(&stamp(4, 0)); // D evicts B, not A

        assert!(cache.lookup(&stamp(1, 0)));
        assert!(!cache.lookup(&stamp(2, 0)));
        assert!(cache.lookup(&stamp(3, 0)));
        assert!(cache.lookup(&stamp(4, 0)));
    }

    #[test]
    fn ctime_mismatch_misses_and_retires_the_stale_entry() {
        let mut cache = IdentityCache::with_capacity(16).unwrap();
        cache.insert(&stamp(7, 100));

        assert!(!cache.lookup(&stamp(7, 200)));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().stale_evictions, 1);

        // The old incarnation is gone for good.
        assert!(!cache.lookup(&stamp(7, 100)));
    }

    #[test]
    fn reinsert_after_stale_eviction_reuses_the_freed_slot() {
        let mut cache = IdentityCache::with_capacity(3).unwrap();
        cache.insert(&stamp(1, 10));
        cache.insert(&stamp(2, 10));
        cache.insert(&stamp(3, 10));

        assert!(!cache.lookup(&stamp(1, 20))); // id 1 reused, slot freed
        cache.insert(&stamp(1, 20));

        // Unrelated mappings survived: no second victim was taken.
        assert!(cache.lookup(&stamp(2, 10)));
        assert!(cache.lookup(&stamp(3, 10)));
        assert!(cache.lookup(&stamp(1, 20)));
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn len_tracks_mapped_entries_only() {
        let mut cache = IdentityCache::with_capacity(8).unwrap();
        assert!(cache.is_empty());
        cache.insert(&stamp(1, 0));
        cache.insert(&stamp(2, 0));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.capacity(), 8);
    }

    #[test]
    fn capacity_one_still_works() {
        let mut cache = IdentityCache::with_capacity(1).unwrap();
        cache.insert(&stamp(1, 0));
        assert!(cache.lookup(&stamp(1, 0)));
        cache.insert(&stamp(2, 0));
        assert!(!cache.lookup(&stamp(1, 0)));
        assert!(cache.lookup(&stamp(2, 0)));
    }

    #[test]
    fn many_inserts_never_exceed_capacity() {
        let mut cache = IdentityCache::with_capacity(64).unwrap();
        for id in 0..1000 {
            cache.insert(&stamp(id, 0));
            assert!(cache.len() <= 64);
        }
        // The most recent 64 are all present.
        for id in 936..1000 {
            assert!(cache.lookup(&stamp(id, 0)));
        }
    }

    #[test]
    fn default_capacity_is_four_entries_per_bucket() {
        let cache = IdentityCache::new().unwrap();
        assert_eq!(cache.capacity(), DEFAULT_CACHE_ENTRIES);
    }
}
