//! Property-based tests for the identity cache.

#[cfg(test)]
mod props {
    use ioscope_events::Ctime;
    use ioscope_inode::{IdentityCache, ObjectKey, ObjectStamp};
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Insert { id: u64, ctime: i64 },
        Lookup { id: u64, ctime: i64 },
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..32, 0i64..4).prop_map(|(id, ctime)| Op::Insert { id, ctime }),
            (0u64..32, 0i64..4).prop_map(|(id, ctime)| Op::Lookup { id, ctime }),
        ]
    }

    fn stamp(id: u64, ctime: i64) -> ObjectStamp {
        ObjectStamp::new(ObjectKey::new(1, id), Ctime::new(ctime, 0))
    }

    proptest! {
        #[test]
        fn mappings_never_exceed_capacity(ops in prop::collection::vec(arb_op(), 0..256)) {
            let mut cache = IdentityCache::with_capacity(8).unwrap();
            for op in ops {
                match op {
                    Op::Insert { id, ctime } => cache.insert(&stamp(id, ctime)),
                    Op::Lookup { id, ctime } => {
                        cache.lookup(&stamp(id, ctime));
                    }
                }
                prop_assert!(cache.len() <= cache.capacity());
            }
        }

        #[test]
        fn a_just_inserted_stamp_always_hits(
            ops in prop::collection::vec(arb_op(), 0..128),
            id in 0u64..32,
            ctime in 0i64..4,
        ) {
            let mut cache = IdentityCache::with_capacity(8).unwrap();
            for op in ops {
                match op {
                    Op::Insert { id, ctime } => cache.insert(&stamp(id, ctime)),
                    Op::Lookup { id, ctime } => {
                        cache.lookup(&stamp(id, ctime));
                    }
                }
            }
            cache.insert(&stamp(id, ctime));
            prop_assert!(cache.lookup(&stamp(id, ctime)));
        }

        #[test]
        fn a_different_ctime_never_hits(
            id in 0u64..32,
            ctime in 0i64..4,
        ) {
            let mut cache = IdentityCache::with_capacity(8).unwrap();
            cache.insert(&stamp(id, ctime));
            prop_assert!(!cache.lookup(&stamp(id, ctime + 1)));
            // The stale entry was retired, so the original misses too.
            prop_assert!(!cache.lookup(&stamp(id, ctime)));
        }
    }
}
