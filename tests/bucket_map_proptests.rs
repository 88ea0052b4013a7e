// BucketMap property tests against the public API.
//
// Property 1: Cursor contract under arbitrary mutation between steps.
//  - Model: the set of keys present since the cursor was created.
//  - Invariant: no key yielded twice; every key present for the whole
//    traversal yielded exactly once; each yielded value is current.
//  - Operations between steps: insert fresh keys (forcing growth), remove
//    keys, overwrite values.
//
// Property 2: Iter mid-resize.
//  - Invariant: whenever a resize is in flight, iter() yields exactly the
//    live key set, each key once.
use bucket_map::BucketMap;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};

#[derive(Clone, Debug)]
enum Step {
    InsertFresh(u8),
    Remove(u16),
    Overwrite(u16, u32),
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (1u8..8).prop_map(Step::InsertFresh),
        2 => any::<u16>().prop_map(Step::Remove),
        1 => (any::<u16>(), any::<u32>()).prop_map(|(k, v)| Step::Overwrite(k, v)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 48, .. ProptestConfig::default() })]
    #[test]
    fn prop_cursor_contract(
        initial in 1u64..300,
        steps in proptest::collection::vec(arb_step(), 1..400),
    ) {
        let mut m: BucketMap<u64, u32> = (0..initial).map(|k| (k, 0)).collect();
        let mut untouched: BTreeSet<u64> = (0..initial).collect();
        let mut next_fresh = 1_000_000u64;
        let mut cursor = m.cursor();
        let mut seen = HashSet::new();
        let mut steps = steps.into_iter();

        while let Some((k, v)) = cursor.next(&m) {
            prop_assert!(seen.insert(k), "key {} yielded twice", k);
            prop_assert_eq!(m.get(&k), Some(&v));
            match steps.next() {
                Some(Step::InsertFresh(n)) => {
                    for _ in 0..n {
                        m.insert(next_fresh, 1);
                        next_fresh += 1;
                    }
                }
                Some(Step::Remove(r)) => {
                    let victim = u64::from(r) % initial;
                    // Keep the table non-empty so the hash seed stays put.
                    if m.len() > 1 {
                        m.remove(&victim);
                        untouched.remove(&victim);
                    }
                }
                Some(Step::Overwrite(r, val)) => {
                    let target = u64::from(r) % initial;
                    if let Some(slot) = m.get_mut(&target) {
                        *slot = val;
                    }
                }
                None => {}
            }
        }
        prop_assert!(cursor.is_done());
        for k in &untouched {
            prop_assert!(seen.contains(k), "key {} never yielded", k);
        }
    }

    #[test]
    fn prop_iter_mid_resize(ops in proptest::collection::vec((any::<bool>(), 0u64..2000), 1..600)) {
        let mut m: BucketMap<u64, u64> = BucketMap::new();
        let mut model = BTreeSet::new();
        for (insert, k) in ops {
            if insert {
                m.insert(k, k);
                model.insert(k);
            } else {
                m.remove(&k);
                model.remove(&k);
            }
            if m.stats().growing {
                let seen: Vec<u64> = m.keys().copied().collect();
                prop_assert_eq!(seen.len(), model.len());
                let set: BTreeSet<u64> = seen.into_iter().collect();
                prop_assert_eq!(&set, &model);
            }
        }
    }
}
