//! Randomized alloc/free/realloc sequences checking the universal
//! invariants (conservation, unique addresses, alignment) after every run.

use std::collections::HashMap;
use std::ptr::NonNull;

use proptest::prelude::*;
use tbman::{required_alignment, Mgr, TBMAN_ALIGN};

#[derive(Debug, Clone)]
enum Op {
    Alloc { size: usize },
    Free { slot: usize },
    Realloc { slot: usize, new_size: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..=8192).prop_map(|size| Op::Alloc { size }),
        (0usize..64).prop_map(|slot| Op::Free { slot }),
        (0usize..64, 1usize..=8192).prop_map(|(slot, new_size)| Op::Realloc { slot, new_size }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn invariants_hold_after_random_sequences(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let mgr = Mgr::create_default();
        // slot -> (ptr, granted size)
        let mut live: HashMap<usize, (NonNull<u8>, usize)> = HashMap::new();
        let mut next_slot = 0usize;

        for op in ops {
            match op {
                Op::Alloc { size } => {
                    let (p, g) = mgr.alloc(None, size);
                    if let Some(p) = p {
                        live.insert(next_slot, (p, g));
                        next_slot += 1;
                    }
                }
                Op::Free { slot } => {
                    if let Some((p, g)) = live.remove(&slot) {
                        mgr.nalloc(Some(p), g, 0);
                    }
                }
                Op::Realloc { slot, new_size } => {
                    if let Some((p, g)) = live.remove(&slot) {
                        let (p2, g2) = mgr.nalloc(Some(p), g, new_size);
                        if let Some(p2) = p2 {
                            live.insert(slot, (p2, g2));
                        }
                    }
                }
            }

            // Invariant 1: conservation.
            let expected_total: usize = live.values().map(|(_, g)| *g).sum();
            prop_assert_eq!(mgr.granted_space(), expected_total);

            // Invariant 2: no two live allocations share any byte of their
            // granted extents.
            let mut extents: Vec<(usize, usize)> = live
                .values()
                .map(|(p, g)| (p.as_ptr() as usize, *g))
                .collect();
            extents.sort_unstable();
            for w in extents.windows(2) {
                let (addr_a, len_a) = w[0];
                let (addr_b, _) = w[1];
                prop_assert!(addr_a + len_a <= addr_b, "live allocations overlap");
            }

            // Invariant 3: alignment.
            for (p, g) in live.values() {
                let required = required_alignment(*g, true, TBMAN_ALIGN);
                prop_assert_eq!(p.as_ptr() as usize % required, 0);
            }
        }

        // Invariant 4: idempotent reclaim.
        for (_, (p, g)) in live.drain() {
            mgr.nalloc(Some(p), g, 0);
        }
        prop_assert_eq!(mgr.granted_space(), 0);
    }
}
