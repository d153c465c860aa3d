use coordinator::{TabPhase, TabRegistry};
use fauxtime_core::ids::TabId;
use proptest::prelude::*;
use std::collections::HashSet;

#[derive(Debug, Clone)]
enum Op {
    Claim(u32),
    Purge(u32),
    ClearReloads,
    Activate(u32),
}

fn any_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u32..6).prop_map(Op::Claim),
        2 => (0u32..6).prop_map(Op::Purge),
        1 => Just(Op::ClearReloads),
        2 => (0u32..6).prop_map(Op::Activate),
    ]
}

proptest! {
    // A reload claim succeeds once per tab until the tab is purged or the
    // guard is cleared, whatever order the operations arrive in.
    #[test]
    fn reload_claims_follow_a_set_model(ops in prop::collection::vec(any_op(), 1..40)) {
        let registry = TabRegistry::new();
        let mut claimed = HashSet::new();
        let mut active = HashSet::new();
        for op in ops {
            match op {
                Op::Claim(t) => prop_assert_eq!(registry.claim_reload(TabId(t)), claimed.insert(t)),
                Op::Purge(t) => {
                    registry.purge(TabId(t));
                    claimed.remove(&t);
                    active.remove(&t);
                    prop_assert!(!registry.knows(TabId(t)));
                    prop_assert_eq!(registry.phase(TabId(t)), TabPhase::Unknown);
                }
                Op::ClearReloads => {
                    registry.clear_reloads();
                    claimed.clear();
                }
                Op::Activate(t) => {
                    registry.mark_active(TabId(t));
                    registry.set_phase(TabId(t), TabPhase::Seeded);
                    active.insert(t);
                }
            }
            for t in 0u32..6 {
                prop_assert_eq!(registry.was_reloaded(TabId(t)), claimed.contains(&t));
                prop_assert_eq!(registry.is_active(TabId(t)), active.contains(&t));
            }
        }
    }
}
