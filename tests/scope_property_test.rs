//! Property tests for scope algebra and join decisions.

use proptest::prelude::*;

use arbor::domain::models::{JoinMode, RunStatus, ScopeSet};
use arbor::services::evaluate_join;

fn scope_set_strategy() -> impl Strategy<Value = ScopeSet> {
    prop::collection::vec("[a-z]{1,4}\\.[a-z]{1,6}", 0..6)
        .prop_map(|items| items.into_iter().collect())
}

fn status_strategy() -> impl Strategy<Value = RunStatus> {
    prop_oneof![
        Just(RunStatus::Queued),
        Just(RunStatus::Running),
        Just(RunStatus::Paused),
        Just(RunStatus::Completed),
        Just(RunStatus::Failed),
        Just(RunStatus::Cancelled),
        Just(RunStatus::TimedOut),
    ]
}

fn mode_strategy() -> impl Strategy<Value = JoinMode> {
    prop_oneof![
        Just(JoinMode::All),
        Just(JoinMode::Quorum),
        Just(JoinMode::FirstSuccess),
        Just(JoinMode::BestEffort),
        Just(JoinMode::FailFast),
    ]
}

proptest! {
    /// Intersections never invent scopes: the result is inside both inputs.
    #[test]
    fn intersection_attenuates(a in scope_set_strategy(), b in scope_set_strategy()) {
        let both = a.intersect(&b);
        prop_assert!(both.is_subset(&a));
        prop_assert!(both.is_subset(&b));
    }

    /// Intersection is commutative and idempotent.
    #[test]
    fn intersection_laws(a in scope_set_strategy(), b in scope_set_strategy()) {
        prop_assert_eq!(a.intersect(&b), b.intersect(&a));
        prop_assert_eq!(a.intersect(&a), a.clone());
    }

    /// Chaining attenuation (the child-grant formula) can only narrow:
    /// parent ∩ subset ∩ policy ⊆ parent.
    #[test]
    fn delegation_chain_narrows(
        parent in scope_set_strategy(),
        subset in scope_set_strategy(),
        policy in scope_set_strategy(),
    ) {
        let effective = parent.intersect(&subset).intersect(&policy);
        prop_assert!(effective.is_subset(&parent));
        prop_assert!(effective.is_subset(&subset));
        prop_assert!(effective.is_subset(&policy));
    }

    /// A completing decision never reports the group as still running, and
    /// only ever cancels members that were actually active.
    #[test]
    fn join_decisions_are_safe(
        mode in mode_strategy(),
        threshold in 1u32..5,
        statuses in prop::collection::vec(status_strategy(), 1..8),
    ) {
        let decision = evaluate_join(mode, Some(threshold), &statuses);

        if decision.complete {
            prop_assert!(decision.status.is_terminal());
        } else {
            prop_assert!(decision.cancel.is_empty());
        }

        for idx in &decision.cancel {
            prop_assert!(statuses[*idx].is_active());
        }
    }

    /// With no member active, every mode settles the group.
    #[test]
    fn join_settles_once_all_terminal(
        mode in mode_strategy(),
        statuses in prop::collection::vec(
            prop_oneof![
                Just(RunStatus::Completed),
                Just(RunStatus::Failed),
                Just(RunStatus::Cancelled),
                Just(RunStatus::TimedOut),
            ],
            1..8,
        ),
    ) {
        let decision = evaluate_join(mode, Some(1), &statuses);
        prop_assert!(decision.complete);
        prop_assert!(decision.status.is_terminal());
    }
}
