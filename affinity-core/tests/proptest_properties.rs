//! Property-Based Tests for Affinity Core
//!
//! Uses `proptest` to check the relational-state invariants under random
//! inputs: decay monotonicity, status-machine monotonicity, partial
//! personality updates, forget idempotence and one-way resolution.

use std::sync::Arc;

use chrono::{Duration, Utc};
use proptest::prelude::*;

use affinity_core::config::{AffinityConfig, DecayCurveKind, RelationshipConfig};
use affinity_core::contradiction::NewContradiction;
use affinity_core::decay;
use affinity_core::personality::AdaptationPatch;
use affinity_core::relationship::state::RelationshipState;
use affinity_core::relationship::transition;
use affinity_core::relationship::{InteractionSignal, RelationshipStatus};
use affinity_core::{Companion, Emotion, Intensity, InteractionType, ManualClock, NewMemory, UserId};

fn companion() -> Companion {
    Companion::in_memory(Arc::new(ManualClock::starting_now()), AffinityConfig::default()).expect("open")
}

fn arb_curve() -> impl Strategy<Value = DecayCurveKind> {
    prop_oneof![
        Just(DecayCurveKind::Exponential),
        Just(DecayCurveKind::Linear),
        Just(DecayCurveKind::Rehearsal),
    ]
}

fn arb_unit() -> impl Strategy<Value = Option<f64>> {
    prop::option::of(0.0..=1.0f64)
}

// ---------------------------------------------------------------------------
// Property: effective importance never rises between recalls
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn effective_importance_is_non_increasing(
        kind in arb_curve(),
        importance in 0.0..=1.0f64,
        rate in 0.0..5.0f64,
        recalls in 0u32..50,
        t1_hours in 0i64..10_000,
        gap_hours in 0i64..10_000,
    ) {
        let now = Utc::now();
        let companion = companion();
        let memory = companion
            .memories()
            .store(
                UserId::new(),
                NewMemory::new(InteractionType::Casual, "m", "m", Emotion::Joy, Intensity::Low)
                    .with_importance(importance)
                    .with_decay_rate(rate)
                    .at(now),
            )
            .and_then(|id| companion.memories().get(id))
            .expect("store");
        let mut memory = memory;
        memory.recall_count = recalls;
        memory.last_recalled_at = now;

        let curve = decay::curve_for(kind);
        let t1 = now + Duration::hours(t1_hours);
        let t2 = t1 + Duration::hours(gap_hours);
        let e1 = memory.effective_importance(t1, curve.as_ref());
        let e2 = memory.effective_importance(t2, curve.as_ref());
        prop_assert!(e2 <= e1 + 1e-12, "{kind:?}: {e2} > {e1}");
        prop_assert!(e1 <= importance + 1e-12);
    }
}

// ---------------------------------------------------------------------------
// Property: status machine monotonicity
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn all_positive_history_never_strains(count in 1usize..80, length in 0u32..500) {
        let policy = RelationshipConfig::default();
        let now = Utc::now();
        let mut state = RelationshipState::new(UserId::new(), now);
        for _ in 0..count {
            state.apply_interaction(&InteractionSignal::positive(length), now, &policy);
            transition::evaluate(&mut state, false);
            prop_assert_ne!(state.status, RelationshipStatus::Strained);
        }
    }

    #[test]
    fn negative_majority_past_ten_always_strains(positives in 0usize..60, cascade in any::<bool>()) {
        let policy = RelationshipConfig::default();
        let now = Utc::now();
        let mut state = RelationshipState::new(UserId::new(), now);
        for _ in 0..positives {
            state.apply_interaction(&InteractionSignal::positive(10), now, &policy);
            transition::evaluate(&mut state, cascade);
        }
        while !(state.negative_interactions > state.positive_interactions && state.interaction_count > 10) {
            state.apply_interaction(&InteractionSignal::negative(10), now, &policy);
            transition::evaluate(&mut state, cascade);
        }
        prop_assert_eq!(state.status, RelationshipStatus::Strained);
    }
}

// ---------------------------------------------------------------------------
// Property: partial personality updates leave the rest untouched
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn partial_update_touches_only_supplied_dimensions(
        warmth in arb_unit(),
        humor in arb_unit(),
        curiosity in arb_unit(),
        emoji in arb_unit(),
    ) {
        let companion = companion();
        let user = UserId::new();
        let store = companion.personality();
        let before = store
            .update(user, AdaptationPatch::new().formality(0.8).directness(0.3), "seed")
            .expect("seed");

        let patch = AdaptationPatch {
            warmth,
            humor,
            curiosity,
            emoji_usage: emoji,
            ..AdaptationPatch::default()
        };
        let after = store.update(user, patch, "random nudge").expect("update");

        prop_assert_eq!(after.warmth, warmth.unwrap_or(before.warmth));
        prop_assert_eq!(after.humor, humor.unwrap_or(before.humor));
        prop_assert_eq!(after.curiosity, curiosity.unwrap_or(before.curiosity));
        prop_assert_eq!(after.emoji_usage, emoji.unwrap_or(before.emoji_usage));
        prop_assert_eq!(after.formality, before.formality);
        prop_assert_eq!(after.directness, before.directness);
        prop_assert_eq!(after.assertiveness, before.assertiveness);
        prop_assert_eq!(after.emotional_expressiveness, before.emotional_expressiveness);
        prop_assert_eq!(after.message_length_preference, before.message_length_preference);
    }
}

// ---------------------------------------------------------------------------
// Property: forget is idempotent and hides memories from every path
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn forgetting_twice_equals_forgetting_once(mask in prop::collection::vec(any::<bool>(), 1..12)) {
        let companion = companion();
        let memories = companion.memories();
        let user = UserId::new();
        let ids: Vec<_> = (0..mask.len())
            .map(|i| {
                memories
                    .store(
                        user,
                        NewMemory::new(InteractionType::Casual, format!("m{i}"), "c", Emotion::Joy, Intensity::Medium)
                            .with_tags(["t"]),
                    )
                    .expect("store")
            })
            .collect();

        for (id, forget) in ids.iter().zip(&mask) {
            if *forget {
                memories.forget(*id).expect("forget");
            }
        }
        let once = memories.count(user).expect("count");
        for (id, forget) in ids.iter().zip(&mask) {
            if *forget {
                memories.forget(*id).expect("forget again");
            }
        }
        prop_assert_eq!(memories.count(user).expect("count"), once);

        let kept = mask.iter().filter(|f| !**f).count();
        prop_assert_eq!(once, kept);
        for got in [
            memories.recent(user, 50).expect("recent"),
            memories.important(user, 50).expect("important"),
            memories.by_emotion(user, Emotion::Joy, 50).expect("emotion"),
            memories.by_tags(user, ["t"], 50).expect("tags"),
        ] {
            prop_assert_eq!(got.len(), kept);
            prop_assert!(got.iter().all(|m| !m.is_forgotten));
        }
    }
}

// ---------------------------------------------------------------------------
// Property: resolution is one-way and never overwritten
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn second_resolution_never_overwrites(first in "[a-z]{1,20}", second in "[a-z]{1,20}") {
        let companion = companion();
        let user = UserId::new();
        let id = companion
            .ledger()
            .record(user, NewContradiction::new("fact", "a", "b"))
            .expect("record");
        let resolved = companion.ledger().resolve(id, &first).expect("resolve");
        let repeat = companion.ledger().resolve(id, &second).expect("soft success");
        prop_assert!(!repeat.is_fresh());
        prop_assert_eq!(repeat.contradiction().resolution.as_deref(), Some(first.as_str()));
        prop_assert_eq!(repeat.contradiction().resolved_at, resolved.contradiction().resolved_at);
    }
}
