//! Integration Tests — End-to-End Relational State Flows
//!
//! Complete scenarios across the four components: interaction → memory →
//! relationship status, contradiction → resolution → trust, forget flows,
//! concurrency across users, and on-disk persistence.

use std::sync::Arc;
use std::thread;

use chrono::Duration;

use affinity_core::config::AffinityConfig;
use affinity_core::contradiction::NewContradiction;
use affinity_core::personality::{AdaptationPatch, ComplexityLevel};
use affinity_core::relationship::{InteractionSignal, RelationshipStatus, TransitionCause};
use affinity_core::{
    AffinityError, Companion, Emotion, Intensity, InteractionType, ManualClock, NewMemory, Sentiment, UserId,
};

fn companion() -> (Companion, ManualClock) {
    let clock = ManualClock::starting_now();
    let companion = Companion::in_memory(Arc::new(clock.clone()), AffinityConfig::default()).expect("open");
    (companion, clock)
}

fn chat(summary: &str, emotion: Emotion) -> NewMemory {
    NewMemory::new(InteractionType::Casual, summary, summary, emotion, Intensity::Medium)
}

// ---------------------------------------------------------------------------
// Scenario A: five positive interactions from nothing → acquaintance
// ---------------------------------------------------------------------------

#[test]
fn five_positive_interactions_make_an_acquaintance() {
    let (companion, clock) = companion();
    let user = UserId::new();

    for i in 0..5 {
        companion
            .relationships()
            .record_interaction(user, &InteractionSignal::positive(20))
            .expect("record");
        clock.advance(Duration::hours(i + 1));
    }

    let state = companion.relationships().get(user).expect("get");
    assert_eq!(state.status, RelationshipStatus::Acquaintance);
    assert_eq!(state.interaction_count, 5);
    assert_eq!(state.positive_interactions, 5);
    assert_eq!(state.negative_interactions, 0);
}

// ---------------------------------------------------------------------------
// Scenario B: an important old memory outranks a trivial fresh one
// ---------------------------------------------------------------------------

#[test]
fn important_old_memory_outranks_trivial_new_one() {
    let (companion, clock) = companion();
    let user = UserId::new();

    let big = companion
        .memories()
        .store(
            user,
            chat("Told us about their father's illness", Emotion::Sadness)
                .with_importance(0.9)
                .with_decay_rate(0.1),
        )
        .expect("store");
    clock.advance(Duration::days(5));
    companion
        .memories()
        .store(user, chat("Said the weather was nice", Emotion::Neutral).with_importance(0.2))
        .expect("store");

    let top = companion.memories().important(user, 1).expect("important");
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].id, big);
    assert!((top[0].importance_score - 0.9).abs() < f64::EPSILON, "recall never rewrites importance");
}

// ---------------------------------------------------------------------------
// Scenario C: record → resolve → gone from unresolved
// ---------------------------------------------------------------------------

#[test]
fn resolved_contradiction_leaves_unresolved_list() {
    let (companion, _) = companion();
    let user = UserId::new();

    let id = companion
        .ledger()
        .record(user, NewContradiction::new("preference", "likes coffee", "hates coffee"))
        .expect("record");
    assert_eq!(companion.ledger().unresolved(user).expect("unresolved").len(), 1);

    let before = companion.relationships().get(user).expect("get");
    let resolution = companion
        .resolve_contradiction(id, "clarified: likes decaf")
        .expect("resolve");
    assert!(resolution.outcome.is_fresh());
    let feedback = resolution.relationship.expect("fresh resolutions feed back");
    assert!(feedback.state.trust_level > before.trust_level);
    assert!(companion.ledger().unresolved(user).expect("unresolved").is_empty());

    let again = companion.resolve_contradiction(id, "something else").expect("soft success");
    assert!(!again.outcome.is_fresh());
    assert!(again.relationship.is_none(), "repeat resolutions must not adjust scores twice");
    assert_eq!(
        again.outcome.contradiction().resolution.as_deref(),
        Some("clarified: likes decaf")
    );
}

// ---------------------------------------------------------------------------
// Facade flow: memory + relationship under one lock
// ---------------------------------------------------------------------------

#[test]
fn record_interaction_stores_memory_and_updates_relationship() {
    let (companion, clock) = companion();
    let user = UserId::new();

    let mut transitions = Vec::new();
    for i in 0..6 {
        let outcome = companion
            .record_interaction(
                user,
                chat(&format!("chat {i}"), Emotion::Gratitude).with_tags(["daily"]),
                &InteractionSignal::positive(30).with_response_time(8.0),
            )
            .expect("record");
        assert_eq!(outcome.memory.user_id, user);
        transitions.extend(outcome.relationship.transitions);
        clock.advance(Duration::hours(6));
    }

    let state = companion.relationships().get(user).expect("get");
    assert_eq!(state.interaction_count, 6);
    assert_eq!(state.dominant_emotion, Emotion::Gratitude);
    assert_eq!(companion.memories().count(user).expect("count"), 6);
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].to, RelationshipStatus::Acquaintance);

    let snapshot = companion.metrics();
    assert_eq!(snapshot.memories_stored, 6);
    assert_eq!(snapshot.interactions_recorded, 6);
    assert_eq!(snapshot.status_transitions, 1);
}

#[test]
fn rejected_memory_writes_nothing() {
    let (companion, _) = companion();
    let user = UserId::new();
    let err = companion
        .record_interaction(user, chat(" ", Emotion::Joy), &InteractionSignal::positive(1))
        .expect_err("blank summary");
    assert!(matches!(err, AffinityError::InvalidArgument(_)));
    assert_eq!(companion.relationships().get(user).expect("get").interaction_count, 0);
}

// ---------------------------------------------------------------------------
// Strained → repaired → close
// ---------------------------------------------------------------------------

#[test]
fn strained_relationship_can_be_repaired_and_grow_again() {
    let (companion, _) = companion();
    let user = UserId::new();
    let engine = companion.relationships();

    for _ in 0..5 {
        engine.record_interaction(user, &InteractionSignal::positive(1)).expect("record");
    }
    for _ in 0..6 {
        engine.record_interaction(user, &InteractionSignal::negative(1)).expect("record");
    }
    assert_eq!(engine.get(user).expect("get").status, RelationshipStatus::Strained);

    // Positive interactions alone never leave strained.
    for _ in 0..40 {
        engine.record_interaction(user, &InteractionSignal::positive(1)).expect("record");
    }
    assert_eq!(engine.get(user).expect("get").status, RelationshipStatus::Strained);

    let t = engine
        .update_status(user, RelationshipStatus::Repaired, "talked it through")
        .expect("repair");
    assert!(matches!(t.cause, TransitionCause::ManualOverride { .. }));

    let update = engine.record_interaction(user, &InteractionSignal::positive(1)).expect("record");
    assert_eq!(update.state.status, RelationshipStatus::Close);
}

// ---------------------------------------------------------------------------
// Forget flows
// ---------------------------------------------------------------------------

#[test]
fn forgotten_memories_never_come_back() {
    let (companion, _) = companion();
    let user = UserId::new();
    let keep = companion
        .memories()
        .store(user, chat("kept", Emotion::Joy).with_tags(["x"]))
        .expect("store");
    let gone = companion
        .memories()
        .store(user, chat("gone", Emotion::Joy).with_tags(["x"]).with_parent(keep))
        .expect("store");

    companion.memories().forget(gone).expect("forget");
    companion.memories().forget(gone).expect("idempotent");

    let memories = companion.memories();
    for got in [
        memories.recent(user, 10).expect("recent"),
        memories.important(user, 10).expect("important"),
        memories.by_emotion(user, Emotion::Joy, 10).expect("emotion"),
        memories.by_tags(user, ["x"], 10).expect("tags"),
    ] {
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, keep);
    }
    assert!(matches!(memories.chain(gone), Err(AffinityError::NotFound { .. })));
}

#[test]
fn forget_user_clears_memories_and_relationship() {
    let (companion, _) = companion();
    let user = UserId::new();
    let bystander = UserId::new();
    for i in 0..7 {
        companion
            .record_interaction(user, chat(&format!("m{i}"), Emotion::Love), &InteractionSignal::positive(3))
            .expect("record");
    }
    companion
        .record_interaction(bystander, chat("other", Emotion::Joy), &InteractionSignal::positive(3))
        .expect("record");

    let report = companion.forget_user(user).expect("forget");
    assert_eq!(report.memories_forgotten, 7);
    assert_eq!(companion.memories().count(user).expect("count"), 0);
    let state = companion.relationships().get(user).expect("get");
    assert_eq!(state.status, RelationshipStatus::Initial);
    assert_eq!(state.interaction_count, 0);

    assert_eq!(companion.memories().count(bystander).expect("count"), 1);
    assert_eq!(companion.forget_user(user).expect("again").memories_forgotten, 0);
}

#[test]
fn store_racing_forget_all_never_loses_a_memory() {
    let (companion, _) = companion();
    let companion = Arc::new(companion);
    let user = UserId::new();

    let writer = {
        let companion = Arc::clone(&companion);
        thread::spawn(move || {
            for i in 0..50 {
                companion
                    .memories()
                    .store(user, chat(&format!("m{i}"), Emotion::Joy))
                    .expect("store");
            }
        })
    };
    let forgetter = {
        let companion = Arc::clone(&companion);
        thread::spawn(move || {
            let mut forgotten = 0;
            for _ in 0..5 {
                forgotten += companion.memories().forget_all(user).expect("forget_all");
                thread::yield_now();
            }
            forgotten
        })
    };

    writer.join().expect("writer");
    let forgotten = forgetter.join().expect("forgetter");
    let visible = companion.memories().count(user).expect("count");
    assert_eq!(forgotten + visible, 50);
}

// ---------------------------------------------------------------------------
// Concurrency: many users in parallel
// ---------------------------------------------------------------------------

#[test]
fn concurrent_users_keep_exact_counts() {
    let (companion, _) = companion();
    let companion = Arc::new(companion);
    let users: Vec<UserId> = (0..6).map(|_| UserId::new()).collect();

    let handles: Vec<_> = users
        .iter()
        .flat_map(|&user| {
            (0..3).map(move |t| (user, t))
        })
        .map(|(user, t)| {
            let companion = Arc::clone(&companion);
            thread::spawn(move || {
                for i in 0..10 {
                    let sentiment = if (i + t) % 3 == 0 { Sentiment::Neutral } else { Sentiment::Positive };
                    companion
                        .record_interaction(
                            user,
                            chat(&format!("t{t} i{i}"), Emotion::Curiosity),
                            &InteractionSignal::new(5, sentiment),
                        )
                        .expect("record");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("join");
    }

    for user in users {
        let state = companion.relationships().get(user).expect("get");
        assert_eq!(state.interaction_count, 30, "no lost updates");
        assert_eq!(companion.memories().count(user).expect("count"), 30);
        assert_ne!(state.status, RelationshipStatus::Strained);
    }
}

// ---------------------------------------------------------------------------
// Personality
// ---------------------------------------------------------------------------

#[test]
fn personality_updates_are_versioned_and_audited() {
    let (companion, _) = companion();
    let user = UserId::new();
    let store = companion.personality();

    assert_eq!(store.get(user).expect("get").version, 0);
    store
        .update(
            user,
            AdaptationPatch::new().complexity(ComplexityLevel::Advanced).evidence(0.8),
            "uses technical vocabulary",
        )
        .expect("update");
    store
        .update(user, AdaptationPatch::new().emoji_usage(0.51), "one emoji")
        .expect("update");

    let current = store.get(user).expect("get");
    assert_eq!(current.complexity_level, ComplexityLevel::Advanced);
    assert_eq!(current.version, 1, "sub-threshold nudges do not bump the version");
    assert_eq!(store.history(user, 10).expect("history").len(), 2);
}

// ---------------------------------------------------------------------------
// Persistence across restarts
// ---------------------------------------------------------------------------

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("affinity.db");
    let user = UserId::new();

    let memory_id = {
        let companion = Companion::open(&path, AffinityConfig::default()).expect("open");
        let mut last = None;
        for i in 0..5 {
            let outcome = companion
                .record_interaction(user, chat(&format!("m{i}"), Emotion::Trust), &InteractionSignal::positive(9))
                .expect("record");
            last = Some(outcome.memory.id);
        }
        companion.memories().recent(user, 1).expect("recall");
        companion
            .personality()
            .update(user, AdaptationPatch::new().warmth(0.9), "very friendly")
            .expect("update");
        companion
            .ledger()
            .record(user, NewContradiction::new("fact", "lives in Oslo", "lives in Bergen"))
            .expect("record");
        last.expect("stored")
    };

    let companion = Companion::open(&path, AffinityConfig::default()).expect("reopen");
    let state = companion.relationships().get(user).expect("get");
    assert_eq!(state.status, RelationshipStatus::Acquaintance);
    assert_eq!(state.interaction_count, 5);
    assert!((companion.personality().get(user).expect("get").warmth - 0.9).abs() < f64::EPSILON);
    assert_eq!(companion.ledger().count_unresolved(user).expect("count"), 1);

    let recalled = companion.memories().get(memory_id).expect("get");
    assert_eq!(recalled.recall_count, 2, "recall from the previous session persisted");
    assert!(companion.database().integrity_check().expect("integrity"));
}

#[test]
fn config_round_trips_through_toml() {
    let config = AffinityConfig::from_toml(
        r#"
        [retrieval]
        budget_ms = 50

        [relationship]
        cascade = true

        [memory]
        decay_curve = "rehearsal"
        "#,
    )
    .expect("parse");
    assert_eq!(config.retrieval.budget_ms, 50);
    assert!(config.relationship.cascade);
    assert!((config.personality.significant_change_threshold - 0.05).abs() < f64::EPSILON);
}

#[test]
fn config_file_drives_logging_setup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("affinity.toml");
    std::fs::write(&path, "[general]\nlog_level = \"debug\"\n").expect("write");

    let config = AffinityConfig::from_file(&path).expect("load");
    assert_eq!(config.general.log_level, "debug");
    assert!(matches!(
        AffinityConfig::from_file(&dir.path().join("missing.toml")),
        Err(AffinityError::Io(_))
    ));

    // Only one global subscriber per process.
    affinity_core::telemetry::init_tracing(&config.general).expect("first install");
    assert!(matches!(
        affinity_core::telemetry::init_tracing(&config.general),
        Err(AffinityError::Config(_))
    ));
}

#[test]
fn only_store_failures_are_retryable() {
    assert!(AffinityError::StoreUnavailable("database is locked".into()).is_retryable());
    assert!(!AffinityError::InvalidArgument("limit".into()).is_retryable());
    assert!(!AffinityError::not_found("memory", UserId::new()).is_retryable());
}
