//! Relationship State Engine — one aggregate record per user, advanced or
//! demoted by accumulated interaction statistics.
//!
//! Every counter-affecting event (recorded interaction, resolved
//! contradiction, manual override) runs one evaluation pass of the rules
//! in [`transition`]. Mutations hold the user's slot for the whole
//! read-modify-write. The `*_in` variants run inside a caller's
//! transaction; their bookkeeping (counters, logs) happens only after the
//! caller commits.

pub mod state;
pub mod transition;

pub use state::{InteractionSignal, PreferenceSection, RelationshipState, RelationshipStatus};
pub use transition::{StatusTransition, TransitionCause};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use serde_json::json;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::config::RelationshipConfig;
use crate::error::{AffinityError, Result};
use crate::memory::{self, MemoryStore, NewMemory};
use crate::store::{truncate_millis, Database, DocumentTable, TxResult};
use crate::sync::UserLocks;
use crate::telemetry::Counters;
use crate::types::{Document, Emotion, Intensity, InteractionType, UserId};

/// Status edges fired by one evaluation pass, oldest first.
pub(crate) type Fired = Vec<(RelationshipStatus, RelationshipStatus)>;

/// State after an event, plus any transitions it fired.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipUpdate {
    /// Snapshot after the update was committed.
    pub state: RelationshipState,
    /// Transitions fired by this event, in order.
    pub transitions: Vec<StatusTransition>,
}

/// The relationship engine.
pub struct RelationshipEngine {
    db: Arc<Database>,
    locks: Arc<UserLocks>,
    clock: SharedClock,
    memories: Arc<MemoryStore>,
    config: RelationshipConfig,
}

impl std::fmt::Debug for RelationshipEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationshipEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RelationshipEngine {
    /// Create an engine. `memories` supplies dominant-emotion samples and
    /// receives manual-override records.
    #[must_use]
    pub fn new(
        db: Arc<Database>,
        locks: Arc<UserLocks>,
        clock: SharedClock,
        memories: Arc<MemoryStore>,
        config: &RelationshipConfig,
    ) -> Self {
        Self {
            db,
            locks,
            clock,
            memories,
            config: config.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Current state, creating a default `initial` record on first access.
    ///
    /// # Errors
    /// `StoreUnavailable` if the store fails.
    pub fn get(&self, user_id: UserId) -> Result<RelationshipState> {
        if let Some(existing) = self.db.read("relationship.get", |conn| self.load(conn, user_id))? {
            return Ok(existing);
        }
        self.locks.with_user(user_id, || {
            let now = self.now();
            self.db.write("relationship.create", |tx| {
                if let Some(existing) = self.load(tx, user_id)? {
                    return Ok(existing);
                }
                let fresh = RelationshipState::new(user_id, now);
                self.db.save_document(tx, DocumentTable::Relationship, &user_id, &fresh)?;
                debug!(user = %user_id, "relationship created");
                Ok(fresh)
            })
        })
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Fold one interaction into the user's state and evaluate transitions.
    ///
    /// # Errors
    /// `InvalidArgument` for a malformed signal, `StoreUnavailable` if the
    /// store fails.
    pub fn record_interaction(&self, user_id: UserId, signal: &InteractionSignal) -> Result<RelationshipUpdate> {
        signal.validate()?;
        self.locks.with_user(user_id, || {
            let now = self.now();
            let (state, fired) = self.db.write("relationship.record_interaction", |tx| {
                self.record_interaction_in(tx, user_id, signal, now)
            })?;
            Ok(self.interaction_recorded(signal, state, fired, now))
        })
    }

    /// [`Self::record_interaction`] inside the caller's transaction. The
    /// dominant emotion sees memories written earlier in that transaction.
    pub(crate) fn record_interaction_in(
        &self,
        tx: &Transaction<'_>,
        user_id: UserId,
        signal: &InteractionSignal,
        now: DateTime<Utc>,
    ) -> TxResult<(RelationshipState, Fired)> {
        let mut state = self.load_or_new(tx, user_id, now)?;
        state.apply_interaction(signal, now, &self.config);
        state.dominant_emotion = self.memories.dominant_emotion_in(tx, user_id)?;
        let fired = self.evaluate(&mut state, now);
        self.db.save_document(tx, DocumentTable::Relationship, &user_id, &state)?;
        Ok((state, fired))
    }

    /// Bookkeeping once an interaction has committed.
    pub(crate) fn interaction_recorded(
        &self,
        signal: &InteractionSignal,
        state: RelationshipState,
        fired: Fired,
        now: DateTime<Utc>,
    ) -> RelationshipUpdate {
        Counters::bump(&self.db.counters().interactions_recorded);
        debug!(
            user = %state.user_id,
            sentiment = ?signal.sentiment,
            count = state.interaction_count,
            trust = state.trust_level,
            rapport = state.rapport,
            "interaction recorded"
        );
        self.finish(state, fired, &TransitionCause::Interaction, now)
    }

    /// Force a status change. Only strained→repaired, anything→strained and
    /// forward-successor edges are permitted; the override is written as a
    /// `status_override` memory in the same transaction.
    ///
    /// # Errors
    /// `InvalidArgument` for an empty reason or a forbidden edge.
    pub fn update_status(
        &self,
        user_id: UserId,
        to: RelationshipStatus,
        reason: &str,
    ) -> Result<StatusTransition> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AffinityError::InvalidArgument("override reason must not be empty".into()));
        }

        self.locks.with_user(user_id, || {
            let now = self.now();
            let from = self.db.write("relationship.update_status", |tx| {
                let mut state = self.load_or_new(tx, user_id, now)?;
                let from = state.status;
                if !transition::manual_edge_permitted(from, to) {
                    return Err(AffinityError::InvalidArgument(format!(
                        "manual transition {from} -> {to} is not permitted"
                    ))
                    .into());
                }

                let record = self.memories.prepare(user_id, override_memory(from, to, reason))?;
                memory::insert(tx, &record)?;

                state.status = to;
                state.status_changed_at = Some(now);
                self.db.save_document(tx, DocumentTable::Relationship, &user_id, &state)?;
                Ok(from)
            })?;

            let counters = self.db.counters();
            Counters::bump(&counters.manual_overrides);
            Counters::bump(&counters.memories_stored);
            info!(user = %user_id, from = %from, to = %to, reason, "relationship status overridden");

            Ok(StatusTransition {
                user_id,
                from,
                to,
                cause: TransitionCause::ManualOverride { reason: reason.to_string() },
                at: now,
            })
        })
    }

    /// Apply a contradiction-resolution score adjustment and evaluate
    /// transitions, inside the caller's transaction.
    pub(crate) fn apply_resolution_in(
        &self,
        tx: &Transaction<'_>,
        user_id: UserId,
        trust_delta: f64,
        rapport_delta: f64,
        now: DateTime<Utc>,
    ) -> TxResult<(RelationshipState, Fired)> {
        let mut state = self.load_or_new(tx, user_id, now)?;
        state.adjust_scores(trust_delta, rapport_delta);
        let fired = self.evaluate(&mut state, now);
        self.db.save_document(tx, DocumentTable::Relationship, &user_id, &state)?;
        Ok((state, fired))
    }

    /// Bookkeeping once a resolution adjustment has committed.
    pub(crate) fn resolution_applied(
        &self,
        state: RelationshipState,
        fired: Fired,
        now: DateTime<Utc>,
    ) -> RelationshipUpdate {
        debug!(user = %state.user_id, trust = state.trust_level, rapport = state.rapport, "resolution feedback applied");
        self.finish(state, fired, &TransitionCause::ContradictionResolved, now)
    }

    /// Merge free-form entries into one preference mapping. Never touches
    /// status or counters.
    ///
    /// # Errors
    /// `StoreUnavailable` if the store fails.
    pub fn set_preferences(
        &self,
        user_id: UserId,
        section: PreferenceSection,
        entries: Document,
    ) -> Result<RelationshipState> {
        self.locks.with_user(user_id, || {
            let now = self.now();
            let state = self.db.write("relationship.set_preferences", |tx| {
                let mut state = self.load_or_new(tx, user_id, now)?;
                state.merge_preferences(section, entries.clone());
                self.db.save_document(tx, DocumentTable::Relationship, &user_id, &state)?;
                Ok(state)
            })?;
            debug!(user = %user_id, section = %section, "preferences merged");
            Ok(state)
        })
    }

    /// Restore the default `initial` record.
    ///
    /// # Errors
    /// `StoreUnavailable` if the store fails.
    pub fn reset(&self, user_id: UserId) -> Result<RelationshipState> {
        self.locks.with_user(user_id, || {
            let now = self.now();
            let fresh = self.db.write("relationship.reset", |tx| self.reset_in(tx, user_id, now))?;
            info!(user = %user_id, "relationship reset");
            Ok(fresh)
        })
    }

    /// [`Self::reset`] inside the caller's transaction.
    pub(crate) fn reset_in(&self, tx: &Transaction<'_>, user_id: UserId, now: DateTime<Utc>) -> TxResult<RelationshipState> {
        let fresh = RelationshipState::new(user_id, now);
        self.db.save_document(tx, DocumentTable::Relationship, &user_id, &fresh)?;
        Ok(fresh)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn now(&self) -> DateTime<Utc> {
        truncate_millis(self.clock.now())
    }

    fn load(&self, conn: &Connection, user_id: UserId) -> TxResult<Option<RelationshipState>> {
        self.db.load_document(conn, DocumentTable::Relationship, &user_id)
    }

    fn load_or_new(&self, conn: &Connection, user_id: UserId, now: DateTime<Utc>) -> TxResult<RelationshipState> {
        Ok(self
            .load(conn, user_id)?
            .unwrap_or_else(|| RelationshipState::new(user_id, now)))
    }

    fn evaluate(&self, state: &mut RelationshipState, now: DateTime<Utc>) -> Fired {
        let fired = transition::evaluate(state, self.config.cascade);
        if !fired.is_empty() {
            state.status_changed_at = Some(now);
        }
        fired
    }

    fn finish(
        &self,
        state: RelationshipState,
        fired: Fired,
        cause: &TransitionCause,
        at: DateTime<Utc>,
    ) -> RelationshipUpdate {
        let transitions: Vec<StatusTransition> = fired
            .into_iter()
            .map(|(from, to)| StatusTransition {
                user_id: state.user_id,
                from,
                to,
                cause: cause.clone(),
                at,
            })
            .collect();

        if !transitions.is_empty() {
            Counters::add(&self.db.counters().status_transitions, transitions.len() as u64);
        }
        for t in &transitions {
            info!(user = %t.user_id, from = %t.from, to = %t.to, cause = ?t.cause, "relationship status changed");
        }
        RelationshipUpdate { state, transitions }
    }
}

/// The pseudo-interaction recorded for a manual override.
fn override_memory(from: RelationshipStatus, to: RelationshipStatus, reason: &str) -> NewMemory {
    let mut context = Document::new();
    context.insert("from".into(), json!(from.as_str()));
    context.insert("to".into(), json!(to.as_str()));
    NewMemory::new(
        InteractionType::StatusOverride,
        format!("status override: {from} -> {to}"),
        reason,
        Emotion::Neutral,
        Intensity::Medium,
    )
    .with_context(context)
    .with_tags(["status_override"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AffinityConfig;
    use crate::types::Sentiment;
    use chrono::Duration;

    struct Fixture {
        engine: RelationshipEngine,
        memories: Arc<MemoryStore>,
        clock: ManualClock,
        user: UserId,
    }

    fn fixture() -> Fixture {
        let config = AffinityConfig::default();
        let db = Arc::new(Database::open_in_memory(&config.persistence).expect("open"));
        let locks = Arc::new(UserLocks::new());
        let clock = ManualClock::starting_now();
        let shared: SharedClock = Arc::new(clock.clone());
        let memories = Arc::new(MemoryStore::new(Arc::clone(&db), Arc::clone(&locks), Arc::clone(&shared), &config));
        let engine = RelationshipEngine::new(db, locks, shared, Arc::clone(&memories), &config.relationship);
        Fixture {
            engine,
            memories,
            clock,
            user: UserId::new(),
        }
    }

    #[test]
    fn get_lazily_creates_initial_state() {
        let f = fixture();
        let state = f.engine.get(f.user).expect("get");
        assert_eq!(state.status, RelationshipStatus::Initial);
        assert_eq!(state.interaction_count, 0);
        f.clock.advance(Duration::days(1));
        let again = f.engine.get(f.user).expect("get");
        assert_eq!(again.relationship_started_at, state.relationship_started_at);
    }

    #[test]
    fn five_positive_interactions_reach_acquaintance() {
        let f = fixture();
        let mut transitions = Vec::new();
        for _ in 0..5 {
            let update = f.engine.record_interaction(f.user, &InteractionSignal::positive(12)).expect("record");
            transitions.extend(update.transitions);
            f.clock.advance(Duration::hours(2));
        }
        let state = f.engine.get(f.user).expect("get");
        assert_eq!(state.status, RelationshipStatus::Acquaintance);
        assert_eq!(state.interaction_count, 5);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].cause, TransitionCause::Interaction);
    }

    #[test]
    fn negative_streak_strains() {
        let f = fixture();
        for _ in 0..5 {
            f.engine.record_interaction(f.user, &InteractionSignal::positive(1)).expect("record");
        }
        for _ in 0..6 {
            f.engine.record_interaction(f.user, &InteractionSignal::negative(1)).expect("record");
        }
        assert_eq!(f.engine.get(f.user).expect("get").status, RelationshipStatus::Strained);
    }

    #[test]
    fn override_is_logged_as_memory() {
        let f = fixture();
        let err = f
            .engine
            .update_status(f.user, RelationshipStatus::Repaired, "patched things up")
            .expect_err("initial cannot jump to repaired");
        assert!(matches!(err, AffinityError::InvalidArgument(_)));

        f.engine
            .update_status(f.user, RelationshipStatus::Strained, "abusive messages")
            .expect("strain");
        let t = f
            .engine
            .update_status(f.user, RelationshipStatus::Repaired, "apology accepted")
            .expect("repair");
        assert_eq!(t.from, RelationshipStatus::Strained);
        assert_eq!(t.to, RelationshipStatus::Repaired);

        let overrides = f.memories.by_tags(f.user, ["status_override"], 10).expect("tags");
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides[0].interaction_type, InteractionType::StatusOverride);
        assert_eq!(overrides[0].content, "apology accepted");
        assert_eq!(f.engine.get(f.user).expect("get").status, RelationshipStatus::Repaired);
    }

    #[test]
    fn override_requires_reason() {
        let f = fixture();
        let err = f
            .engine
            .update_status(f.user, RelationshipStatus::Acquaintance, "  ")
            .expect_err("empty reason");
        assert!(matches!(err, AffinityError::InvalidArgument(_)));
        assert_eq!(f.memories.count(f.user).expect("count"), 0);
    }

    #[test]
    fn dominant_emotion_follows_memories() {
        let f = fixture();
        for _ in 0..3 {
            f.memories
                .store(
                    f.user,
                    NewMemory::new(InteractionType::Casual, "laughs", "laughs", Emotion::Joy, Intensity::High),
                )
                .expect("store");
        }
        let update = f
            .engine
            .record_interaction(f.user, &InteractionSignal::new(3, Sentiment::Neutral))
            .expect("record");
        assert_eq!(update.state.dominant_emotion, Emotion::Joy);
        // Sampling must not count as recall.
        let recalled = f.memories.recent(f.user, 1).expect("recent");
        assert_eq!(recalled[0].recall_count, 1);
    }

    #[test]
    fn resolution_adjusts_scores() {
        let f = fixture();
        f.engine.record_interaction(f.user, &InteractionSignal::positive(1)).expect("record");
        let before = f.engine.get(f.user).expect("get");
        let now = f.engine.now();
        let (state, fired) = f
            .engine
            .db
            .write("test.resolution", |tx| f.engine.apply_resolution_in(tx, f.user, 0.1, 0.2, now))
            .expect("adjust");
        let update = f.engine.resolution_applied(state, fired, now);
        assert!((update.state.trust_level - (before.trust_level + 0.1)).abs() < 1e-12);
        assert!((update.state.rapport - (before.rapport + 0.2)).abs() < 1e-12);
        assert_eq!(update.state.interaction_count, before.interaction_count);
    }

    #[test]
    fn reset_restores_initial() {
        let f = fixture();
        for _ in 0..6 {
            f.engine.record_interaction(f.user, &InteractionSignal::positive(1)).expect("record");
        }
        let fresh = f.engine.reset(f.user).expect("reset");
        assert_eq!(fresh.status, RelationshipStatus::Initial);
        assert_eq!(f.engine.get(f.user).expect("get").interaction_count, 0);
    }

    #[test]
    fn reads_track_writes_from_other_handles() {
        let f = fixture();
        let config = AffinityConfig::default();
        let other = RelationshipEngine::new(
            Arc::clone(&f.engine.db),
            Arc::clone(&f.engine.locks),
            Arc::clone(&f.engine.clock),
            Arc::clone(&f.memories),
            &config.relationship,
        );
        assert_eq!(f.engine.get(f.user).expect("get").interaction_count, 0);
        other.record_interaction(f.user, &InteractionSignal::positive(4)).expect("record");
        assert_eq!(f.engine.get(f.user).expect("get").interaction_count, 1);
    }

    #[test]
    fn preferences_do_not_touch_counters() {
        let f = fixture();
        f.engine.record_interaction(f.user, &InteractionSignal::positive(1)).expect("record");
        let mut entries = Document::new();
        entries.insert("no_politics".into(), json!(true));
        let state = f
            .engine
            .set_preferences(f.user, PreferenceSection::BoundarySettings, entries)
            .expect("prefs");
        assert_eq!(state.interaction_count, 1);
        assert_eq!(state.boundary_settings["no_politics"], true);
    }
}
