//! Facade wiring the four components over one database, one lock
//! registry and one clock.
//!
//! Cross-component flows live here. Each one runs under a single hold of
//! the user's slot and inside a single transaction, so either every step
//! commits or none does: storing an interaction memory and feeding the
//! relationship engine, resolving a contradiction and feeding back the
//! score adjustment, and forgetting a user.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::clock::{SharedClock, SystemClock};
use crate::config::AffinityConfig;
use crate::contradiction::{self, ContradictionLedger, ResolveOutcome};
use crate::error::Result;
use crate::memory::{self, EmotionalMemory, MemoryStore, NewMemory};
use crate::personality::PersonalityStore;
use crate::relationship::{InteractionSignal, RelationshipEngine, RelationshipUpdate};
use crate::store::{truncate_millis, Database};
use crate::sync::UserLocks;
use crate::telemetry::CounterSnapshot;
use crate::types::{ContradictionId, UserId};

/// Outcome of [`Companion::record_interaction`].
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionOutcome {
    /// The stored memory.
    pub memory: EmotionalMemory,
    /// Relationship state and fired transitions.
    pub relationship: RelationshipUpdate,
}

/// Outcome of [`Companion::resolve_contradiction`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionOutcome {
    /// Ledger result.
    pub outcome: ResolveOutcome,
    /// Score feedback, present only when this call resolved it.
    pub relationship: Option<RelationshipUpdate>,
}

/// Outcome of [`Companion::forget_user`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForgetReport {
    /// Memories newly tombstoned.
    pub memories_forgotten: usize,
}

/// Relational state for every user, behind one handle.
#[derive(Debug)]
pub struct Companion {
    config: AffinityConfig,
    db: Arc<Database>,
    locks: Arc<UserLocks>,
    clock: SharedClock,
    memories: Arc<MemoryStore>,
    relationships: RelationshipEngine,
    ledger: ContradictionLedger,
    personality: PersonalityStore,
}

impl Companion {
    /// Wire components over an open database.
    #[must_use]
    pub fn new(db: Arc<Database>, clock: SharedClock, config: AffinityConfig) -> Self {
        let locks = Arc::new(UserLocks::new());
        let memories = Arc::new(MemoryStore::new(
            Arc::clone(&db),
            Arc::clone(&locks),
            Arc::clone(&clock),
            &config,
        ));
        let relationships = RelationshipEngine::new(
            Arc::clone(&db),
            Arc::clone(&locks),
            Arc::clone(&clock),
            Arc::clone(&memories),
            &config.relationship,
        );
        let ledger = ContradictionLedger::new(Arc::clone(&db), Arc::clone(&locks), Arc::clone(&clock));
        let personality =
            PersonalityStore::new(Arc::clone(&db), Arc::clone(&locks), Arc::clone(&clock), &config.personality);
        Self {
            config,
            db,
            locks,
            clock,
            memories,
            relationships,
            ledger,
            personality,
        }
    }

    /// Open a file-backed store with the system clock.
    ///
    /// # Errors
    /// `StoreUnavailable` if the database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, config: AffinityConfig) -> Result<Self> {
        let db = Arc::new(Database::open(path, &config.persistence)?);
        Ok(Self::new(db, Arc::new(SystemClock), config))
    }

    /// Open an in-memory store.
    ///
    /// # Errors
    /// `StoreUnavailable` if SQLite fails.
    pub fn in_memory(clock: SharedClock, config: AffinityConfig) -> Result<Self> {
        let db = Arc::new(Database::open_in_memory(&config.persistence)?);
        Ok(Self::new(db, clock, config))
    }

    /// The memory store.
    #[must_use]
    pub fn memories(&self) -> &MemoryStore {
        &self.memories
    }

    /// The relationship engine.
    #[must_use]
    pub fn relationships(&self) -> &RelationshipEngine {
        &self.relationships
    }

    /// The contradiction ledger.
    #[must_use]
    pub fn ledger(&self) -> &ContradictionLedger {
        &self.ledger
    }

    /// The personality store.
    #[must_use]
    pub fn personality(&self) -> &PersonalityStore {
        &self.personality
    }

    /// The underlying database.
    #[must_use]
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &AffinityConfig {
        &self.config
    }

    /// Counter values.
    #[must_use]
    pub fn metrics(&self) -> CounterSnapshot {
        self.db.counters().snapshot()
    }

    fn now(&self) -> DateTime<Utc> {
        truncate_millis(self.clock.now())
    }

    /// Store an interaction memory and fold the interaction into the
    /// relationship, in one transaction.
    ///
    /// # Errors
    /// `InvalidArgument` for a bad memory or signal. Nothing is written if
    /// either step fails.
    pub fn record_interaction(
        &self,
        user_id: UserId,
        memory: NewMemory,
        signal: &InteractionSignal,
    ) -> Result<InteractionOutcome> {
        signal.validate()?;
        let memory = self.memories.prepare(user_id, memory)?;
        self.locks.with_user(user_id, || {
            let start = Instant::now();
            let now = self.now();
            let (state, fired) = self.db.write("companion.record_interaction", |tx| {
                memory::insert(tx, &memory)?;
                self.relationships.record_interaction_in(tx, user_id, signal, now)
            })?;
            self.memories.stored(&memory, start);
            let relationship = self.relationships.interaction_recorded(signal, state, fired, now);
            Ok(InteractionOutcome { memory, relationship })
        })
    }

    /// Resolve a contradiction; a fresh resolution adjusts trust and
    /// rapport by the configured deltas and re-evaluates status in the
    /// same transaction.
    ///
    /// # Errors
    /// `NotFound` for an unknown id, `InvalidArgument` for empty text.
    pub fn resolve_contradiction(&self, id: ContradictionId, resolution: &str) -> Result<ResolutionOutcome> {
        let user_id = self.ledger.get(id)?.user_id;
        let resolution = contradiction::checked_resolution(resolution)?;
        let trust_delta = self.config.ledger.resolution_trust_delta;
        let rapport_delta = self.config.ledger.resolution_rapport_delta;

        self.locks.with_user(user_id, || {
            let now = self.now();
            let (outcome, feedback) = self.db.write("companion.resolve_contradiction", |tx| {
                let outcome = contradiction::resolve_in(tx, id, resolution, now)?;
                let feedback = if outcome.is_fresh() {
                    Some(self.relationships.apply_resolution_in(tx, user_id, trust_delta, rapport_delta, now)?)
                } else {
                    None
                };
                Ok((outcome, feedback))
            })?;
            self.ledger.resolved(&outcome);
            let relationship =
                feedback.map(|(state, fired)| self.relationships.resolution_applied(state, fired, now));
            Ok(ResolutionOutcome { outcome, relationship })
        })
    }

    /// Tombstone every memory of `user_id` and reset the relationship, in
    /// one transaction.
    ///
    /// # Errors
    /// `StoreUnavailable` if the store fails; nothing changes then.
    pub fn forget_user(&self, user_id: UserId) -> Result<ForgetReport> {
        self.locks.with_user(user_id, || {
            let now = self.now();
            let memories_forgotten = self.db.write("companion.forget_user", |tx| {
                let forgotten = memory::forget_all_in(tx, user_id)?;
                self.relationships.reset_in(tx, user_id, now)?;
                Ok(forgotten)
            })?;
            self.memories.forgotten_all(user_id, memories_forgotten);
            info!(user = %user_id, memories_forgotten, "user forgotten");
            Ok(ForgetReport { memories_forgotten })
        })
    }
}
