//! Contradiction Ledger — conflicting statements attributed to a user,
//! tracked until resolved.
//!
//! Resolution is one-way: once `is_resolved` is set it stays set, and a
//! second `resolve` leaves the stored resolution untouched. No
//! deduplication happens here; identical submissions become separate rows.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::error::{AffinityError, Result};
use crate::store::{from_millis, json_column, parsed_column, to_millis, truncate_millis, Database, TxResult};
use crate::sync::UserLocks;
use crate::telemetry::Counters;
use crate::types::{ContradictionId, Document, MemoryId, UserId};

/// A detected pair of conflicting statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contradiction {
    /// Unique identifier.
    pub id: ContradictionId,
    /// Owning user.
    pub user_id: UserId,
    /// Classifier label (free-form).
    pub contradiction_type: String,
    /// What was said first.
    pub original_statement: String,
    /// What conflicts with it.
    pub contradicting_statement: String,
    /// Auxiliary data.
    pub context: Document,
    /// Weak references into the memory store.
    pub related_memory_ids: BTreeSet<MemoryId>,
    /// When the contradiction was detected.
    pub detected_at: DateTime<Utc>,
    /// How it was resolved.
    pub resolution: Option<String>,
    /// Always equal to `resolved_at.is_some()`.
    pub is_resolved: bool,
    /// When it was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Request to record a contradiction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContradiction {
    /// Classifier label.
    pub contradiction_type: String,
    /// What was said first.
    pub original_statement: String,
    /// What conflicts with it.
    pub contradicting_statement: String,
    /// Auxiliary data.
    pub context: Option<Document>,
    /// Related memories.
    pub related_memory_ids: BTreeSet<MemoryId>,
}

impl NewContradiction {
    /// A request with only the required fields set.
    pub fn new(
        contradiction_type: impl Into<String>,
        original_statement: impl Into<String>,
        contradicting_statement: impl Into<String>,
    ) -> Self {
        Self {
            contradiction_type: contradiction_type.into(),
            original_statement: original_statement.into(),
            contradicting_statement: contradicting_statement.into(),
            context: None,
            related_memory_ids: BTreeSet::new(),
        }
    }

    /// Attach auxiliary context.
    #[must_use]
    pub fn with_context(mut self, context: Document) -> Self {
        self.context = Some(context);
        self
    }

    /// Reference a memory.
    #[must_use]
    pub fn with_related_memory(mut self, id: MemoryId) -> Self {
        self.related_memory_ids.insert(id);
        self
    }

    fn into_contradiction(self, user_id: UserId, now: DateTime<Utc>) -> Result<Contradiction> {
        for (field, value) in [
            ("contradiction_type", &self.contradiction_type),
            ("original_statement", &self.original_statement),
            ("contradicting_statement", &self.contradicting_statement),
        ] {
            if value.trim().is_empty() {
                return Err(AffinityError::InvalidArgument(format!("{field} must not be empty")));
            }
        }
        Ok(Contradiction {
            id: ContradictionId::new(),
            user_id,
            contradiction_type: self.contradiction_type,
            original_statement: self.original_statement,
            contradicting_statement: self.contradicting_statement,
            context: self.context.unwrap_or_default(),
            related_memory_ids: self.related_memory_ids,
            detected_at: now,
            resolution: None,
            is_resolved: false,
            resolved_at: None,
        })
    }
}

/// Result of [`ContradictionLedger::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// This call resolved it.
    Resolved(Contradiction),
    /// It was already resolved; nothing changed.
    AlreadyResolved(Contradiction),
}

impl ResolveOutcome {
    /// The contradiction as stored after the call.
    #[must_use]
    pub fn contradiction(&self) -> &Contradiction {
        match self {
            Self::Resolved(c) | Self::AlreadyResolved(c) => c,
        }
    }

    /// Whether this call performed the resolution.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Treat a repeated resolution as an error.
    ///
    /// # Errors
    /// [`AffinityError::AlreadyResolved`] for the soft case.
    pub fn strict(self) -> Result<Contradiction> {
        match self {
            Self::Resolved(c) => Ok(c),
            Self::AlreadyResolved(c) => Err(AffinityError::AlreadyResolved(c.id)),
        }
    }
}

const SELECT: &str = "SELECT id, user_id, contradiction_type, original_statement, contradicting_statement,
        context, related_memory_ids, detected_at, resolution, is_resolved, resolved_at
 FROM contradictions ";

fn contradiction_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contradiction> {
    let resolved_at: Option<i64> = row.get(10)?;
    Ok(Contradiction {
        id: parsed_column(row, 0)?,
        user_id: parsed_column(row, 1)?,
        contradiction_type: row.get(2)?,
        original_statement: row.get(3)?,
        contradicting_statement: row.get(4)?,
        context: json_column(row, 5)?,
        related_memory_ids: json_column(row, 6)?,
        detected_at: from_millis(row.get(7)?)?,
        resolution: row.get(8)?,
        is_resolved: row.get(9)?,
        resolved_at: resolved_at.map(from_millis).transpose()?,
    })
}

fn query(conn: &Connection, tail: &str, user_or_id: &str) -> TxResult<Vec<Contradiction>> {
    let sql = format!("{SELECT}{tail}");
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![user_or_id], contradiction_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn fetch(conn: &Connection, id: ContradictionId) -> TxResult<Option<Contradiction>> {
    Ok(conn
        .prepare_cached(&format!("{SELECT}WHERE id = ?1"))?
        .query_row(params![id.to_string()], contradiction_from_row)
        .optional()?)
}

/// Trimmed resolution text, or `InvalidArgument` if blank.
pub(crate) fn checked_resolution(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AffinityError::InvalidArgument("resolution must not be empty".into()));
    }
    Ok(text)
}

/// Resolve `id` inside the caller's transaction. A resolved row is
/// returned untouched.
pub(crate) fn resolve_in(
    tx: &Transaction<'_>,
    id: ContradictionId,
    resolution: &str,
    now: DateTime<Utc>,
) -> TxResult<ResolveOutcome> {
    let Some(mut current) = fetch(tx, id)? else {
        return Err(AffinityError::not_found("contradiction", id).into());
    };
    if current.is_resolved {
        return Ok(ResolveOutcome::AlreadyResolved(current));
    }
    tx.execute(
        "UPDATE contradictions SET is_resolved = 1, resolved_at = ?1, resolution = ?2
         WHERE id = ?3 AND is_resolved = 0",
        params![to_millis(now), resolution, id.to_string()],
    )?;
    current.is_resolved = true;
    current.resolved_at = Some(now);
    current.resolution = Some(resolution.to_string());
    Ok(ResolveOutcome::Resolved(current))
}

/// The contradiction ledger.
#[derive(Debug)]
pub struct ContradictionLedger {
    db: Arc<Database>,
    locks: Arc<UserLocks>,
    clock: SharedClock,
}

impl ContradictionLedger {
    /// Create a ledger over a shared database.
    #[must_use]
    pub fn new(db: Arc<Database>, locks: Arc<UserLocks>, clock: SharedClock) -> Self {
        Self { db, locks, clock }
    }

    /// Record a contradiction and return its id.
    ///
    /// # Errors
    /// `InvalidArgument` for empty statements or type.
    pub fn record(&self, user_id: UserId, new: NewContradiction) -> Result<ContradictionId> {
        let contradiction = new.into_contradiction(user_id, truncate_millis(self.clock.now()))?;
        self.locks.with_user(user_id, || {
            self.db.write("ledger.record", |tx| {
                tx.execute(
                    "INSERT INTO contradictions (id, user_id, contradiction_type, original_statement,
                        contradicting_statement, context, related_memory_ids, detected_at, is_resolved)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
                    params![
                        contradiction.id.to_string(),
                        user_id.to_string(),
                        contradiction.contradiction_type,
                        contradiction.original_statement,
                        contradiction.contradicting_statement,
                        serde_json::to_string(&contradiction.context)?,
                        serde_json::to_string(&contradiction.related_memory_ids)?,
                        to_millis(contradiction.detected_at),
                    ],
                )?;
                Ok(())
            })
        })?;

        Counters::bump(&self.db.counters().contradictions_recorded);
        debug!(
            user = %user_id,
            contradiction = %contradiction.id,
            kind = %contradiction.contradiction_type,
            "contradiction recorded"
        );
        Ok(contradiction.id)
    }

    /// Resolve a contradiction. Resolving twice is a soft success that
    /// keeps the first resolution.
    ///
    /// # Errors
    /// `NotFound` for an unknown id, `InvalidArgument` for empty text.
    pub fn resolve(&self, id: ContradictionId, resolution: &str) -> Result<ResolveOutcome> {
        let user_id = self.get(id)?.user_id;
        let resolution = checked_resolution(resolution)?;
        self.locks.with_user(user_id, || {
            let now = truncate_millis(self.clock.now());
            let outcome = self.db.write("ledger.resolve", |tx| resolve_in(tx, id, resolution, now))?;
            self.resolved(&outcome);
            Ok(outcome)
        })
    }

    /// Bookkeeping once a resolution has committed.
    pub(crate) fn resolved(&self, outcome: &ResolveOutcome) {
        match outcome {
            ResolveOutcome::Resolved(c) => {
                Counters::bump(&self.db.counters().contradictions_resolved);
                info!(user = %c.user_id, contradiction = %c.id, "contradiction resolved");
            }
            ResolveOutcome::AlreadyResolved(c) => {
                debug!(user = %c.user_id, contradiction = %c.id, "contradiction already resolved");
            }
        }
    }

    /// One contradiction by id.
    ///
    /// # Errors
    /// `NotFound` for an unknown id.
    pub fn get(&self, id: ContradictionId) -> Result<Contradiction> {
        self.db
            .read("ledger.get", |conn| fetch(conn, id))?
            .ok_or_else(|| AffinityError::not_found("contradiction", id))
    }

    /// Unresolved contradictions, oldest first.
    ///
    /// # Errors
    /// `StoreUnavailable` if the store fails.
    pub fn unresolved(&self, user_id: UserId) -> Result<Vec<Contradiction>> {
        self.db.read("ledger.unresolved", |conn| {
            query(
                conn,
                "WHERE user_id = ?1 AND is_resolved = 0 ORDER BY detected_at ASC, seq ASC",
                &user_id.to_string(),
            )
        })
    }

    /// Every contradiction of `user_id`, oldest first.
    ///
    /// # Errors
    /// `StoreUnavailable` if the store fails.
    pub fn for_user(&self, user_id: UserId) -> Result<Vec<Contradiction>> {
        self.db.read("ledger.for_user", |conn| {
            query(conn, "WHERE user_id = ?1 ORDER BY detected_at ASC, seq ASC", &user_id.to_string())
        })
    }

    /// Number of unresolved contradictions.
    ///
    /// # Errors
    /// `StoreUnavailable` if the store fails.
    pub fn count_unresolved(&self, user_id: UserId) -> Result<usize> {
        self.db.read("ledger.count_unresolved", |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM contradictions WHERE user_id = ?1 AND is_resolved = 0",
                params![user_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::PersistenceConfig;
    use chrono::Duration;

    fn ledger() -> (ContradictionLedger, ManualClock) {
        let db = Arc::new(Database::open_in_memory(&PersistenceConfig::default()).expect("open"));
        let clock = ManualClock::starting_now();
        (ContradictionLedger::new(db, Arc::new(UserLocks::new()), Arc::new(clock.clone())), clock)
    }

    #[test]
    fn record_and_resolve() {
        let (ledger, _) = ledger();
        let user = UserId::new();
        let id = ledger
            .record(user, NewContradiction::new("preference", "likes coffee", "hates coffee"))
            .expect("record");
        assert_eq!(ledger.count_unresolved(user).expect("count"), 1);

        let outcome = ledger.resolve(id, "clarified: likes decaf").expect("resolve");
        assert!(outcome.is_fresh());
        let c = outcome.contradiction();
        assert!(c.is_resolved);
        assert_eq!(c.resolution.as_deref(), Some("clarified: likes decaf"));
        assert!(ledger.unresolved(user).expect("unresolved").is_empty());
        assert_eq!(ledger.for_user(user).expect("all").len(), 1);
    }

    #[test]
    fn second_resolve_keeps_first_resolution() {
        let (ledger, clock) = ledger();
        let user = UserId::new();
        let id = ledger.record(user, NewContradiction::new("fact", "a", "b")).expect("record");
        let first = ledger.resolve(id, "first").expect("resolve").strict().expect("fresh");

        clock.advance(Duration::hours(1));
        let second = ledger.resolve(id, "second").expect("soft success");
        assert!(!second.is_fresh());
        assert_eq!(second.contradiction().resolution.as_deref(), Some("first"));
        assert_eq!(second.contradiction().resolved_at, first.resolved_at);
        assert!(matches!(second.strict(), Err(AffinityError::AlreadyResolved(got)) if got == id));
    }

    #[test]
    fn unresolved_is_oldest_first() {
        let (ledger, clock) = ledger();
        let user = UserId::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(
                ledger
                    .record(user, NewContradiction::new("fact", format!("said {i}"), "unsaid"))
                    .expect("record"),
            );
            clock.advance(Duration::minutes(1));
        }
        // Duplicate submissions are separate rows.
        ids.push(ledger.record(user, NewContradiction::new("fact", "said 0", "unsaid")).expect("record"));

        let got: Vec<ContradictionId> = ledger.unresolved(user).expect("unresolved").into_iter().map(|c| c.id).collect();
        assert_eq!(got, ids);
    }

    #[test]
    fn validation_and_not_found() {
        let (ledger, _) = ledger();
        let user = UserId::new();
        assert!(matches!(
            ledger.record(user, NewContradiction::new("fact", " ", "b")),
            Err(AffinityError::InvalidArgument(_))
        ));
        assert!(matches!(
            ledger.resolve(ContradictionId::new(), "x"),
            Err(AffinityError::NotFound { .. })
        ));
        let id = ledger.record(user, NewContradiction::new("fact", "a", "b")).expect("record");
        assert!(matches!(ledger.resolve(id, ""), Err(AffinityError::InvalidArgument(_))));
    }

    #[test]
    fn related_memories_are_weak_references() {
        let (ledger, _) = ledger();
        let user = UserId::new();
        let dangling = MemoryId::new();
        let id = ledger
            .record(user, NewContradiction::new("fact", "a", "b").with_related_memory(dangling))
            .expect("record");
        assert!(ledger.get(id).expect("get").related_memory_ids.contains(&dangling));
    }
}
