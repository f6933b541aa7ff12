//! Memory Store — durable, append-mostly log of significant interactions.
//!
//! Every retrieval that returns a memory also recalls it: `recall_count`
//! is incremented and `last_recalled_at` set to now, inside the same
//! transaction that selected it. If the retrieval blows its latency budget
//! the transaction rolls back and the caller gets `DeadlineExceeded`, never
//! a partial list.
//!
//! Ordering:
//! - `recent`, `by_tags`: newest `occurred_at` first.
//! - `important`, `by_emotion`: effective importance descending, ties by
//!   recency.

pub mod model;

pub use model::{EmotionalMemory, NewMemory};

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::{AffinityConfig, MemoryConfig, RetrievalConfig};
use crate::decay::{self, DecayCurve};
use crate::error::{AffinityError, Result};
use crate::store::{from_millis, json_column, parsed_column, to_millis, truncate_millis, Database, TxError, TxResult};
use crate::sync::UserLocks;
use crate::telemetry::Counters;
use crate::types::{Emotion, Intensity, MemoryId, RankScore, UserId};

macro_rules! select_memories {
    ($tail:literal) => {
        concat!(
            "SELECT seq, id, user_id, interaction_type, occurred_at, summary, content,
                    primary_emotion, secondary_emotion, intensity, context,
                    related_achievement_ids, related_narrative_keys, importance_score,
                    decay_rate, last_recalled_at, recall_count, tags, is_sensitive,
                    is_forgotten, parent_memory_id
             FROM emotional_memories ",
            $tail
        )
    };
}

/// A row paired with its insertion sequence (the final recency tie-break).
type Row = (i64, EmotionalMemory);

fn memory_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let secondary: Option<String> = row.get(8)?;
    let secondary_emotion = secondary
        .map(|s| s.parse::<Emotion>())
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e)))?;
    let parent: Option<String> = row.get(20)?;
    let parent_memory_id = parent
        .map(|s| s.parse::<MemoryId>())
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(20, rusqlite::types::Type::Text, Box::new(e)))?;

    let memory = EmotionalMemory {
        id: parsed_column(row, 1)?,
        user_id: parsed_column(row, 2)?,
        interaction_type: parsed_column(row, 3)?,
        occurred_at: from_millis(row.get(4)?)?,
        summary: row.get(5)?,
        content: row.get(6)?,
        primary_emotion: parsed_column(row, 7)?,
        secondary_emotion,
        intensity: parsed_column(row, 9)?,
        context: json_column(row, 10)?,
        related_achievement_ids: json_column(row, 11)?,
        related_narrative_keys: json_column(row, 12)?,
        importance_score: row.get(13)?,
        decay_rate: row.get(14)?,
        last_recalled_at: from_millis(row.get(15)?)?,
        recall_count: row.get(16)?,
        tags: json_column(row, 17)?,
        is_sensitive: row.get(18)?,
        is_forgotten: row.get(19)?,
        parent_memory_id,
    };
    Ok((row.get(0)?, memory))
}

fn select<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> TxResult<Vec<Row>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, memory_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Insert a fully resolved memory and its tag rows.
pub(crate) fn insert(tx: &Transaction<'_>, m: &EmotionalMemory) -> TxResult<()> {
    tx.execute(
        "INSERT INTO emotional_memories (
            id, user_id, interaction_type, occurred_at, summary, content,
            primary_emotion, secondary_emotion, intensity, context,
            related_achievement_ids, related_narrative_keys, importance_score,
            decay_rate, last_recalled_at, recall_count, tags, is_sensitive,
            is_forgotten, parent_memory_id
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        params![
            m.id.to_string(),
            m.user_id.to_string(),
            m.interaction_type.as_str(),
            to_millis(m.occurred_at),
            m.summary,
            m.content,
            m.primary_emotion.as_str(),
            m.secondary_emotion.map(Emotion::as_str),
            m.intensity.as_str(),
            serde_json::to_string(&m.context)?,
            serde_json::to_string(&m.related_achievement_ids)?,
            serde_json::to_string(&m.related_narrative_keys)?,
            m.importance_score,
            m.decay_rate,
            to_millis(m.last_recalled_at),
            m.recall_count,
            serde_json::to_string(&m.tags)?,
            m.is_sensitive,
            m.is_forgotten,
            m.parent_memory_id.map(|p| p.to_string()),
        ],
    )?;

    let seq = tx.last_insert_rowid();
    let mut stmt =
        tx.prepare_cached("INSERT OR IGNORE INTO memory_tags (memory_seq, user_id, tag) VALUES (?1, ?2, ?3)")?;
    for tag in &m.tags {
        stmt.execute(params![seq, m.user_id.to_string(), tag])?;
    }
    Ok(())
}

/// Stamp every returned row as recalled at `now`.
fn mark_recalled(tx: &Transaction<'_>, rows: &mut [Row], now: DateTime<Utc>) -> TxResult<()> {
    let mut stmt = tx.prepare_cached(
        "UPDATE emotional_memories
         SET last_recalled_at = ?1, recall_count = recall_count + 1
         WHERE seq = ?2",
    )?;
    for (seq, memory) in rows.iter_mut() {
        stmt.execute(params![to_millis(now), *seq])?;
        memory.last_recalled_at = now;
        memory.recall_count = memory.recall_count.saturating_add(1);
    }
    Ok(())
}

/// Effective importance descending, then newest first.
fn rank_by_importance(rows: &mut [Row], now: DateTime<Utc>, curve: &dyn DecayCurve) {
    rows.sort_by_cached_key(|(seq, m)| {
        Reverse((
            RankScore::new(decay::effective_importance(m, now, curve)),
            m.occurred_at,
            *seq,
        ))
    });
}

/// Which retrieval path is running.
#[derive(Debug, Clone)]
pub(crate) enum Query {
    Recent,
    ByEmotion(Emotion),
    Important,
    ByTags(Vec<String>),
}

impl Query {
    /// Tag query with blank entries dropped.
    pub(crate) fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::ByTags(
            tags.into_iter()
                .map(|t| t.as_ref().trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        )
    }

    fn operation(&self) -> &'static str {
        match self {
            Self::Recent => "memory.recent",
            Self::ByEmotion(_) => "memory.by_emotion",
            Self::Important => "memory.important",
            Self::ByTags(_) => "memory.by_tags",
        }
    }
}

/// Emotion observed in one memory, without recalling it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmotionSample {
    /// Main emotion.
    pub primary: Emotion,
    /// Optional second emotion.
    pub secondary: Option<Emotion>,
    /// Intensity of the memory.
    pub intensity: Intensity,
}

/// Emotions of the newest `window` memories of `user_id`, without
/// recalling them.
pub(crate) fn recent_emotions_in(conn: &Connection, user_id: UserId, window: usize) -> TxResult<Vec<EmotionSample>> {
    let window = i64::try_from(window).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare_cached(
        "SELECT primary_emotion, secondary_emotion, intensity
         FROM emotional_memories
         WHERE user_id = ?1 AND is_forgotten = 0
         ORDER BY occurred_at DESC, seq DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![user_id.to_string(), window], |row| {
        let secondary: Option<String> = row.get(1)?;
        let secondary = secondary
            .map(|s| s.parse::<Emotion>())
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e)))?;
        Ok(EmotionSample {
            primary: parsed_column(row, 0)?,
            secondary,
            intensity: parsed_column(row, 2)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Tombstone every live memory of `user_id`; returns how many changed.
pub(crate) fn forget_all_in(tx: &Transaction<'_>, user_id: UserId) -> TxResult<usize> {
    Ok(tx.execute(
        "UPDATE emotional_memories SET is_forgotten = 1 WHERE user_id = ?1 AND is_forgotten = 0",
        params![user_id.to_string()],
    )?)
}

/// Intensity-weighted vote over `samples`; secondary emotions count half.
/// Ties go to the emotion seen most recently (samples are newest first).
#[must_use]
pub fn dominant_emotion(samples: &[EmotionSample]) -> Emotion {
    let mut votes: BTreeMap<Emotion, (f64, Reverse<usize>)> = BTreeMap::new();
    for (idx, sample) in samples.iter().enumerate() {
        let mut vote = |emotion: Emotion, weight: f64| {
            let entry = votes.entry(emotion).or_insert((0.0, Reverse(idx)));
            entry.0 += weight;
        };
        vote(sample.primary, sample.intensity.weight());
        if let Some(secondary) = sample.secondary {
            vote(secondary, sample.intensity.weight() * 0.5);
        }
    }
    votes
        .into_iter()
        .max_by_key(|(_, (weight, first_seen))| (RankScore::new(*weight), *first_seen))
        .map_or(Emotion::Neutral, |(emotion, _)| emotion)
}

/// The memory store.
pub struct MemoryStore {
    db: Arc<Database>,
    locks: Arc<UserLocks>,
    clock: SharedClock,
    config: MemoryConfig,
    retrieval: RetrievalConfig,
    curve: Arc<dyn DecayCurve>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("config", &self.config)
            .field("retrieval", &self.retrieval)
            .field("curve", &self.curve)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Create a store over a shared database, lock registry and clock.
    #[must_use]
    pub fn new(db: Arc<Database>, locks: Arc<UserLocks>, clock: SharedClock, config: &AffinityConfig) -> Self {
        Self {
            db,
            locks,
            clock,
            config: config.memory.clone(),
            retrieval: config.retrieval.clone(),
            curve: decay::curve_for(config.memory.decay_curve),
        }
    }

    /// Swap in a custom decay curve.
    #[must_use]
    pub fn with_curve(mut self, curve: Arc<dyn DecayCurve>) -> Self {
        self.curve = curve;
        self
    }

    /// The active decay curve.
    #[must_use]
    pub fn curve(&self) -> &dyn DecayCurve {
        self.curve.as_ref()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Store a memory for `user_id` and return its id.
    ///
    /// # Errors
    /// `InvalidArgument` for bad input, `StoreUnavailable` if the store fails.
    pub fn store(&self, user_id: UserId, new: NewMemory) -> Result<MemoryId> {
        self.locks
            .with_user(user_id, || self.store_locked(user_id, new))
            .map(|m| m.id)
    }

    fn store_locked(&self, user_id: UserId, new: NewMemory) -> Result<EmotionalMemory> {
        let start = Instant::now();
        let memory = self.prepare(user_id, new)?;
        self.db.write("memory.store", |tx| insert(tx, &memory))?;
        self.stored(&memory, start);
        Ok(memory)
    }

    /// Bookkeeping once a memory insert has committed.
    pub(crate) fn stored(&self, memory: &EmotionalMemory, start: Instant) {
        Counters::bump(&self.db.counters().memories_stored);
        debug!(
            user = %memory.user_id,
            memory = %memory.id,
            kind = %memory.interaction_type,
            emotion = %memory.primary_emotion,
            importance = memory.importance_score,
            elapsed_us = start.elapsed().as_micros(),
            "stored memory"
        );
    }

    /// Validate `new` and resolve its defaults without writing it.
    pub(crate) fn prepare(&self, user_id: UserId, new: NewMemory) -> Result<EmotionalMemory> {
        new.into_memory(user_id, truncate_millis(self.clock.now()), &self.config)
    }

    /// Tombstone one memory. Idempotent; the row is never deleted.
    ///
    /// # Errors
    /// `NotFound` if no memory has this id.
    pub fn forget(&self, memory_id: MemoryId) -> Result<()> {
        let user_id = self.owner_of(memory_id)?;
        let changed = self.locks.with_user(user_id, || {
            self.db.write("memory.forget", |tx| {
                Ok(tx.execute(
                    "UPDATE emotional_memories SET is_forgotten = 1 WHERE id = ?1 AND is_forgotten = 0",
                    params![memory_id.to_string()],
                )?)
            })
        })?;

        if changed > 0 {
            Counters::bump(&self.db.counters().memories_forgotten);
            info!(user = %user_id, memory = %memory_id, "memory forgotten");
        }
        Ok(())
    }

    /// Tombstone every memory of `user_id` in one transaction. Returns how
    /// many were newly forgotten.
    ///
    /// # Errors
    /// `StoreUnavailable` if the store fails.
    pub fn forget_all(&self, user_id: UserId) -> Result<usize> {
        self.locks.with_user(user_id, || self.forget_all_locked(user_id))
    }

    fn forget_all_locked(&self, user_id: UserId) -> Result<usize> {
        let changed = self.db.write("memory.forget_all", |tx| forget_all_in(tx, user_id))?;
        self.forgotten_all(user_id, changed);
        Ok(changed)
    }

    /// Bookkeeping once a forget-all has committed.
    pub(crate) fn forgotten_all(&self, user_id: UserId, changed: usize) {
        Counters::add(&self.db.counters().memories_forgotten, changed as u64);
        info!(user = %user_id, forgotten = changed, "all memories forgotten");
    }

    // ------------------------------------------------------------------
    // Retrievals (all recall their results)
    // ------------------------------------------------------------------

    /// Newest memories first.
    ///
    /// # Errors
    /// `InvalidArgument` for a limit of zero or above `retrieval.max_limit`,
    /// `DeadlineExceeded`, `StoreUnavailable`.
    pub fn recent(&self, user_id: UserId, limit: usize) -> Result<Vec<EmotionalMemory>> {
        self.retrieve(user_id, &Query::Recent, limit, Instant::now())
    }

    /// Memories whose primary or secondary emotion is `emotion`, most
    /// important first.
    ///
    /// # Errors
    /// `InvalidArgument` for a zero limit, `DeadlineExceeded`, `StoreUnavailable`.
    pub fn by_emotion(&self, user_id: UserId, emotion: Emotion, limit: usize) -> Result<Vec<EmotionalMemory>> {
        self.retrieve(user_id, &Query::ByEmotion(emotion), limit, Instant::now())
    }

    /// Most important memories first.
    ///
    /// # Errors
    /// `InvalidArgument` for a zero limit, `DeadlineExceeded`, `StoreUnavailable`.
    pub fn important(&self, user_id: UserId, limit: usize) -> Result<Vec<EmotionalMemory>> {
        self.retrieve(user_id, &Query::Important, limit, Instant::now())
    }

    /// Memories carrying any of `tags`, newest first.
    ///
    /// # Errors
    /// `InvalidArgument` for a zero limit, `DeadlineExceeded`, `StoreUnavailable`.
    pub fn by_tags<I, S>(&self, user_id: UserId, tags: I, limit: usize) -> Result<Vec<EmotionalMemory>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.retrieve(user_id, &Query::tags(tags), limit, Instant::now())
    }

    /// One memory by id.
    ///
    /// # Errors
    /// `NotFound` if unknown or forgotten.
    pub fn get(&self, memory_id: MemoryId) -> Result<EmotionalMemory> {
        let user_id = self.owner_of(memory_id)?;
        let mut chain = self.locks.with_user(user_id, || self.recall_chain(user_id, memory_id, 1))?;
        chain
            .pop()
            .ok_or_else(|| AffinityError::not_found("memory", memory_id))
    }

    /// `memory_id` followed by its ancestors via `parent_memory_id`.
    ///
    /// Missing or forgotten parents end the chain; they are not errors.
    ///
    /// # Errors
    /// `NotFound` if the starting memory is unknown or forgotten.
    pub fn chain(&self, memory_id: MemoryId) -> Result<Vec<EmotionalMemory>> {
        let user_id = self.owner_of(memory_id)?;
        let max = self.retrieval.max_limit;
        let chain = self.locks.with_user(user_id, || self.recall_chain(user_id, memory_id, max))?;
        if chain.is_empty() {
            return Err(AffinityError::not_found("memory", memory_id));
        }
        Ok(chain)
    }

    /// Number of retrievable (not forgotten) memories.
    ///
    /// # Errors
    /// `StoreUnavailable` if the store fails.
    pub fn count(&self, user_id: UserId) -> Result<usize> {
        self.db.read("memory.count", |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM emotional_memories WHERE user_id = ?1 AND is_forgotten = 0",
                params![user_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
    }

    /// Emotions of the newest `window` memories. Does not recall them.
    ///
    /// # Errors
    /// `StoreUnavailable` if the store fails.
    pub fn recent_emotions(&self, user_id: UserId, window: usize) -> Result<Vec<EmotionSample>> {
        self.db.read("memory.recent_emotions", |conn| recent_emotions_in(conn, user_id, window))
    }

    /// Dominant emotion over the configured window of recent memories.
    ///
    /// # Errors
    /// `StoreUnavailable` if the store fails.
    pub fn dominant_emotion(&self, user_id: UserId) -> Result<Emotion> {
        self.db.read("memory.dominant_emotion", |conn| self.dominant_emotion_in(conn, user_id))
    }

    /// [`Self::dominant_emotion`] inside an open transaction.
    pub(crate) fn dominant_emotion_in(&self, conn: &Connection, user_id: UserId) -> TxResult<Emotion> {
        let samples = recent_emotions_in(conn, user_id, self.config.dominant_emotion_window)?;
        Ok(dominant_emotion(&samples))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn owner_of(&self, memory_id: MemoryId) -> Result<UserId> {
        let owner: Option<UserId> = self.db.read("memory.owner", |conn| {
            Ok(conn
                .prepare_cached("SELECT user_id FROM emotional_memories WHERE id = ?1")?
                .query_row(params![memory_id.to_string()], |row| parsed_column(row, 0))
                .optional()?)
        })?;
        owner.ok_or_else(|| AffinityError::not_found("memory", memory_id))
    }

    fn check_limit(&self, limit: usize) -> Result<usize> {
        let max = self.retrieval.max_limit;
        if limit == 0 || limit > max {
            return Err(AffinityError::InvalidArgument(format!("limit must be between 1 and {max}, got {limit}")));
        }
        Ok(limit)
    }

    /// Run `query`, charging the latency budget from `start`.
    pub(crate) fn retrieve(
        &self,
        user_id: UserId,
        query: &Query,
        limit: usize,
        start: Instant,
    ) -> Result<Vec<EmotionalMemory>> {
        let limit = self.check_limit(limit)?;
        let sql_limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let operation = query.operation();
        let budget_ms = self.retrieval.budget_ms;
        let user = user_id.to_string();

        let result = self.locks.with_user(user_id, || {
            self.db.write(operation, |tx| {
                let now = truncate_millis(self.clock.now());
                let mut rows = match query {
                    Query::Recent => select(
                        tx,
                        select_memories!(
                            "WHERE user_id = ?1 AND is_forgotten = 0
                             ORDER BY occurred_at DESC, seq DESC LIMIT ?2"
                        ),
                        params![user, sql_limit],
                    )?,
                    Query::ByTags(tags) if tags.is_empty() => Vec::new(),
                    Query::ByTags(tags) => select(
                        tx,
                        select_memories!(
                            "WHERE user_id = ?1 AND is_forgotten = 0 AND seq IN (
                                SELECT memory_seq FROM memory_tags
                                WHERE user_id = ?1 AND tag IN (SELECT value FROM json_each(?2))
                             )
                             ORDER BY occurred_at DESC, seq DESC LIMIT ?3"
                        ),
                        params![user, serde_json::to_string(tags)?, sql_limit],
                    )?,
                    Query::ByEmotion(emotion) => {
                        let mut rows = select(
                            tx,
                            select_memories!(
                                "WHERE user_id = ?1 AND is_forgotten = 0
                                 AND (primary_emotion = ?2 OR secondary_emotion = ?2)"
                            ),
                            params![user, emotion.as_str()],
                        )?;
                        rank_by_importance(&mut rows, now, self.curve.as_ref());
                        rows.truncate(limit);
                        rows
                    }
                    Query::Important => {
                        let mut rows = select(
                            tx,
                            select_memories!("WHERE user_id = ?1 AND is_forgotten = 0"),
                            params![user],
                        )?;
                        rank_by_importance(&mut rows, now, self.curve.as_ref());
                        rows.truncate(limit);
                        rows
                    }
                };

                mark_recalled(tx, &mut rows, now)?;
                check_deadline(operation, start, budget_ms)?;
                Ok(rows.into_iter().map(|(_, m)| m).collect::<Vec<_>>())
            })
        });

        self.finish_retrieval(user_id, operation, start, result)
    }

    /// Follow parent links from `memory_id`, recalling every hop.
    fn recall_chain(&self, user_id: UserId, memory_id: MemoryId, max: usize) -> Result<Vec<EmotionalMemory>> {
        let start = Instant::now();
        let operation = "memory.chain";
        let budget_ms = self.retrieval.budget_ms;

        let result = self.db.write(operation, |tx| {
            let now = truncate_millis(self.clock.now());
            let mut rows = Vec::new();
            let mut seen = HashSet::new();
            let mut next = Some(memory_id);
            while let Some(id) = next {
                if rows.len() >= max || !seen.insert(id) {
                    break;
                }
                let mut found = select(
                    tx,
                    select_memories!("WHERE id = ?1 AND is_forgotten = 0"),
                    params![id.to_string()],
                )?;
                let Some(row) = found.pop() else { break };
                // Cross-user parents are treated as absent.
                if row.1.user_id != user_id {
                    break;
                }
                next = row.1.parent_memory_id;
                rows.push(row);
            }
            mark_recalled(tx, &mut rows, now)?;
            check_deadline(operation, start, budget_ms)?;
            Ok(rows.into_iter().map(|(_, m)| m).collect::<Vec<_>>())
        });

        self.finish_retrieval(user_id, operation, start, result)
    }

    fn finish_retrieval(
        &self,
        user_id: UserId,
        operation: &'static str,
        start: Instant,
        result: Result<Vec<EmotionalMemory>>,
    ) -> Result<Vec<EmotionalMemory>> {
        let counters = self.db.counters();
        match &result {
            Ok(memories) => {
                Counters::add(&counters.memories_recalled, memories.len() as u64);
                debug!(
                    user = %user_id,
                    operation,
                    returned = memories.len(),
                    elapsed_us = start.elapsed().as_micros(),
                    "retrieved memories"
                );
            }
            Err(AffinityError::DeadlineExceeded { elapsed_ms, budget_ms, .. }) => {
                Counters::bump(&counters.deadlines_exceeded);
                warn!(user = %user_id, operation, elapsed_ms, budget_ms, "retrieval over budget");
            }
            Err(_) => {}
        }
        result
    }
}

fn check_deadline(operation: &str, start: Instant, budget_ms: u64) -> TxResult<()> {
    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    if elapsed_ms > budget_ms {
        return Err(TxError::Domain(AffinityError::DeadlineExceeded {
            operation: operation.to_string(),
            elapsed_ms,
            budget_ms,
        }));
    }
    Ok(())
}
