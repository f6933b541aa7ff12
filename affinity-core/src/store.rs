//! SQLite durable store shared by all four components.
//!
//! Four logically independent collections, each keyed by `user_id`:
//!
//! ```sql
//! emotional_memories       -- one row per memory, JSON columns for free-form data
//! memory_tags              -- (memory, tag) pairs for match-any tag lookups
//! contradictions           -- one row per contradiction
//! relationship_states      -- one JSON document per user
//! personality_adaptations  -- one JSON document per user
//! personality_history      -- append-only adaptation audit trail
//! ```
//!
//! - WAL mode for concurrent reads.
//! - Per-user aggregates are JSON documents in a BLOB column, so new
//!   free-form keys never need a migration. An optional CRC-32 checksum
//!   detects corruption.
//! - Busy/locked failures are retried a bounded number of times with
//!   jittered backoff before surfacing as `StoreUnavailable`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::error::{AffinityError, Result};
use crate::telemetry::Counters;
use crate::types::UserId;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS emotional_memories (
    seq                     INTEGER PRIMARY KEY AUTOINCREMENT,
    id                      TEXT NOT NULL UNIQUE,
    user_id                 TEXT NOT NULL,
    interaction_type        TEXT NOT NULL,
    occurred_at             INTEGER NOT NULL,
    summary                 TEXT NOT NULL,
    content                 TEXT NOT NULL,
    primary_emotion         TEXT NOT NULL,
    secondary_emotion       TEXT,
    intensity               TEXT NOT NULL,
    context                 TEXT NOT NULL,
    related_achievement_ids TEXT NOT NULL,
    related_narrative_keys  TEXT NOT NULL,
    importance_score        REAL NOT NULL,
    decay_rate              REAL NOT NULL,
    last_recalled_at        INTEGER NOT NULL,
    recall_count            INTEGER NOT NULL DEFAULT 0,
    tags                    TEXT NOT NULL,
    is_sensitive            INTEGER NOT NULL DEFAULT 0,
    is_forgotten            INTEGER NOT NULL DEFAULT 0,
    parent_memory_id        TEXT
);
CREATE INDEX IF NOT EXISTS idx_memories_user_occurred   ON emotional_memories(user_id, occurred_at);
CREATE INDEX IF NOT EXISTS idx_memories_user_emotion    ON emotional_memories(user_id, primary_emotion);
CREATE INDEX IF NOT EXISTS idx_memories_user_importance ON emotional_memories(user_id, importance_score);
CREATE INDEX IF NOT EXISTS idx_memories_user_recalled   ON emotional_memories(user_id, last_recalled_at);

CREATE TABLE IF NOT EXISTS memory_tags (
    memory_seq INTEGER NOT NULL,
    user_id    TEXT NOT NULL,
    tag        TEXT NOT NULL,
    PRIMARY KEY (memory_seq, tag)
);
CREATE INDEX IF NOT EXISTS idx_memory_tags_user_tag ON memory_tags(user_id, tag);

CREATE TABLE IF NOT EXISTS contradictions (
    seq                     INTEGER PRIMARY KEY AUTOINCREMENT,
    id                      TEXT NOT NULL UNIQUE,
    user_id                 TEXT NOT NULL,
    contradiction_type      TEXT NOT NULL,
    original_statement      TEXT NOT NULL,
    contradicting_statement TEXT NOT NULL,
    context                 TEXT NOT NULL,
    related_memory_ids      TEXT NOT NULL,
    detected_at             INTEGER NOT NULL,
    resolution              TEXT,
    is_resolved             INTEGER NOT NULL DEFAULT 0,
    resolved_at             INTEGER,
    CHECK ((is_resolved = 0) = (resolved_at IS NULL))
);
CREATE INDEX IF NOT EXISTS idx_contradictions_user ON contradictions(user_id, is_resolved, detected_at);

CREATE TABLE IF NOT EXISTS relationship_states (
    user_id    TEXT PRIMARY KEY,
    data       BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    checksum   TEXT
);

CREATE TABLE IF NOT EXISTS personality_adaptations (
    user_id    TEXT PRIMARY KEY,
    data       BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    checksum   TEXT
);

CREATE TABLE IF NOT EXISTS personality_history (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     TEXT NOT NULL,
    version     INTEGER NOT NULL,
    reason      TEXT NOT NULL,
    changed     TEXT NOT NULL,
    significant INTEGER NOT NULL,
    recorded_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_personality_history_user ON personality_history(user_id, seq);
";

// ---------------------------------------------------------------------------
// CRC-32 checksum helper
// ---------------------------------------------------------------------------

/// CRC-32 (ISO 3309) of `data` as lowercase hex.
fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32_compute(data))
}

fn crc32_compute(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
    }
    !crc
}

// ---------------------------------------------------------------------------
// Transaction errors
// ---------------------------------------------------------------------------

/// Error raised inside a store closure: either SQLite (possibly transient)
/// or a domain error that aborts the transaction without retry.
#[derive(Debug)]
pub(crate) enum TxError {
    Sql(rusqlite::Error),
    Domain(AffinityError),
}

impl From<rusqlite::Error> for TxError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sql(err)
    }
}

impl From<AffinityError> for TxError {
    fn from(err: AffinityError) -> Self {
        Self::Domain(err)
    }
}

impl From<serde_json::Error> for TxError {
    fn from(err: serde_json::Error) -> Self {
        Self::Domain(err.into())
    }
}

impl From<TxError> for AffinityError {
    fn from(err: TxError) -> Self {
        match err {
            TxError::Sql(e) => e.into(),
            TxError::Domain(e) => e,
        }
    }
}

pub(crate) type TxResult<T> = std::result::Result<T, TxError>;

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

// ---------------------------------------------------------------------------
// Timestamp & document helpers
// ---------------------------------------------------------------------------

/// Timestamps are stored as Unix milliseconds.
pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ms))
}

/// Drop sub-millisecond precision so in-memory values match stored ones.
pub(crate) fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Read a JSON column, mapping decode failures into a rusqlite error so
/// they can be raised from row-mapping closures.
pub(crate) fn json_column<T: DeserializeOwned>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

/// Parse a closed-set or id column through `FromStr`.
pub(crate) fn parsed_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

/// Tables holding one JSON document per user.
#[derive(Debug, Clone, Copy)]
pub(crate) enum DocumentTable {
    Relationship,
    Personality,
}

impl DocumentTable {
    fn name(self) -> &'static str {
        match self {
            Self::Relationship => "relationship_states",
            Self::Personality => "personality_adaptations",
        }
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// Handle to the SQLite database backing every component.
///
/// The connection sits behind a mutex held only for the duration of one
/// transaction; per-user ordering is enforced one level up by
/// [`crate::sync::UserLocks`].
pub struct Database {
    conn: Mutex<Connection>,
    config: PersistenceConfig,
    db_path: PathBuf,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) an SQLite database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AffinityError::StoreUnavailable`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;
        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "affinity store opened"
        );

        Ok(Self::from_parts(conn, config, db_path))
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`AffinityError::StoreUnavailable`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_parts(conn, config, PathBuf::from(":memory:")))
    }

    fn from_parts(conn: Connection, config: &PersistenceConfig, db_path: PathBuf) -> Self {
        Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            db_path,
            counters: Arc::new(Counters::new()),
        }
    }

    /// Counters shared by every component using this store.
    #[must_use]
    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Whether document checksums are written and verified.
    pub(crate) fn checksums(&self) -> bool {
        self.config.checksum_enabled
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Run `f` inside an immediate (write-locking) transaction. The
    /// transaction commits only if `f` succeeds; any error rolls it back.
    pub(crate) fn write<T>(
        &self,
        operation: &'static str,
        mut f: impl FnMut(&Transaction<'_>) -> TxResult<T>,
    ) -> Result<T> {
        self.retrying(operation, || {
            let mut conn = self.conn.lock();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }

    /// Run a read-only closure against the connection.
    pub(crate) fn read<T>(
        &self,
        operation: &'static str,
        mut f: impl FnMut(&Connection) -> TxResult<T>,
    ) -> Result<T> {
        self.retrying(operation, || {
            let conn = self.conn.lock();
            f(&conn)
        })
    }

    fn retrying<T>(&self, operation: &'static str, mut attempt: impl FnMut() -> TxResult<T>) -> Result<T> {
        let mut tries = 0;
        loop {
            match attempt() {
                Ok(out) => return Ok(out),
                Err(TxError::Sql(err)) if is_transient(&err) && tries < self.config.max_retries => {
                    tries += 1;
                    Counters::bump(&self.counters.store_retries);
                    let base = self.config.retry_backoff_ms * u64::from(tries);
                    let jitter = rand::thread_rng().gen_range(0..=self.config.retry_backoff_ms);
                    warn!(operation, attempt = tries, error = %err, "transient store failure, retrying");
                    std::thread::sleep(Duration::from_millis(base + jitter));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    // ------------------------------------------------------------------
    // Per-user documents
    // ------------------------------------------------------------------

    /// Upsert a per-user JSON document.
    pub(crate) fn save_document<T: Serialize>(
        &self,
        conn: &Connection,
        table: DocumentTable,
        user_id: &UserId,
        value: &T,
    ) -> TxResult<()> {
        let json = serde_json::to_vec(value)?;
        let checksum = self.checksums().then(|| crc32_hex(&json));
        let sql = format!(
            "INSERT INTO {} (user_id, data, updated_at, checksum)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at,
                checksum = excluded.checksum",
            table.name()
        );
        conn.execute(&sql, params![user_id.to_string(), json, Utc::now().to_rfc3339(), checksum])?;
        debug!(user = %user_id, table = table.name(), bytes = json.len(), "saved document");
        Ok(())
    }

    /// Load a per-user JSON document, or `None` if the user has no row.
    ///
    /// A checksum mismatch is logged but the data is still returned.
    pub(crate) fn load_document<T: DeserializeOwned>(
        &self,
        conn: &Connection,
        table: DocumentTable,
        user_id: &UserId,
    ) -> TxResult<Option<T>> {
        let sql = format!("SELECT data, checksum FROM {} WHERE user_id = ?1", table.name());
        let row: Option<(Vec<u8>, Option<String>)> = conn
            .prepare_cached(&sql)?
            .query_row(params![user_id.to_string()], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;

        let Some((data, stored_checksum)) = row else {
            return Ok(None);
        };

        if self.checksums() {
            if let Some(expected) = stored_checksum {
                let actual = crc32_hex(&data);
                if expected != actual {
                    warn!(
                        user = %user_id,
                        table = table.name(),
                        expected = %expected,
                        actual = %actual,
                        "checksum mismatch, possible corruption"
                    );
                }
            }
        }

        Ok(Some(serde_json::from_slice(&data)?))
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Copy the database to `dest_path` using SQLite's online-backup API.
    ///
    /// # Errors
    ///
    /// Returns [`AffinityError::StoreUnavailable`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        {
            let conn = self.conn.lock();
            let backup = rusqlite::backup::Backup::new(&conn, &mut dest)?;
            backup.run_to_completion(256, Duration::from_millis(50), None)?;
        }
        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "database backup completed"
        );
        Ok(())
    }

    /// Run `PRAGMA integrity_check`. `Ok(false)` means corruption.
    ///
    /// # Errors
    ///
    /// Returns [`AffinityError::StoreUnavailable`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        self.read("integrity_check", |conn| {
            let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
            Ok(result == "ok")
        })
    }

    /// Path to the database file (or `:memory:`).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[cfg(test)]
    pub(crate) fn raw(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}
