//! Personality Adaptation Store — a versioned per-user settings vector.
//!
//! The store makes no decisions. An external personalization policy
//! submits partial updates with a reason; only the supplied dimensions
//! are merged. `version` and `last_significant_change` move only when
//! some dimension changes by more than the configured threshold, so tiny
//! nudges never look like churn. Every update lands in
//! `personality_history` for audit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::config::PersonalityConfig;
use crate::error::{AffinityError, Result};
use crate::store::{from_millis, json_column, to_millis, truncate_millis, Database, DocumentTable};
use crate::sync::UserLocks;
use crate::telemetry::Counters;
use crate::types::{closed_set, UserId};

// ---------------------------------------------------------------------------
// Presentation enums
// ---------------------------------------------------------------------------

/// Preferred reply length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageLength {
    /// A line or two.
    Short,
    /// A short paragraph.
    #[default]
    Medium,
    /// Several paragraphs.
    Long,
}

closed_set!(MessageLength {
    Short => "short",
    Medium => "medium",
    Long => "long",
});

/// Preferred vocabulary and reasoning depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    /// Plain language.
    Simple,
    /// Everyday detail.
    #[default]
    Moderate,
    /// Technical depth.
    Advanced,
}

closed_set!(ComplexityLevel {
    Simple => "simple",
    Moderate => "moderate",
    Advanced => "advanced",
});

// ---------------------------------------------------------------------------
// Adaptation vector
// ---------------------------------------------------------------------------

/// Current adaptation for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalityAdaptation {
    /// Owner.
    pub user_id: UserId,
    /// [0, 1].
    pub warmth: f64,
    /// [0, 1].
    pub formality: f64,
    /// [0, 1].
    pub humor: f64,
    /// [0, 1].
    pub directness: f64,
    /// [0, 1].
    pub assertiveness: f64,
    /// [0, 1].
    pub curiosity: f64,
    /// [0, 1].
    pub emotional_expressiveness: f64,
    /// Preferred reply length.
    pub message_length_preference: MessageLength,
    /// Preferred depth.
    pub complexity_level: ComplexityLevel,
    /// [0, 1].
    pub emoji_usage: f64,
    /// Seconds to wait before replying, ≥ 0.
    pub response_delay: f64,
    /// Topic → affinity in [0, 1].
    pub topic_preferences: BTreeMap<String, f64>,
    /// Topics to avoid.
    pub taboo_topics: BTreeSet<String>,
    /// How often to bring up past memories, [0, 1].
    pub memory_reference_frequency: f64,
    /// Reason given for the latest update.
    pub adaptation_reason: String,
    /// How much consumers should trust this vector, [0, 1].
    pub confidence_score: f64,
    /// Bumped on every significant change.
    pub version: u64,
    /// Time of the latest significant change.
    pub last_significant_change: Option<DateTime<Utc>>,
    /// Time of the latest update of any size.
    pub updated_at: Option<DateTime<Utc>>,
}

impl PersonalityAdaptation {
    /// The neutral vector: every dimension 0.5, confidence 0.
    #[must_use]
    pub fn neutral(user_id: UserId) -> Self {
        Self {
            user_id,
            warmth: 0.5,
            formality: 0.5,
            humor: 0.5,
            directness: 0.5,
            assertiveness: 0.5,
            curiosity: 0.5,
            emotional_expressiveness: 0.5,
            message_length_preference: MessageLength::default(),
            complexity_level: ComplexityLevel::default(),
            emoji_usage: 0.5,
            response_delay: 0.0,
            topic_preferences: BTreeMap::new(),
            taboo_topics: BTreeSet::new(),
            memory_reference_frequency: 0.5,
            adaptation_reason: String::new(),
            confidence_score: 0.0,
            version: 0,
            last_significant_change: None,
            updated_at: None,
        }
    }
}

/// Partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationPatch {
    /// New warmth.
    pub warmth: Option<f64>,
    /// New formality.
    pub formality: Option<f64>,
    /// New humor.
    pub humor: Option<f64>,
    /// New directness.
    pub directness: Option<f64>,
    /// New assertiveness.
    pub assertiveness: Option<f64>,
    /// New curiosity.
    pub curiosity: Option<f64>,
    /// New emotional expressiveness.
    pub emotional_expressiveness: Option<f64>,
    /// New reply length.
    pub message_length_preference: Option<MessageLength>,
    /// New depth.
    pub complexity_level: Option<ComplexityLevel>,
    /// New emoji usage.
    pub emoji_usage: Option<f64>,
    /// New response delay.
    pub response_delay: Option<f64>,
    /// Entries merged key-wise into `topic_preferences`.
    pub topic_preferences: BTreeMap<String, f64>,
    /// Replacement taboo set.
    pub taboo_topics: Option<BTreeSet<String>>,
    /// New memory reference frequency.
    pub memory_reference_frequency: Option<f64>,
    /// Confidence of the evidence behind this update, [0, 1].
    pub evidence_confidence: Option<f64>,
}

impl AdaptationPatch {
    /// An empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set warmth.
    #[must_use]
    pub fn warmth(mut self, v: f64) -> Self {
        self.warmth = Some(v);
        self
    }

    /// Set formality.
    #[must_use]
    pub fn formality(mut self, v: f64) -> Self {
        self.formality = Some(v);
        self
    }

    /// Set humor.
    #[must_use]
    pub fn humor(mut self, v: f64) -> Self {
        self.humor = Some(v);
        self
    }

    /// Set directness.
    #[must_use]
    pub fn directness(mut self, v: f64) -> Self {
        self.directness = Some(v);
        self
    }

    /// Set assertiveness.
    #[must_use]
    pub fn assertiveness(mut self, v: f64) -> Self {
        self.assertiveness = Some(v);
        self
    }

    /// Set curiosity.
    #[must_use]
    pub fn curiosity(mut self, v: f64) -> Self {
        self.curiosity = Some(v);
        self
    }

    /// Set emotional expressiveness.
    #[must_use]
    pub fn emotional_expressiveness(mut self, v: f64) -> Self {
        self.emotional_expressiveness = Some(v);
        self
    }

    /// Set reply length.
    #[must_use]
    pub fn message_length(mut self, v: MessageLength) -> Self {
        self.message_length_preference = Some(v);
        self
    }

    /// Set depth.
    #[must_use]
    pub fn complexity(mut self, v: ComplexityLevel) -> Self {
        self.complexity_level = Some(v);
        self
    }

    /// Set emoji usage.
    #[must_use]
    pub fn emoji_usage(mut self, v: f64) -> Self {
        self.emoji_usage = Some(v);
        self
    }

    /// Set response delay in seconds.
    #[must_use]
    pub fn response_delay(mut self, v: f64) -> Self {
        self.response_delay = Some(v);
        self
    }

    /// Merge one topic preference.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>, v: f64) -> Self {
        self.topic_preferences.insert(topic.into(), v);
        self
    }

    /// Replace the taboo set.
    #[must_use]
    pub fn taboo<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.taboo_topics = Some(topics.into_iter().map(Into::into).collect());
        self
    }

    /// Set memory reference frequency.
    #[must_use]
    pub fn memory_reference_frequency(mut self, v: f64) -> Self {
        self.memory_reference_frequency = Some(v);
        self
    }

    /// Attach the evidence confidence.
    #[must_use]
    pub fn evidence(mut self, v: f64) -> Self {
        self.evidence_confidence = Some(v);
        self
    }
}

// ---------------------------------------------------------------------------
// Confidence policy
// ---------------------------------------------------------------------------

/// Combines the stored confidence with the evidence behind an update.
pub trait ConfidencePolicy: Send + Sync + std::fmt::Debug {
    /// New confidence in [0, 1].
    fn combine(&self, previous: f64, evidence: f64) -> f64;
}

/// `previous·(1 − w) + evidence·w`.
#[derive(Debug, Clone, Copy)]
pub struct WeightedAverageConfidence {
    /// Weight of new evidence.
    pub weight: f64,
}

impl ConfidencePolicy for WeightedAverageConfidence {
    fn combine(&self, previous: f64, evidence: f64) -> f64 {
        let w = self.weight.clamp(0.0, 1.0);
        (previous * (1.0 - w) + evidence * w).clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// What a merge changed.
#[derive(Debug, Default)]
struct Changes {
    names: Vec<String>,
    significant: bool,
}

impl Changes {
    fn unit(&mut self, name: &str, current: &mut f64, proposed: Option<f64>, threshold: f64) -> Result<()> {
        let Some(value) = proposed else { return Ok(()) };
        check_unit(name, value)?;
        self.number(name, current, value, threshold);
        Ok(())
    }

    fn number(&mut self, name: &str, current: &mut f64, value: f64, threshold: f64) {
        let delta = (value - *current).abs();
        if delta > 0.0 {
            self.names.push(name.to_string());
            self.significant |= delta > threshold;
            *current = value;
        }
    }

    fn discrete<T: PartialEq>(&mut self, name: &str, current: &mut T, proposed: Option<T>) {
        if let Some(value) = proposed {
            if *current != value {
                self.names.push(name.to_string());
                self.significant = true;
                *current = value;
            }
        }
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AffinityError::InvalidArgument(format!("{name} must be within [0, 1], got {value}")))
    }
}

fn merge(target: &mut PersonalityAdaptation, patch: AdaptationPatch, threshold: f64) -> Result<Changes> {
    let mut changes = Changes::default();
    changes.unit("warmth", &mut target.warmth, patch.warmth, threshold)?;
    changes.unit("formality", &mut target.formality, patch.formality, threshold)?;
    changes.unit("humor", &mut target.humor, patch.humor, threshold)?;
    changes.unit("directness", &mut target.directness, patch.directness, threshold)?;
    changes.unit("assertiveness", &mut target.assertiveness, patch.assertiveness, threshold)?;
    changes.unit("curiosity", &mut target.curiosity, patch.curiosity, threshold)?;
    changes.unit(
        "emotional_expressiveness",
        &mut target.emotional_expressiveness,
        patch.emotional_expressiveness,
        threshold,
    )?;
    changes.unit("emoji_usage", &mut target.emoji_usage, patch.emoji_usage, threshold)?;
    changes.unit(
        "memory_reference_frequency",
        &mut target.memory_reference_frequency,
        patch.memory_reference_frequency,
        threshold,
    )?;

    if let Some(delay) = patch.response_delay {
        if !delay.is_finite() || delay < 0.0 {
            return Err(AffinityError::InvalidArgument(format!(
                "response_delay must be a non-negative number, got {delay}"
            )));
        }
        changes.number("response_delay", &mut target.response_delay, delay, threshold);
    }

    changes.discrete(
        "message_length_preference",
        &mut target.message_length_preference,
        patch.message_length_preference,
    );
    changes.discrete("complexity_level", &mut target.complexity_level, patch.complexity_level);

    for (topic, value) in patch.topic_preferences {
        let topic = topic.trim().to_string();
        if topic.is_empty() {
            return Err(AffinityError::InvalidArgument("topic name must not be empty".into()));
        }
        check_unit("topic preference", value)?;
        let name = format!("topic_preferences.{topic}");
        if let Some(entry) = target.topic_preferences.get_mut(&topic) {
            changes.number(&name, entry, value, threshold);
        } else {
            target.topic_preferences.insert(topic, value);
            changes.names.push(name);
            changes.significant = true;
        }
    }

    let taboo = patch.taboo_topics.map(|set| {
        set.into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect::<BTreeSet<_>>()
    });
    changes.discrete("taboo_topics", &mut target.taboo_topics, taboo);

    Ok(changes)
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// One audit-trail entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptationRecord {
    /// Version after the update.
    pub version: u64,
    /// Reason supplied by the caller.
    pub reason: String,
    /// Names of the dimensions that moved.
    pub changed: Vec<String>,
    /// Whether the update crossed the significance threshold.
    pub significant: bool,
    /// When it was applied.
    pub recorded_at: DateTime<Utc>,
}

/// The personality adaptation store.
#[derive(Debug)]
pub struct PersonalityStore {
    db: Arc<Database>,
    locks: Arc<UserLocks>,
    clock: SharedClock,
    config: PersonalityConfig,
    policy: Arc<dyn ConfidencePolicy>,
}

impl PersonalityStore {
    /// Create a store using [`WeightedAverageConfidence`].
    #[must_use]
    pub fn new(db: Arc<Database>, locks: Arc<UserLocks>, clock: SharedClock, config: &PersonalityConfig) -> Self {
        Self {
            db,
            locks,
            clock,
            config: config.clone(),
            policy: Arc::new(WeightedAverageConfidence {
                weight: config.confidence_weight,
            }),
        }
    }

    /// Replace the default confidence policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn ConfidencePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Current adaptation, or the neutral vector if none was ever stored.
    ///
    /// # Errors
    /// `StoreUnavailable` if the store fails.
    pub fn get(&self, user_id: UserId) -> Result<PersonalityAdaptation> {
        let stored: Option<PersonalityAdaptation> = self.db.read("personality.get", |conn| {
            self.db.load_document(conn, DocumentTable::Personality, &user_id)
        })?;
        Ok(stored.unwrap_or_else(|| PersonalityAdaptation::neutral(user_id)))
    }

    /// Merge `patch` using the default confidence policy.
    ///
    /// # Errors
    /// `InvalidArgument` for an empty reason or out-of-range values.
    pub fn update(&self, user_id: UserId, patch: AdaptationPatch, reason: &str) -> Result<PersonalityAdaptation> {
        let policy = Arc::clone(&self.policy);
        self.update_with_policy(user_id, patch, reason, policy.as_ref())
    }

    /// Merge `patch`, recomputing confidence with `policy`.
    ///
    /// # Errors
    /// `InvalidArgument` for an empty reason or out-of-range values.
    pub fn update_with_policy(
        &self,
        user_id: UserId,
        patch: AdaptationPatch,
        reason: &str,
        policy: &dyn ConfidencePolicy,
    ) -> Result<PersonalityAdaptation> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AffinityError::InvalidArgument("adaptation reason must not be empty".into()));
        }
        let evidence = patch.evidence_confidence.unwrap_or(self.config.default_evidence);
        check_unit("evidence_confidence", evidence)?;
        let now = truncate_millis(self.clock.now());
        let threshold = self.config.significant_change_threshold;

        let (adaptation, changed, significant) = self.locks.with_user(user_id, || {
            self.db.write("personality.update", |tx| {
                let mut current: PersonalityAdaptation = self
                    .db
                    .load_document(tx, DocumentTable::Personality, &user_id)?
                    .unwrap_or_else(|| PersonalityAdaptation::neutral(user_id));

                let changes = merge(&mut current, patch.clone(), threshold)?;
                current.confidence_score = policy.combine(current.confidence_score, evidence).clamp(0.0, 1.0);
                current.adaptation_reason = reason.to_string();
                current.updated_at = Some(now);
                if changes.significant {
                    current.version += 1;
                    current.last_significant_change = Some(now);
                }

                self.db.save_document(tx, DocumentTable::Personality, &user_id, &current)?;
                tx.execute(
                    "INSERT INTO personality_history (user_id, version, reason, changed, significant, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        user_id.to_string(),
                        current.version,
                        reason,
                        serde_json::to_string(&changes.names)?,
                        changes.significant,
                        to_millis(now),
                    ],
                )?;
                Ok((current, changes.names, changes.significant))
            })
        })?;

        Counters::bump(&self.db.counters().adaptation_updates);
        if significant {
            info!(user = %user_id, version = adaptation.version, changed = ?changed, reason, "personality adapted");
        } else {
            debug!(user = %user_id, changed = ?changed, reason, "personality nudged");
        }
        Ok(adaptation)
    }

    /// Audit trail, newest first.
    ///
    /// # Errors
    /// `InvalidArgument` for a zero limit.
    pub fn history(&self, user_id: UserId, limit: usize) -> Result<Vec<AdaptationRecord>> {
        if limit == 0 {
            return Err(AffinityError::InvalidArgument("limit must be at least 1".into()));
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.db.read("personality.history", |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT version, reason, changed, significant, recorded_at
                 FROM personality_history WHERE user_id = ?1
                 ORDER BY seq DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id.to_string(), limit], |row| {
                Ok(AdaptationRecord {
                    version: row.get(0)?,
                    reason: row.get(1)?,
                    changed: json_column(row, 2)?,
                    significant: row.get(3)?,
                    recorded_at: from_millis(row.get(4)?)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::PersistenceConfig;

    fn store() -> PersonalityStore {
        let db = Arc::new(Database::open_in_memory(&PersistenceConfig::default()).expect("open"));
        PersonalityStore::new(
            db,
            Arc::new(UserLocks::new()),
            Arc::new(ManualClock::starting_now()),
            &PersonalityConfig::default(),
        )
    }

    #[test]
    fn default_is_neutral() {
        let p = store().get(UserId::new()).expect("get");
        assert!((p.warmth - 0.5).abs() < f64::EPSILON);
        assert!((p.emotional_expressiveness - 0.5).abs() < f64::EPSILON);
        assert!(p.confidence_score.abs() < f64::EPSILON);
        assert_eq!(p.version, 0);
    }

    #[test]
    fn partial_update_leaves_other_dimensions() {
        let store = store();
        let user = UserId::new();
        let p = store
            .update(user, AdaptationPatch::new().humor(0.9).topic("chess", 0.8), "laughs at puns")
            .expect("update");
        assert!((p.humor - 0.9).abs() < f64::EPSILON);
        assert!((p.formality - 0.5).abs() < f64::EPSILON);
        assert_eq!(p.version, 1);
        assert!(p.last_significant_change.is_some());

        let p = store
            .update(user, AdaptationPatch::new().topic("jazz", 0.6), "mentioned a concert")
            .expect("update");
        assert_eq!(p.topic_preferences.len(), 2, "topic preferences merge key-wise");
        assert!((p.humor - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn small_nudge_is_not_significant() {
        let store = store();
        let user = UserId::new();
        let first = store.update(user, AdaptationPatch::new().warmth(0.7), "warm reply").expect("update");
        let nudged = store.update(user, AdaptationPatch::new().warmth(0.72), "slightly warmer").expect("update");
        assert_eq!(nudged.version, first.version);
        assert_eq!(nudged.last_significant_change, first.last_significant_change);
        assert!((nudged.warmth - 0.72).abs() < f64::EPSILON);
        assert_eq!(nudged.adaptation_reason, "slightly warmer");
    }

    #[test]
    fn confidence_uses_weighted_average() {
        let store = store();
        let user = UserId::new();
        let p = store
            .update(user, AdaptationPatch::new().directness(0.2).evidence(1.0), "asked for blunt answers")
            .expect("update");
        assert!((p.confidence_score - 0.2).abs() < 1e-12);
        let p = store
            .update(user, AdaptationPatch::new().evidence(1.0), "confirmed")
            .expect("update");
        assert!((p.confidence_score - 0.36).abs() < 1e-12);
    }

    #[derive(Debug)]
    struct Trusting;

    impl ConfidencePolicy for Trusting {
        fn combine(&self, _previous: f64, evidence: f64) -> f64 {
            evidence
        }
    }

    #[test]
    fn caller_supplied_policy() {
        let store = store();
        let p = store
            .update_with_policy(UserId::new(), AdaptationPatch::new().evidence(0.9), "explicit survey", &Trusting)
            .expect("update");
        assert!((p.confidence_score - 0.9).abs() < 1e-12);
    }

    #[test]
    fn invalid_updates_are_rejected_without_side_effects() {
        let store = store();
        let user = UserId::new();
        assert!(store.update(user, AdaptationPatch::new().warmth(0.6), " ").is_err());
        assert!(store.update(user, AdaptationPatch::new().warmth(1.6), "too warm").is_err());
        assert!(store.update(user, AdaptationPatch::new().response_delay(-2.0), "time travel").is_err());
        assert!(store.update(user, AdaptationPatch::new().evidence(2.0), "certain").is_err());
        assert!(store.history(user, 10).expect("history").is_empty());
        assert!((store.get(user).expect("get").warmth - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn history_is_newest_first() {
        let store = store();
        let user = UserId::new();
        store
            .update(user, AdaptationPatch::new().message_length(MessageLength::Short), "terse replies")
            .expect("update");
        store
            .update(user, AdaptationPatch::new().taboo(["politics"]), "asked to avoid politics")
            .expect("update");
        let history = store.history(user, 10).expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].reason, "asked to avoid politics");
        assert_eq!(history[0].changed, vec!["taboo_topics".to_string()]);
        assert_eq!(history[1].version, 1);
        assert_eq!(store.history(user, 1).expect("history").len(), 1);
    }
}
