//! The emotional memory record and its creation request.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MemoryConfig;
use crate::decay::{self, DecayCurve};
use crate::error::{AffinityError, Result};
use crate::types::{Document, Emotion, Intensity, InteractionType, MemoryId, UserId};

/// One significant interaction with its emotional metadata and retrieval
/// scoring state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionalMemory {
    /// Unique identifier, immutable.
    pub id: MemoryId,
    /// Owning user.
    pub user_id: UserId,
    /// What kind of interaction this was.
    pub interaction_type: InteractionType,
    /// When it happened, immutable.
    pub occurred_at: DateTime<Utc>,
    /// Short description.
    pub summary: String,
    /// Full record. Restricted handling applies when `is_sensitive`.
    pub content: String,
    /// Main emotion.
    pub primary_emotion: Emotion,
    /// Optional second emotion.
    pub secondary_emotion: Option<Emotion>,
    /// How strongly the emotion was felt.
    pub intensity: Intensity,
    /// Arbitrary auxiliary data.
    pub context: Document,
    /// Opaque achievement references, resolved by external collaborators.
    pub related_achievement_ids: BTreeSet<String>,
    /// Opaque narrative references, resolved by external collaborators.
    pub related_narrative_keys: BTreeSet<String>,
    /// Base retrievability, never changed by recall.
    pub importance_score: f64,
    /// Speed of fade, per day.
    pub decay_rate: f64,
    /// Last time a retrieval returned this memory (starts at `occurred_at`).
    pub last_recalled_at: DateTime<Utc>,
    /// How many retrievals returned this memory.
    pub recall_count: u32,
    /// Contextual filter labels.
    pub tags: BTreeSet<String>,
    /// Consumers must handle `content` with care.
    pub is_sensitive: bool,
    /// Tombstone. Forgotten memories are never retrieved.
    pub is_forgotten: bool,
    /// Weak back-reference forming a memory chain.
    pub parent_memory_id: Option<MemoryId>,
}

impl EmotionalMemory {
    /// Importance attenuated by the time since last recall.
    #[must_use]
    pub fn effective_importance(&self, now: DateTime<Utc>, curve: &dyn DecayCurve) -> f64 {
        decay::effective_importance(self, now, curve)
    }

    /// Whether `emotion` is this memory's primary or secondary emotion.
    #[must_use]
    pub fn has_emotion(&self, emotion: Emotion) -> bool {
        self.primary_emotion == emotion || self.secondary_emotion == Some(emotion)
    }
}

/// Request to store a memory. Optional fields fall back to policy defaults
/// from [`MemoryConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMemory {
    /// What kind of interaction this was.
    pub interaction_type: InteractionType,
    /// Short description. Must not be blank.
    pub summary: String,
    /// Full record.
    pub content: String,
    /// Main emotion.
    pub primary_emotion: Emotion,
    /// How strongly the emotion was felt.
    pub intensity: Intensity,
    /// Optional second emotion.
    pub secondary_emotion: Option<Emotion>,
    /// Auxiliary data.
    pub context: Option<Document>,
    /// Contextual filter labels.
    pub tags: BTreeSet<String>,
    /// Explicit importance; defaults from policy.
    pub importance_score: Option<f64>,
    /// Explicit decay rate; defaults from policy.
    pub decay_rate: Option<f64>,
    /// Sensitivity flag.
    pub is_sensitive: bool,
    /// Previous memory in a chain.
    pub parent_memory_id: Option<MemoryId>,
    /// Achievement references.
    pub related_achievement_ids: BTreeSet<String>,
    /// Narrative references.
    pub related_narrative_keys: BTreeSet<String>,
    /// Event time; defaults to now.
    pub occurred_at: Option<DateTime<Utc>>,
}

impl NewMemory {
    /// A request with only the required fields set.
    pub fn new(
        interaction_type: InteractionType,
        summary: impl Into<String>,
        content: impl Into<String>,
        primary_emotion: Emotion,
        intensity: Intensity,
    ) -> Self {
        Self {
            interaction_type,
            summary: summary.into(),
            content: content.into(),
            primary_emotion,
            intensity,
            secondary_emotion: None,
            context: None,
            tags: BTreeSet::new(),
            importance_score: None,
            decay_rate: None,
            is_sensitive: false,
            parent_memory_id: None,
            related_achievement_ids: BTreeSet::new(),
            related_narrative_keys: BTreeSet::new(),
            occurred_at: None,
        }
    }

    /// Set the secondary emotion.
    #[must_use]
    pub fn with_secondary_emotion(mut self, emotion: Emotion) -> Self {
        self.secondary_emotion = Some(emotion);
        self
    }

    /// Attach auxiliary context.
    #[must_use]
    pub fn with_context(mut self, context: Document) -> Self {
        self.context = Some(context);
        self
    }

    /// Add tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Set an explicit importance score.
    #[must_use]
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance_score = Some(importance);
        self
    }

    /// Set an explicit decay rate.
    #[must_use]
    pub fn with_decay_rate(mut self, decay_rate: f64) -> Self {
        self.decay_rate = Some(decay_rate);
        self
    }

    /// Mark the content as sensitive.
    #[must_use]
    pub fn sensitive(mut self) -> Self {
        self.is_sensitive = true;
        self
    }

    /// Chain this memory to a previous one.
    #[must_use]
    pub fn with_parent(mut self, parent: MemoryId) -> Self {
        self.parent_memory_id = Some(parent);
        self
    }

    /// Reference an achievement.
    #[must_use]
    pub fn with_achievement(mut self, id: impl Into<String>) -> Self {
        self.related_achievement_ids.insert(id.into());
        self
    }

    /// Reference a narrative.
    #[must_use]
    pub fn with_narrative_key(mut self, key: impl Into<String>) -> Self {
        self.related_narrative_keys.insert(key.into());
        self
    }

    /// Backdate (or postdate) the event.
    #[must_use]
    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    /// Validate and resolve defaults into a full record.
    ///
    /// # Errors
    /// [`AffinityError::InvalidArgument`] for a blank summary or an
    /// importance/decay rate outside the configured bounds.
    pub(crate) fn into_memory(
        self,
        user_id: UserId,
        now: DateTime<Utc>,
        config: &MemoryConfig,
    ) -> Result<EmotionalMemory> {
        if self.summary.trim().is_empty() {
            return Err(AffinityError::InvalidArgument("summary must not be empty".into()));
        }

        let importance = self
            .importance_score
            .unwrap_or_else(|| default_importance(self.intensity, config));
        check_bounded("importance_score", importance, config.max_importance)?;

        let decay_rate = self.decay_rate.unwrap_or(config.default_decay_rate);
        check_bounded("decay_rate", decay_rate, config.max_decay_rate)?;

        let occurred_at = crate::store::truncate_millis(self.occurred_at.unwrap_or(now));
        let tags = self
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        Ok(EmotionalMemory {
            id: MemoryId::new(),
            user_id,
            interaction_type: self.interaction_type,
            occurred_at,
            summary: self.summary,
            content: self.content,
            primary_emotion: self.primary_emotion,
            secondary_emotion: self.secondary_emotion,
            intensity: self.intensity,
            context: self.context.unwrap_or_default(),
            related_achievement_ids: self.related_achievement_ids,
            related_narrative_keys: self.related_narrative_keys,
            importance_score: importance,
            decay_rate,
            last_recalled_at: occurred_at,
            recall_count: 0,
            tags,
            is_sensitive: self.is_sensitive,
            is_forgotten: false,
            parent_memory_id: self.parent_memory_id,
        })
    }
}

/// Policy default for an omitted importance score.
fn default_importance(intensity: Intensity, config: &MemoryConfig) -> f64 {
    if config.importance_from_intensity {
        intensity.weight() * config.max_importance
    } else {
        config.default_importance
    }
}

fn check_bounded(field: &str, value: f64, max: f64) -> Result<()> {
    if value.is_finite() && (0.0..=max).contains(&value) {
        Ok(())
    } else {
        Err(AffinityError::InvalidArgument(format!(
            "{field} must be within [0, {max}], got {value}"
        )))
    }
}
