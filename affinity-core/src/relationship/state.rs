//! The per-user relationship aggregate and the score policy that moves it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::clock::days_between;
use crate::config::RelationshipConfig;
use crate::error::{AffinityError, Result};
use crate::types::{closed_set, Document, Emotion, Sentiment, UserId};

/// Discrete stage of an evolving relationship.
///
/// Declaration order is the forward progression; `Strained` and `Repaired`
/// sit outside it and are reached by the strained check or by override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStatus {
    /// No history yet.
    #[default]
    Initial,
    /// A handful of interactions.
    Acquaintance,
    /// Some familiarity and trust.
    Friendly,
    /// High trust and rapport over many interactions.
    Close,
    /// The top of the progression. No forward edge.
    Intimate,
    /// Negative interactions outweigh positive ones.
    Strained,
    /// Recovered from `Strained` by manual override.
    Repaired,
}

closed_set!(RelationshipStatus {
    Initial => "initial",
    Acquaintance => "acquaintance",
    Friendly => "friendly",
    Close => "close",
    Intimate => "intimate",
    Strained => "strained",
    Repaired => "repaired",
});

/// Free-form preference mappings a caller may merge into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceSection {
    /// Topics and behaviours the user has ruled out.
    BoundarySettings,
    /// Channel, timing and tone preferences.
    CommunicationPreferences,
    /// Subjects the user enjoys.
    TopicInterests,
    /// Personality tweaks recorded alongside the relationship.
    PersonalityAdaptations,
    /// Vocabulary and phrasing adaptations.
    LinguisticAdaptations,
}

closed_set!(PreferenceSection {
    BoundarySettings => "boundary_settings",
    CommunicationPreferences => "communication_preferences",
    TopicInterests => "topic_interests",
    PersonalityAdaptations => "personality_adaptations",
    LinguisticAdaptations => "linguistic_adaptations",
});

/// One classified interaction as seen by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionSignal {
    /// Size of the exchange (words, characters, turns; the caller decides).
    pub length: u32,
    /// Classifier verdict.
    pub sentiment: Sentiment,
    /// How long the user took to reply, if known.
    pub response_time_seconds: Option<f64>,
    /// Milestone label when the interaction marks one.
    pub milestone: Option<String>,
}

impl InteractionSignal {
    /// A signal with no response time and no milestone.
    #[must_use]
    pub fn new(length: u32, sentiment: Sentiment) -> Self {
        Self {
            length,
            sentiment,
            response_time_seconds: None,
            milestone: None,
        }
    }

    /// Shorthand for a positive interaction.
    #[must_use]
    pub fn positive(length: u32) -> Self {
        Self::new(length, Sentiment::Positive)
    }

    /// Shorthand for a negative interaction.
    #[must_use]
    pub fn negative(length: u32) -> Self {
        Self::new(length, Sentiment::Negative)
    }

    /// Attach the observed response time.
    #[must_use]
    pub fn with_response_time(mut self, seconds: f64) -> Self {
        self.response_time_seconds = Some(seconds);
        self
    }

    /// Mark the interaction as a milestone.
    #[must_use]
    pub fn with_milestone(mut self, label: impl Into<String>) -> Self {
        self.milestone = Some(label.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(rt) = self.response_time_seconds {
            if !rt.is_finite() || rt < 0.0 {
                return Err(AffinityError::InvalidArgument(format!(
                    "response_time_seconds must be a non-negative number, got {rt}"
                )));
            }
        }
        if self.milestone.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(AffinityError::InvalidArgument("milestone label must not be empty".into()));
        }
        Ok(())
    }
}

/// Aggregate relationship record. Exactly one per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipState {
    /// Owner.
    pub user_id: UserId,
    /// Current stage.
    pub status: RelationshipStatus,
    /// When `status` last changed.
    #[serde(default)]
    pub status_changed_at: Option<DateTime<Utc>>,

    /// Trust in [0, 1].
    pub trust_level: f64,
    /// Familiarity in [0, 1].
    pub familiarity: f64,
    /// Rapport in [0, 1].
    pub rapport: f64,
    /// Average swing in sentiment between consecutive interactions, [0, 1].
    pub emotional_volatility: f64,
    /// Most prominent emotion in recent memories.
    pub dominant_emotion: Emotion,

    /// Interactions with positive sentiment.
    pub positive_interactions: u64,
    /// Interactions with negative sentiment.
    pub negative_interactions: u64,
    /// All recorded interactions.
    pub interaction_count: u64,
    /// Milestones reached.
    pub milestone_count: u64,

    /// When this record was created.
    pub relationship_started_at: DateTime<Utc>,
    /// Time of the most recent interaction.
    pub last_interaction_at: Option<DateTime<Utc>>,
    /// Longest gap between two interactions, in days.
    pub longest_absence_days: f64,

    /// Moving average of reply latency.
    pub typical_response_time_seconds: Option<f64>,
    /// Moving average of interaction length.
    pub typical_interaction_length: f64,
    /// Moving average of interactions per day.
    pub communication_frequency: f64,
    /// Sentiment of the previous interaction, for volatility.
    #[serde(default)]
    pub last_sentiment: Option<Sentiment>,

    /// Dated milestone entries.
    #[serde(default)]
    pub milestone_data: Document,
    /// Free-form boundaries.
    #[serde(default)]
    pub boundary_settings: Document,
    /// Free-form communication preferences.
    #[serde(default)]
    pub communication_preferences: Document,
    /// Free-form topic interests.
    #[serde(default)]
    pub topic_interests: Document,
    /// Free-form personality notes.
    #[serde(default)]
    pub personality_adaptations: Document,
    /// Free-form linguistic notes.
    #[serde(default)]
    pub linguistic_adaptations: Document,
}

impl RelationshipState {
    /// A fresh `initial` record.
    #[must_use]
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            status: RelationshipStatus::Initial,
            status_changed_at: None,
            trust_level: 0.0,
            familiarity: 0.0,
            rapport: 0.0,
            emotional_volatility: 0.0,
            dominant_emotion: Emotion::Neutral,
            positive_interactions: 0,
            negative_interactions: 0,
            interaction_count: 0,
            milestone_count: 0,
            relationship_started_at: now,
            last_interaction_at: None,
            longest_absence_days: 0.0,
            typical_response_time_seconds: None,
            typical_interaction_length: 0.0,
            communication_frequency: 0.0,
            last_sentiment: None,
            milestone_data: Document::new(),
            boundary_settings: Document::new(),
            communication_preferences: Document::new(),
            topic_interests: Document::new(),
            personality_adaptations: Document::new(),
            linguistic_adaptations: Document::new(),
        }
    }

    /// Fold one interaction into counters, scores and running averages.
    /// Does not touch `status`.
    pub fn apply_interaction(&mut self, signal: &InteractionSignal, now: DateTime<Utc>, policy: &RelationshipConfig) {
        let alpha = policy.average_smoothing.clamp(0.0, 1.0);

        if let Some(last) = self.last_interaction_at {
            let gap_days = days_between(last, now);
            self.longest_absence_days = self.longest_absence_days.max(gap_days);
            // Floor the gap at one minute so bursts don't produce infinite rates.
            let per_day = 1.0 / gap_days.max(1.0 / 1440.0);
            self.communication_frequency = if self.communication_frequency == 0.0 {
                per_day
            } else {
                ema(self.communication_frequency, per_day, alpha)
            };
        }

        let length = f64::from(signal.length);
        self.typical_interaction_length = if self.interaction_count == 0 {
            length
        } else {
            ema(self.typical_interaction_length, length, alpha)
        };
        if let Some(rt) = signal.response_time_seconds {
            self.typical_response_time_seconds = Some(
                self.typical_response_time_seconds
                    .map_or(rt, |avg| ema(avg, rt, alpha)),
            );
        }

        self.interaction_count += 1;
        self.familiarity = clamp_unit(self.familiarity + policy.familiarity_step);
        match signal.sentiment {
            Sentiment::Positive => {
                self.positive_interactions += 1;
                self.trust_level = clamp_unit(self.trust_level + policy.trust_gain);
                self.rapport = clamp_unit(self.rapport + policy.rapport_gain);
            }
            Sentiment::Negative => {
                self.negative_interactions += 1;
                self.trust_level = clamp_unit(self.trust_level - policy.trust_loss);
                self.rapport = clamp_unit(self.rapport - policy.rapport_loss);
            }
            Sentiment::Neutral => {}
        }

        if let Some(previous) = self.last_sentiment {
            let swing = (signal.sentiment.sign() - previous.sign()).abs() / 2.0;
            let smoothing = policy.volatility_smoothing.clamp(0.0, 1.0);
            self.emotional_volatility = clamp_unit(ema(self.emotional_volatility, swing, smoothing));
        }
        self.last_sentiment = Some(signal.sentiment);

        if let Some(label) = &signal.milestone {
            self.milestone_count += 1;
            self.milestone_data.insert(
                format!("milestone_{}", self.milestone_count),
                json!({
                    "label": label.trim(),
                    "at": now.to_rfc3339(),
                    "interaction": self.interaction_count,
                }),
            );
        }

        self.last_interaction_at = Some(now);
    }

    /// Nudge trust and rapport by the given (possibly negative) deltas.
    pub fn adjust_scores(&mut self, trust_delta: f64, rapport_delta: f64) {
        self.trust_level = clamp_unit(self.trust_level + trust_delta);
        self.rapport = clamp_unit(self.rapport + rapport_delta);
    }

    /// Merge `entries` key-wise into one preference mapping.
    pub fn merge_preferences(&mut self, section: PreferenceSection, entries: Document) {
        let target = match section {
            PreferenceSection::BoundarySettings => &mut self.boundary_settings,
            PreferenceSection::CommunicationPreferences => &mut self.communication_preferences,
            PreferenceSection::TopicInterests => &mut self.topic_interests,
            PreferenceSection::PersonalityAdaptations => &mut self.personality_adaptations,
            PreferenceSection::LinguisticAdaptations => &mut self.linguistic_adaptations,
        };
        target.extend(entries);
    }
}

fn ema(current: f64, sample: f64, alpha: f64) -> f64 {
    current + alpha * (sample - current)
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}
