//! Core type definitions shared by every component.
//!
//! Identity newtypes, the closed vocabularies (interaction types, emotions,
//! intensities) and the schema-less document type used for free-form
//! mappings.

use std::fmt;
use std::str::FromStr;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AffinityError;

/// Free-form key/value document (`context`, `milestone_data`, …).
///
/// Stored as serialized JSON so new keys never need a migration.
pub type Document = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = AffinityError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| AffinityError::Serialization(format!("invalid id {s:?}: {e}")))
            }
        }
    };
}

uuid_id!(
    /// Identity every piece of relational state is owned by.
    UserId
);
uuid_id!(
    /// Unique identifier for an emotional memory.
    MemoryId
);
uuid_id!(
    /// Unique identifier for a recorded contradiction.
    ContradictionId
);

// ---------------------------------------------------------------------------
// Closed vocabularies
// ---------------------------------------------------------------------------

/// Generates `as_str`, `ALL`, `Display` and `FromStr` for a unit-only enum
/// with snake_case wire names.
macro_rules! closed_set {
    ($name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $name {
            /// Every member of the set, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Stable snake_case name used in storage.
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::error::AffinityError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    other => Err($crate::error::AffinityError::InvalidArgument(format!(
                        concat!("unknown ", stringify!($name), ": {:?}"),
                        other
                    ))),
                }
            }
        }
    };
}

pub(crate) use closed_set;

/// Kind of interaction a memory records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    /// Opening of a conversation.
    Greeting,
    /// The user asked for help.
    HelpRequest,
    /// The user shared something personal.
    PersonalShare,
    /// A relationship milestone (anniversary, first confidence, …).
    Milestone,
    /// The user expressed thanks.
    Gratitude,
    /// Feedback about the agent.
    Feedback,
    /// Disagreement or friction.
    Conflict,
    /// Apology from either side.
    Apology,
    /// A plain question.
    Question,
    /// Small talk.
    Casual,
    /// Closing of a conversation.
    Farewell,
    /// Pseudo-interaction written by a manual status override.
    StatusOverride,
}

closed_set!(InteractionType {
    Greeting => "greeting",
    HelpRequest => "help_request",
    PersonalShare => "personal_share",
    Milestone => "milestone",
    Gratitude => "gratitude",
    Feedback => "feedback",
    Conflict => "conflict",
    Apology => "apology",
    Question => "question",
    Casual => "casual",
    Farewell => "farewell",
    StatusOverride => "status_override",
});

/// Emotion labels supplied by the upstream classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    /// Happiness, delight.
    Joy,
    /// Sorrow, disappointment.
    Sadness,
    /// Irritation, rage.
    Anger,
    /// Anxiety, worry.
    Fear,
    /// Astonishment.
    Surprise,
    /// Aversion.
    Disgust,
    /// Confidence in the other party.
    Trust,
    /// Looking forward to something.
    Anticipation,
    /// Affection.
    Love,
    /// Thankfulness.
    Gratitude,
    /// Interest, inquisitiveness.
    Curiosity,
    /// Blocked-goal annoyance.
    Frustration,
    /// No discernible emotion.
    #[default]
    Neutral,
}

closed_set!(Emotion {
    Joy => "joy",
    Sadness => "sadness",
    Anger => "anger",
    Fear => "fear",
    Surprise => "surprise",
    Disgust => "disgust",
    Trust => "trust",
    Anticipation => "anticipation",
    Love => "love",
    Gratitude => "gratitude",
    Curiosity => "curiosity",
    Frustration => "frustration",
    Neutral => "neutral",
});

/// Ordered intensity scale of an emotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    /// Barely present.
    VeryLow,
    /// Mild.
    Low,
    /// Noticeable.
    Medium,
    /// Strong.
    High,
    /// Overwhelming.
    VeryHigh,
}

closed_set!(Intensity {
    VeryLow => "very_low",
    Low => "low",
    Medium => "medium",
    High => "high",
    VeryHigh => "very_high",
});

impl Intensity {
    /// Numeric weight in (0, 1], used for weighting emotions and deriving
    /// default importance.
    #[must_use]
    pub fn weight(self) -> f64 {
        match self {
            Self::VeryLow => 0.1,
            Self::Low => 0.3,
            Self::Medium => 0.5,
            Self::High => 0.75,
            Self::VeryHigh => 1.0,
        }
    }
}

/// Sign of an interaction as judged by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    /// Counts toward `positive_interactions`.
    Positive,
    /// Counts toward neither counter.
    Neutral,
    /// Counts toward `negative_interactions`.
    Negative,
}

impl Sentiment {
    /// -1, 0 or +1.
    #[must_use]
    pub fn sign(self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::Neutral => 0.0,
            Self::Negative => -1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Totally ordered effective-importance value used to rank memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RankScore(pub OrderedFloat<f64>);

impl RankScore {
    /// Wrap a raw score.
    #[must_use]
    pub fn new(score: f64) -> Self {
        Self(OrderedFloat(score))
    }

    /// Get the raw score value.
    #[must_use]
    pub fn value(self) -> f64 {
        self.0.into_inner()
    }
}
