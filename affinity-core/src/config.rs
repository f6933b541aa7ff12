//! Configuration for the affinity core.
//!
//! Maps directly to `affinity.toml`. Every section and field has a default,
//! so a partial file (or none at all) is valid.

use serde::{Deserialize, Serialize};

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AffinityConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Memory store defaults and bounds.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Retrieval latency and limits.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Relationship score policy.
    #[serde(default)]
    pub relationship: RelationshipConfig,
    /// Contradiction resolution feedback.
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Personality adaptation policy.
    #[serde(default)]
    pub personality: PersonalityConfig,
    /// Persistence settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl AffinityConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `AffinityError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::AffinityError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

/// Which decay curve attenuates importance over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayCurveKind {
    /// `e^(-rate·days)`.
    #[default]
    Exponential,
    /// `max(0, 1 - rate·days)`.
    Linear,
    /// Exponential, slowed by repeated recall.
    Rehearsal,
}

/// Memory store defaults and bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Importance assigned when the caller omits one.
    #[serde(default = "default_0_5")]
    pub default_importance: f64,
    /// Decay rate (per day) assigned when the caller omits one.
    #[serde(default = "default_decay_rate")]
    pub default_decay_rate: f64,
    /// Derive the default importance from the emotion's intensity instead
    /// of using `default_importance`.
    #[serde(default = "default_true")]
    pub importance_from_intensity: bool,
    /// Upper bound for `importance_score`.
    #[serde(default = "default_1_0")]
    pub max_importance: f64,
    /// Upper bound for `decay_rate`.
    #[serde(default = "default_10_0")]
    pub max_decay_rate: f64,
    /// Curve used for effective importance.
    #[serde(default)]
    pub decay_curve: DecayCurveKind,
    /// How many recent memories feed the relationship's dominant emotion.
    #[serde(default = "default_20_usize")]
    pub dominant_emotion_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            default_importance: 0.5,
            default_decay_rate: default_decay_rate(),
            importance_from_intensity: true,
            max_importance: 1.0,
            max_decay_rate: 10.0,
            decay_curve: DecayCurveKind::default(),
            dominant_emotion_window: 20,
        }
    }
}

/// Retrieval latency and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Latency budget per retrieval in milliseconds.
    #[serde(default = "default_100")]
    pub budget_ms: u64,
    /// Largest accepted `limit`; larger requests are rejected.
    #[serde(default = "default_200_usize")]
    pub max_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            budget_ms: 100,
            max_limit: 200,
        }
    }
}

/// Relationship score policy. Steps are applied per recorded interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipConfig {
    /// Familiarity gained by any interaction.
    #[serde(default = "default_0_03")]
    pub familiarity_step: f64,
    /// Trust gained by a positive interaction.
    #[serde(default = "default_0_03")]
    pub trust_gain: f64,
    /// Trust lost by a negative interaction.
    #[serde(default = "default_0_05")]
    pub trust_loss: f64,
    /// Rapport gained by a positive interaction.
    #[serde(default = "default_0_03")]
    pub rapport_gain: f64,
    /// Rapport lost by a negative interaction.
    #[serde(default = "default_0_04")]
    pub rapport_loss: f64,
    /// Smoothing factor for the emotional-volatility average.
    #[serde(default = "default_0_2")]
    pub volatility_smoothing: f64,
    /// Smoothing factor for response-time, length and frequency averages.
    #[serde(default = "default_0_2")]
    pub average_smoothing: f64,
    /// Keep evaluating transitions until nothing fires, instead of at most
    /// one transition per event.
    #[serde(default)]
    pub cascade: bool,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        Self {
            familiarity_step: 0.03,
            trust_gain: 0.03,
            trust_loss: 0.05,
            rapport_gain: 0.03,
            rapport_loss: 0.04,
            volatility_smoothing: 0.2,
            average_smoothing: 0.2,
            cascade: false,
        }
    }
}

/// Trust/rapport adjustment applied when a contradiction is resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Added to trust on resolution (may be negative).
    #[serde(default = "default_0_02")]
    pub resolution_trust_delta: f64,
    /// Added to rapport on resolution (may be negative).
    #[serde(default = "default_0_03")]
    pub resolution_rapport_delta: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            resolution_trust_delta: 0.02,
            resolution_rapport_delta: 0.03,
        }
    }
}

/// Personality adaptation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalityConfig {
    /// A dimension must move by more than this to count as a significant
    /// change.
    #[serde(default = "default_0_05")]
    pub significant_change_threshold: f64,
    /// Weight of new evidence in the default confidence average.
    #[serde(default = "default_0_2")]
    pub confidence_weight: f64,
    /// Evidence confidence assumed when an update does not carry one.
    #[serde(default = "default_0_5")]
    pub default_evidence: f64,
}

impl Default for PersonalityConfig {
    fn default() -> Self {
        Self {
            significant_change_threshold: 0.05,
            confidence_weight: 0.2,
            default_evidence: 0.5,
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Use WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Detect document corruption via checksums.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_5000")]
    pub busy_timeout_ms: u64,
    /// Internal retries for transient store failures before surfacing
    /// `StoreUnavailable`.
    #[serde(default = "default_3")]
    pub max_retries: u32,
    /// Base backoff between retries in milliseconds (jittered).
    #[serde(default = "default_25")]
    pub retry_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            checksum_enabled: true,
            busy_timeout_ms: 5000,
            max_retries: 3,
            retry_backoff_ms: 25,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_decay_rate() -> f64 { 0.05 }
fn default_0_02() -> f64 { 0.02 }
fn default_0_03() -> f64 { 0.03 }
fn default_0_04() -> f64 { 0.04 }
fn default_0_05() -> f64 { 0.05 }
fn default_0_2() -> f64 { 0.2 }
fn default_0_5() -> f64 { 0.5 }
fn default_1_0() -> f64 { 1.0 }
fn default_10_0() -> f64 { 10.0 }
fn default_3() -> u32 { 3 }
fn default_20_usize() -> usize { 20 }
fn default_25() -> u64 { 25 }
fn default_100() -> u64 { 100 }
fn default_200_usize() -> usize { 200 }
fn default_5000() -> u64 { 5000 }
