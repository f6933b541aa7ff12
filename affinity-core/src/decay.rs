//! Importance decay — how retrievability fades between recalls.
//!
//! Effective importance of a memory at time `t`:
//!
//! ```text
//!   E(t) = importance_score × R(decay_rate, t − last_recalled_at, recall_count)
//! ```
//!
//! `R` is a [`DecayCurve`]: 1.0 at zero elapsed time and non-increasing as
//! time passes. Recall moves `last_recalled_at` forward (and bumps
//! `recall_count`), which resets `E` upward without touching
//! `importance_score`.
//!
//! The rehearsal curve follows the Ebbinghaus strength model: each recall
//! stretches the time constant by `log2(1 + recall_count)`.
//!
//! Reference: Ebbinghaus, H. (1885). "Memory: A Contribution to Experimental Psychology."

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::days_between;
use crate::config::DecayCurveKind;
use crate::memory::EmotionalMemory;

/// Retention as a function of decay rate, elapsed days and rehearsal.
///
/// Implementations must return a value in `[0, 1]`, equal to 1 when
/// `elapsed_days == 0`, and non-increasing in `elapsed_days`.
pub trait DecayCurve: Send + Sync + std::fmt::Debug {
    /// Fraction of importance retained after `elapsed_days` since last recall.
    fn retention(&self, decay_rate: f64, elapsed_days: f64, recall_count: u32) -> f64;
}

/// `R = e^(-rate·days)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExponentialDecay;

impl DecayCurve for ExponentialDecay {
    fn retention(&self, decay_rate: f64, elapsed_days: f64, _recall_count: u32) -> f64 {
        (-decay_rate.max(0.0) * elapsed_days.max(0.0)).exp()
    }
}

/// `R = max(0, 1 - rate·days)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearDecay;

impl DecayCurve for LinearDecay {
    fn retention(&self, decay_rate: f64, elapsed_days: f64, _recall_count: u32) -> f64 {
        (1.0 - decay_rate.max(0.0) * elapsed_days.max(0.0)).clamp(0.0, 1.0)
    }
}

/// `R = e^(-rate·days / S)` with `S = max(1, log2(1 + recall_count))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RehearsalDecay;

impl RehearsalDecay {
    /// Rehearsal strength: frequently recalled memories fade more slowly.
    #[must_use]
    pub fn strength(recall_count: u32) -> f64 {
        (1.0 + f64::from(recall_count)).log2().max(1.0)
    }
}

impl DecayCurve for RehearsalDecay {
    fn retention(&self, decay_rate: f64, elapsed_days: f64, recall_count: u32) -> f64 {
        let strength = Self::strength(recall_count);
        (-decay_rate.max(0.0) * elapsed_days.max(0.0) / strength).exp()
    }
}

/// Instantiate the configured curve.
#[must_use]
pub fn curve_for(kind: DecayCurveKind) -> Arc<dyn DecayCurve> {
    match kind {
        DecayCurveKind::Exponential => Arc::new(ExponentialDecay),
        DecayCurveKind::Linear => Arc::new(LinearDecay),
        DecayCurveKind::Rehearsal => Arc::new(RehearsalDecay),
    }
}

/// Effective importance of `memory` at `now`.
#[must_use]
pub fn effective_importance(
    memory: &EmotionalMemory,
    now: DateTime<Utc>,
    curve: &dyn DecayCurve,
) -> f64 {
    let elapsed = days_between(memory.last_recalled_at, now);
    memory.importance_score * curve.retention(memory.decay_rate, elapsed, memory.recall_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curves() -> Vec<Box<dyn DecayCurve>> {
        vec![
            Box::new(ExponentialDecay),
            Box::new(LinearDecay),
            Box::new(RehearsalDecay),
        ]
    }

    #[test]
    fn immediate_retention_is_one() {
        for curve in curves() {
            assert!((curve.retention(0.3, 0.0, 0) - 1.0).abs() < 1e-12, "{curve:?}");
        }
    }

    #[test]
    fn retention_never_increases_with_time() {
        for curve in curves() {
            let mut previous = 1.0;
            for day in 0..200 {
                let r = curve.retention(0.1, f64::from(day) * 0.5, 2);
                assert!(r <= previous + 1e-12, "{curve:?} rose at day {day}");
                assert!((0.0..=1.0).contains(&r));
                previous = r;
            }
        }
    }

    #[test]
    fn exponential_hits_one_over_e_at_time_constant() {
        let r = ExponentialDecay.retention(0.1, 10.0, 0);
        assert!((r - (-1.0_f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn zero_rate_never_decays() {
        for curve in curves() {
            assert!((curve.retention(0.0, 365.0, 0) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn rehearsal_strengthens_memory() {
        let once = RehearsalDecay.retention(0.2, 10.0, 1);
        let many = RehearsalDecay.retention(0.2, 10.0, 100);
        assert!(many > once, "Frequently recalled memories should decay slower");
    }
}
