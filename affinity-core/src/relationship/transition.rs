//! Status transition rules.
//!
//! | From                 | To           | Condition                                   |
//! |----------------------|--------------|---------------------------------------------|
//! | any except strained  | strained     | negative > positive ∧ count > 10            |
//! | initial              | acquaintance | count ≥ 5                                   |
//! | acquaintance         | friendly     | familiarity ≥ 0.3 ∧ trust ≥ 0.2             |
//! | friendly, repaired   | close        | trust ≥ 0.6 ∧ rapport ≥ 0.5 ∧ count ≥ 20    |
//! | close                | intimate     | trust ≥ 0.8 ∧ rapport ≥ 0.7 ∧ count ≥ 50    |
//! | strained             | repaired     | manual override only                        |
//!
//! The strained check runs first and pre-empts forward progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{RelationshipState, RelationshipStatus};
use crate::types::UserId;

/// What triggered a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionCause {
    /// An interaction was recorded.
    Interaction,
    /// A contradiction was resolved and scores were adjusted.
    ContradictionResolved,
    /// An operator forced the status.
    ManualOverride {
        /// Logged justification.
        reason: String,
    },
}

/// A status change, as published to trigger consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    /// Whose relationship changed.
    pub user_id: UserId,
    /// Previous status.
    pub from: RelationshipStatus,
    /// New status.
    pub to: RelationshipStatus,
    /// Trigger.
    pub cause: TransitionCause,
    /// When it happened.
    pub at: DateTime<Utc>,
}

/// The status the forward progression leads to from `status`, ignoring
/// guards.
#[must_use]
pub fn forward_successor(status: RelationshipStatus) -> Option<RelationshipStatus> {
    use RelationshipStatus::{Acquaintance, Close, Friendly, Initial, Intimate, Repaired, Strained};
    match status {
        Initial => Some(Acquaintance),
        Acquaintance => Some(Friendly),
        Friendly | Repaired => Some(Close),
        Close => Some(Intimate),
        Intimate | Strained => None,
    }
}

fn is_strained(state: &RelationshipState) -> bool {
    state.negative_interactions > state.positive_interactions && state.interaction_count > 10
}

fn forward_guard(state: &RelationshipState, to: RelationshipStatus) -> bool {
    match to {
        RelationshipStatus::Acquaintance => state.interaction_count >= 5,
        RelationshipStatus::Friendly => state.familiarity >= 0.3 && state.trust_level >= 0.2,
        RelationshipStatus::Close => {
            state.trust_level >= 0.6 && state.rapport >= 0.5 && state.interaction_count >= 20
        }
        RelationshipStatus::Intimate => {
            state.trust_level >= 0.8 && state.rapport >= 0.7 && state.interaction_count >= 50
        }
        _ => false,
    }
}

/// The single transition the current counters call for, if any.
#[must_use]
pub fn next_status(state: &RelationshipState) -> Option<RelationshipStatus> {
    if state.status != RelationshipStatus::Strained && is_strained(state) {
        return Some(RelationshipStatus::Strained);
    }
    forward_successor(state.status).filter(|&to| forward_guard(state, to))
}

/// Run one evaluation pass, applying transitions to `state.status`.
///
/// With `cascade` off at most one transition fires. With it on, evaluation
/// repeats until nothing fires (bounded by the number of statuses).
pub fn evaluate(state: &mut RelationshipState, cascade: bool) -> Vec<(RelationshipStatus, RelationshipStatus)> {
    let mut fired = Vec::new();
    let max_steps = if cascade { RelationshipStatus::ALL.len() } else { 1 };
    while fired.len() < max_steps {
        let Some(to) = next_status(state) else { break };
        fired.push((state.status, to));
        state.status = to;
    }
    fired
}

/// Whether an operator may force `from → to`.
///
/// Permitted: strained→repaired, anything→strained, and any status to its
/// forward successor. Self-loops are not overrides.
#[must_use]
pub fn manual_edge_permitted(from: RelationshipStatus, to: RelationshipStatus) -> bool {
    if from == to {
        return false;
    }
    matches!((from, to), (RelationshipStatus::Strained, RelationshipStatus::Repaired))
        || to == RelationshipStatus::Strained
        || forward_successor(from) == Some(to)
}
