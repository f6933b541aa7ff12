//! # Affinity Core Library
//!
//! Per-user relational state for a conversational agent. Every user gets:
//!
//! - **Emotional memories** — significant interactions with emotion,
//!   intensity, importance and decay. Recall reinforces retrievability.
//! - **A relationship state** — trust, familiarity, rapport and counters
//!   driving a status machine (initial → acquaintance → friendly → close
//!   → intimate, with strained/repaired on the side).
//! - **A contradiction ledger** — conflicting statements tracked until
//!   resolved. Resolutions feed back into trust and rapport.
//! - **A personality adaptation** — a versioned presentation vector
//!   tuned by an external personalization policy.
//!
//! All state lives in one SQLite database. Writes for a single user are
//! serialized through [`sync::UserLocks`]; different users never contend.
//! [`Companion`] wires everything together and [`service::AsyncCompanion`]
//! exposes it to tokio services.
//!
//! ## Performance Contract
//!
//! - Memory retrieval: < 100ms end to end, enforced per call
//!   (`DeadlineExceeded` otherwise, never a silent partial result)

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod companion;
pub mod config;
pub mod contradiction;
pub mod decay;
pub mod error;
pub mod memory;
pub mod personality;
pub mod relationship;
pub mod service;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use companion::{Companion, ForgetReport, InteractionOutcome, ResolutionOutcome};
pub use config::AffinityConfig;
pub use contradiction::{Contradiction, ContradictionLedger, NewContradiction, ResolveOutcome};
pub use error::{AffinityError, Result};
pub use memory::{EmotionalMemory, MemoryStore, NewMemory};
pub use personality::{AdaptationPatch, PersonalityAdaptation, PersonalityStore};
pub use relationship::{
    InteractionSignal, RelationshipEngine, RelationshipState, RelationshipStatus, StatusTransition,
};
pub use service::AsyncCompanion;
pub use store::Database;
pub use types::*;
