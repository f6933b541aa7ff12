//! Async front for embedding [`Companion`] in a tokio service.
//!
//! Every call runs on the blocking pool. Retrievals are additionally
//! bounded by `tokio::time::timeout`. The store's budget check is charged
//! from the moment the call was made, not from when a worker picked it
//! up, so a retrieval that sat in a saturated pool rolls back instead of
//! recording recalls the caller already gave up on. Status transitions from every path are
//! published on a broadcast channel for trigger consumers (membership,
//! channel access and the like).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::warn;

use crate::companion::{Companion, ForgetReport, InteractionOutcome, ResolutionOutcome};
use crate::contradiction::{Contradiction, NewContradiction};
use crate::error::{AffinityError, Result};
use crate::memory::{EmotionalMemory, NewMemory, Query};
use crate::personality::{AdaptationPatch, PersonalityAdaptation};
use crate::relationship::{InteractionSignal, RelationshipState, RelationshipStatus, StatusTransition};
use crate::types::{ContradictionId, Emotion, MemoryId, UserId};

const EVENT_CAPACITY: usize = 256;

/// Cloneable async handle.
#[derive(Debug, Clone)]
pub struct AsyncCompanion {
    inner: Arc<Companion>,
    events: broadcast::Sender<StatusTransition>,
    wait_limit: Duration,
}

impl AsyncCompanion {
    /// Wrap a companion.
    #[must_use]
    pub fn new(companion: Companion) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        // Twice the store budget: the in-transaction check fires first.
        let wait_limit = Duration::from_millis(companion.config().retrieval.budget_ms.saturating_mul(2).max(1));
        Self {
            inner: Arc::new(companion),
            events,
            wait_limit,
        }
    }

    /// The wrapped companion, for synchronous use.
    #[must_use]
    pub fn companion(&self) -> &Arc<Companion> {
        &self.inner
    }

    /// Receive every status transition from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusTransition> {
        self.events.subscribe()
    }

    async fn blocking<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Companion) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| AffinityError::StoreUnavailable(format!("{operation} worker failed: {e}")))?
    }

    async fn bounded<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Companion, Instant) -> Result<T> + Send + 'static,
    {
        let start = Instant::now();
        let work = self.blocking(operation, move |c| f(c, start));
        match tokio::time::timeout(self.wait_limit, work).await {
            Ok(result) => result,
            Err(_) => {
                let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                warn!(operation, elapsed_ms, "gave up waiting for retrieval");
                Err(AffinityError::DeadlineExceeded {
                    operation: operation.to_string(),
                    elapsed_ms,
                    budget_ms: self.inner.config().retrieval.budget_ms,
                })
            }
        }
    }

    fn publish(&self, transitions: &[StatusTransition]) {
        for t in transitions {
            // No subscribers is fine.
            let _ = self.events.send(t.clone());
        }
    }

    // ------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------

    /// See [`crate::memory::MemoryStore::store`].
    ///
    /// # Errors
    /// As the synchronous call.
    pub async fn store_memory(&self, user_id: UserId, memory: NewMemory) -> Result<MemoryId> {
        self.blocking("memory.store", move |c| c.memories().store(user_id, memory)).await
    }

    /// See [`crate::memory::MemoryStore::recent`].
    ///
    /// # Errors
    /// As the synchronous call, plus `DeadlineExceeded` on timeout.
    pub async fn recent(&self, user_id: UserId, limit: usize) -> Result<Vec<EmotionalMemory>> {
        self.bounded("memory.recent", move |c, start| {
            c.memories().retrieve(user_id, &Query::Recent, limit, start)
        })
        .await
    }

    /// See [`crate::memory::MemoryStore::by_emotion`].
    ///
    /// # Errors
    /// As the synchronous call, plus `DeadlineExceeded` on timeout.
    pub async fn by_emotion(&self, user_id: UserId, emotion: Emotion, limit: usize) -> Result<Vec<EmotionalMemory>> {
        self.bounded("memory.by_emotion", move |c, start| {
            c.memories().retrieve(user_id, &Query::ByEmotion(emotion), limit, start)
        })
        .await
    }

    /// See [`crate::memory::MemoryStore::important`].
    ///
    /// # Errors
    /// As the synchronous call, plus `DeadlineExceeded` on timeout.
    pub async fn important(&self, user_id: UserId, limit: usize) -> Result<Vec<EmotionalMemory>> {
        self.bounded("memory.important", move |c, start| {
            c.memories().retrieve(user_id, &Query::Important, limit, start)
        })
        .await
    }

    /// See [`crate::memory::MemoryStore::by_tags`].
    ///
    /// # Errors
    /// As the synchronous call, plus `DeadlineExceeded` on timeout.
    pub async fn by_tags(&self, user_id: UserId, tags: Vec<String>, limit: usize) -> Result<Vec<EmotionalMemory>> {
        self.bounded("memory.by_tags", move |c, start| {
            c.memories().retrieve(user_id, &Query::tags(tags), limit, start)
        })
        .await
    }

    /// See [`crate::memory::MemoryStore::forget`].
    ///
    /// # Errors
    /// As the synchronous call.
    pub async fn forget(&self, memory_id: MemoryId) -> Result<()> {
        self.blocking("memory.forget", move |c| c.memories().forget(memory_id)).await
    }

    /// See [`Companion::forget_user`].
    ///
    /// # Errors
    /// As the synchronous call.
    pub async fn forget_user(&self, user_id: UserId) -> Result<ForgetReport> {
        self.blocking("companion.forget_user", move |c| c.forget_user(user_id)).await
    }

    // ------------------------------------------------------------------
    // Relationship
    // ------------------------------------------------------------------

    /// See [`Companion::record_interaction`]. Fired transitions are
    /// published.
    ///
    /// # Errors
    /// As the synchronous call.
    pub async fn record_interaction(
        &self,
        user_id: UserId,
        memory: NewMemory,
        signal: InteractionSignal,
    ) -> Result<InteractionOutcome> {
        let outcome = self
            .blocking("companion.record_interaction", move |c| {
                c.record_interaction(user_id, memory, &signal)
            })
            .await?;
        self.publish(&outcome.relationship.transitions);
        Ok(outcome)
    }

    /// See [`crate::relationship::RelationshipEngine::get`].
    ///
    /// # Errors
    /// As the synchronous call.
    pub async fn relationship(&self, user_id: UserId) -> Result<RelationshipState> {
        self.blocking("relationship.get", move |c| c.relationships().get(user_id)).await
    }

    /// See [`crate::relationship::RelationshipEngine::update_status`]. The
    /// override is published.
    ///
    /// # Errors
    /// As the synchronous call.
    pub async fn update_status(
        &self,
        user_id: UserId,
        status: RelationshipStatus,
        reason: String,
    ) -> Result<StatusTransition> {
        let transition = self
            .blocking("relationship.update_status", move |c| {
                c.relationships().update_status(user_id, status, &reason)
            })
            .await?;
        self.publish(std::slice::from_ref(&transition));
        Ok(transition)
    }

    // ------------------------------------------------------------------
    // Ledger
    // ------------------------------------------------------------------

    /// See [`crate::contradiction::ContradictionLedger::record`].
    ///
    /// # Errors
    /// As the synchronous call.
    pub async fn record_contradiction(&self, user_id: UserId, new: NewContradiction) -> Result<ContradictionId> {
        self.blocking("ledger.record", move |c| c.ledger().record(user_id, new)).await
    }

    /// See [`Companion::resolve_contradiction`]. Fired transitions are
    /// published.
    ///
    /// # Errors
    /// As the synchronous call.
    pub async fn resolve_contradiction(&self, id: ContradictionId, resolution: String) -> Result<ResolutionOutcome> {
        let outcome = self
            .blocking("companion.resolve_contradiction", move |c| {
                c.resolve_contradiction(id, &resolution)
            })
            .await?;
        if let Some(update) = &outcome.relationship {
            self.publish(&update.transitions);
        }
        Ok(outcome)
    }

    /// See [`crate::contradiction::ContradictionLedger::unresolved`].
    ///
    /// # Errors
    /// As the synchronous call.
    pub async fn unresolved(&self, user_id: UserId) -> Result<Vec<Contradiction>> {
        self.blocking("ledger.unresolved", move |c| c.ledger().unresolved(user_id)).await
    }

    // ------------------------------------------------------------------
    // Personality
    // ------------------------------------------------------------------

    /// See [`crate::personality::PersonalityStore::get`].
    ///
    /// # Errors
    /// As the synchronous call.
    pub async fn personality(&self, user_id: UserId) -> Result<PersonalityAdaptation> {
        self.blocking("personality.get", move |c| c.personality().get(user_id)).await
    }

    /// See [`crate::personality::PersonalityStore::update`].
    ///
    /// # Errors
    /// As the synchronous call.
    pub async fn update_personality(
        &self,
        user_id: UserId,
        patch: AdaptationPatch,
        reason: String,
    ) -> Result<PersonalityAdaptation> {
        self.blocking("personality.update", move |c| c.personality().update(user_id, patch, &reason))
            .await
    }
}
