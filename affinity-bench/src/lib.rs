//! Fixtures shared by the affinity benchmarks.

use std::sync::Arc;

use affinity_core::{
    AffinityConfig, Companion, Emotion, Intensity, InteractionSignal, InteractionType, ManualClock, NewMemory,
    UserId,
};
use chrono::Duration;

/// Emotions cycled through when seeding memories.
const EMOTIONS: [Emotion; 5] = [Emotion::Joy, Emotion::Sadness, Emotion::Curiosity, Emotion::Trust, Emotion::Love];

/// A companion over an in-memory database with a manual clock.
///
/// # Panics
/// If SQLite cannot open an in-memory database.
#[must_use]
pub fn companion() -> (Companion, ManualClock) {
    let clock = ManualClock::starting_now();
    let companion = Companion::in_memory(Arc::new(clock.clone()), AffinityConfig::default())
        .expect("in-memory database");
    (companion, clock)
}

/// The `i`-th synthetic memory: varied emotion, importance and tags.
#[must_use]
pub fn make_memory(i: u32) -> NewMemory {
    let emotion = EMOTIONS[i as usize % EMOTIONS.len()];
    NewMemory::new(
        InteractionType::Casual,
        format!("Conversation number {i} about the weekend"),
        format!("Long-form transcript of conversation {i}"),
        emotion,
        Intensity::Medium,
    )
    .with_importance(f64::from(i % 100) / 100.0)
    .with_tags([format!("topic-{}", i % 7)])
}

/// Seed `user` with `count` memories spread one hour apart.
///
/// # Panics
/// If a store fails.
pub fn seed(companion: &Companion, clock: &ManualClock, user: UserId, count: u32) {
    for i in 0..count {
        companion
            .record_interaction(user, make_memory(i), &InteractionSignal::positive(20))
            .expect("seed");
        clock.advance(Duration::hours(1));
    }
}
