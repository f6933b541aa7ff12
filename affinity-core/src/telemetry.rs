//! Logging setup and runtime counters.
//!
//! Every component emits `tracing` events; [`init_tracing`] installs a
//! subscriber for binaries that embed this crate. [`Counters`] are
//! lock-free `AtomicU64`s incremented on the hot path and read on export.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing_subscriber::EnvFilter;

use crate::config::GeneralConfig;
use crate::error::{AffinityError, Result};

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` overrides the configured level when set.
///
/// # Errors
/// Returns [`AffinityError::Config`] if the filter is invalid or a global
/// subscriber is already installed.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| AffinityError::Config(e.to_string()))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if config.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| AffinityError::Config(e.to_string()))
}

// ---------------------------------------------------------------------------
// Counters (lock-free)
// ---------------------------------------------------------------------------

/// Atomic counters for high-frequency events.
#[derive(Debug, Default)]
pub struct Counters {
    /// Memories written.
    pub memories_stored: AtomicU64,
    /// Memories returned by retrievals (each returned row counts once).
    pub memories_recalled: AtomicU64,
    /// Memories tombstoned.
    pub memories_forgotten: AtomicU64,
    /// Interactions fed to the relationship engine.
    pub interactions_recorded: AtomicU64,
    /// Automatic status transitions.
    pub status_transitions: AtomicU64,
    /// Manual status overrides.
    pub manual_overrides: AtomicU64,
    /// Contradictions recorded.
    pub contradictions_recorded: AtomicU64,
    /// Contradictions resolved (first resolution only).
    pub contradictions_resolved: AtomicU64,
    /// Personality adaptation updates.
    pub adaptation_updates: AtomicU64,
    /// Retrievals that blew their latency budget.
    pub deadlines_exceeded: AtomicU64,
    /// Transient store failures that were retried.
    pub store_retries: AtomicU64,
}

impl Counters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` to `counter`.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment `counter` by one.
    pub fn bump(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            memories_stored: load(&self.memories_stored),
            memories_recalled: load(&self.memories_recalled),
            memories_forgotten: load(&self.memories_forgotten),
            interactions_recorded: load(&self.interactions_recorded),
            status_transitions: load(&self.status_transitions),
            manual_overrides: load(&self.manual_overrides),
            contradictions_recorded: load(&self.contradictions_recorded),
            contradictions_resolved: load(&self.contradictions_resolved),
            adaptation_updates: load(&self.adaptation_updates),
            deadlines_exceeded: load(&self.deadlines_exceeded),
            store_retries: load(&self.store_retries),
        }
    }
}

/// A snapshot of counter values at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Memories written.
    pub memories_stored: u64,
    /// Memories returned by retrievals.
    pub memories_recalled: u64,
    /// Memories tombstoned.
    pub memories_forgotten: u64,
    /// Interactions recorded.
    pub interactions_recorded: u64,
    /// Automatic status transitions.
    pub status_transitions: u64,
    /// Manual status overrides.
    pub manual_overrides: u64,
    /// Contradictions recorded.
    pub contradictions_recorded: u64,
    /// Contradictions resolved.
    pub contradictions_resolved: u64,
    /// Personality adaptation updates.
    pub adaptation_updates: u64,
    /// Retrievals over budget.
    pub deadlines_exceeded: u64,
    /// Retried store failures.
    pub store_retries: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let rows: [(&str, &str, u64); 11] = [
            ("affinity_memories_stored_total", "Memories written", self.memories_stored),
            ("affinity_memories_recalled_total", "Memories returned by retrievals", self.memories_recalled),
            ("affinity_memories_forgotten_total", "Memories tombstoned", self.memories_forgotten),
            ("affinity_interactions_recorded_total", "Interactions recorded", self.interactions_recorded),
            ("affinity_status_transitions_total", "Automatic relationship status transitions", self.status_transitions),
            ("affinity_manual_overrides_total", "Manual relationship status overrides", self.manual_overrides),
            ("affinity_contradictions_recorded_total", "Contradictions recorded", self.contradictions_recorded),
            ("affinity_contradictions_resolved_total", "Contradictions resolved", self.contradictions_resolved),
            ("affinity_adaptation_updates_total", "Personality adaptation updates", self.adaptation_updates),
            ("affinity_deadlines_exceeded_total", "Retrievals over latency budget", self.deadlines_exceeded),
            ("affinity_store_retries_total", "Retried transient store failures", self.store_retries),
        ];

        let mut out = String::new();
        for (name, help, value) in rows {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_snapshot_reflects_increments() {
        let counters = Counters::new();
        Counters::bump(&counters.memories_stored);
        Counters::add(&counters.memories_recalled, 3);
        let snap = counters.snapshot();
        assert_eq!(snap.memories_stored, 1);
        assert_eq!(snap.memories_recalled, 3);
        assert_eq!(snap.store_retries, 0);
    }

    #[test]
    fn prometheus_export_has_every_counter() {
        let snap = CounterSnapshot {
            contradictions_resolved: 7,
            ..CounterSnapshot::default()
        };
        let text = snap.to_prometheus();
        assert!(text.contains("affinity_contradictions_resolved_total 7"));
        assert_eq!(text.matches("# TYPE").count(), 11);
    }
}
