//! Global atomic counters.
//!
//! Counters are incremented at the call site. [`Metrics::flush`] emits the
//! current values as one `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Snapshot of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub events_processed: u64,
    pub decisions_applied: u64,
    pub duplicates_suppressed: u64,
    pub pipelines_superseded: u64,
    pub outcomes_recorded: u64,
    pub models_trained: u64,
    pub host_retries: u64,
}

pub struct Metrics {
    events_processed: AtomicU64,
    decisions_applied: AtomicU64,
    duplicates_suppressed: AtomicU64,
    pipelines_superseded: AtomicU64,
    outcomes_recorded: AtomicU64,
    models_trained: AtomicU64,
    host_retries: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(metric = stringify!($field), "counter incremented");
        }
    };
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            events_processed: AtomicU64::new(0),
            decisions_applied: AtomicU64::new(0),
            duplicates_suppressed: AtomicU64::new(0),
            pipelines_superseded: AtomicU64::new(0),
            outcomes_recorded: AtomicU64::new(0),
            models_trained: AtomicU64::new(0),
            host_retries: AtomicU64::new(0),
        }
    }

    counter!(inc_events_processed, events_processed);
    counter!(inc_decisions_applied, decisions_applied);
    counter!(inc_duplicates, duplicates_suppressed);
    counter!(inc_superseded, pipelines_superseded);
    counter!(inc_outcomes, outcomes_recorded);
    counter!(inc_models_trained, models_trained);
    counter!(inc_host_retries, host_retries);

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            decisions_applied: self.decisions_applied.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            pipelines_superseded: self.pipelines_superseded.load(Ordering::Relaxed),
            outcomes_recorded: self.outcomes_recorded.load(Ordering::Relaxed),
            models_trained: self.models_trained.load(Ordering::Relaxed),
            host_retries: self.host_retries.load(Ordering::Relaxed),
        }
    }

    /// Emit all counter values as a single `info!` event.
    ///
    /// Call at natural boundaries (end of a command, daemon shutdown).
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            events_processed = s.events_processed,
            decisions_applied = s.decisions_applied,
            duplicates_suppressed = s.duplicates_suppressed,
            pipelines_superseded = s.pipelines_superseded,
            outcomes_recorded = s.outcomes_recorded,
            models_trained = s.models_trained,
            host_retries = s.host_retries,
        );
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for c in [
            &self.events_processed,
            &self.decisions_applied,
            &self.duplicates_suppressed,
            &self.pipelines_superseded,
            &self.outcomes_recorded,
            &self.models_trained,
            &self.host_retries,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_events_processed();
        m.inc_events_processed();
        m.inc_duplicates();
        m.inc_host_retries();
        m.inc_host_retries();
        m.inc_host_retries();

        let s = m.snapshot();
        assert_eq!(s.events_processed, 2);
        assert_eq!(s.duplicates_suppressed, 1);
        assert_eq!(s.host_retries, 3);
        assert_eq!(s.decisions_applied, 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_decisions_applied();
        m.inc_models_trained();
        m.inc_superseded();
        m.reset();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }
}
