//! Counters for best-effort failures that never fail the caller.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Shared tallies of degraded outcomes. Cloned behind an `Arc` into every
/// service that can swallow a failure.
#[derive(Debug, Default)]
pub struct DegradationCounters {
    unresolved_kpis: AtomicU64,
    release_failures: AtomicU64,
    missing_helmet_kpi: AtomicU64,
    side_task_failures: AtomicU64,
}

/// A point-in-time copy of [`DegradationCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DegradationSnapshot {
    /// Risk events skipped because their KPI could not be resolved.
    pub unresolved_kpis: u64,
    /// Kickboard releases that failed inside `end_ride`.
    pub release_failures: u64,
    /// Helmet-off penalties skipped because the KPI is missing.
    pub missing_helmet_kpi: u64,
    /// Side tasks that could not be queued or exhausted their retries.
    pub side_task_failures: u64,
}

impl DegradationCounters {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn unresolved_kpi(&self) {
        self.unresolved_kpis.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn release_failure(&self) {
        self.release_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn missing_helmet_kpi(&self) {
        self.missing_helmet_kpi.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn side_task_failure(&self) {
        self.side_task_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> DegradationSnapshot {
        DegradationSnapshot {
            unresolved_kpis: self.unresolved_kpis.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
            missing_helmet_kpi: self.missing_helmet_kpi.load(Ordering::Relaxed),
            side_task_failures: self.side_task_failures.load(Ordering::Relaxed),
        }
    }
}
