//! Risk event ingestion.
//!
//! KPI references are resolved once, here, into canonical catalog ids. A
//! reference that cannot be resolved is a per-event failure: it is logged,
//! counted and reported back, never fatal to the surrounding batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use serde::Serialize;
use tracing::{debug, warn};

use crate::degradation::DegradationCounters;
use crate::error::{Error, Result};
use crate::geo::GeoPoint;
use crate::model::{Kpi, KpiRef, RecordedRiskEvent, RiskEvent, RiskEventInput, SkippedRiskEvent};
use crate::storage::{kpis, rides, risk_events, Storage};

/// Outcome of a batch ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    /// Events that were persisted.
    pub recorded: Vec<RecordedRiskEvent>,
    /// Events that were dropped, with the reason.
    pub skipped: Vec<SkippedRiskEvent>,
}

/// Persists telemetry-detected risk events.
#[derive(Debug, Clone)]
pub struct RiskIngestor {
    storage: Arc<Storage>,
    counters: Arc<DegradationCounters>,
}

impl RiskIngestor {
    /// Create an ingestor over shared storage.
    #[must_use]
    pub fn new(storage: Arc<Storage>, counters: Arc<DegradationCounters>) -> Self {
        Self { storage, counters }
    }

    /// Persist a single event.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an invalid location, `NotFound` for an
    /// unknown ride, `Conflict` for a completed ride and `UnresolvedKpi`
    /// when the reference matches no KPI.
    pub fn record_risk_event(
        &self,
        ride_id: i64,
        kpi: &KpiRef,
        timestamp: DateTime<Utc>,
        location: GeoPoint,
    ) -> Result<RecordedRiskEvent> {
        location.validate()?;
        let result = self.storage.write(|tx| {
            ensure_active_ride(tx, ride_id)?;
            let kpi = resolve_kpi(tx, kpi)?;
            record(tx, ride_id, &kpi, timestamp, location)
        });

        if let Err(Error::UnresolvedKpi { reference }) = &result {
            warn!(ride = ride_id, kpi = %reference, "Skipping risk event with unknown KPI");
            self.counters.unresolved_kpi();
        }
        result
    }

    /// Persist a batch of events, each independently.
    ///
    /// Events without a timestamp are stamped with `default_timestamp`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ride and `Conflict` for a completed
    /// one. Per-event failures are reported in [`IngestReport::skipped`].
    pub fn record_batch(
        &self,
        ride_id: i64,
        events: &[RiskEventInput],
        default_timestamp: DateTime<Utc>,
    ) -> Result<IngestReport> {
        self.storage.write(|tx| {
            ensure_active_ride(tx, ride_id)?;
            ingest_events(tx, ride_id, events, default_timestamp, &self.counters)
        })
    }

    /// Events of one ride joined with their KPI.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ride.
    pub fn events_for_ride(&self, ride_id: i64) -> Result<Vec<RecordedRiskEvent>> {
        self.storage.read(|conn| {
            ensure_ride(conn, ride_id)?;
            risk_events::for_ride(conn, ride_id)
        })
    }
}

fn ensure_ride(conn: &Connection, ride_id: i64) -> Result<()> {
    if rides::get(conn, ride_id)?.is_none() {
        return Err(Error::not_found("ride", ride_id));
    }
    Ok(())
}

/// Completed rides only change through a weight recompute.
fn ensure_active_ride(conn: &Connection, ride_id: i64) -> Result<()> {
    let ride = rides::get(conn, ride_id)?.ok_or_else(|| Error::not_found("ride", ride_id))?;
    if ride.end_time.is_some() {
        return Err(Error::conflict(format!("ride {ride_id} is already completed")));
    }
    Ok(())
}

/// Resolve a reference to its catalog entry.
pub(crate) fn resolve_kpi(conn: &Connection, reference: &KpiRef) -> Result<Kpi> {
    let found = match reference {
        KpiRef::Id(id) => kpis::get(conn, *id)?,
        KpiRef::Name(name) => kpis::find_by_name(conn, name.trim())?,
    };
    found.ok_or_else(|| Error::UnresolvedKpi {
        reference: reference.to_string(),
    })
}

fn record(
    conn: &Connection,
    ride_id: i64,
    kpi: &Kpi,
    timestamp: DateTime<Utc>,
    location: GeoPoint,
) -> Result<RecordedRiskEvent> {
    let id = risk_events::insert(conn, ride_id, kpi.id, timestamp, location)?;
    debug!(ride = ride_id, kpi = %kpi.name, event = id, "Recorded risk event");
    Ok(RecordedRiskEvent {
        event: RiskEvent {
            id,
            ride_id,
            kpi_id: kpi.id,
            timestamp,
            location,
        },
        kpi_name: kpi.name.clone(),
        weight: kpi.weight,
    })
}

/// Ingest events inside the caller's transaction. Each insert runs in its own
/// savepoint so a failing event leaves the others in place.
pub(crate) fn ingest_events(
    tx: &mut Transaction<'_>,
    ride_id: i64,
    events: &[RiskEventInput],
    default_timestamp: DateTime<Utc>,
    counters: &DegradationCounters,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();

    for input in events {
        let reference = input.kpi.to_string();
        let skip = |reason: String| SkippedRiskEvent {
            reference: reference.clone(),
            reason,
        };

        if let Err(e) = input.location.validate() {
            warn!(ride = ride_id, kpi = %reference, error = %e, "Skipping risk event with invalid location");
            report.skipped.push(skip(e.to_string()));
            continue;
        }

        let kpi = match resolve_kpi(tx, &input.kpi) {
            Ok(kpi) => kpi,
            Err(e @ Error::UnresolvedKpi { .. }) => {
                warn!(ride = ride_id, kpi = %reference, "Skipping risk event with unknown KPI");
                counters.unresolved_kpi();
                report.skipped.push(skip(e.to_string()));
                continue;
            }
            Err(e) => return Err(e),
        };

        let timestamp = input.timestamp.unwrap_or(default_timestamp);
        let savepoint = tx.savepoint()?;
        match record(&savepoint, ride_id, &kpi, timestamp, input.location) {
            Ok(event) => {
                savepoint.commit()?;
                report.recorded.push(event);
            }
            Err(e) => {
                // Dropping the savepoint rolls back just this insert.
                drop(savepoint);
                warn!(ride = ride_id, kpi = %reference, error = %e, "Failed to persist risk event");
                report.skipped.push(skip(e.to_string()));
            }
        }
    }

    Ok(report)
}
