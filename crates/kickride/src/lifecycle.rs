//! Ride lifecycle: opening and closing rental sessions.
//!
//! Starting a ride is one IMMEDIATE transaction holding the kickboard
//! compare-and-set and the ride insert. Ending a ride is one transaction
//! holding the conditional terminate, risk event ingestion, the kickboard
//! release and the rolling score update. Work that may fail without
//! invalidating the ride (path persistence, release retries) is handed to
//! the side task queue after commit.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::config::{Config, FareConfig, ScoringConfig};
use crate::degradation::DegradationCounters;
use crate::error::{Error, Result};
use crate::geo::{self, GeoPoint};
use crate::ingest;
use crate::model::{ActiveRide, EndRideRequest, PathPoint, Ride, RideHandle, RideSummary};
use crate::scoring;
use crate::sidework::{SideTask, SideTaskQueue};
use crate::storage::rides::RideCompletion;
use crate::storage::{kickboards, kpis, paths, riders, rides, Storage};

/// Fare for a ride: `floor(base + minutes * per_minute + km * per_km)`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn compute_fare(fare: &FareConfig, duration_min: i64, distance_km: f64) -> i64 {
    (fare.base_fare + duration_min as f64 * fare.per_minute_rate + distance_km * fare.per_km_rate)
        .floor() as i64
}

/// Whole minutes between two instants, never negative.
#[must_use]
pub fn duration_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_minutes().max(0)
}

/// Opens and closes rides.
#[derive(Debug, Clone)]
pub struct RideLifecycle {
    storage: Arc<Storage>,
    fare: FareConfig,
    scoring: ScoringConfig,
    side_tasks: SideTaskQueue,
    counters: Arc<DegradationCounters>,
}

impl RideLifecycle {
    /// Create the lifecycle manager.
    #[must_use]
    pub fn new(
        storage: Arc<Storage>,
        config: &Config,
        side_tasks: SideTaskQueue,
        counters: Arc<DegradationCounters>,
    ) -> Self {
        Self {
            storage,
            fare: config.fare.clone(),
            scoring: config.scoring.clone(),
            side_tasks,
            counters,
        }
    }

    /// Start a ride now.
    ///
    /// # Errors
    ///
    /// See [`RideLifecycle::start_ride_at`].
    pub fn start_ride(
        &self,
        rider_id: i64,
        kickboard_id: &str,
        start_location: GeoPoint,
        helmet_on: bool,
    ) -> Result<RideHandle> {
        self.start_ride_at(rider_id, kickboard_id, start_location, helmet_on, Utc::now())
    }

    /// Start a ride at the given instant.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an invalid location, `NotFound` for an
    /// unknown rider or kickboard, and `Conflict` when the kickboard is not
    /// available. A failed start writes nothing.
    pub fn start_ride_at(
        &self,
        rider_id: i64,
        kickboard_id: &str,
        start_location: GeoPoint,
        helmet_on: bool,
        now: DateTime<Utc>,
    ) -> Result<RideHandle> {
        start_location.validate()?;

        let ride_id = self.storage.write(|tx| {
            if !riders::exists(tx, rider_id)? {
                return Err(Error::not_found("rider", rider_id));
            }
            let kickboard = kickboards::get(tx, kickboard_id)?
                .ok_or_else(|| Error::not_found("kickboard", kickboard_id))?;
            if !kickboards::try_acquire(tx, kickboard_id)? {
                return Err(Error::conflict(format!(
                    "kickboard {kickboard_id} is not available ({})",
                    kickboard.status
                )));
            }
            rides::insert_active(tx, rider_id, kickboard_id, start_location, now, helmet_on)
        })?;

        info!(ride = ride_id, rider = rider_id, kickboard = %kickboard_id, helmet_on, "Ride started");
        Ok(RideHandle {
            ride_id,
            rider_id,
            kickboard_id: kickboard_id.to_string(),
            start_time: now,
            location: start_location,
        })
    }

    /// End a ride now.
    ///
    /// # Errors
    ///
    /// See [`RideLifecycle::end_ride_at`].
    pub fn end_ride(&self, request: &EndRideRequest) -> Result<RideSummary> {
        self.end_ride_at(request, Utc::now())
    }

    /// End a ride at the given instant.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the end location is missing or invalid or
    /// the distance override is not a finite non-negative number,
    /// `NotFound` for an unknown ride and `Conflict` when the ride is
    /// already completed. Failures leave the ride untouched.
    pub fn end_ride_at(&self, request: &EndRideRequest, now: DateTime<Utc>) -> Result<RideSummary> {
        let end_location = request
            .end_location
            .ok_or_else(|| Error::validation("end location is required"))?;
        end_location.validate()?;
        if let Some(d) = request.distance_override_km {
            if !(d.is_finite() && d >= 0.0) {
                return Err(Error::validation(format!(
                    "distance override must be a non-negative number, got {d}"
                )));
            }
        }

        let (summary, ride, pending_release) = self.storage.write(|tx| {
            let ride = rides::get(tx, request.ride_id)?
                .ok_or_else(|| Error::not_found("ride", request.ride_id))?;
            if ride.end_time.is_some() {
                return Err(Error::conflict(format!(
                    "ride {} is already completed",
                    ride.id
                )));
            }

            let duration_min = duration_minutes(ride.start_time, now);
            let report =
                ingest::ingest_events(tx, ride.id, &request.risk_events, now, &self.counters)?;

            let helmet_on = request.helmet_on.unwrap_or(ride.helmet_on);
            let helmet_kpi = kpis::find_by_name(tx, &self.scoring.helmet_off_kpi)?;
            if helmet_kpi.is_none() && !helmet_on {
                warn!(
                    ride = ride.id,
                    kpi = %self.scoring.helmet_off_kpi,
                    "Helmet-off KPI is missing, no penalty applied"
                );
                self.counters.missing_helmet_kpi();
            }
            let deduction = scoring::ride_deduction(tx, ride.id, helmet_on, helmet_kpi.as_ref())?;
            let score = scoring::ride_score(deduction);

            let distance_km = match request.distance_override_km {
                Some(d) if d > 0.0 => d,
                _ => geo::distance_km(ride.start_location, end_location),
            };
            let fare = compute_fare(&self.fare, duration_min, distance_km);

            let completion = RideCompletion {
                end_location,
                end_time: now,
                duration_min,
                distance_km,
                fare,
                score,
                helmet_on,
            };
            if !rides::complete(tx, ride.id, &completion)? {
                return Err(Error::conflict(format!(
                    "ride {} is already completed",
                    ride.id
                )));
            }

            let pending_release = self.release_in_savepoint(tx, &ride.kickboard_id, end_location)?;

            if distance_km > 0.0 {
                scoring::apply_rolling_score(
                    tx,
                    ride.rider_id,
                    f64::from(score),
                    distance_km,
                    self.scoring.inertia_km,
                )?;
            }

            let summary = RideSummary {
                ride_id: ride.id,
                score,
                fare,
                distance_km,
                duration_min,
                deduction,
                skipped_events: report.skipped,
            };
            Ok((summary, ride, pending_release))
        })?;

        if let Some(task) = pending_release {
            self.side_tasks.submit(task);
        }
        if let Some(points) = request.ride_path.as_ref().filter(|p| !p.is_empty()) {
            self.side_tasks.submit(SideTask::PersistPath {
                ride_id: ride.id,
                points: points.clone(),
            });
        }

        info!(
            ride = summary.ride_id,
            rider = ride.rider_id,
            kickboard = %ride.kickboard_id,
            score = summary.score,
            fare = summary.fare,
            distance_km = summary.distance_km,
            duration_min = summary.duration_min,
            skipped = summary.skipped_events.len(),
            "Ride ended"
        );
        Ok(summary)
    }

    /// Release the kickboard inside a savepoint. A failure rolls back only
    /// the release and yields a retry task for after commit.
    fn release_in_savepoint(
        &self,
        tx: &mut rusqlite::Transaction<'_>,
        kickboard_id: &str,
        location: GeoPoint,
    ) -> Result<Option<SideTask>> {
        let savepoint = tx.savepoint()?;
        match kickboards::release(&savepoint, kickboard_id, location) {
            Ok(true) => {
                savepoint.commit()?;
                Ok(None)
            }
            Ok(false) => {
                warn!(kickboard = %kickboard_id, "Kickboard vanished before release");
                self.counters.release_failure();
                Ok(None)
            }
            Err(e) => {
                drop(savepoint);
                warn!(kickboard = %kickboard_id, error = %e, "Kickboard release failed, queueing retry");
                self.counters.release_failure();
                Ok(Some(SideTask::ReleaseKickboard {
                    kickboard_id: kickboard_id.to_string(),
                    location,
                }))
            }
        }
    }

    /// Fetch one ride.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ride.
    pub fn get_ride(&self, ride_id: i64) -> Result<Ride> {
        self.storage
            .read(|conn| rides::get(conn, ride_id))?
            .ok_or_else(|| Error::not_found("ride", ride_id))
    }

    /// All rides currently in progress.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn active_rides(&self) -> Result<Vec<ActiveRide>> {
        self.storage.read(rides::active)
    }

    /// A rider's rides, most recent first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown rider.
    pub fn rider_history(&self, rider_id: i64, limit: usize) -> Result<Vec<Ride>> {
        self.storage.read(|conn| {
            if !riders::exists(conn, rider_id)? {
                return Err(Error::not_found("rider", rider_id));
            }
            rides::history(conn, rider_id, limit)
        })
    }

    /// The stored GPS trace of a ride, `None` if none was persisted.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ride.
    pub fn ride_path(&self, ride_id: i64) -> Result<Option<Vec<PathPoint>>> {
        self.storage.read(|conn| {
            if rides::get(conn, ride_id)?.is_none() {
                return Err(Error::not_found("ride", ride_id));
            }
            paths::get(conn, ride_id)
        })
    }

    /// Set or clear the accident flag of a ride.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ride.
    pub fn mark_accident(&self, ride_id: i64, accident: bool) -> Result<Ride> {
        let ride = self.storage.write(|tx| {
            if !rides::set_accident(tx, ride_id, accident)? {
                return Err(Error::not_found("ride", ride_id));
            }
            rides::get(tx, ride_id)?.ok_or_else(|| Error::not_found("ride", ride_id))
        })?;
        info!(ride = ride_id, accident, "Ride accident flag updated");
        Ok(ride)
    }

    /// Completed accident rides that ended within the last `hours` hours.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when `hours` is zero.
    pub fn recent_accidents(&self, hours: u32, limit: usize) -> Result<Vec<Ride>> {
        if hours == 0 {
            return Err(Error::validation("hours must be greater than 0"));
        }
        let since = Utc::now() - Duration::hours(i64::from(hours));
        self.storage.read(|conn| rides::accidents_since(conn, since, limit))
    }
}
