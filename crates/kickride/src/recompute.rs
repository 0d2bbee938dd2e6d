//! Full recalculation of ride scores and rider safety scores.
//!
//! Used after KPI weights change. Runs in one write transaction so readers
//! never see a half-recomputed population, and walks rides and riders in
//! keyset pages of `batch_size`.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::model::Role;
use crate::scoring::{self, MAX_SCORE};
use crate::storage::{kpis, riders, rides, Storage};

/// Rows touched by a recompute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecomputeReport {
    /// Completed rides rescored.
    pub rides_updated: u64,
    /// Riders whose safety score was reset from their ride history.
    pub riders_updated: u64,
}

/// Administrative batch recompute.
#[derive(Debug, Clone)]
pub struct BatchRecompute {
    storage: Arc<Storage>,
    batch_size: usize,
    helmet_kpi_name: String,
}

impl BatchRecompute {
    /// Create a recompute job.
    #[must_use]
    pub fn new(storage: Arc<Storage>, batch_size: usize, helmet_kpi_name: impl Into<String>) -> Self {
        Self {
            storage,
            batch_size: batch_size.max(1),
            helmet_kpi_name: helmet_kpi_name.into(),
        }
    }

    /// Rescore every completed ride from its stored risk events and helmet
    /// flag, then set each rider's safety score to the mean of their ride
    /// scores (100 without completed rides). Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if a database operation fails; nothing is written
    /// in that case.
    pub fn recalculate_all(&self) -> Result<RecomputeReport> {
        let report = self.storage.write(|tx| {
            let helmet_kpi = kpis::find_by_name(tx, &self.helmet_kpi_name)?;
            let mut report = RecomputeReport::default();

            let mut after = 0;
            loop {
                let page = rides::completed_after(tx, after, self.batch_size)?;
                let Some(last) = page.last() else { break };
                after = last.id;
                for ride in &page {
                    let deduction =
                        scoring::ride_deduction(tx, ride.id, ride.helmet_on, helmet_kpi.as_ref())?;
                    if rides::set_score(tx, ride.id, scoring::ride_score(deduction))? {
                        report.rides_updated += 1;
                    }
                }
                debug!(rides = report.rides_updated, "Rescored ride batch");
            }

            let mut after = 0;
            loop {
                let page = riders::ids_after(tx, Role::Rider, after, self.batch_size)?;
                let Some(&last) = page.last() else { break };
                after = last;
                for rider in page {
                    let mean = rides::mean_completed_score(tx, rider)?.unwrap_or(MAX_SCORE);
                    if riders::set_safety_score(tx, rider, mean)? {
                        report.riders_updated += 1;
                    }
                }
            }

            Ok(report)
        })?;

        info!(
            rides = report.rides_updated,
            riders = report.riders_updated,
            "Recomputed safety scores"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::model::{NewKickboard, NewKpi};
    use crate::storage::rides::RideCompletion;
    use crate::storage::{kickboards, risk_events};
    use chrono::Utc;

    const HERE: GeoPoint = GeoPoint::new(37.5, 127.0);

    fn completion(score: u8, helmet_on: bool) -> RideCompletion {
        RideCompletion {
            end_location: HERE,
            end_time: Utc::now(),
            duration_min: 5,
            distance_km: 1.0,
            fare: 2100,
            score,
            helmet_on,
        }
    }

    /// Rider 1 has a helmet-less ride with one event and a clean ride; rider
    /// 2 has no rides; rider 3 is an admin.
    fn seeded() -> (Arc<Storage>, i64, i64) {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let ids = storage
            .write(|tx| {
                riders::insert(tx, Some(1), "u1", Role::Rider)?;
                riders::insert(tx, Some(2), "u2", Role::Rider)?;
                riders::insert(tx, Some(3), "ops", Role::Admin)?;
                riders::set_safety_score(tx, 2, 12.0)?;
                riders::set_safety_score(tx, 3, 40.0)?;
                kickboards::insert(
                    tx,
                    &NewKickboard {
                        id: "K1".to_string(),
                        location: HERE,
                        battery: 90,
                        model: None,
                    },
                )?;
                let brake = kpis::insert(
                    tx,
                    &NewKpi {
                        name: "sudden_brake".to_string(),
                        description: None,
                        weight: 7.0,
                    },
                )?;
                kpis::insert(
                    tx,
                    &NewKpi {
                        name: "helmet_off".to_string(),
                        description: None,
                        weight: 5.0,
                    },
                )?;

                let risky = rides::insert_active(tx, 1, "K1", HERE, Utc::now(), false)?;
                rides::complete(tx, risky, &completion(1, false))?;
                risk_events::insert(tx, risky, brake, Utc::now(), HERE)?;

                let clean = rides::insert_active(tx, 1, "K1", HERE, Utc::now(), true)?;
                rides::complete(tx, clean, &completion(3, true))?;

                // Active rides are left alone.
                rides::insert_active(tx, 2, "K1", HERE, Utc::now(), true)?;
                Ok((risky, clean))
            })
            .unwrap();
        (storage, ids.0, ids.1)
    }

    #[test]
    fn test_recalculate_all() {
        let (storage, risky, clean) = seeded();
        let job = BatchRecompute::new(Arc::clone(&storage), 1, "helmet_off");

        let report = job.recalculate_all().unwrap();
        assert_eq!(
            report,
            RecomputeReport {
                rides_updated: 2,
                riders_updated: 2
            }
        );

        let score = |id| storage.read(|c| rides::get(c, id)).unwrap().unwrap().score;
        assert_eq!(score(risky), Some(88));
        assert_eq!(score(clean), Some(100));

        let rolling = |id| {
            storage
                .read(|c| riders::safety_score(c, id))
                .unwrap()
                .flatten()
                .unwrap()
        };
        assert!((rolling(1) - 94.0).abs() < 1e-9);
        assert!((rolling(2) - 100.0).abs() < f64::EPSILON);
        // Admins are not part of the population.
        assert!((rolling(3) - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recalculate_is_idempotent() {
        let (storage, _, _) = seeded();
        let job = BatchRecompute::new(Arc::clone(&storage), 500, "helmet_off");
        let first = job.recalculate_all().unwrap();
        let second = job.recalculate_all().unwrap();
        assert_eq!(first, second);
        let rider = storage.read(|c| riders::get(c, 1)).unwrap().unwrap();
        assert!((rider.safety_score.unwrap() - 94.0).abs() < 1e-9);
    }

    #[test]
    fn test_reflects_new_weights() {
        let (storage, risky, _) = seeded();
        storage.write(|tx| kpis::set_weight(tx, 1, 30.0)).unwrap();
        BatchRecompute::new(Arc::clone(&storage), 10, "helmet_off")
            .recalculate_all()
            .unwrap();
        let ride = storage.read(|c| rides::get(c, risky)).unwrap().unwrap();
        assert_eq!(ride.score, Some(65));
    }

    #[test]
    fn test_missing_helmet_kpi_skips_penalty() {
        let (storage, risky, _) = seeded();
        BatchRecompute::new(Arc::clone(&storage), 10, "no_such_kpi")
            .recalculate_all()
            .unwrap();
        let ride = storage.read(|c| rides::get(c, risky)).unwrap().unwrap();
        assert_eq!(ride.score, Some(93));
    }

    #[test]
    fn test_empty_database() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let report = BatchRecompute::new(storage, 10, "helmet_off")
            .recalculate_all()
            .unwrap();
        assert_eq!(report, RecomputeReport::default());
    }
}
