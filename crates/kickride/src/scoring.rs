//! Ride scoring and the rolling per-rider safety score.
//!
//! A ride starts at 100 and loses the weight of every recorded risk event,
//! plus a single helmet-off penalty when the rider was not wearing one. The
//! rider's rolling score is a distance-weighted moving average: a ride of
//! `inertia_km` kilometres moves it halfway towards the ride score.

use std::sync::Arc;

use rusqlite::Connection;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::Kpi;
use crate::storage::{riders, risk_events, Storage};

/// Highest possible score.
pub const MAX_SCORE: f64 = 100.0;

/// Ride score for a total deduction: `max(0, floor(100 - deduction))`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn ride_score(deduction: f64) -> u8 {
    let raw = (MAX_SCORE - deduction).floor();
    if raw.is_nan() {
        return 0;
    }
    raw.clamp(0.0, MAX_SCORE) as u8
}

/// Blend a ride score into the previous rolling score.
///
/// With no previous score the ride score is taken as-is.
#[must_use]
pub fn blend(previous: Option<f64>, ride_score: f64, distance_km: f64, inertia_km: f64) -> f64 {
    let next = match previous {
        None => ride_score,
        Some(old) => {
            let k = distance_km / (distance_km + inertia_km);
            old * (1.0 - k) + ride_score * k
        }
    };
    next.clamp(0.0, MAX_SCORE)
}

/// Total deduction of a stored ride: the weights of its risk events, leaving
/// out helmet-off events, plus one helmet-off penalty when `helmet_on` is
/// false and the helmet-off KPI exists.
pub(crate) fn ride_deduction(
    conn: &Connection,
    ride_id: i64,
    helmet_on: bool,
    helmet_kpi: Option<&Kpi>,
) -> Result<f64> {
    let events = risk_events::weight_sum(conn, ride_id, helmet_kpi.map(|k| k.id))?;
    let penalty = match helmet_kpi {
        Some(kpi) if !helmet_on => kpi.weight,
        _ => 0.0,
    };
    Ok(events + penalty)
}

fn validate_inputs(ride_score: f64, distance_km: f64) -> Result<()> {
    if !(ride_score.is_finite() && (0.0..=MAX_SCORE).contains(&ride_score)) {
        return Err(Error::validation(format!(
            "ride score must be between 0 and 100, got {ride_score}"
        )));
    }
    if !(distance_km.is_finite() && distance_km > 0.0) {
        return Err(Error::validation(format!(
            "ride distance must be a positive number of kilometres, got {distance_km}"
        )));
    }
    Ok(())
}

/// Read-modify-write of a rider's rolling score on the caller's connection,
/// which must be inside a write transaction.
pub(crate) fn apply_rolling_score(
    conn: &Connection,
    rider_id: i64,
    ride_score: f64,
    distance_km: f64,
    inertia_km: f64,
) -> Result<f64> {
    validate_inputs(ride_score, distance_km)?;
    let previous =
        riders::safety_score(conn, rider_id)?.ok_or_else(|| Error::not_found("rider", rider_id))?;

    let next = blend(previous, ride_score, distance_km, inertia_km);
    riders::set_safety_score(conn, rider_id, next)?;
    debug!(
        rider = rider_id,
        previous = ?previous,
        next,
        "Updated rolling safety score"
    );
    Ok(next)
}

/// Maintains the rolling per-rider safety score.
#[derive(Debug, Clone)]
pub struct SafetyScorer {
    storage: Arc<Storage>,
    inertia_km: f64,
}

impl SafetyScorer {
    /// Create a scorer with the given inertia distance.
    #[must_use]
    pub fn new(storage: Arc<Storage>, inertia_km: f64) -> Self {
        Self {
            storage,
            inertia_km,
        }
    }

    /// Fold one ride into the rider's rolling score and return the new value.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a score outside 0..=100 or a distance that is
    /// not positive, and `NotFound` for an unknown rider.
    pub fn update_rolling_score(
        &self,
        rider_id: i64,
        ride_score: f64,
        distance_km: f64,
    ) -> Result<f64> {
        validate_inputs(ride_score, distance_km)?;
        self.storage.write(|tx| {
            apply_rolling_score(tx, rider_id, ride_score, distance_km, self.inertia_km)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    fn scorer_with_rider(score: Option<f64>) -> SafetyScorer {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        storage
            .write(|tx| {
                riders::insert(tx, Some(1), "u1", Role::Rider)?;
                if let Some(score) = score {
                    riders::set_safety_score(tx, 1, score)?;
                }
                Ok(())
            })
            .unwrap();
        SafetyScorer::new(storage, 30.0)
    }

    #[test]
    fn test_ride_score_bounds() {
        assert_eq!(ride_score(0.0), 100);
        assert_eq!(ride_score(20.0), 80);
        assert_eq!(ride_score(12.5), 87);
        assert_eq!(ride_score(250.0), 0);
        assert_eq!(ride_score(-5.0), 100);
        assert_eq!(ride_score(f64::NAN), 0);
    }

    #[test]
    fn test_blend_without_previous() {
        assert!((blend(None, 80.0, 10.0, 30.0) - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_blend_at_inertia_is_halfway() {
        assert!((blend(Some(90.0), 0.0, 30.0, 30.0) - 45.0).abs() < 1e-12);
    }

    #[test]
    fn test_blend_stays_in_range() {
        for (old, score, d) in [(100.0, 100.0, 1e9), (0.0, 0.0, 0.001), (55.5, 100.0, 3.0)] {
            let next = blend(Some(old), score, d, 30.0);
            assert!((0.0..=100.0).contains(&next));
        }
    }

    #[test]
    fn test_update_first_ride_takes_score() {
        let scorer = scorer_with_rider(None);
        let next = scorer.update_rolling_score(1, 80.0, 10.0).unwrap();
        assert!((next - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_update_blends_with_previous() {
        let scorer = scorer_with_rider(Some(90.0));
        let next = scorer.update_rolling_score(1, 0.0, 30.0).unwrap();
        assert!((next - 45.0).abs() < 1e-12);

        let stored = scorer
            .storage
            .read(|c| riders::safety_score(c, 1))
            .unwrap()
            .flatten()
            .unwrap();
        assert!((stored - 45.0).abs() < 1e-12);
    }

    #[test]
    fn test_update_rejects_bad_inputs() {
        let scorer = scorer_with_rider(None);
        assert!(scorer.update_rolling_score(1, 101.0, 5.0).unwrap_err().is_validation());
        assert!(scorer.update_rolling_score(1, -1.0, 5.0).unwrap_err().is_validation());
        assert!(scorer.update_rolling_score(1, 50.0, 0.0).unwrap_err().is_validation());
        assert!(scorer
            .update_rolling_score(1, 50.0, f64::INFINITY)
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_update_unknown_rider() {
        let scorer = scorer_with_rider(None);
        assert!(scorer.update_rolling_score(2, 50.0, 5.0).unwrap_err().is_not_found());
    }
}
