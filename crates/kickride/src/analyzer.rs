//! KPI weight recommendations from historical accident data.
//!
//! For every KPI the analyzer compares how often it occurs per accident ride
//! against how often it occurs per normal ride and scales the current weight
//! by the square root of that ratio. The report is advisory; weights change
//! only through [`WeightAnalyzer::apply_kpi_weight`].

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::AnalyzerConfig;
use crate::error::{Error, Result};
use crate::model::Kpi;
use crate::storage::risk_events::{self, KpiOccurrences};
use crate::storage::{kpis, rides, Storage};

/// Reason attached to every KPI when the sample is too small.
pub const INSUFFICIENT_DATA: &str = "insufficient data";

/// Recommendation for one KPI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiRecommendation {
    /// KPI id.
    pub kpi_id: i64,
    /// KPI name.
    pub name: String,
    /// Weight in the catalog now.
    pub current_weight: f64,
    /// Proposed weight.
    pub recommended_weight: f64,
    /// Events on accident rides.
    pub accident_count: u64,
    /// Events on normal rides.
    pub normal_count: u64,
    /// Accident to normal frequency ratio.
    pub ratio: f64,
    /// Human-readable explanation.
    pub reason: String,
}

impl KpiRecommendation {
    /// Whether applying this recommendation would change the catalog.
    #[must_use]
    pub fn changes_weight(&self) -> bool {
        (self.recommended_weight - self.current_weight).abs() > f64::EPSILON
    }
}

/// Full analyzer output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightReport {
    /// Completed rides flagged as accidents.
    pub total_accident_rides: u64,
    /// Completed rides without the accident flag.
    pub total_normal_rides: u64,
    /// False when the sample was below the configured minimums.
    pub sufficient_data: bool,
    /// One entry per KPI in catalog order.
    pub recommendations: Vec<KpiRecommendation>,
}

#[allow(clippy::cast_precision_loss)]
fn frequency(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

/// Accident to normal frequency ratio, with `unseen_ratio` for a KPI that
/// only ever occurs on accident rides and 1 when it never occurs.
#[must_use]
pub fn raw_ratio(freq_accident: f64, freq_normal: f64, unseen_ratio: f64) -> f64 {
    if freq_normal > 0.0 {
        freq_accident / freq_normal
    } else if freq_accident > 0.0 {
        unseen_ratio
    } else {
        1.0
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Build the report from raw counts.
#[must_use]
pub fn recommend(
    occurrences: &[KpiOccurrences],
    total_accident_rides: u64,
    total_normal_rides: u64,
    config: &AnalyzerConfig,
) -> WeightReport {
    let sufficient_data = total_accident_rides >= config.min_accident_rides
        && total_normal_rides >= config.min_normal_rides;

    let recommendations = occurrences
        .iter()
        .map(|occ| {
            let freq_acc = frequency(occ.accident_count, total_accident_rides);
            let freq_norm = frequency(occ.normal_count, total_normal_rides);
            let ratio = raw_ratio(freq_acc, freq_norm, config.unseen_ratio);

            let (recommended_weight, reason) = if sufficient_data {
                let weight = round2(
                    (occ.weight * ratio.sqrt()).clamp(config.min_weight, config.max_weight),
                );
                let reason = if freq_norm > 0.0 {
                    format!("accident/normal frequency ratio {ratio:.2}")
                } else if freq_acc > 0.0 {
                    "only observed on accident rides".to_string()
                } else {
                    "never observed".to_string()
                };
                (weight, reason)
            } else {
                (occ.weight, INSUFFICIENT_DATA.to_string())
            };

            KpiRecommendation {
                kpi_id: occ.kpi_id,
                name: occ.name.clone(),
                current_weight: occ.weight,
                recommended_weight,
                accident_count: occ.accident_count,
                normal_count: occ.normal_count,
                ratio,
                reason,
            }
        })
        .collect();

    WeightReport {
        total_accident_rides,
        total_normal_rides,
        sufficient_data,
        recommendations,
    }
}

/// Reads ride history and proposes KPI weights.
#[derive(Debug, Clone)]
pub struct WeightAnalyzer {
    storage: Arc<Storage>,
    config: AnalyzerConfig,
}

impl WeightAnalyzer {
    /// Create an analyzer.
    #[must_use]
    pub fn new(storage: Arc<Storage>, config: AnalyzerConfig) -> Self {
        Self { storage, config }
    }

    /// Compute recommendations. Read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recommend_kpi_weights(&self) -> Result<WeightReport> {
        let (occurrences, (accident, normal)) = self
            .storage
            .read(|conn| Ok((risk_events::occurrences(conn)?, rides::completed_counts(conn)?)))?;
        let report = recommend(&occurrences, accident, normal, &self.config);
        info!(
            accident_rides = accident,
            normal_rides = normal,
            sufficient = report.sufficient_data,
            "Computed KPI weight recommendations"
        );
        Ok(report)
    }

    /// Set one KPI's weight.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a negative or non-finite weight and
    /// `NotFound` for an unknown KPI.
    pub fn apply_kpi_weight(&self, kpi_id: i64, weight: f64) -> Result<Kpi> {
        Kpi::validate_weight(weight)?;
        let kpi = self.storage.write(|tx| {
            if !kpis::set_weight(tx, kpi_id, weight)? {
                return Err(Error::not_found("kpi", kpi_id));
            }
            kpis::get(tx, kpi_id)?.ok_or_else(|| Error::not_found("kpi", kpi_id))
        })?;
        info!(kpi = %kpi.name, weight, "Applied KPI weight");
        Ok(kpi)
    }

    /// Apply every changing recommendation of a report in one transaction.
    /// Reports built from insufficient data change nothing.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if a KPI was removed since the report was built.
    pub fn apply_report(&self, report: &WeightReport) -> Result<Vec<Kpi>> {
        if !report.sufficient_data {
            return Ok(Vec::new());
        }
        let applied = self.storage.write(|tx| {
            let mut applied = Vec::new();
            for rec in report.recommendations.iter().filter(|r| r.changes_weight()) {
                Kpi::validate_weight(rec.recommended_weight)?;
                if !kpis::set_weight(tx, rec.kpi_id, rec.recommended_weight)? {
                    return Err(Error::not_found("kpi", rec.kpi_id));
                }
                if let Some(kpi) = kpis::get(tx, rec.kpi_id)? {
                    applied.push(kpi);
                }
            }
            Ok(applied)
        })?;
        info!(count = applied.len(), "Applied KPI weight recommendations");
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::model::{NewKickboard, NewKpi, Role};
    use crate::storage::rides::RideCompletion;
    use crate::storage::{kickboards, riders};
    use chrono::Utc;

    fn occ(id: i64, weight: f64, accident_count: u64, normal_count: u64) -> KpiOccurrences {
        KpiOccurrences {
            kpi_id: id,
            name: format!("kpi{id}"),
            weight,
            accident_count,
            normal_count,
        }
    }

    #[test]
    fn test_raw_ratio_cases() {
        assert!((raw_ratio(0.4, 0.1, 5.0) - 4.0).abs() < 1e-12);
        assert!((raw_ratio(0.4, 0.0, 5.0) - 5.0).abs() < f64::EPSILON);
        assert!((raw_ratio(0.0, 0.0, 5.0) - 1.0).abs() < f64::EPSILON);
        assert!(raw_ratio(0.0, 0.3, 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_insufficient_data_keeps_weights() {
        let report = recommend(
            &[occ(1, 3.0, 9, 1), occ(2, 7.5, 0, 40)],
            3,
            50,
            &AnalyzerConfig::default(),
        );
        assert!(!report.sufficient_data);
        for rec in &report.recommendations {
            assert!((rec.recommended_weight - rec.current_weight).abs() < f64::EPSILON);
            assert_eq!(rec.reason, INSUFFICIENT_DATA);
        }
    }

    #[test]
    fn test_absolute_strategy() {
        // freq_acc = 8/10, freq_norm = 4/20 -> ratio 4 -> weight * 2.
        let report = recommend(&[occ(1, 3.0, 8, 4)], 10, 20, &AnalyzerConfig::default());
        let rec = &report.recommendations[0];
        assert!((rec.ratio - 4.0).abs() < 1e-12);
        assert!((rec.recommended_weight - 6.0).abs() < 1e-9);
        assert!(rec.changes_weight());
    }

    #[test]
    fn test_clamped_and_rounded() {
        let config = AnalyzerConfig::default();
        let high = recommend(&[occ(1, 9.0, 10, 1)], 10, 20, &config);
        assert!((high.recommendations[0].recommended_weight - 10.0).abs() < f64::EPSILON);

        let low = recommend(&[occ(1, 1.0, 0, 10)], 10, 20, &config);
        assert!((low.recommendations[0].recommended_weight - 0.5).abs() < f64::EPSILON);

        // ratio = (1/10) / (2/20) = 1 -> sqrt = 1, 3.333 -> 3.33
        let rounded = recommend(&[occ(1, 3.333_33, 1, 2)], 10, 20, &config);
        assert!((rounded.recommendations[0].recommended_weight - 3.33).abs() < 1e-9);
    }

    #[test]
    fn test_unseen_in_normal_rides() {
        let report = recommend(&[occ(1, 2.0, 3, 0)], 10, 20, &AnalyzerConfig::default());
        let rec = &report.recommendations[0];
        assert!((rec.ratio - 5.0).abs() < f64::EPSILON);
        assert!((rec.recommended_weight - round2(2.0 * 5.0_f64.sqrt())).abs() < 1e-9);
        assert_eq!(rec.reason, "only observed on accident rides");
    }

    #[test]
    fn test_zero_thresholds_do_not_divide_by_zero() {
        let config = AnalyzerConfig {
            min_accident_rides: 0,
            min_normal_rides: 0,
            ..AnalyzerConfig::default()
        };
        let report = recommend(&[occ(1, 2.0, 0, 0)], 0, 0, &config);
        assert!(report.recommendations[0].recommended_weight.is_finite());
    }

    fn analyzer_with_history(accident_rides: usize, normal_rides: usize) -> WeightAnalyzer {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let here = GeoPoint::new(37.5, 127.0);
        storage
            .write(|tx| {
                riders::insert(tx, Some(1), "u1", Role::Rider)?;
                kickboards::insert(
                    tx,
                    &NewKickboard {
                        id: "K1".to_string(),
                        location: here,
                        battery: 80,
                        model: None,
                    },
                )?;
                let kpi = kpis::insert(
                    tx,
                    &NewKpi {
                        name: "overspeed".to_string(),
                        description: None,
                        weight: 2.0,
                    },
                )?;
                for i in 0..accident_rides + normal_rides {
                    let ride = rides::insert_active(tx, 1, "K1", here, Utc::now(), true)?;
                    rides::complete(
                        tx,
                        ride,
                        &RideCompletion {
                            end_location: here,
                            end_time: Utc::now(),
                            duration_min: 1,
                            distance_km: 1.0,
                            fare: 1300,
                            score: 98,
                            helmet_on: true,
                        },
                    )?;
                    if i < accident_rides {
                        rides::set_accident(tx, ride, true)?;
                        risk_events::insert(tx, ride, kpi, Utc::now(), here)?;
                    }
                }
                Ok(())
            })
            .unwrap();
        WeightAnalyzer::new(storage, AnalyzerConfig::default())
    }

    #[test]
    fn test_recommend_from_storage_and_apply() {
        let analyzer = analyzer_with_history(5, 10);
        let report = analyzer.recommend_kpi_weights().unwrap();
        assert_eq!(report.total_accident_rides, 5);
        assert_eq!(report.total_normal_rides, 10);
        assert!(report.sufficient_data);

        let rec = &report.recommendations[0];
        assert_eq!(rec.accident_count, 5);
        assert_eq!(rec.normal_count, 0);
        let expected = round2(2.0 * 5.0_f64.sqrt());
        assert!((rec.recommended_weight - expected).abs() < 1e-9);

        // Advisory only until applied.
        let kpi = analyzer.storage.read(|c| kpis::get(c, 1)).unwrap().unwrap();
        assert!((kpi.weight - 2.0).abs() < f64::EPSILON);

        let applied = analyzer.apply_report(&report).unwrap();
        assert_eq!(applied.len(), 1);
        assert!((applied[0].weight - expected).abs() < 1e-9);
    }

    #[test]
    fn test_apply_report_with_insufficient_data_is_noop() {
        let analyzer = analyzer_with_history(2, 3);
        let report = analyzer.recommend_kpi_weights().unwrap();
        assert!(!report.sufficient_data);
        assert!(analyzer.apply_report(&report).unwrap().is_empty());
    }

    #[test]
    fn test_apply_kpi_weight() {
        let analyzer = analyzer_with_history(0, 0);
        let kpi = analyzer.apply_kpi_weight(1, 4.25).unwrap();
        assert!((kpi.weight - 4.25).abs() < f64::EPSILON);
        assert!(analyzer.apply_kpi_weight(1, -1.0).unwrap_err().is_validation());
        assert!(analyzer.apply_kpi_weight(9, 1.0).unwrap_err().is_not_found());
    }
}
