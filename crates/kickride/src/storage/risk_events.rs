//! Risk event queries.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::error::Result;
use crate::geo::{self, GeoPoint};
use crate::model::{RecordedRiskEvent, RiskEvent};

use super::{decode_point, decode_time, encode_time};

/// Occurrences of one KPI across completed rides.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiOccurrences {
    /// KPI id.
    pub kpi_id: i64,
    /// KPI name.
    pub name: String,
    /// Current weight.
    pub weight: f64,
    /// Events recorded on accident rides.
    pub accident_count: u64,
    /// Events recorded on normal rides.
    pub normal_count: u64,
}

/// Insert one event and return its id.
///
/// # Errors
///
/// Returns a database error, including a foreign-key failure for an unknown
/// ride or KPI.
pub fn insert(
    conn: &Connection,
    ride_id: i64,
    kpi_id: i64,
    timestamp: DateTime<Utc>,
    location: GeoPoint,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO risk_events (ride_id, kpi_id, timestamp, location) VALUES (?1, ?2, ?3, ?4)",
        params![ride_id, kpi_id, encode_time(timestamp), geo::to_point(location)],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Events of one ride joined with their KPI, in detection order.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn for_ride(conn: &Connection, ride_id: i64) -> Result<Vec<RecordedRiskEvent>> {
    let mut stmt = conn.prepare(
        r"
        SELECT e.id, e.ride_id, e.kpi_id, e.timestamp, e.location, k.name, k.weight
        FROM risk_events e
        JOIN kpis k ON k.id = e.kpi_id
        WHERE e.ride_id = ?1
        ORDER BY e.timestamp, e.id
        ",
    )?;
    let events = stmt
        .query_map([ride_id], |row| {
            let timestamp: String = row.get(3)?;
            let location: String = row.get(4)?;
            Ok(RecordedRiskEvent {
                event: RiskEvent {
                    id: row.get(0)?,
                    ride_id: row.get(1)?,
                    kpi_id: row.get(2)?,
                    timestamp: decode_time(3, &timestamp)?,
                    location: decode_point(4, &location)?,
                },
                kpi_name: row.get(5)?,
                weight: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(events)
}

/// Sum of the current weights of a ride's events, leaving out events of
/// `excluded_kpi`.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn weight_sum(conn: &Connection, ride_id: i64, excluded_kpi: Option<i64>) -> Result<f64> {
    let sum = conn.query_row(
        r"
        SELECT COALESCE(SUM(k.weight), 0.0)
        FROM risk_events e
        JOIN kpis k ON k.id = e.kpi_id
        WHERE e.ride_id = ?1 AND (?2 IS NULL OR e.kpi_id <> ?2)
        ",
        params![ride_id, excluded_kpi],
        |row| row.get(0),
    )?;
    Ok(sum)
}

/// Per-KPI event counts split by the accident flag of completed rides.
/// Every KPI is listed, including ones that never occurred.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn occurrences(conn: &Connection) -> Result<Vec<KpiOccurrences>> {
    let mut stmt = conn.prepare(
        r"
        SELECT k.id, k.name, k.weight,
               COALESCE(SUM(CASE WHEN r.accident_flag = 1 THEN 1 ELSE 0 END), 0),
               COALESCE(SUM(CASE WHEN r.accident_flag = 0 THEN 1 ELSE 0 END), 0)
        FROM kpis k
        LEFT JOIN risk_events e ON e.kpi_id = k.id
        LEFT JOIN rides r ON r.id = e.ride_id AND r.end_time IS NOT NULL
        GROUP BY k.id, k.name, k.weight
        ORDER BY k.id
        ",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let accident: i64 = row.get(3)?;
            let normal: i64 = row.get(4)?;
            Ok(KpiOccurrences {
                kpi_id: row.get(0)?,
                name: row.get(1)?,
                weight: row.get(2)?,
                accident_count: u64::try_from(accident).unwrap_or(0),
                normal_count: u64::try_from(normal).unwrap_or(0),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
