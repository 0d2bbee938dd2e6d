//! Ride queries.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::geo::{self, GeoPoint};
use crate::model::{ActiveRide, Ride};

use super::{decode_point, decode_time, encode_time, limit_param};

const SELECT_COLUMNS: &str = r"
    SELECT id, rider_id, kickboard_id, start_location, end_location, start_time,
           end_time, duration_min, distance_km, fare, score, helmet_on, accident_flag
    FROM rides";

/// Values written when a ride is terminated.
#[derive(Debug, Clone, PartialEq)]
pub struct RideCompletion {
    /// Return position.
    pub end_location: GeoPoint,
    /// Return time.
    pub end_time: DateTime<Utc>,
    /// Whole minutes ridden.
    pub duration_min: i64,
    /// Distance ridden.
    pub distance_km: f64,
    /// Charged fare.
    pub fare: i64,
    /// Ride safety score.
    pub score: u8,
    /// Effective helmet flag.
    pub helmet_on: bool,
}

/// A completed ride as seen by the batch recompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedRideKey {
    /// Ride id.
    pub id: i64,
    /// Stored helmet flag.
    pub helmet_on: bool,
}

/// Insert an active ride and return its id.
///
/// # Errors
///
/// Returns a database error, including a unique-index failure when the
/// kickboard already has an active ride.
pub fn insert_active(
    conn: &Connection,
    rider_id: i64,
    kickboard_id: &str,
    start_location: GeoPoint,
    start_time: DateTime<Utc>,
    helmet_on: bool,
) -> Result<i64> {
    conn.execute(
        r"
        INSERT INTO rides (rider_id, kickboard_id, start_location, start_time, helmet_on)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ",
        params![
            rider_id,
            kickboard_id,
            geo::to_point(start_location),
            encode_time(start_time),
            helmet_on,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Fetch a ride by id.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get(conn: &Connection, id: i64) -> Result<Option<Ride>> {
    let ride = conn
        .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), [id], row_to_ride)
        .optional()?;
    Ok(ride)
}

/// Terminate an active ride. Returns `false` if the ride was already
/// completed (or never existed), in which case nothing is written.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn complete(conn: &Connection, id: i64, done: &RideCompletion) -> Result<bool> {
    let affected = conn.execute(
        r"
        UPDATE rides SET
            end_location = ?2, end_time = ?3, duration_min = ?4, distance_km = ?5,
            fare = ?6, score = ?7, helmet_on = ?8
        WHERE id = ?1 AND end_time IS NULL
        ",
        params![
            id,
            geo::to_point(done.end_location),
            encode_time(done.end_time),
            done.duration_min,
            done.distance_km,
            done.fare,
            done.score,
            done.helmet_on,
        ],
    )?;
    Ok(affected == 1)
}

/// A rider's rides, most recent first.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn history(conn: &Connection, rider_id: i64, limit: usize) -> Result<Vec<Ride>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_COLUMNS} WHERE rider_id = ?1 ORDER BY start_time DESC, id DESC LIMIT ?2"
    ))?;
    let rides = stmt
        .query_map(params![rider_id, limit_param(limit)], row_to_ride)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rides)
}

/// All active rides joined with live kickboard data and the rider's score.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn active(conn: &Connection) -> Result<Vec<ActiveRide>> {
    let mut stmt = conn.prepare(
        r"
        SELECT r.id, r.rider_id, r.kickboard_id, r.start_time,
               COALESCE(k.location, r.start_location), COALESCE(k.battery, 0), u.safety_score
        FROM rides r
        LEFT JOIN kickboards k ON k.id = r.kickboard_id
        LEFT JOIN riders u ON u.id = r.rider_id
        WHERE r.end_time IS NULL
        ORDER BY r.start_time DESC
        ",
    )?;
    let rides = stmt
        .query_map([], |row| {
            let start_time: String = row.get(3)?;
            let location: String = row.get(4)?;
            Ok(ActiveRide {
                ride_id: row.get(0)?,
                rider_id: row.get(1)?,
                kickboard_id: row.get(2)?,
                start_time: decode_time(3, &start_time)?,
                location: decode_point(4, &location)?,
                battery: row.get(5)?,
                safety_score: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rides)
}

/// Id of the active ride on a kickboard, if any.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn active_for_kickboard(conn: &Connection, kickboard_id: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM rides WHERE kickboard_id = ?1 AND end_time IS NULL",
            [kickboard_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Set or clear the accident flag. Returns `false` if the ride is unknown.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn set_accident(conn: &Connection, id: i64, flag: bool) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE rides SET accident_flag = ?2 WHERE id = ?1",
        params![id, flag],
    )?;
    Ok(affected > 0)
}

/// Completed accident rides that ended at or after `since`, newest first.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn accidents_since(conn: &Connection, since: DateTime<Utc>, limit: usize) -> Result<Vec<Ride>> {
    let mut stmt = conn.prepare(&format!(
        r"{SELECT_COLUMNS}
        WHERE accident_flag = 1 AND end_time IS NOT NULL AND end_time >= ?1
        ORDER BY end_time DESC LIMIT ?2"
    ))?;
    let rides = stmt
        .query_map(params![encode_time(since), limit_param(limit)], row_to_ride)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rides)
}

/// Number of completed rides split into `(accident, normal)`.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn completed_counts(conn: &Connection) -> Result<(u64, u64)> {
    let (accident, normal): (i64, i64) = conn.query_row(
        r"
        SELECT COALESCE(SUM(accident_flag = 1), 0), COALESCE(SUM(accident_flag = 0), 0)
        FROM rides WHERE end_time IS NOT NULL
        ",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok((
        u64::try_from(accident).unwrap_or(0),
        u64::try_from(normal).unwrap_or(0),
    ))
}

/// One keyset page of completed rides, ascending by id.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn completed_after(conn: &Connection, after: i64, limit: usize) -> Result<Vec<CompletedRideKey>> {
    let mut stmt = conn.prepare(
        r"
        SELECT id, helmet_on FROM rides
        WHERE end_time IS NOT NULL AND id > ?1
        ORDER BY id LIMIT ?2
        ",
    )?;
    let keys = stmt
        .query_map(params![after, limit_param(limit)], |row| {
            Ok(CompletedRideKey {
                id: row.get(0)?,
                helmet_on: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(keys)
}

/// Overwrite the score of a ride.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn set_score(conn: &Connection, id: i64, score: u8) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE rides SET score = ?2 WHERE id = ?1",
        params![id, score],
    )?;
    Ok(affected > 0)
}

/// Mean score of a rider's completed, scored rides.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn mean_completed_score(conn: &Connection, rider_id: i64) -> Result<Option<f64>> {
    let mean = conn.query_row(
        r"
        SELECT AVG(score) FROM rides
        WHERE rider_id = ?1 AND end_time IS NOT NULL AND score IS NOT NULL
        ",
        [rider_id],
        |row| row.get(0),
    )?;
    Ok(mean)
}

fn row_to_ride(row: &Row<'_>) -> rusqlite::Result<Ride> {
    let start_location: String = row.get(3)?;
    let end_location: Option<String> = row.get(4)?;
    let start_time: String = row.get(5)?;
    let end_time: Option<String> = row.get(6)?;

    Ok(Ride {
        id: row.get(0)?,
        rider_id: row.get(1)?,
        kickboard_id: row.get(2)?,
        start_location: decode_point(3, &start_location)?,
        end_location: end_location.map(|s| decode_point(4, &s)).transpose()?,
        start_time: decode_time(5, &start_time)?,
        end_time: end_time.map(|s| decode_time(6, &s)).transpose()?,
        duration_min: row.get(7)?,
        distance_km: row.get(8)?,
        fare: row.get(9)?,
        score: row.get(10)?,
        helmet_on: row.get(11)?,
        accident_flag: row.get(12)?,
    })
}
