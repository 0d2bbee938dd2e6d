//! Ride path audit records.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::model::PathPoint;

/// Store the path of a ride, replacing any earlier copy so retries are
/// idempotent.
///
/// # Errors
///
/// Returns an error if serialisation or the database operation fails.
pub fn upsert(conn: &Connection, ride_id: i64, points: &[PathPoint]) -> Result<()> {
    let data = serde_json::to_string(points)?;
    conn.execute(
        r"
        INSERT INTO ride_paths (ride_id, path_data) VALUES (?1, ?2)
        ON CONFLICT(ride_id) DO UPDATE SET path_data = excluded.path_data
        ",
        params![ride_id, data],
    )?;
    Ok(())
}

/// Load the stored path of a ride.
///
/// # Errors
///
/// Returns an error if the stored JSON is malformed or the query fails.
pub fn get(conn: &Connection, ride_id: i64) -> Result<Option<Vec<PathPoint>>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT path_data FROM ride_paths WHERE ride_id = ?1",
            [ride_id],
            |row| row.get(0),
        )
        .optional()?;
    match data {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::model::{NewKickboard, Role};
    use crate::storage::{kickboards, riders, rides, Storage};
    use chrono::Utc;

    fn with_ride() -> (Storage, i64) {
        let storage = Storage::open_in_memory().unwrap();
        let ride = storage
            .write(|tx| {
                riders::insert(tx, Some(1), "u1", Role::Rider)?;
                kickboards::insert(
                    tx,
                    &NewKickboard {
                        id: "K1".to_string(),
                        location: GeoPoint::new(0.0, 0.0),
                        battery: 50,
                        model: None,
                    },
                )?;
                rides::insert_active(tx, 1, "K1", GeoPoint::new(0.0, 0.0), Utc::now(), true)
            })
            .unwrap();
        (storage, ride)
    }

    fn point(lat: f64, speed: Option<f64>) -> PathPoint {
        PathPoint {
            location: GeoPoint::new(lat, 127.0),
            speed,
            timestamp: None,
        }
    }

    #[test]
    fn test_upsert_replaces() {
        let (storage, ride) = with_ride();
        storage
            .write(|tx| upsert(tx, ride, &[point(37.0, Some(12.0))]))
            .unwrap();
        storage
            .write(|tx| upsert(tx, ride, &[point(37.0, None), point(37.1, None)]))
            .unwrap();

        let path = storage.read(|c| get(c, ride)).unwrap().unwrap();
        assert_eq!(path.len(), 2);
        assert!(path[0].speed.is_none());
    }

    #[test]
    fn test_get_missing() {
        let (storage, ride) = with_ride();
        assert!(storage.read(|c| get(c, ride)).unwrap().is_none());
    }

    #[test]
    fn test_unknown_ride_rejected() {
        let (storage, ride) = with_ride();
        assert!(storage.write(|tx| upsert(tx, ride + 100, &[])).is_err());
    }
}
