//! Kickboard queries.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::geo::{self, GeoPoint};
use crate::model::{Kickboard, KickboardStatus, KickboardUpdate, NewKickboard};

use super::{conversion_error, decode_point};

const SELECT_COLUMNS: &str = "SELECT id, status, location, battery, model FROM kickboards";

/// Insert a new kickboard in the `available` state.
///
/// # Errors
///
/// Returns a database error, including a constraint failure on a duplicate id.
pub fn insert(conn: &Connection, kickboard: &NewKickboard) -> Result<()> {
    conn.execute(
        "INSERT INTO kickboards (id, status, location, battery, model) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            kickboard.id,
            KickboardStatus::Available.to_string(),
            geo::to_point(kickboard.location),
            kickboard.battery,
            kickboard.model,
        ],
    )?;
    Ok(())
}

/// Fetch a kickboard by id.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get(conn: &Connection, id: &str) -> Result<Option<Kickboard>> {
    let kickboard = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            [id],
            row_to_kickboard,
        )
        .optional()?;
    Ok(kickboard)
}

/// List kickboards, optionally restricted to one status.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn list(conn: &Connection, status: Option<KickboardStatus>) -> Result<Vec<Kickboard>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_COLUMNS} WHERE (?1 IS NULL OR status = ?1) ORDER BY id"
    ))?;
    let kickboards = stmt
        .query_map([status.map(|s| s.to_string())], row_to_kickboard)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(kickboards)
}

/// Apply an allow-listed update. Returns `false` if the kickboard is unknown.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn update(conn: &Connection, id: &str, update: &KickboardUpdate) -> Result<bool> {
    let affected = conn.execute(
        r"
        UPDATE kickboards SET
            location = COALESCE(?2, location),
            battery = COALESCE(?3, battery),
            model = COALESCE(?4, model)
        WHERE id = ?1
        ",
        params![
            id,
            update.location.map(geo::to_point),
            update.battery,
            update.model,
        ],
    )?;
    Ok(affected > 0)
}

/// Compare-and-set `available -> in_use`. Returns `true` only for the caller
/// that won the transition.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn try_acquire(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE kickboards SET status = 'in_use' WHERE id = ?1 AND status = 'available'",
        [id],
    )?;
    Ok(affected == 1)
}

/// Move a kickboard to its return position and make it `available` if it is
/// currently `in_use`. A kickboard put into maintenance mid-ride keeps that
/// status. Returns `false` if the kickboard is unknown.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn release(conn: &Connection, id: &str, location: GeoPoint) -> Result<bool> {
    let affected = conn.execute(
        r"
        UPDATE kickboards SET
            location = ?2,
            status = CASE WHEN status = 'in_use' THEN 'available' ELSE status END
        WHERE id = ?1
        ",
        params![id, geo::to_point(location)],
    )?;
    Ok(affected > 0)
}

/// Set the status unconditionally. Returns `false` if the kickboard is unknown.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn set_status(conn: &Connection, id: &str, status: KickboardStatus) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE kickboards SET status = ?2 WHERE id = ?1",
        params![id, status.to_string()],
    )?;
    Ok(affected > 0)
}

/// Set the status only if it currently equals `expected`.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn transition(
    conn: &Connection,
    id: &str,
    expected: KickboardStatus,
    next: KickboardStatus,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE kickboards SET status = ?3 WHERE id = ?1 AND status = ?2",
        params![id, expected.to_string(), next.to_string()],
    )?;
    Ok(affected == 1)
}

/// Delete a kickboard. Returns `false` if it did not exist.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM kickboards WHERE id = ?1", [id])?;
    Ok(affected > 0)
}

fn row_to_kickboard(row: &Row<'_>) -> rusqlite::Result<Kickboard> {
    let status: String = row.get(1)?;
    let location: String = row.get(2)?;

    Ok(Kickboard {
        id: row.get(0)?,
        status: status
            .parse()
            .map_err(|e: crate::error::Error| conversion_error(1, e.to_string()))?,
        location: decode_point(2, &location)?,
        battery: row.get(3)?,
        model: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    fn seeded() -> Storage {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .write(|tx| {
                insert(
                    tx,
                    &NewKickboard {
                        id: "K1".to_string(),
                        location: GeoPoint::new(37.5, 127.0),
                        battery: 90,
                        model: Some("S1".to_string()),
                    },
                )
            })
            .unwrap();
        storage
    }

    #[test]
    fn test_insert_and_get() {
        let storage = seeded();
        let kb = storage.read(|c| get(c, "K1")).unwrap().unwrap();
        assert_eq!(kb.status, KickboardStatus::Available);
        assert_eq!(kb.battery, 90);
        assert_eq!(kb.model.as_deref(), Some("S1"));
        assert!((kb.location.lat - 37.5).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let storage = seeded();
        let result = storage.write(|tx| {
            insert(
                tx,
                &NewKickboard {
                    id: "K1".to_string(),
                    location: GeoPoint::new(0.0, 0.0),
                    battery: 10,
                    model: None,
                },
            )
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_try_acquire_only_once() {
        let storage = seeded();
        assert!(storage.write(|tx| try_acquire(tx, "K1")).unwrap());
        assert!(!storage.write(|tx| try_acquire(tx, "K1")).unwrap());
        assert!(!storage.write(|tx| try_acquire(tx, "nope")).unwrap());
    }

    #[test]
    fn test_release_keeps_maintenance() {
        let storage = seeded();
        storage
            .write(|tx| set_status(tx, "K1", KickboardStatus::Maintenance))
            .unwrap();
        let here = GeoPoint::new(1.0, 2.0);
        assert!(storage.write(|tx| release(tx, "K1", here)).unwrap());

        let kb = storage.read(|c| get(c, "K1")).unwrap().unwrap();
        assert_eq!(kb.status, KickboardStatus::Maintenance);
        assert_eq!(kb.location, here);
    }

    #[test]
    fn test_update_is_partial() {
        let storage = seeded();
        let changed = storage
            .write(|tx| {
                update(
                    tx,
                    "K1",
                    &KickboardUpdate {
                        battery: Some(40),
                        ..KickboardUpdate::default()
                    },
                )
            })
            .unwrap();
        assert!(changed);

        let kb = storage.read(|c| get(c, "K1")).unwrap().unwrap();
        assert_eq!(kb.battery, 40);
        assert_eq!(kb.model.as_deref(), Some("S1"));
    }

    #[test]
    fn test_list_by_status() {
        let storage = seeded();
        assert_eq!(storage.read(|c| list(c, None)).unwrap().len(), 1);
        assert!(storage
            .read(|c| list(c, Some(KickboardStatus::InUse)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_transition_requires_expected_status() {
        let storage = seeded();
        let moved = storage
            .write(|tx| {
                transition(
                    tx,
                    "K1",
                    KickboardStatus::Maintenance,
                    KickboardStatus::Available,
                )
            })
            .unwrap();
        assert!(!moved);
    }
}
