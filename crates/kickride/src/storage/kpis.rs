//! KPI catalog queries.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::model::{Kpi, KpiUpdate, NewKpi};

const SELECT_COLUMNS: &str = "SELECT id, name, description, weight FROM kpis";

/// Insert a KPI and return its id.
///
/// # Errors
///
/// Returns a database error, including a constraint failure when the name is
/// already taken in any letter case.
pub fn insert(conn: &Connection, kpi: &NewKpi) -> Result<i64> {
    conn.execute(
        "INSERT INTO kpis (name, description, weight) VALUES (?1, ?2, ?3)",
        params![kpi.name, kpi.description, kpi.weight],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Fetch a KPI by id.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get(conn: &Connection, id: i64) -> Result<Option<Kpi>> {
    let kpi = conn
        .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), [id], row_to_kpi)
        .optional()?;
    Ok(kpi)
}

/// Fetch a KPI by name, ignoring case.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Kpi>> {
    let kpi = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE name = ?1 COLLATE NOCASE"),
            [name],
            row_to_kpi,
        )
        .optional()?;
    Ok(kpi)
}

/// List the whole catalog ordered by id.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn list(conn: &Connection) -> Result<Vec<Kpi>> {
    let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))?;
    let kpis = stmt
        .query_map([], row_to_kpi)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(kpis)
}

/// Apply an allow-listed update. Returns `false` if the KPI is unknown.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn update(conn: &Connection, id: i64, update: &KpiUpdate) -> Result<bool> {
    let affected = conn.execute(
        r"
        UPDATE kpis SET
            name = COALESCE(?2, name),
            description = COALESCE(?3, description),
            weight = COALESCE(?4, weight)
        WHERE id = ?1
        ",
        params![id, update.name, update.description, update.weight],
    )?;
    Ok(affected > 0)
}

/// Set the weight of one KPI. Returns `false` if the KPI is unknown.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn set_weight(conn: &Connection, id: i64, weight: f64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE kpis SET weight = ?2 WHERE id = ?1",
        params![id, weight],
    )?;
    Ok(affected > 0)
}

fn row_to_kpi(row: &Row<'_>) -> rusqlite::Result<Kpi> {
    Ok(Kpi {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        weight: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    fn new_kpi(name: &str, weight: f64) -> NewKpi {
        NewKpi {
            name: name.to_string(),
            description: None,
            weight,
        }
    }

    #[test]
    fn test_find_by_name_ignores_case() {
        let storage = Storage::open_in_memory().unwrap();
        let id = storage
            .write(|tx| insert(tx, &new_kpi("Sudden_Brake", 5.0)))
            .unwrap();

        let found = storage.read(|c| find_by_name(c, "sudden_brake")).unwrap();
        assert_eq!(found.map(|k| k.id), Some(id));
        assert!(storage.read(|c| find_by_name(c, "nope")).unwrap().is_none());
    }

    #[test]
    fn test_name_unique_ignoring_case() {
        let storage = Storage::open_in_memory().unwrap();
        storage.write(|tx| insert(tx, &new_kpi("overspeed", 3.0))).unwrap();
        assert!(storage
            .write(|tx| insert(tx, &new_kpi("OVERSPEED", 4.0)))
            .is_err());
    }

    #[test]
    fn test_update_and_set_weight() {
        let storage = Storage::open_in_memory().unwrap();
        let id = storage.write(|tx| insert(tx, &new_kpi("a", 1.0))).unwrap();

        storage
            .write(|tx| {
                update(
                    tx,
                    id,
                    &KpiUpdate {
                        description: Some("desc".to_string()),
                        ..KpiUpdate::default()
                    },
                )
            })
            .unwrap();
        assert!(storage.write(|tx| set_weight(tx, id, 2.5)).unwrap());
        assert!(!storage.write(|tx| set_weight(tx, id + 1, 2.5)).unwrap());

        let kpi = storage.read(|c| get(c, id)).unwrap().unwrap();
        assert_eq!(kpi.name, "a");
        assert_eq!(kpi.description.as_deref(), Some("desc"));
        assert!((kpi.weight - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_negative_weight_rejected_by_schema() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(storage.write(|tx| insert(tx, &new_kpi("neg", -1.0))).is_err());
    }
}
