//! Rider queries.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::model::{Rider, Role};

use super::{conversion_error, limit_param};

/// Insert a rider. When `id` is `None` the database assigns one.
///
/// # Errors
///
/// Returns a database error, including a constraint failure on a duplicate id.
pub fn insert(conn: &Connection, id: Option<i64>, display_name: &str, role: Role) -> Result<i64> {
    conn.execute(
        "INSERT INTO riders (id, display_name, role) VALUES (?1, ?2, ?3)",
        params![id, display_name, role.to_string()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Fetch a rider by id.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get(conn: &Connection, id: i64) -> Result<Option<Rider>> {
    let rider = conn
        .query_row(
            "SELECT id, display_name, safety_score, role FROM riders WHERE id = ?1",
            [id],
            row_to_rider,
        )
        .optional()?;
    Ok(rider)
}

/// Whether a rider with this id exists.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn exists(conn: &Connection, id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM riders WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Read only the rolling score. `None` when the rider is unknown, `Some(None)`
/// when the rider has no score yet.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn safety_score(conn: &Connection, id: i64) -> Result<Option<Option<f64>>> {
    let score = conn
        .query_row(
            "SELECT safety_score FROM riders WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(score)
}

/// Overwrite the rolling score. Returns `false` if the rider is unknown.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn set_safety_score(conn: &Connection, id: i64, score: f64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE riders SET safety_score = ?2 WHERE id = ?1",
        params![id, score],
    )?;
    Ok(affected > 0)
}

/// Change the display name. Returns `false` if the rider is unknown.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn set_display_name(conn: &Connection, id: i64, display_name: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE riders SET display_name = ?2 WHERE id = ?1",
        params![id, display_name],
    )?;
    Ok(affected > 0)
}

/// One keyset page of rider ids with the given role, ascending.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn ids_after(conn: &Connection, role: Role, after: i64, limit: usize) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM riders WHERE role = ?1 AND id > ?2 ORDER BY id LIMIT ?3",
    )?;
    let ids = stmt
        .query_map(params![role.to_string(), after, limit_param(limit)], |row| {
            row.get(0)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn row_to_rider(row: &Row<'_>) -> rusqlite::Result<Rider> {
    let role: String = row.get(3)?;
    Ok(Rider {
        id: row.get(0)?,
        display_name: row.get(1)?,
        safety_score: row.get(2)?,
        role: role
            .parse()
            .map_err(|e: crate::error::Error| conversion_error(3, e.to_string()))?,
    })
}
