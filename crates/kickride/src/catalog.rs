//! KPI catalog administration.

use std::sync::Arc;

use tracing::info;

use crate::error::{Error, Result};
use crate::model::{Kpi, KpiUpdate, NewKpi};
use crate::storage::{kpis, Storage};

/// Add, list and edit risk indicators.
#[derive(Debug, Clone)]
pub struct KpiCatalog {
    storage: Arc<Storage>,
}

impl KpiCatalog {
    /// Create the catalog over shared storage.
    #[must_use]
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Add a KPI.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a blank name or invalid weight and
    /// `Conflict` when the name exists in any letter case.
    pub fn add(&self, new: &NewKpi) -> Result<Kpi> {
        let name = validate_name(&new.name)?;
        Kpi::validate_weight(new.weight)?;
        let new = NewKpi {
            name: name.to_string(),
            ..new.clone()
        };

        let kpi = self.storage.write(|tx| {
            ensure_name_free(tx, &new.name, None)?;
            let id = kpis::insert(tx, &new)?;
            kpis::get(tx, id)?.ok_or_else(|| Error::not_found("kpi", id))
        })?;
        info!(kpi = %kpi.name, weight = kpi.weight, "Added KPI");
        Ok(kpi)
    }

    /// Fetch one KPI.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is unknown.
    pub fn get(&self, id: i64) -> Result<Kpi> {
        self.storage
            .read(|conn| kpis::get(conn, id))?
            .ok_or_else(|| Error::not_found("kpi", id))
    }

    /// The whole catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list(&self) -> Result<Vec<Kpi>> {
        self.storage.read(kpis::list)
    }

    /// Apply an allow-listed update.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty update, blank name or invalid
    /// weight, `Conflict` for a name already used by another KPI and
    /// `NotFound` if the id is unknown.
    pub fn update(&self, id: i64, update: &KpiUpdate) -> Result<Kpi> {
        if update.is_empty() {
            return Err(Error::validation("update contains no fields"));
        }
        let name = update.name.as_deref().map(validate_name).transpose()?;
        if let Some(weight) = update.weight {
            Kpi::validate_weight(weight)?;
        }
        let update = KpiUpdate {
            name: name.map(str::to_string),
            ..update.clone()
        };

        self.storage.write(|tx| {
            if let Some(name) = &update.name {
                ensure_name_free(tx, name, Some(id))?;
            }
            if !kpis::update(tx, id, &update)? {
                return Err(Error::not_found("kpi", id));
            }
            kpis::get(tx, id)?.ok_or_else(|| Error::not_found("kpi", id))
        })
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("KPI name cannot be empty"));
    }
    Ok(trimmed)
}

fn ensure_name_free(conn: &rusqlite::Connection, name: &str, except: Option<i64>) -> Result<()> {
    match kpis::find_by_name(conn, name)? {
        Some(existing) if Some(existing.id) != except => Err(Error::conflict(format!(
            "KPI name {name:?} is already used by KPI {}",
            existing.id
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> KpiCatalog {
        KpiCatalog::new(Arc::new(Storage::open_in_memory().unwrap()))
    }

    fn new_kpi(name: &str, weight: f64) -> NewKpi {
        NewKpi {
            name: name.to_string(),
            description: None,
            weight,
        }
    }

    #[test]
    fn test_add_and_list() {
        let catalog = catalog();
        let brake = catalog.add(&new_kpi(" sudden_brake ", 5.0)).unwrap();
        assert_eq!(brake.name, "sudden_brake");
        catalog.add(&new_kpi("overspeed", 10.0)).unwrap();

        let all = catalog.list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], brake);
        assert_eq!(catalog.get(brake.id).unwrap(), brake);
    }

    #[test]
    fn test_add_rejects_duplicates_and_bad_weights() {
        let catalog = catalog();
        catalog.add(&new_kpi("overspeed", 10.0)).unwrap();
        assert!(catalog.add(&new_kpi("OverSpeed", 1.0)).unwrap_err().is_conflict());
        assert!(catalog.add(&new_kpi("", 1.0)).unwrap_err().is_validation());
        assert!(catalog.add(&new_kpi("x", -2.0)).unwrap_err().is_validation());
        assert!(catalog.add(&new_kpi("y", f64::NAN)).unwrap_err().is_validation());
    }

    #[test]
    fn test_update() {
        let catalog = catalog();
        let kpi = catalog.add(&new_kpi("swerve", 3.0)).unwrap();
        catalog.add(&new_kpi("overspeed", 10.0)).unwrap();

        let updated = catalog
            .update(
                kpi.id,
                &KpiUpdate {
                    description: Some("sharp lateral movement".to_string()),
                    weight: Some(4.5),
                    ..KpiUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "swerve");
        assert!((updated.weight - 4.5).abs() < f64::EPSILON);

        // Renaming to its own name in another case is allowed.
        let renamed = catalog
            .update(
                kpi.id,
                &KpiUpdate {
                    name: Some("Swerve".to_string()),
                    ..KpiUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.name, "Swerve");

        let clash = KpiUpdate {
            name: Some("OVERSPEED".to_string()),
            ..KpiUpdate::default()
        };
        assert!(catalog.update(kpi.id, &clash).unwrap_err().is_conflict());
        assert!(catalog.update(kpi.id, &KpiUpdate::default()).unwrap_err().is_validation());
        assert!(catalog
            .update(
                99,
                &KpiUpdate {
                    weight: Some(1.0),
                    ..KpiUpdate::default()
                }
            )
            .unwrap_err()
            .is_not_found());
    }
}
