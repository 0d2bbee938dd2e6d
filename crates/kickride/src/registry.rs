//! Device registry: the kickboard availability state machine.
//!
//! `available -> in_use` happens only through the compare-and-set executed by
//! ride start; `in_use -> available` only through ride end. Administrators
//! move kickboards in and out of `maintenance` here.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::geo::{self, GeoPoint};
use crate::model::{Kickboard, KickboardStatus, KickboardUpdate, NewKickboard};
use crate::storage::{kickboards, rides, Storage};

/// An available kickboard and how far it is from the query point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyKickboard {
    /// The kickboard.
    #[serde(flatten)]
    pub kickboard: Kickboard,
    /// Distance from the query point in metres.
    pub distance_m: f64,
}

/// Administrative access to the kickboard inventory.
#[derive(Debug, Clone)]
pub struct KickboardRegistry {
    storage: Arc<Storage>,
}

impl KickboardRegistry {
    /// Create a registry over shared storage.
    #[must_use]
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Register a new kickboard as `available`.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a blank id, a battery above 100 or an invalid
    /// location, and `Conflict` when the id is already registered.
    pub fn register(&self, new: &NewKickboard) -> Result<Kickboard> {
        if new.id.trim().is_empty() {
            return Err(Error::validation("kickboard id cannot be empty"));
        }
        validate_battery(new.battery)?;
        new.location.validate()?;

        self.storage.write(|tx| {
            if kickboards::get(tx, &new.id)?.is_some() {
                return Err(Error::conflict(format!(
                    "kickboard {} is already registered",
                    new.id
                )));
            }
            kickboards::insert(tx, new)?;
            info!(kickboard = %new.id, "Registered kickboard");
            kickboards::get(tx, &new.id)?.ok_or_else(|| Error::not_found("kickboard", &new.id))
        })
    }

    /// Fetch one kickboard.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is unknown.
    pub fn get(&self, id: &str) -> Result<Kickboard> {
        self.storage
            .read(|conn| kickboards::get(conn, id))?
            .ok_or_else(|| Error::not_found("kickboard", id))
    }

    /// List kickboards, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list(&self, status: Option<KickboardStatus>) -> Result<Vec<Kickboard>> {
        self.storage.read(|conn| kickboards::list(conn, status))
    }

    /// Apply an allow-listed update.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty or out-of-range update and
    /// `NotFound` if the id is unknown.
    pub fn update(&self, id: &str, update: &KickboardUpdate) -> Result<Kickboard> {
        if update.is_empty() {
            return Err(Error::validation("update contains no fields"));
        }
        if let Some(battery) = update.battery {
            validate_battery(battery)?;
        }
        if let Some(location) = update.location {
            location.validate()?;
        }

        self.storage.write(|tx| {
            if !kickboards::update(tx, id, update)? {
                return Err(Error::not_found("kickboard", id));
            }
            kickboards::get(tx, id)?.ok_or_else(|| Error::not_found("kickboard", id))
        })
    }

    /// Withdraw a kickboard for maintenance. Allowed from `available` and
    /// from `in_use`; the active ride can still be ended normally.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is unknown and `Conflict` if the
    /// kickboard is already in maintenance.
    pub fn set_maintenance(&self, id: &str) -> Result<Kickboard> {
        self.storage.write(|tx| {
            let current = kickboards::get(tx, id)?.ok_or_else(|| Error::not_found("kickboard", id))?;
            if current.status == KickboardStatus::Maintenance {
                return Err(Error::conflict(format!(
                    "kickboard {id} is already in maintenance"
                )));
            }
            kickboards::set_status(tx, id, KickboardStatus::Maintenance)?;
            info!(kickboard = %id, from = %current.status, "Kickboard moved to maintenance");
            Ok(Kickboard {
                status: KickboardStatus::Maintenance,
                ..current
            })
        })
    }

    /// Bring a kickboard back from maintenance. A kickboard withdrawn during
    /// a ride that is still active returns to `in_use`, otherwise to
    /// `available`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is unknown and `Conflict` unless the
    /// kickboard is currently in maintenance.
    pub fn return_from_maintenance(&self, id: &str) -> Result<Kickboard> {
        self.storage.write(|tx| {
            let current = kickboards::get(tx, id)?.ok_or_else(|| Error::not_found("kickboard", id))?;
            if current.status != KickboardStatus::Maintenance {
                return Err(Error::conflict(format!(
                    "kickboard {id} is {}, not in maintenance",
                    current.status
                )));
            }

            let next = if rides::active_for_kickboard(tx, id)?.is_some() {
                KickboardStatus::InUse
            } else {
                KickboardStatus::Available
            };
            kickboards::transition(tx, id, KickboardStatus::Maintenance, next)?;
            info!(kickboard = %id, to = %next, "Kickboard returned from maintenance");
            Ok(Kickboard {
                status: next,
                ..current
            })
        })
    }

    /// Remove a kickboard from the inventory.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is unknown and `Conflict` while the
    /// kickboard is in use or still bound to an active ride.
    pub fn delete(&self, id: &str) -> Result<()> {
        self.storage.write(|tx| {
            let current = kickboards::get(tx, id)?.ok_or_else(|| Error::not_found("kickboard", id))?;
            if current.status == KickboardStatus::InUse
                || rides::active_for_kickboard(tx, id)?.is_some()
            {
                return Err(Error::conflict(format!(
                    "kickboard {id} is in use and cannot be deleted"
                )));
            }
            kickboards::delete(tx, id)?;
            info!(kickboard = %id, "Deleted kickboard");
            Ok(())
        })
    }

    /// Available kickboards within `radius_m` metres of `center`, nearest first.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an invalid center or a radius that is not a
    /// positive number.
    pub fn nearby(&self, center: GeoPoint, radius_m: f64) -> Result<Vec<NearbyKickboard>> {
        center.validate()?;
        if !(radius_m.is_finite() && radius_m > 0.0) {
            return Err(Error::validation(format!(
                "radius must be a positive number of metres, got {radius_m}"
            )));
        }

        let available = self.list(Some(KickboardStatus::Available))?;
        let mut found: Vec<NearbyKickboard> = available
            .into_iter()
            .map(|kickboard| {
                let distance_m = geo::distance_km(center, kickboard.location) * 1000.0;
                NearbyKickboard {
                    kickboard,
                    distance_m,
                }
            })
            .filter(|n| n.distance_m <= radius_m)
            .collect();
        found.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        Ok(found)
    }
}

fn validate_battery(battery: u8) -> Result<()> {
    if battery > 100 {
        return Err(Error::validation(format!(
            "battery must be between 0 and 100, got {battery}"
        )));
    }
    Ok(())
}
