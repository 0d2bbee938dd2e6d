//! Rider accounts.
//!
//! Identity is owned by an external provider; the engine only stores the id
//! it is handed, a display name, the role and the rolling safety score.

use std::sync::Arc;

use tracing::info;

use crate::error::{Error, Result};
use crate::model::{Rider, RiderUpdate, Role};
use crate::storage::{riders, Storage};

/// Registration and profile updates for riders.
#[derive(Debug, Clone)]
pub struct RiderAccounts {
    storage: Arc<Storage>,
}

impl RiderAccounts {
    /// Create the service over shared storage.
    #[must_use]
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Register a rider. With `id` set, the provider's id is kept verbatim.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a blank name or non-positive id, and
    /// `Conflict` when the id is taken.
    pub fn register(&self, id: Option<i64>, display_name: &str, role: Role) -> Result<Rider> {
        let name = display_name.trim();
        if name.is_empty() {
            return Err(Error::validation("display name cannot be empty"));
        }
        if let Some(id) = id.filter(|id| *id <= 0) {
            return Err(Error::validation(format!("rider id must be positive, got {id}")));
        }

        let rider = self.storage.write(|tx| {
            if let Some(id) = id {
                if riders::exists(tx, id)? {
                    return Err(Error::conflict(format!("rider {id} is already registered")));
                }
            }
            let id = riders::insert(tx, id, name, role)?;
            riders::get(tx, id)?.ok_or_else(|| Error::not_found("rider", id))
        })?;
        info!(rider = rider.id, role = %rider.role, "Registered rider");
        Ok(rider)
    }

    /// Fetch one rider.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is unknown.
    pub fn get(&self, id: i64) -> Result<Rider> {
        self.storage
            .read(|conn| riders::get(conn, id))?
            .ok_or_else(|| Error::not_found("rider", id))
    }

    /// Apply an allow-listed profile update.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty update or blank name and `NotFound`
    /// if the id is unknown.
    pub fn update(&self, id: i64, update: &RiderUpdate) -> Result<Rider> {
        let Some(name) = update.display_name.as_deref().map(str::trim) else {
            return Err(Error::validation("update contains no fields"));
        };
        if name.is_empty() {
            return Err(Error::validation("display name cannot be empty"));
        }

        self.storage.write(|tx| {
            if !riders::set_display_name(tx, id, name)? {
                return Err(Error::not_found("rider", id));
            }
            riders::get(tx, id)?.ok_or_else(|| Error::not_found("rider", id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts() -> RiderAccounts {
        RiderAccounts::new(Arc::new(Storage::open_in_memory().unwrap()))
    }

    #[test]
    fn test_register_with_provider_id() {
        let accounts = accounts();
        let rider = accounts.register(Some(42), " Mina ", Role::Rider).unwrap();
        assert_eq!(rider.id, 42);
        assert_eq!(rider.display_name, "Mina");
        assert!(rider.safety_score.is_none());
        assert_eq!(accounts.get(42).unwrap(), rider);
    }

    #[test]
    fn test_register_assigns_id() {
        let accounts = accounts();
        let first = accounts.register(None, "a", Role::Rider).unwrap();
        let second = accounts.register(None, "ops", Role::Admin).unwrap();
        assert!(second.id > first.id);
        assert_eq!(second.role, Role::Admin);
    }

    #[test]
    fn test_register_rejects_bad_input() {
        let accounts = accounts();
        assert!(accounts.register(Some(1), "  ", Role::Rider).unwrap_err().is_validation());
        assert!(accounts.register(Some(0), "x", Role::Rider).unwrap_err().is_validation());
        accounts.register(Some(1), "x", Role::Rider).unwrap();
        assert!(accounts.register(Some(1), "y", Role::Rider).unwrap_err().is_conflict());
    }

    #[test]
    fn test_update_display_name() {
        let accounts = accounts();
        accounts.register(Some(7), "old", Role::Rider).unwrap();
        let rider = accounts
            .update(
                7,
                &RiderUpdate {
                    display_name: Some("new".to_string()),
                },
            )
            .unwrap();
        assert_eq!(rider.display_name, "new");

        assert!(accounts.update(7, &RiderUpdate::default()).unwrap_err().is_validation());
        assert!(accounts
            .update(
                8,
                &RiderUpdate {
                    display_name: Some("x".to_string())
                }
            )
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_get_unknown() {
        assert!(accounts().get(3).unwrap_err().is_not_found());
    }
}
