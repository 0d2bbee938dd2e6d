//! Core domain types for kickride.
//!
//! Entities mirror the persisted rows; request and response types describe
//! the contract of the engine operations. Update structures are allow-listed:
//! only the named optional fields can change, and unknown keys are rejected
//! when deserialising.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geo::GeoPoint;

/// Availability state of a kickboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KickboardStatus {
    /// Parked and rentable.
    Available,
    /// Bound to exactly one active ride.
    InUse,
    /// Withdrawn by an administrator.
    Maintenance,
}

impl fmt::Display for KickboardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::InUse => write!(f, "in_use"),
            Self::Maintenance => write!(f, "maintenance"),
        }
    }
}

impl FromStr for KickboardStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "available" => Ok(Self::Available),
            // Older rows used a dash.
            "in_use" | "in-use" => Ok(Self::InUse),
            "maintenance" => Ok(Self::Maintenance),
            other => Err(Error::internal(format!("unknown kickboard status: {other}"))),
        }
    }
}

/// A rentable device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kickboard {
    /// Administrator-assigned device id.
    pub id: String,
    /// Current availability.
    pub status: KickboardStatus,
    /// Last known position.
    pub location: GeoPoint,
    /// Battery level in percent.
    pub battery: u8,
    /// Hardware model name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Registration payload for a new kickboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewKickboard {
    /// Device id.
    pub id: String,
    /// Initial position.
    pub location: GeoPoint,
    /// Battery level in percent.
    pub battery: u8,
    /// Hardware model name.
    #[serde(default)]
    pub model: Option<String>,
}

/// Allow-listed kickboard update. Status is changed only through the
/// registry state machine, never through this structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KickboardUpdate {
    /// New position.
    #[serde(default)]
    pub location: Option<GeoPoint>,
    /// New battery level.
    #[serde(default)]
    pub battery: Option<u8>,
    /// New model name.
    #[serde(default)]
    pub model: Option<String>,
}

impl KickboardUpdate {
    /// True when no field would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.location.is_none() && self.battery.is_none() && self.model.is_none()
    }
}

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A renting customer.
    Rider,
    /// An operator; excluded from population recompute.
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rider => write!(f, "rider"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rider" | "user" => Ok(Self::Rider),
            "admin" => Ok(Self::Admin),
            other => Err(Error::internal(format!("unknown role: {other}"))),
        }
    }
}

/// A rider account as seen by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rider {
    /// Id issued by the identity provider.
    pub id: i64,
    /// Display name.
    pub display_name: String,
    /// Rolling safety score, `None` before the first scored ride.
    pub safety_score: Option<f64>,
    /// Account role.
    pub role: Role,
}

/// Allow-listed rider update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiderUpdate {
    /// New display name.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// A risk indicator definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    /// Catalog id.
    pub id: i64,
    /// Unique name, matched case-insensitively.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Deduction points per occurrence.
    pub weight: f64,
}

impl Kpi {
    /// Check that a weight is a finite, non-negative number of points.
    ///
    /// # Errors
    ///
    /// Returns `Validation` otherwise.
    pub fn validate_weight(weight: f64) -> Result<()> {
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(Error::validation(format!(
                "weight must be a non-negative number, got {weight}"
            )));
        }
        Ok(())
    }
}

/// Payload for a new KPI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewKpi {
    /// Unique name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Deduction points.
    pub weight: f64,
}

/// Allow-listed KPI update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KpiUpdate {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// New weight.
    #[serde(default)]
    pub weight: Option<f64>,
}

impl KpiUpdate {
    /// True when no field would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.weight.is_none()
    }
}

/// How a caller refers to a KPI: by catalog id or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KpiRef {
    /// Numeric catalog id.
    Id(i64),
    /// Name, matched case-insensitively.
    Name(String),
}

impl KpiRef {
    /// Interpret free text: numeric strings are ids, anything else a name.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        trimmed
            .parse::<i64>()
            .map_or_else(|_| Self::Name(trimmed.to_string()), Self::Id)
    }
}

impl fmt::Display for KpiRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

/// Lifecycle state of a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    /// Started, not yet returned.
    Active,
    /// Returned; terminal.
    Completed,
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// One rental session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    /// Ride id.
    pub id: i64,
    /// Renting rider.
    pub rider_id: i64,
    /// Rented kickboard.
    pub kickboard_id: String,
    /// Pickup position.
    pub start_location: GeoPoint,
    /// Return position.
    pub end_location: Option<GeoPoint>,
    /// Pickup time.
    pub start_time: DateTime<Utc>,
    /// Return time; `None` while active.
    pub end_time: Option<DateTime<Utc>>,
    /// Whole minutes ridden.
    pub duration_min: Option<i64>,
    /// Distance ridden in kilometres.
    pub distance_km: Option<f64>,
    /// Charged fare.
    pub fare: Option<i64>,
    /// Ride safety score, 0-100.
    pub score: Option<u8>,
    /// Whether a helmet was detected.
    pub helmet_on: bool,
    /// Set by the external accident detector.
    pub accident_flag: bool,
}

impl Ride {
    /// Derived lifecycle state.
    #[must_use]
    pub fn status(&self) -> RideStatus {
        if self.end_time.is_some() {
            RideStatus::Completed
        } else {
            RideStatus::Active
        }
    }
}

/// A persisted risk occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    /// Event id.
    pub id: i64,
    /// Owning ride.
    pub ride_id: i64,
    /// Canonical KPI id.
    pub kpi_id: i64,
    /// When the behaviour was detected.
    pub timestamp: DateTime<Utc>,
    /// Where the behaviour was detected.
    pub location: GeoPoint,
}

/// A risk event joined with its KPI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedRiskEvent {
    /// The stored event.
    pub event: RiskEvent,
    /// KPI name at read time.
    pub kpi_name: String,
    /// KPI weight at read time.
    pub weight: f64,
}

/// A risk event as reported by telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEventInput {
    /// KPI reference (`kpi_id` number or `kpi` name).
    #[serde(alias = "kpi_id", alias = "kpi_type", alias = "kpiId")]
    pub kpi: KpiRef,
    /// Detection time; defaults to the ride end time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Detection position.
    pub location: GeoPoint,
}

/// A risk event that could not be ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRiskEvent {
    /// The reference as supplied.
    pub reference: String,
    /// Why it was skipped.
    pub reason: String,
}

/// One GPS sample of a ride path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    /// Position.
    #[serde(flatten)]
    pub location: GeoPoint,
    /// Speed in km/h, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Sample time, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Result of a successful ride start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideHandle {
    /// New ride id.
    pub ride_id: i64,
    /// Renting rider.
    pub rider_id: i64,
    /// Rented kickboard.
    pub kickboard_id: String,
    /// Recorded start time.
    pub start_time: DateTime<Utc>,
    /// Pickup position.
    pub location: GeoPoint,
}

/// Everything the client reports when returning a kickboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndRideRequest {
    /// Ride to end.
    pub ride_id: i64,
    /// Return position; required.
    #[serde(default, alias = "location")]
    pub end_location: Option<GeoPoint>,
    /// Risk events detected during the ride.
    #[serde(default)]
    pub risk_events: Vec<RiskEventInput>,
    /// Helmet detection at return, overriding the start flag.
    #[serde(default)]
    pub helmet_on: Option<bool>,
    /// Client-measured path length in kilometres.
    #[serde(default)]
    pub distance_override_km: Option<f64>,
    /// Full GPS trace for auditing.
    #[serde(default)]
    pub ride_path: Option<Vec<PathPoint>>,
}

/// Outcome of a completed ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideSummary {
    /// Ride id.
    pub ride_id: i64,
    /// Ride safety score, 0-100.
    pub score: u8,
    /// Charged fare.
    pub fare: i64,
    /// Distance in kilometres.
    pub distance_km: f64,
    /// Whole minutes ridden.
    pub duration_min: i64,
    /// Total deduction applied to the score.
    pub deduction: f64,
    /// Risk events that could not be ingested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_events: Vec<SkippedRiskEvent>,
}

/// An active ride joined with live device data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRide {
    /// Ride id.
    pub ride_id: i64,
    /// Renting rider.
    pub rider_id: i64,
    /// Rented kickboard.
    pub kickboard_id: String,
    /// Pickup time.
    pub start_time: DateTime<Utc>,
    /// Current kickboard position.
    pub location: GeoPoint,
    /// Current battery level.
    pub battery: u8,
    /// Rider's rolling score.
    pub safety_score: Option<f64>,
}
