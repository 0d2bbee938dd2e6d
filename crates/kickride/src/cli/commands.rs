//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Subcommand, ValueEnum};

use crate::geo::GeoPoint;
use crate::model::KickboardStatus;

/// Kickboard inventory commands.
#[derive(Debug, Subcommand)]
pub enum KickboardCommand {
    /// Register a new kickboard as available
    Register {
        /// Device id
        id: String,

        /// Initial position as "lat,lng"
        #[arg(long, value_name = "LAT,LNG", allow_hyphen_values = true)]
        at: GeoPoint,

        /// Battery level in percent
        #[arg(short, long, default_value = "100")]
        battery: u8,

        /// Hardware model name
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Show one kickboard
    Show {
        /// Device id
        id: String,
    },

    /// List kickboards
    List {
        /// Only kickboards in this state
        #[arg(short, long, value_enum)]
        status: Option<StatusArg>,
    },

    /// Update position, battery or model
    Update {
        /// Device id
        id: String,

        /// New position as "lat,lng"
        #[arg(long, value_name = "LAT,LNG", allow_hyphen_values = true)]
        at: Option<GeoPoint>,

        /// New battery level
        #[arg(short, long)]
        battery: Option<u8>,

        /// New model name
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Withdraw a kickboard for maintenance
    Maintenance {
        /// Device id
        id: String,
    },

    /// Return a kickboard from maintenance
    Release {
        /// Device id
        id: String,
    },

    /// Retire a kickboard
    Delete {
        /// Device id
        id: String,
    },

    /// Available kickboards near a point
    Nearby {
        /// Query position as "lat,lng"
        #[arg(long, value_name = "LAT,LNG", allow_hyphen_values = true)]
        at: GeoPoint,

        /// Search radius in metres
        #[arg(short, long, default_value = "500")]
        radius: f64,
    },
}

/// Rider account commands.
#[derive(Debug, Subcommand)]
pub enum RiderCommand {
    /// Register a rider
    Register {
        /// Display name
        name: String,

        /// Id issued by the identity provider (assigned if omitted)
        #[arg(long)]
        id: Option<i64>,

        /// Register as an administrator
        #[arg(long)]
        admin: bool,
    },

    /// Show a rider and their safety score
    Show {
        /// Rider id
        id: i64,
    },

    /// Change a rider's display name
    Rename {
        /// Rider id
        id: i64,

        /// New display name
        name: String,
    },

    /// A rider's rides, most recent first
    History {
        /// Rider id
        id: i64,

        /// Maximum number of rides
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

/// KPI catalog commands.
#[derive(Debug, Subcommand)]
pub enum KpiCommand {
    /// Add a risk indicator
    Add {
        /// Unique name
        name: String,

        /// Deduction points per occurrence
        weight: f64,

        /// Description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// List the catalog
    List,

    /// Update name, description or weight
    Update {
        /// KPI id
        id: i64,

        /// New name
        #[arg(short, long)]
        name: Option<String>,

        /// New description
        #[arg(short, long)]
        description: Option<String>,

        /// New weight
        #[arg(short, long)]
        weight: Option<f64>,
    },

    /// Set one KPI's weight
    SetWeight {
        /// KPI id
        id: i64,

        /// New weight
        weight: f64,
    },
}

/// Ride commands.
#[derive(Debug, Subcommand)]
pub enum RideCommand {
    /// Start a ride
    Start {
        /// Rider id
        rider: i64,

        /// Kickboard id
        kickboard: String,

        /// Pickup position as "lat,lng"
        #[arg(long, value_name = "LAT,LNG", allow_hyphen_values = true)]
        at: GeoPoint,

        /// The helmet classifier reported no helmet
        #[arg(long)]
        no_helmet: bool,
    },

    /// End a ride and print its score and fare
    End {
        /// Ride id
        ride: i64,

        /// Return position as "lat,lng"
        #[arg(long, value_name = "LAT,LNG", allow_hyphen_values = true)]
        at: GeoPoint,

        /// JSON file with an array of risk events
        #[arg(short, long, value_name = "FILE")]
        events: Option<PathBuf>,

        /// JSON file with the GPS trace
        #[arg(short, long, value_name = "FILE")]
        path: Option<PathBuf>,

        /// Helmet detection at return, overriding the start flag
        #[arg(long)]
        helmet: Option<bool>,

        /// Client-measured distance in kilometres
        #[arg(short, long)]
        distance: Option<f64>,
    },

    /// Show one ride
    Show {
        /// Ride id
        ride: i64,
    },

    /// Record a risk event detected during a ride
    Event {
        /// Ride id
        ride: i64,

        /// KPI id or name
        kpi: String,

        /// Detection position as "lat,lng"
        #[arg(long, value_name = "LAT,LNG", allow_hyphen_values = true)]
        at: GeoPoint,
    },

    /// Risk events of a ride
    Risks {
        /// Ride id
        ride: i64,
    },

    /// Stored GPS trace of a ride
    Path {
        /// Ride id
        ride: i64,
    },

    /// Rides in progress
    Active,

    /// Flag a ride as an accident
    Accident {
        /// Ride id
        ride: i64,

        /// Clear the flag instead of setting it
        #[arg(long)]
        clear: bool,
    },

    /// Accident rides completed recently
    Accidents {
        /// Look-back window in hours
        #[arg(long, default_value = "24")]
        hours: u32,

        /// Maximum number of rides
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

/// Administrative commands.
#[derive(Debug, Subcommand)]
pub enum AdminCommand {
    /// Recommend KPI weights from accident history
    Recommend {
        /// Write the recommended weights to the catalog
        #[arg(long)]
        apply: bool,
    },

    /// Recompute every ride score and rider safety score
    Recompute,

    /// Show database totals and degradation counters
    Stats,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Kickboard status argument for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    /// Parked and rentable
    Available,
    /// On an active ride
    InUse,
    /// Withdrawn for maintenance
    Maintenance,
}

impl From<StatusArg> for KickboardStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Available => Self::Available,
            StatusArg::InUse => Self::InUse,
            StatusArg::Maintenance => Self::Maintenance,
        }
    }
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_arg_conversion() {
        assert_eq!(
            KickboardStatus::from(StatusArg::Available),
            KickboardStatus::Available
        );
        assert_eq!(KickboardStatus::from(StatusArg::InUse), KickboardStatus::InUse);
        assert_eq!(
            KickboardStatus::from(StatusArg::Maintenance),
            KickboardStatus::Maintenance
        );
    }

    #[test]
    fn test_status_arg_value_names() {
        let names: Vec<_> = StatusArg::value_variants()
            .iter()
            .filter_map(|v| v.to_possible_value())
            .map(|v| v.get_name().to_string())
            .collect();
        assert_eq!(names, ["available", "in-use", "maintenance"]);
    }

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Plain);
    }
}
