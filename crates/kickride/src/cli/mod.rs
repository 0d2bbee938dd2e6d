//! Command-line interface for kickride.
//!
//! This module provides the CLI structure for the `kickride` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AdminCommand, ConfigCommand, KickboardCommand, KpiCommand, OutputFormat, RideCommand,
    RiderCommand, StatusArg,
};

/// kickride - Kickboard rentals with per-ride safety scoring
///
/// Starts and ends rides, records telemetry risk events, scores every ride
/// and keeps a rolling safety score per rider.
#[derive(Debug, Parser)]
#[command(name = "kickride")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the kickboard inventory
    #[command(subcommand)]
    Kickboard(KickboardCommand),

    /// Manage rider accounts
    #[command(subcommand)]
    Rider(RiderCommand),

    /// Manage the KPI catalog
    #[command(subcommand)]
    Kpi(KpiCommand),

    /// Start, end and inspect rides
    #[command(subcommand)]
    Ride(RideCommand),

    /// Weight analysis, recompute and statistics
    #[command(subcommand)]
    Admin(AdminCommand),

    /// View configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }

    /// Requested output format.
    #[must_use]
    pub fn output(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Plain
        }
    }
}
