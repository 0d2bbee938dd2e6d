//! `kickride` - Ride lifecycle and safety-scoring engine for kickboard rentals
//!
//! This library manages the kickboard inventory, opens and closes rides,
//! ingests telemetry risk events, scores every ride and maintains a rolling
//! safety score per rider. Administrative tools recommend KPI weights from
//! accident history and recompute all scores after weights change.

#![warn(missing_docs)]

pub mod accounts;
pub mod analyzer;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod degradation;
pub mod engine;
pub mod error;
pub mod geo;
pub mod ingest;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod recompute;
pub mod registry;
pub mod scoring;
pub mod sidework;
pub mod storage;

pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
pub use geo::GeoPoint;
pub use logging::init_logging;
pub use storage::{Storage, StorageStats};
