//! The assembled engine.
//!
//! [`Engine`] wires every service onto one shared [`Storage`] and one set of
//! [`DegradationCounters`]. Construction also returns the [`SideTaskWorker`],
//! which the caller must drive on a tokio runtime; dropping the engine closes
//! the side task channel so the worker finishes after draining it.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::accounts::RiderAccounts;
use crate::analyzer::{WeightAnalyzer, WeightReport};
use crate::catalog::KpiCatalog;
use crate::config::Config;
use crate::degradation::{DegradationCounters, DegradationSnapshot};
use crate::error::Result;
use crate::geo::GeoPoint;
use crate::ingest::RiskIngestor;
use crate::lifecycle::RideLifecycle;
use crate::model::{EndRideRequest, Kpi, KpiRef, RecordedRiskEvent, RideHandle, RideSummary};
use crate::recompute::{BatchRecompute, RecomputeReport};
use crate::registry::KickboardRegistry;
use crate::scoring::SafetyScorer;
use crate::sidework::{self, SideTaskWorker};
use crate::storage::{Storage, StorageStats};

/// Every kickride service over one database.
#[derive(Debug, Clone)]
pub struct Engine {
    storage: Arc<Storage>,
    counters: Arc<DegradationCounters>,
    registry: KickboardRegistry,
    accounts: RiderAccounts,
    catalog: KpiCatalog,
    rides: RideLifecycle,
    ingestor: RiskIngestor,
    scorer: SafetyScorer,
    analyzer: WeightAnalyzer,
    recompute: BatchRecompute,
}

impl Engine {
    /// Build the engine and its side task worker.
    #[must_use]
    pub fn new(storage: Arc<Storage>, config: &Config) -> (Self, SideTaskWorker) {
        let counters = Arc::new(DegradationCounters::new());
        let (queue, worker) = sidework::channel(
            Arc::clone(&storage),
            config.side_tasks.clone(),
            Arc::clone(&counters),
        );

        let engine = Self {
            registry: KickboardRegistry::new(Arc::clone(&storage)),
            accounts: RiderAccounts::new(Arc::clone(&storage)),
            catalog: KpiCatalog::new(Arc::clone(&storage)),
            rides: RideLifecycle::new(Arc::clone(&storage), config, queue, Arc::clone(&counters)),
            ingestor: RiskIngestor::new(Arc::clone(&storage), Arc::clone(&counters)),
            scorer: SafetyScorer::new(Arc::clone(&storage), config.scoring.inertia_km),
            analyzer: WeightAnalyzer::new(Arc::clone(&storage), config.analyzer.clone()),
            recompute: BatchRecompute::new(
                Arc::clone(&storage),
                config.storage.recompute_batch_size,
                config.scoring.helmet_off_kpi.clone(),
            ),
            storage,
            counters,
        };
        (engine, worker)
    }

    /// Open the configured database and build the engine on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(config: &Config) -> Result<(Self, SideTaskWorker)> {
        let storage = Arc::new(Storage::open(config.database_path())?);
        Ok(Self::new(storage, config))
    }

    /// Kickboard administration.
    #[must_use]
    pub fn registry(&self) -> &KickboardRegistry {
        &self.registry
    }

    /// Rider accounts.
    #[must_use]
    pub fn accounts(&self) -> &RiderAccounts {
        &self.accounts
    }

    /// KPI catalog.
    #[must_use]
    pub fn catalog(&self) -> &KpiCatalog {
        &self.catalog
    }

    /// Ride lifecycle and ride queries.
    #[must_use]
    pub fn rides(&self) -> &RideLifecycle {
        &self.rides
    }

    /// Risk event ingestion.
    #[must_use]
    pub fn ingestor(&self) -> &RiskIngestor {
        &self.ingestor
    }

    /// Rolling safety score maintenance.
    #[must_use]
    pub fn scorer(&self) -> &SafetyScorer {
        &self.scorer
    }

    /// KPI weight analyzer.
    #[must_use]
    pub fn analyzer(&self) -> &WeightAnalyzer {
        &self.analyzer
    }

    /// Start a ride.
    ///
    /// # Errors
    ///
    /// See [`RideLifecycle::start_ride_at`].
    pub fn start_ride(
        &self,
        rider_id: i64,
        kickboard_id: &str,
        start_location: GeoPoint,
        helmet_on: bool,
    ) -> Result<RideHandle> {
        self.rides
            .start_ride(rider_id, kickboard_id, start_location, helmet_on)
    }

    /// End a ride.
    ///
    /// # Errors
    ///
    /// See [`RideLifecycle::end_ride_at`].
    pub fn end_ride(&self, request: &EndRideRequest) -> Result<RideSummary> {
        self.rides.end_ride(request)
    }

    /// Record one telemetry risk event on a ride.
    ///
    /// # Errors
    ///
    /// See [`RiskIngestor::record_risk_event`].
    pub fn record_risk_event(
        &self,
        ride_id: i64,
        kpi: &KpiRef,
        timestamp: DateTime<Utc>,
        location: GeoPoint,
    ) -> Result<RecordedRiskEvent> {
        self.ingestor
            .record_risk_event(ride_id, kpi, timestamp, location)
    }

    /// Advisory KPI weight report.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recommend_kpi_weights(&self) -> Result<WeightReport> {
        self.analyzer.recommend_kpi_weights()
    }

    /// Set one KPI weight.
    ///
    /// # Errors
    ///
    /// See [`WeightAnalyzer::apply_kpi_weight`].
    pub fn apply_kpi_weight(&self, kpi_id: i64, weight: f64) -> Result<Kpi> {
        self.analyzer.apply_kpi_weight(kpi_id, weight)
    }

    /// Rescore every ride and rider.
    ///
    /// # Errors
    ///
    /// See [`BatchRecompute::recalculate_all`].
    pub fn recalculate_all(&self) -> Result<RecomputeReport> {
        self.recompute.recalculate_all()
    }

    /// Database totals.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.stats()
    }

    /// Counts of tolerated failures since startup.
    #[must_use]
    pub fn degradation(&self) -> DegradationSnapshot {
        self.counters.snapshot()
    }
}
