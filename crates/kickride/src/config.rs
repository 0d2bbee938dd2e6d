//! Configuration management for kickride.
//!
//! Configuration is layered with figment: built-in defaults, then a TOML
//! file, then `KICKRIDE_`-prefixed environment variables.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "kickride";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "kickride.db";

/// Application configuration.
///
/// Loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `KICKRIDE_`, `__` separates sections)
/// 2. TOML config file at `~/.config/kickride/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Fare schedule.
    pub fare: FareConfig,
    /// Ride and rider scoring.
    pub scoring: ScoringConfig,
    /// KPI weight recommendation thresholds.
    pub analyzer: AnalyzerConfig,
    /// Retry policy for best-effort side tasks.
    pub side_tasks: SideTaskConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/kickride/kickride.db`
    pub database_path: Option<PathBuf>,
    /// Number of rides loaded per batch during a full recompute.
    pub recompute_batch_size: usize,
}

/// Fare schedule, in currency-agnostic units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FareConfig {
    /// Flat charge per ride.
    pub base_fare: f64,
    /// Charge per whole minute ridden.
    pub per_minute_rate: f64,
    /// Charge per kilometre ridden.
    pub per_km_rate: f64,
}

/// Scoring configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Ride distance (km) at which a ride moves the rolling score halfway.
    pub inertia_km: f64,
    /// Name of the KPI whose weight is the single helmet-off penalty.
    pub helmet_off_kpi: String,
}

/// Analyzer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Minimum accident rides before ratios are trusted.
    pub min_accident_rides: u64,
    /// Minimum normal rides before ratios are trusted.
    pub min_normal_rides: u64,
    /// Lower clamp for recommended weights.
    pub min_weight: f64,
    /// Upper clamp for recommended weights.
    pub max_weight: f64,
    /// Ratio assumed when a KPI only ever occurs in accident rides.
    pub unseen_ratio: f64,
}

/// Side task retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SideTaskConfig {
    /// Attempts per task before it is dropped.
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on every further attempt.
    pub initial_backoff_ms: u64,
    /// Upper bound on the retry delay.
    pub max_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Resolved to the data dir at runtime
            recompute_batch_size: 500,
        }
    }
}

impl Default for FareConfig {
    fn default() -> Self {
        Self {
            base_fare: 1000.0,
            per_minute_rate: 200.0,
            per_km_rate: 100.0,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            inertia_km: 30.0,
            helmet_off_kpi: "helmet_off".to_string(),
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_accident_rides: 5,
            min_normal_rides: 10,
            min_weight: 0.5,
            max_weight: 10.0,
            unseen_ratio: 5.0,
        }
    }
}

impl Default for SideTaskConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed("KICKRIDE_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let fare = &self.fare;
        if fare.base_fare < 0.0 || fare.per_minute_rate < 0.0 || fare.per_km_rate < 0.0 {
            return Err(Error::ConfigValidation {
                message: "fare rates cannot be negative".to_string(),
            });
        }

        if !(self.scoring.inertia_km.is_finite() && self.scoring.inertia_km > 0.0) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "inertia_km must be a positive number, got {}",
                    self.scoring.inertia_km
                ),
            });
        }

        if self.scoring.helmet_off_kpi.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "helmet_off_kpi cannot be empty".to_string(),
            });
        }

        let analyzer = &self.analyzer;
        if analyzer.min_weight < 0.0 || analyzer.min_weight > analyzer.max_weight {
            return Err(Error::ConfigValidation {
                message: format!(
                    "min_weight ({}) must be non-negative and not greater than max_weight ({})",
                    analyzer.min_weight, analyzer.max_weight
                ),
            });
        }

        if analyzer.unseen_ratio <= 0.0 {
            return Err(Error::ConfigValidation {
                message: "unseen_ratio must be greater than 0".to_string(),
            });
        }

        if self.storage.recompute_batch_size == 0 {
            return Err(Error::ConfigValidation {
                message: "recompute_batch_size must be greater than 0".to_string(),
            });
        }

        if self.side_tasks.max_attempts == 0 {
            return Err(Error::ConfigValidation {
                message: "side_tasks.max_attempts must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }
}

impl SideTaskConfig {
    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fare_config() {
        let fare = FareConfig::default();
        assert!((fare.base_fare - 1000.0).abs() < f64::EPSILON);
        assert!((fare.per_minute_rate - 200.0).abs() < f64::EPSILON);
        assert!((fare.per_km_rate - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_scoring_config() {
        let scoring = ScoringConfig::default();
        assert!((scoring.inertia_km - 30.0).abs() < f64::EPSILON);
        assert_eq!(scoring.helmet_off_kpi, "helmet_off");
    }

    #[test]
    fn test_default_analyzer_config() {
        let analyzer = AnalyzerConfig::default();
        assert_eq!(analyzer.min_accident_rides, 5);
        assert_eq!(analyzer.min_normal_rides, 10);
        assert!((analyzer.min_weight - 0.5).abs() < f64::EPSILON);
        assert!((analyzer.max_weight - 10.0).abs() < f64::EPSILON);
        assert!((analyzer.unseen_ratio - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_storage_config() {
        let storage = StorageConfig::default();
        assert!(storage.database_path.is_none());
        assert_eq!(storage.recompute_batch_size, 500);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_negative_fare() {
        let mut config = Config::default();
        config.fare.per_km_rate = -1.0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("fare rates"));
    }

    #[test]
    fn test_validate_zero_inertia() {
        let mut config = Config::default();
        config.scoring.inertia_km = 0.0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("inertia_km"));
    }

    #[test]
    fn test_validate_empty_helmet_kpi() {
        let mut config = Config::default();
        config.scoring.helmet_off_kpi = "  ".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("helmet_off_kpi"));
    }

    #[test]
    fn test_validate_inverted_weight_bounds() {
        let mut config = Config::default();
        config.analyzer.min_weight = 12.0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("min_weight"));
    }

    #[test]
    fn test_validate_zero_batch_size() {
        let mut config = Config::default();
        config.storage.recompute_batch_size = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("recompute_batch_size"));
    }

    #[test]
    fn test_validate_zero_attempts() {
        let mut config = Config::default();
        config.side_tasks.max_attempts = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_path_default() {
        let path = Config::default().database_path();
        assert!(path.to_string_lossy().contains("kickride.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let side = SideTaskConfig {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        assert_eq!(side.backoff(1), Duration::from_millis(100));
        assert_eq!(side.backoff(2), Duration::from_millis(200));
        assert_eq!(side.backoff(3), Duration::from_millis(400));
        assert_eq!(side.backoff(5), Duration::from_millis(1_000));
        assert_eq!(side.backoff(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("kickride"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_toml_overrides() {
        let path = std::env::temp_dir().join(format!(
            "kickride_config_test_{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[fare]\nbase_fare = 1500.0\n\n[scoring]\ninertia_km = 20.0\n")
            .unwrap();

        let config = Config::load_from(Some(path.clone())).unwrap();
        assert!((config.fare.base_fare - 1500.0).abs() < f64::EPSILON);
        assert!((config.scoring.inertia_km - 20.0).abs() < f64::EPSILON);
        assert!((config.fare.per_minute_rate - 200.0).abs() < f64::EPSILON);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_analyzer_config_deserialize_partial() {
        let json = r#"{"min_accident_rides": 20}"#;
        let analyzer: AnalyzerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(analyzer.min_accident_rides, 20);
        assert_eq!(analyzer.min_normal_rides, 10);
    }
}
