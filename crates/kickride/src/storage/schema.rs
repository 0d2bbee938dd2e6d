//! `SQLite` schema definitions for kickride.
//!
//! Points are stored as WKT text (`POINT(lng lat)`), timestamps as RFC 3339
//! UTC text with a fixed precision so they sort lexically.

/// SQL statement to create the kickboards table.
pub const CREATE_KICKBOARDS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS kickboards (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'available'
        CHECK (status IN ('available', 'in_use', 'maintenance')),
    location TEXT NOT NULL,
    battery INTEGER NOT NULL CHECK (battery BETWEEN 0 AND 100),
    model TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the riders table.
pub const CREATE_RIDERS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS riders (
    id INTEGER PRIMARY KEY,
    display_name TEXT NOT NULL,
    safety_score REAL CHECK (safety_score IS NULL OR safety_score BETWEEN 0 AND 100),
    role TEXT NOT NULL DEFAULT 'rider' CHECK (role IN ('rider', 'admin')),
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the KPI catalog.
pub const CREATE_KPIS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS kpis (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    weight REAL NOT NULL CHECK (weight >= 0)
)
";

/// KPI names are unique regardless of case.
pub const CREATE_KPI_NAME_INDEX: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS idx_kpis_name ON kpis(name COLLATE NOCASE)
";

/// SQL statement to create the rides table.
///
/// `kickboard_id` carries no foreign key so retired devices can be deleted
/// without losing ride history.
pub const CREATE_RIDES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS rides (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rider_id INTEGER NOT NULL REFERENCES riders(id),
    kickboard_id TEXT NOT NULL,
    start_location TEXT NOT NULL,
    end_location TEXT,
    start_time TEXT NOT NULL,
    end_time TEXT,
    duration_min INTEGER,
    distance_km REAL,
    fare INTEGER,
    score INTEGER CHECK (score IS NULL OR score BETWEEN 0 AND 100),
    helmet_on INTEGER NOT NULL DEFAULT 0,
    accident_flag INTEGER NOT NULL DEFAULT 0
)
";

/// At most one active ride per kickboard.
pub const CREATE_ACTIVE_RIDE_INDEX: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS idx_rides_active_kickboard
    ON rides(kickboard_id) WHERE end_time IS NULL
";

/// SQL statement to create an index for rider history queries.
pub const CREATE_RIDER_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_rides_rider ON rides(rider_id, start_time DESC)
";

/// SQL statement to create the risk events table.
pub const CREATE_RISK_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS risk_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ride_id INTEGER NOT NULL REFERENCES rides(id),
    kpi_id INTEGER NOT NULL REFERENCES kpis(id),
    timestamp TEXT NOT NULL,
    location TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create an index on `ride_id` for per-ride lookups.
pub const CREATE_RISK_RIDE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_risk_events_ride ON risk_events(ride_id)
";

/// SQL statement to create an index on `kpi_id` for analyzer scans.
pub const CREATE_RISK_KPI_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_risk_events_kpi ON risk_events(kpi_id)
";

/// SQL statement to create the ride path audit table.
pub const CREATE_RIDE_PATHS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS ride_paths (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ride_id INTEGER NOT NULL UNIQUE REFERENCES rides(id),
    path_data TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_KICKBOARDS_TABLE,
    CREATE_RIDERS_TABLE,
    CREATE_KPIS_TABLE,
    CREATE_KPI_NAME_INDEX,
    CREATE_RIDES_TABLE,
    CREATE_ACTIVE_RIDE_INDEX,
    CREATE_RIDER_INDEX,
    CREATE_RISK_EVENTS_TABLE,
    CREATE_RISK_RIDE_INDEX,
    CREATE_RISK_KPI_INDEX,
    CREATE_RIDE_PATHS_TABLE,
    CREATE_METADATA_TABLE,
];
