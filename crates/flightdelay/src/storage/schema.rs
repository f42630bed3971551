//! `SQLite` schema definitions for flightdelay.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the identities table.
pub const CREATE_IDENTITIES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS identities (
    id TEXT PRIMARY KEY NOT NULL,
    created_at TEXT NOT NULL,
    last_used_at TEXT NOT NULL,
    usage_today INTEGER NOT NULL DEFAULT 0,
    usage_day TEXT NOT NULL,
    total_usage INTEGER NOT NULL DEFAULT 0,
    tier TEXT NOT NULL DEFAULT 'free'
)
";

/// SQL statement to create the flight statistics cache table.
pub const CREATE_FLIGHT_CACHE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS flight_cache (
    key TEXT PRIMARY KEY NOT NULL,
    fetched_at TEXT NOT NULL,
    stats TEXT NOT NULL
)
";

/// SQL statement to create an index on `fetched_at` for pruning.
pub const CREATE_FETCHED_AT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_flight_cache_fetched_at ON flight_cache(fetched_at)
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
    CREATE_IDENTITIES_TABLE,
    CREATE_FLIGHT_CACHE_TABLE,
    CREATE_FETCHED_AT_INDEX,
    CREATE_METADATA_TABLE,
];
