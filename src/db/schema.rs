//! SQL DDL for initializing the fleet storage.
//! SQLite-first design; can be adapted for other RDBMS.

/// SQLite schema with:
/// - `fleet_tokens`: the credential set; at most one row after a replace
/// - `configurations`: key/value flags, `key` is the primary key
/// - `cars`: durable part of each car record (authorization health, config)
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS fleet_tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    access_token TEXT NOT NULL,
    refresh_token TEXT NOT NULL,
    id_token TEXT NULL,
    expires_at TEXT NOT NULL, -- RFC3339
    region TEXT NOT NULL,
    unauthorized_counter INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS configurations (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cars (
    id INTEGER PRIMARY KEY NOT NULL,
    vin TEXT NULL,
    name TEXT NULL,
    fleet_api_state TEXT NOT NULL DEFAULT 'unknown',
    minimum_soc INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 1,
    should_be_managed INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_cars_vin ON cars(vin);
"#;
