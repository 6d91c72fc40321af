use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::DatabaseConfig;

/// Embedded schema, applied idempotently at startup.
///
/// The unique partial index on `manual_overrides` is what guarantees the
/// single-active-override invariant even under racing writers; the store's
/// deactivate-then-insert transaction keeps it from ever firing in normal
/// operation.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS price_points (
    valid_from      TEXT PRIMARY KEY,
    valid_to        TEXT NOT NULL,
    unit_price      REAL NOT NULL,
    classification  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS manual_overrides (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id       TEXT NOT NULL,
    is_active       INTEGER NOT NULL DEFAULT 0,
    desired_state   INTEGER NOT NULL,
    source          TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    expires_at      TEXT NOT NULL,
    cleared_at      TEXT,
    cleared_by      TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_manual_overrides_single_active
    ON manual_overrides(device_id) WHERE is_active = 1;
CREATE INDEX IF NOT EXISTS idx_manual_overrides_device_active
    ON manual_overrides(device_id, is_active, expires_at);
CREATE INDEX IF NOT EXISTS idx_manual_overrides_expires
    ON manual_overrides(expires_at);

CREATE TABLE IF NOT EXISTS schedule_overrides (
    device_id       TEXT PRIMARY KEY,
    is_active       INTEGER NOT NULL DEFAULT 0,
    reason          TEXT NOT NULL DEFAULT '',
    activated_at    TEXT,
    deactivated_at  TEXT,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schedule_override_events (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id       TEXT NOT NULL,
    is_active       INTEGER NOT NULL,
    reason          TEXT NOT NULL,
    reported_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_schedule_events_device_time
    ON schedule_override_events(device_id, reported_at DESC);

CREATE TABLE IF NOT EXISTS recommendations (
    id                        TEXT PRIMARY KEY,
    timestamp                 TEXT NOT NULL,
    horizon_steps             INTEGER NOT NULL,
    battery_mode              TEXT NOT NULL,
    discharge_current_amps    INTEGER NOT NULL,
    main_desired              INTEGER NOT NULL,
    main_source               TEXT NOT NULL,
    main_reason               TEXT NOT NULL,
    lucy_desired              INTEGER NOT NULL,
    lucy_source               TEXT NOT NULL,
    lucy_reason               TEXT NOT NULL,
    optimization_status       TEXT NOT NULL,
    optimization_time_ms      INTEGER NOT NULL,
    expected_soc_percent      REAL NOT NULL,
    manual_override_active    INTEGER NOT NULL,
    schedule_override_active  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_recommendations_timestamp
    ON recommendations(timestamp DESC);
"#;

/// Open the pool, applying the schema, with exponential-backoff retry.
///
/// A database that stays unreachable past the bounded retry is a startup
/// failure; callers let it propagate to a non-zero exit.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    info!(url = %config.url, "initialising database pool");

    let pool = connect_with_retry(config, 5).await?;

    sqlx::raw_sql(SCHEMA)
        .execute(&pool)
        .await
        .context("Failed to apply database schema")?;

    health_check(&pool).await?;

    info!("database pool ready");
    Ok(pool)
}

async fn connect_with_retry(config: &DatabaseConfig, max_attempts: usize) -> Result<SqlitePool> {
    let mut attempt = 0;
    let mut delay = Duration::from_secs(1);

    loop {
        attempt += 1;
        match try_connect(config).await {
            Ok(pool) => return Ok(pool),
            Err(e) if attempt >= max_attempts => {
                return Err(e).context(format!(
                    "Failed to connect to database after {} attempts",
                    max_attempts
                ));
            }
            Err(e) => {
                warn!(
                    "database connection attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
}

async fn try_connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .context("Invalid database URL")?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_with(options)
        .await
        .context("Failed to create database pool")?;

    Ok(pool)
}

pub async fn health_check(pool: &SqlitePool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Database health check failed")?;
    Ok(())
}

/// In-memory pool for tests. Single connection so every query sees the
/// same memory database.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        connect_timeout_secs: 5,
    };
    connect(&config).await
}
