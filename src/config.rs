use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use validator::Validate;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,

    #[validate(nested)]
    pub database: DatabaseConfig,

    #[validate(nested)]
    pub battery: BatteryConfig,

    #[validate(nested)]
    pub solar: SolarConfig,

    #[validate(nested)]
    pub grid: GridConfig,

    #[validate(nested)]
    pub tariff: TariffConfig,

    #[validate(nested)]
    pub optimizer: OptimizerConfig,

    #[validate(nested)]
    pub overrides: OverrideConfig,

    #[validate(nested)]
    pub immersion: ImmersionConfig,

    #[validate(nested)]
    pub bridge: BridgeConfig,

    #[validate(nested)]
    pub expiry_worker: ExpiryWorkerConfig,

    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,

    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    /// Per-request deadline covering adapter + solver + resolver.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("Failed to parse socket address")
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite://data/homeflux.db`.
    #[validate(length(min = 1))]
    pub url: String,

    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1, max = 100))]
    pub max_connections: u32,

    #[serde(default = "default_db_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Battery hardware envelope
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_battery_config"))]
pub struct BatteryConfig {
    #[validate(range(min = 0.1, max = 1000.0))]
    pub capacity_kwh: f64,

    #[validate(range(min = 0.1, max = 100.0))]
    pub max_charge_kw: f64,

    #[validate(range(min = 0.1, max = 100.0))]
    pub max_discharge_kw: f64,

    /// Round-trip efficiency.
    #[validate(range(min = 0.5, max = 1.0))]
    pub efficiency: f64,

    #[serde(default = "default_min_soc")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub min_soc_percent: f64,

    #[serde(default = "default_max_soc")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub max_soc_percent: f64,

    /// Floor for end-of-horizon SoC; defaults to `min_soc_percent`.
    #[serde(default)]
    pub min_terminal_soc_percent: Option<f64>,

    /// Amps commanded while in Force Discharge.
    #[serde(default = "default_max_discharge_current_a")]
    #[validate(range(min = 1, max = 400))]
    pub max_discharge_current_a: i64,

    /// Amps commanded in every other mode.
    #[serde(default = "default_discharge_current_a")]
    #[validate(range(min = 0, max = 400))]
    pub default_discharge_current_a: i64,
}

impl BatteryConfig {
    pub fn min_terminal_soc(&self) -> f64 {
        self.min_terminal_soc_percent.unwrap_or(self.min_soc_percent)
    }
}

fn validate_battery_config(config: &BatteryConfig) -> Result<(), validator::ValidationError> {
    if config.min_soc_percent >= config.max_soc_percent {
        return Err(validator::ValidationError::new(
            "min_soc_percent must be less than max_soc_percent",
        ));
    }

    if let Some(terminal) = config.min_terminal_soc_percent {
        if terminal < config.min_soc_percent || terminal > config.max_soc_percent {
            return Err(validator::ValidationError::new(
                "min_terminal_soc_percent must lie within the SoC bounds",
            ));
        }
    }

    Ok(())
}

/// Solar array parameters, used for sanity checks on bridge readings
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SolarConfig {
    #[validate(range(min = 0.1, max = 100.0))]
    pub capacity_kw: f64,
}

/// Grid connection envelope. Keeps the solver honest about the supply
/// fuse and bounds import/export in every step.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct GridConfig {
    #[serde(default = "default_grid_limit_kw")]
    #[validate(range(min = 1.0, max = 100.0))]
    pub import_limit_kw: f64,

    #[serde(default = "default_grid_limit_kw")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub export_limit_kw: f64,
}

/// Tariff API and price retention configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TariffConfig {
    #[validate(url)]
    pub api_base_url: String,

    /// Tariff product code, e.g. `AGILE-24-10-01`.
    #[validate(length(min = 1))]
    pub product_code: String,

    /// Region-qualified tariff code, e.g. `E-1R-AGILE-24-10-01-C`.
    #[validate(length(min = 1))]
    pub tariff_code: String,

    #[serde(default = "default_retention_days")]
    #[validate(range(min = 1, max = 90))]
    pub retention_days: u32,

    /// Hard deadline across all fetch retries.
    #[serde(default = "default_fetch_deadline_secs")]
    pub fetch_deadline_secs: u64,

    /// Export unit rate in pence/kWh. 0 means exports earn nothing.
    #[serde(default)]
    pub export_price_ppkwh: f64,
}

/// Solver configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct OptimizerConfig {
    /// Half-hour steps in the horizon (48 = 24 h, cap 96 = 48 h).
    #[serde(default = "default_horizon_steps")]
    #[validate(range(min = 2, max = 96))]
    pub horizon_steps: usize,

    #[serde(default = "default_solver_timeout_ms")]
    #[validate(range(min = 50, max = 60000))]
    pub solver_timeout_ms: u64,

    /// Flat baseline household load per half-hour step, kWh.
    #[serde(default = "default_load_per_step")]
    #[validate(range(min = 0.0, max = 10.0))]
    pub load_profile_kwh_per_step: f64,

    /// Optional 48-slot day shape (kWh per half hour, indexed from
    /// midnight UTC). Falls back to the flat baseline when absent.
    #[serde(default)]
    pub load_profile: Option<Vec<f64>>,
}

impl OptimizerConfig {
    /// Load for the half-hour slot starting at `slot_of_day` (0..48).
    pub fn load_kwh_for_slot(&self, slot_of_day: usize) -> f64 {
        match &self.load_profile {
            Some(profile) if !profile.is_empty() => profile[slot_of_day % profile.len()],
            _ => self.load_profile_kwh_per_step,
        }
    }
}

/// Override lifecycle configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct OverrideConfig {
    #[serde(default = "default_manual_default_hours")]
    #[validate(range(min = 0.01, max = 24.0))]
    pub manual_default_hours: f64,

    #[serde(default = "default_manual_max_hours")]
    #[validate(range(min = 0.01, max = 168.0))]
    pub manual_max_hours: f64,

    /// Heartbeat window for schedule overrides; older updates are stale.
    #[serde(default = "default_schedule_stale_threshold_s")]
    pub schedule_stale_threshold_s: u64,
}

/// Immersion rule thresholds
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ImmersionConfig {
    /// Solar generation above which surplus heating kicks in, kW.
    #[serde(default = "default_high_solar_kw")]
    #[validate(range(min = 0.1, max = 100.0))]
    pub high_solar_kw: f64,

    /// SoC floor for heating on a cheap (non-negative) price.
    #[serde(default = "default_cheap_soc_percent")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub cheap_soc_percent: f64,

    /// SoC floor for heating on a negative price.
    #[serde(default = "default_negative_soc_percent")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub negative_soc_percent: f64,
}

/// Smart-home bridge connection
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BridgeConfig {
    #[validate(url)]
    pub base_url: String,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_soc_entity")]
    pub soc_entity: String,

    #[serde(default = "default_solar_power_entity")]
    pub solar_power_entity: String,

    #[serde(default = "default_solar_remaining_entity")]
    pub solar_remaining_entity: String,

    #[serde(default = "default_solar_next_hour_entity")]
    pub solar_next_hour_entity: String,

    #[serde(default = "default_read_deadline_secs")]
    pub read_deadline_secs: u64,

    /// Maximum age of a cached snapshot before the engine falls back.
    #[serde(default = "default_snapshot_stale_secs")]
    pub snapshot_stale_secs: u64,
}

/// Manual-override expiry worker
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ExpiryWorkerConfig {
    #[serde(default = "default_expiry_period_s")]
    #[validate(range(min = 10, max = 3600))]
    pub period_s: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

// Default value functions
fn default_request_timeout_secs() -> u64 { 5 }
fn default_db_max_connections() -> u32 { 5 }
fn default_db_timeout_secs() -> u64 { 30 }
fn default_min_soc() -> f64 { 10.0 }
fn default_max_soc() -> f64 { 100.0 }
fn default_max_discharge_current_a() -> i64 { 100 }
fn default_discharge_current_a() -> i64 { 50 }
fn default_grid_limit_kw() -> f64 { 15.0 }
fn default_retention_days() -> u32 { 7 }
fn default_fetch_deadline_secs() -> u64 { 15 }
fn default_horizon_steps() -> usize { 48 }
fn default_solver_timeout_ms() -> u64 { 1000 }
fn default_load_per_step() -> f64 { 0.25 }
fn default_manual_default_hours() -> f64 { 2.0 }
fn default_manual_max_hours() -> f64 { 24.0 }
fn default_schedule_stale_threshold_s() -> u64 { 300 }
fn default_high_solar_kw() -> f64 { 5.0 }
fn default_cheap_soc_percent() -> f64 { 95.0 }
fn default_negative_soc_percent() -> f64 { 90.0 }
fn default_soc_entity() -> String { "sensor.battery_soc".to_string() }
fn default_solar_power_entity() -> String { "sensor.solar_power".to_string() }
fn default_solar_remaining_entity() -> String { "sensor.energy_production_today_remaining".to_string() }
fn default_solar_next_hour_entity() -> String { "sensor.energy_production_next_hour".to_string() }
fn default_read_deadline_secs() -> u64 { 3 }
fn default_snapshot_stale_secs() -> u64 { 300 }
fn default_expiry_period_s() -> u64 { 300 }
fn default_log_level() -> String { "info".to_string() }

impl AppConfig {
    /// Load configuration from TOML files and environment variables.
    ///
    /// Later layers override earlier ones:
    /// 1. config/default.toml
    /// 2. config/local.toml (optional, operator tweaks)
    /// 3. Environment variables with HOMEFLUX__ prefix
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Toml::file("config/local.toml"))
            .merge(Env::prefixed("HOMEFLUX__").split("__"));

        let config: AppConfig = figment.extract().context("Failed to parse configuration")?;

        config
            .validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }
}

pub type Config = AppConfig;

/// A fully-populated configuration for tests; tunables match the shipped
/// defaults.
pub fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_secs: default_request_timeout_secs(),
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            connect_timeout_secs: default_db_timeout_secs(),
        },
        battery: BatteryConfig {
            capacity_kwh: 10.0,
            max_charge_kw: 5.0,
            max_discharge_kw: 5.0,
            efficiency: 0.95,
            min_soc_percent: 10.0,
            max_soc_percent: 100.0,
            min_terminal_soc_percent: None,
            max_discharge_current_a: 100,
            default_discharge_current_a: 50,
        },
        solar: SolarConfig { capacity_kw: 8.0 },
        grid: GridConfig {
            import_limit_kw: 15.0,
            export_limit_kw: 15.0,
        },
        tariff: TariffConfig {
            api_base_url: "https://tariff.invalid".to_string(),
            product_code: "AGILE-TEST".to_string(),
            tariff_code: "E-1R-AGILE-TEST-C".to_string(),
            retention_days: 7,
            fetch_deadline_secs: 15,
            export_price_ppkwh: 0.0,
        },
        optimizer: OptimizerConfig {
            horizon_steps: 48,
            solver_timeout_ms: 1000,
            load_profile_kwh_per_step: 0.25,
            load_profile: None,
        },
        overrides: OverrideConfig {
            manual_default_hours: 2.0,
            manual_max_hours: 24.0,
            schedule_stale_threshold_s: 300,
        },
        immersion: ImmersionConfig {
            high_solar_kw: 5.0,
            cheap_soc_percent: 95.0,
            negative_soc_percent: 90.0,
        },
        bridge: BridgeConfig {
            base_url: "http://bridge.invalid:8123".to_string(),
            token: None,
            soc_entity: default_soc_entity(),
            solar_power_entity: default_solar_power_entity(),
            solar_remaining_entity: default_solar_remaining_entity(),
            solar_next_hour_entity: default_solar_next_hour_entity(),
            read_deadline_secs: 3,
            snapshot_stale_secs: 300,
        },
        expiry_worker: ExpiryWorkerConfig { period_s: 300 },
        telemetry: TelemetryConfig {
            log_level: "info".to_string(),
            log_json: false,
        },
    }
}
