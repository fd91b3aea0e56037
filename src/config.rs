use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    Sqlite,
    Memory,
}

impl FromStr for PersistenceMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(PersistenceMode::Sqlite),
            "memory" => Ok(PersistenceMode::Memory),
            _ => anyhow::bail!("Invalid PERSISTENCE: {}. Must be 'sqlite' or 'memory'", s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub persistence: PersistenceMode,
    pub database_url: String,
    pub bind_addr: String,

    // Auth
    pub jwt_secret: String,
    pub jwt_access_ttl_secs: u64,
    pub jwt_refresh_ttl_secs: u64,

    // Accounts
    pub initial_balance: Decimal,

    // Workers
    pub order_poll_interval_ms: u64,
    pub feedback_interval_secs: u64,
    pub metrics_interval_secs: u64,
    pub daily_reset_hour_utc: u32,

    // Broker behavior
    pub max_order_retries: u32,
    pub broker_timeout_secs: u64,
    pub sim_slippage_pips: f64,
    pub sim_commission_per_lot: f64,
    pub sim_latency_ms: u64,
    pub sim_fill_probability: f64,

    pub observability_enabled: bool,

    // Simulated feed
    pub symbols: Vec<String>,
    pub candle_interval_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let persistence_str = env::var("PERSISTENCE").unwrap_or_else(|_| "sqlite".to_string());
        let persistence = PersistenceMode::from_str(&persistence_str)?;

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://data/tradewarden.db".to_string());
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_default();
        let jwt_access_ttl_secs = env::var("JWT_ACCESS_TTL_SECS")
            .unwrap_or_else(|_| "900".to_string())
            .parse::<u64>()
            .context("Failed to parse JWT_ACCESS_TTL_SECS")?;
        let jwt_refresh_ttl_secs = env::var("JWT_REFRESH_TTL_SECS")
            .unwrap_or_else(|_| "604800".to_string())
            .parse::<u64>()
            .context("Failed to parse JWT_REFRESH_TTL_SECS")?;

        let initial_balance = env::var("INITIAL_BALANCE")
            .unwrap_or_else(|_| "10000.0".to_string())
            .parse::<f64>()
            .context("Failed to parse INITIAL_BALANCE")?;
        let initial_balance = Decimal::from_f64(initial_balance)
            .context("INITIAL_BALANCE is not representable")?;

        let order_poll_interval_ms = env::var("ORDER_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse::<u64>()
            .context("Failed to parse ORDER_POLL_INTERVAL_MS")?;
        let feedback_interval_secs = env::var("FEEDBACK_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .context("Failed to parse FEEDBACK_INTERVAL_SECS")?;
        let metrics_interval_secs = env::var("METRICS_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .context("Failed to parse METRICS_INTERVAL_SECS")?;
        let daily_reset_hour_utc = env::var("DAILY_RESET_HOUR_UTC")
            .unwrap_or_else(|_| "0".to_string())
            .parse::<u32>()
            .context("Failed to parse DAILY_RESET_HOUR_UTC")?;
        anyhow::ensure!(
            daily_reset_hour_utc < 24,
            "DAILY_RESET_HOUR_UTC must be 0..=23"
        );

        let max_order_retries = env::var("MAX_ORDER_RETRIES")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<u32>()
            .context("Failed to parse MAX_ORDER_RETRIES")?;
        let broker_timeout_secs = env::var("BROKER_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("Failed to parse BROKER_TIMEOUT_SECS")?;

        let sim_slippage_pips = env::var("SIM_SLIPPAGE_PIPS")
            .unwrap_or_else(|_| "0.5".to_string())
            .parse::<f64>()
            .context("Failed to parse SIM_SLIPPAGE_PIPS")?;
        let sim_commission_per_lot = env::var("SIM_COMMISSION_PER_LOT")
            .unwrap_or_else(|_| "3.5".to_string())
            .parse::<f64>()
            .context("Failed to parse SIM_COMMISSION_PER_LOT")?;
        let sim_latency_ms = env::var("SIM_LATENCY_MS")
            .unwrap_or_else(|_| "20".to_string())
            .parse::<u64>()
            .context("Failed to parse SIM_LATENCY_MS")?;
        let sim_fill_probability = env::var("SIM_FILL_PROBABILITY")
            .unwrap_or_else(|_| "1.0".to_string())
            .parse::<f64>()
            .context("Failed to parse SIM_FILL_PROBABILITY")?;
        anyhow::ensure!(
            (0.0..=1.0).contains(&sim_fill_probability),
            "SIM_FILL_PROBABILITY must be within [0, 1]"
        );

        let observability_enabled = env::var("OBSERVABILITY_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .context("Failed to parse OBSERVABILITY_ENABLED")?;

        let symbols_str = env::var("SYMBOLS").unwrap_or_else(|_| "EURUSD".to_string());
        let symbols: Vec<String> = symbols_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let candle_interval_ms = env::var("CANDLE_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse::<u64>()
            .context("Failed to parse CANDLE_INTERVAL_MS")?;
        anyhow::ensure!(candle_interval_ms > 0, "CANDLE_INTERVAL_MS must be positive");

        Ok(Self {
            persistence,
            database_url,
            bind_addr,
            jwt_secret,
            jwt_access_ttl_secs,
            jwt_refresh_ttl_secs,
            initial_balance,
            order_poll_interval_ms,
            feedback_interval_secs,
            metrics_interval_secs,
            daily_reset_hour_utc,
            max_order_retries,
            broker_timeout_secs,
            sim_slippage_pips,
            sim_commission_per_lot,
            sim_latency_ms,
            sim_fill_probability,
            observability_enabled,
            symbols,
            candle_interval_ms,
        })
    }
}
