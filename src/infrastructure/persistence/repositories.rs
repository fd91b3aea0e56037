//! SQLite implementations of the repository traits. Decimals and enums are
//! stored as TEXT (enums in their serde snake_case spelling), timestamps as
//! RFC 3339.

pub mod feedback_repository;
pub mod journal_repository;
pub mod order_repository;
pub mod position_repository;
pub mod risk_decision_repository;
pub mod risk_state_repository;
pub mod settings_repository;
pub mod signal_repository;
pub mod simulation_account_repository;
pub mod strategy_budget_repository;
pub mod user_repository;

pub use feedback_repository::SqliteFeedbackRepository;
pub use journal_repository::SqliteJournalRepository;
pub use order_repository::SqliteOrderRepository;
pub use position_repository::SqlitePositionRepository;
pub use risk_decision_repository::SqliteRiskDecisionRepository;
pub use risk_state_repository::SqliteRiskStateRepository;
pub use settings_repository::SqliteSettingsRepository;
pub use signal_repository::SqliteSignalRepository;
pub use simulation_account_repository::SqliteSimulationAccountRepository;
pub use strategy_budget_repository::SqliteStrategyBudgetRepository;
pub use user_repository::SqliteUserRepository;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::str::FromStr;
use uuid::Uuid;

/// The serde snake_case spelling of an enum variant, for TEXT columns.
pub(crate) fn enum_str<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => bail!("expected string-like enum, got {}", other),
    }
}

pub(crate) fn parse_enum<T: DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .with_context(|| format!("invalid enum value '{}'", s))
}

pub(crate) fn parse_dec(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("invalid decimal '{}'", s))
}

pub(crate) fn parse_opt_dec(s: Option<String>) -> Result<Option<Decimal>> {
    s.as_deref().map(parse_dec).transpose()
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::from_str(s).with_context(|| format!("invalid uuid '{}'", s))
}

pub(crate) fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
    s.as_deref().map(parse_uuid).transpose()
}

pub(crate) fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp '{}'", s))?
        .with_timezone(&Utc))
}

pub(crate) fn parse_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_dt).transpose()
}

pub(crate) fn fmt_dt(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn fmt_opt_dt(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(fmt_dt)
}
