use crate::domain::types::{Side, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSource {
    Backtest,
    Paper,
    Simulation,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Manual,
    ModeSwitch,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::Manual => "manual",
            ExitReason::ModeSwitch => "mode_switch",
        };
        write!(f, "{}", s)
    }
}

/// The immutable post-close record of a trade. Never updated, never deleted;
/// the persistence layer enforces both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub entry_uid: String,
    pub strategy_name: String,
    pub symbol: String,
    pub user_id: UserId,
    pub source: TradeSource,
    pub side: Side,
    pub entry: Decimal,
    pub exit: Decimal,
    pub size: Decimal,
    pub pnl: Decimal,
    pub duration_secs: i64,
    pub exit_reason: ExitReason,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub signal_id: Uuid,
    pub order_id: Uuid,
}

/// Read-only aggregate over a strategy's journal window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub strategy_name: String,
    pub symbol: String,
    pub sample_size: u32,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub expectancy: Decimal,
    pub max_consecutive_losses: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Monitor,
    DisableStrategy,
    TriggerOptimization,
}

impl fmt::Display for FeedbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeedbackAction::Monitor => "monitor",
            FeedbackAction::DisableStrategy => "disable_strategy",
            FeedbackAction::TriggerOptimization => "trigger_optimization",
        };
        write!(f, "{}", s)
    }
}

/// Immutable record of one feedback cycle over a (strategy, symbol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackDecision {
    pub id: Uuid,
    pub user_id: UserId,
    pub strategy_name: String,
    pub symbol: String,
    pub action: FeedbackAction,
    pub report: PerformanceReport,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}
