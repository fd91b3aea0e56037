use crate::domain::types::UserId;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

/// The nine pre-trade checks, in veto order. The wire code of each doubles as
/// the rejection reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCheck {
    EmergencyShutdown,
    AccountDrawdown,
    MaxOpenPositions,
    DailyTradeLimit,
    HourlyTradeLimit,
    PositionSize,
    RiskReward,
    StrategyBudget,
    DailyLossLimit,
}

impl RiskCheck {
    pub const ORDERED: [RiskCheck; 9] = [
        RiskCheck::EmergencyShutdown,
        RiskCheck::AccountDrawdown,
        RiskCheck::MaxOpenPositions,
        RiskCheck::DailyTradeLimit,
        RiskCheck::HourlyTradeLimit,
        RiskCheck::PositionSize,
        RiskCheck::RiskReward,
        RiskCheck::StrategyBudget,
        RiskCheck::DailyLossLimit,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            RiskCheck::EmergencyShutdown => "emergency_shutdown",
            RiskCheck::AccountDrawdown => "account_drawdown",
            RiskCheck::MaxOpenPositions => "max_open_positions",
            RiskCheck::DailyTradeLimit => "daily_trade_limit",
            RiskCheck::HourlyTradeLimit => "hourly_trade_limit",
            RiskCheck::PositionSize => "position_size",
            RiskCheck::RiskReward => "risk_reward",
            RiskCheck::StrategyBudget => "strategy_budget",
            RiskCheck::DailyLossLimit => "daily_loss_limit",
        }
    }
}

impl fmt::Display for RiskCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Approval,
    Rejection,
    Shutdown,
    BudgetDisable,
    ManualReset,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Approval => "approval",
            DecisionKind::Rejection => "rejection",
            DecisionKind::Shutdown => "shutdown",
            DecisionKind::BudgetDisable => "budget_disable",
            DecisionKind::ManualReset => "manual_reset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Critical,
    Emergency,
}

/// The recorded outcome of a single validation attempt (or manual override).
/// Append-only; one row per `validate` call, approved or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub id: Uuid,
    pub signal_id: Option<Uuid>,
    pub user_id: UserId,
    pub kind: DecisionKind,
    pub reason_code: Option<String>,
    pub severity: Severity,
    pub checks_passed: Vec<String>,
    pub checks_failed: Vec<String>,
    pub snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl RiskDecision {
    pub fn is_approved(&self) -> bool {
        self.kind == DecisionKind::Approval
    }
}

/// Per-user account risk bookkeeping. The hourly window holds the raw trade
/// timestamps so the count is a true sliding window, not a bucketed counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRiskState {
    pub user_id: UserId,
    pub balance: Decimal,
    pub equity: Decimal,
    pub peak_equity: Decimal,
    pub daily_pnl: Decimal,
    pub daily_pnl_reset_at: DateTime<Utc>,
    pub open_positions_count: u32,
    pub trades_today: u32,
    pub hourly_trade_times: VecDeque<DateTime<Utc>>,
    pub emergency_shutdown: bool,
    pub updated_at: DateTime<Utc>,
}

impl AccountRiskState {
    pub fn new(user_id: UserId, initial_balance: Decimal) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance: initial_balance,
            equity: initial_balance,
            peak_equity: initial_balance,
            daily_pnl: Decimal::ZERO,
            daily_pnl_reset_at: now,
            open_positions_count: 0,
            trades_today: 0,
            hourly_trade_times: VecDeque::new(),
            emergency_shutdown: false,
            updated_at: now,
        }
    }

    /// (peak - equity) / peak, in percent. Zero while equity rides the peak.
    pub fn current_drawdown_pct(&self) -> Decimal {
        if self.peak_equity.is_zero() {
            return Decimal::ZERO;
        }
        let dd = (self.peak_equity - self.equity) / self.peak_equity * dec!(100);
        dd.max(Decimal::ZERO)
    }

    /// Prunes timestamps older than one hour and returns the remaining count.
    pub fn trades_in_last_hour(&mut self, now: DateTime<Utc>) -> u32 {
        let cutoff = now - Duration::hours(1);
        while let Some(front) = self.hourly_trade_times.front() {
            if *front < cutoff {
                self.hourly_trade_times.pop_front();
            } else {
                break;
            }
        }
        self.hourly_trade_times.len() as u32
    }

    pub fn daily_window_elapsed(&self, now: DateTime<Utc>) -> bool {
        now - self.daily_pnl_reset_at >= Duration::hours(24)
    }

    /// Realized loss so far today, as a non-negative number.
    pub fn realized_loss_today(&self) -> Decimal {
        if self.daily_pnl < Decimal::ZERO {
            -self.daily_pnl
        } else {
            Decimal::ZERO
        }
    }
}

pub const BUDGET_DISABLED_CONSECUTIVE_LOSSES: &str = "consecutive_losses";

/// Per-(user, strategy, symbol) budget used to bench chronic underperformers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyBudget {
    pub user_id: UserId,
    pub strategy_name: String,
    pub symbol: String,
    pub enabled: bool,
    pub consecutive_losses: u32,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub disabled_reason: Option<String>,
}

impl StrategyBudget {
    pub fn new(user_id: UserId, strategy_name: &str, symbol: &str) -> Self {
        Self {
            user_id,
            strategy_name: strategy_name.to_string(),
            symbol: symbol.to_string(),
            enabled: true,
            consecutive_losses: 0,
            total_trades: 0,
            winning_trades: 0,
            gross_profit: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
            last_trade_at: None,
            disabled_reason: None,
        }
    }

    /// Folds one closed trade into the counters. A loss extends the streak,
    /// anything else resets it.
    pub fn record_trade(&mut self, pnl: Decimal, at: DateTime<Utc>) {
        self.total_trades += 1;
        self.last_trade_at = Some(at);
        if pnl < Decimal::ZERO {
            self.consecutive_losses += 1;
            self.gross_loss += -pnl;
        } else {
            self.consecutive_losses = 0;
            self.winning_trades += 1;
            self.gross_profit += pnl;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AccountRiskState {
        AccountRiskState::new(Uuid::new_v4(), dec!(10000))
    }

    #[test]
    fn test_drawdown_pct() {
        let mut s = state();
        s.peak_equity = dec!(10000);
        s.equity = dec!(8500);
        assert_eq!(s.current_drawdown_pct(), dec!(15));
    }

    #[test]
    fn test_drawdown_never_negative() {
        let mut s = state();
        s.equity = dec!(11000);
        assert_eq!(s.current_drawdown_pct(), Decimal::ZERO);
    }

    #[test]
    fn test_hourly_window_prunes() {
        let mut s = state();
        let now = Utc::now();
        s.hourly_trade_times.push_back(now - Duration::minutes(90));
        s.hourly_trade_times.push_back(now - Duration::minutes(30));
        s.hourly_trade_times.push_back(now - Duration::minutes(5));
        assert_eq!(s.trades_in_last_hour(now), 2);
        assert_eq!(s.hourly_trade_times.len(), 2);
    }

    #[test]
    fn test_budget_loss_streak_and_reset() {
        let mut b = StrategyBudget::new(Uuid::new_v4(), "nbb", "EURUSD");
        let now = Utc::now();
        b.record_trade(dec!(-10), now);
        b.record_trade(dec!(-5), now);
        assert_eq!(b.consecutive_losses, 2);
        assert_eq!(b.gross_loss, dec!(15));

        b.record_trade(dec!(20), now);
        assert_eq!(b.consecutive_losses, 0);
        assert_eq!(b.winning_trades, 1);
        assert_eq!(b.total_trades, 3);
    }

    #[test]
    fn test_check_codes_are_wire_stable() {
        assert_eq!(RiskCheck::EmergencyShutdown.code(), "emergency_shutdown");
        assert_eq!(RiskCheck::DailyLossLimit.code(), "daily_loss_limit");
        assert_eq!(RiskCheck::ORDERED.len(), 9);
    }
}
