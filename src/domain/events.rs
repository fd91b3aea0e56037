use crate::domain::journal::ExitReason;
use crate::domain::order::OrderStatus;
use crate::domain::risk::DecisionKind;
use crate::domain::types::{ExecutionMode, TradingMode, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// In-process control-plane events. Fan-out is bounded to in-process
/// subscribers (coordinator, cancel-on-mode-switch, observability); there is
/// no external bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlEvent {
    ModeChanged {
        user_id: Option<UserId>,
        old_mode: TradingMode,
        new_mode: TradingMode,
    },
    ExecutionModeChanged {
        user_id: Option<UserId>,
        old_mode: ExecutionMode,
        new_mode: ExecutionMode,
    },
    EmergencyShutdown {
        user_id: UserId,
        drawdown_pct: Decimal,
    },
    RiskDecisionRecorded {
        user_id: UserId,
        kind: DecisionKind,
    },
    OptimizationRequested {
        user_id: UserId,
        strategy_name: String,
        symbol: String,
        reason: String,
    },
    OrderFilled {
        user_id: UserId,
        order_id: Uuid,
        symbol: String,
    },
    OrderTerminal {
        user_id: UserId,
        order_id: Uuid,
        status: OrderStatus,
    },
    TradeJournaled {
        user_id: UserId,
        exit_reason: ExitReason,
    },
    PositionClosed {
        user_id: UserId,
        position_id: Uuid,
        pnl: Decimal,
        closed_at: DateTime<Utc>,
    },
}

impl ControlEvent {
    /// Stable tag for logging and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlEvent::ModeChanged { .. } => "mode_changed",
            ControlEvent::ExecutionModeChanged { .. } => "execution_mode_changed",
            ControlEvent::EmergencyShutdown { .. } => "emergency_shutdown",
            ControlEvent::RiskDecisionRecorded { .. } => "risk_decision_recorded",
            ControlEvent::OptimizationRequested { .. } => "optimization_requested",
            ControlEvent::OrderFilled { .. } => "order_filled",
            ControlEvent::OrderTerminal { .. } => "order_terminal",
            ControlEvent::TradeJournaled { .. } => "trade_journaled",
            ControlEvent::PositionClosed { .. } => "position_closed",
        }
    }
}
