use crate::domain::types::{Side, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
    Cancelled,
    Expired,
}

impl SignalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SignalStatus::Rejected
                | SignalStatus::Executed
                | SignalStatus::Cancelled
                | SignalStatus::Expired
        )
    }

    /// Whether `next` is a legal monotonic advance from this status.
    pub fn can_advance_to(&self, next: SignalStatus) -> bool {
        use SignalStatus::*;
        matches!(
            (*self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Pending, Expired)
                | (Pending, Executed)
                | (Approved, Executed)
                | (Approved, Cancelled)
                | (Approved, Expired)
        )
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalStatus::Pending => "pending",
            SignalStatus::Approved => "approved",
            SignalStatus::Rejected => "rejected",
            SignalStatus::Executed => "executed",
            SignalStatus::Cancelled => "cancelled",
            SignalStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// A strategy's proposed trade. Immutable except for `status`, which only
/// advances through the legal transitions above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub strategy_name: String,
    pub user_id: UserId,
    pub symbol: String,
    pub side: Side,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_pct: Decimal,
    pub confidence: f64,
    pub status: SignalStatus,
    pub signal_time: DateTime<Utc>,
}

/// The strategy-facing subset of a signal; the coordinator stamps identity
/// and timing before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDraft {
    pub symbol: String,
    pub side: Side,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_pct: Decimal,
    pub confidence: f64,
}

impl Signal {
    pub fn from_draft(draft: SignalDraft, strategy_name: &str, user_id: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_name: strategy_name.to_string(),
            user_id,
            symbol: draft.symbol,
            side: draft.side,
            entry: draft.entry,
            stop_loss: draft.stop_loss,
            take_profit: draft.take_profit,
            risk_pct: draft.risk_pct,
            confidence: draft.confidence,
            status: SignalStatus::Pending,
            signal_time: Utc::now(),
        }
    }

    /// Reward-to-risk ratio: |tp - entry| / |entry - sl|. Zero when the stop
    /// distance degenerates.
    pub fn risk_reward(&self) -> Decimal {
        let risk = (self.entry - self.stop_loss).abs();
        if risk.is_zero() {
            return Decimal::ZERO;
        }
        (self.take_profit - self.entry).abs() / risk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn signal(entry: Decimal, sl: Decimal, tp: Decimal) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            strategy_name: "sma_cross".to_string(),
            user_id: Uuid::new_v4(),
            symbol: "EURUSD".to_string(),
            side: Side::Long,
            entry,
            stop_loss: sl,
            take_profit: tp,
            risk_pct: dec!(1.0),
            confidence: 0.8,
            status: SignalStatus::Pending,
            signal_time: Utc::now(),
        }
    }

    #[test]
    fn test_risk_reward_long() {
        let s = signal(dec!(1.1000), dec!(1.0950), dec!(1.1150));
        assert_eq!(s.risk_reward(), dec!(3));
    }

    #[test]
    fn test_risk_reward_degenerate_stop() {
        let s = signal(dec!(1.1000), dec!(1.1000), dec!(1.1150));
        assert_eq!(s.risk_reward(), Decimal::ZERO);
    }

    #[test]
    fn test_status_advances_monotonically() {
        assert!(SignalStatus::Pending.can_advance_to(SignalStatus::Approved));
        assert!(SignalStatus::Approved.can_advance_to(SignalStatus::Executed));
        assert!(!SignalStatus::Executed.can_advance_to(SignalStatus::Pending));
        assert!(!SignalStatus::Rejected.can_advance_to(SignalStatus::Approved));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SignalStatus::Executed.is_terminal());
        assert!(!SignalStatus::Approved.is_terminal());
    }
}
