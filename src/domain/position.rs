use crate::domain::types::{Side, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// An open or closed exposure. Owns no orders; orders and journal entries
/// link back by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub user_id: UserId,
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub avg_entry: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status: PositionStatus,
}

impl Position {
    /// Realized P&L for a close at `exit`, signed by side.
    pub fn pnl_at(&self, exit: Decimal) -> Decimal {
        match self.side {
            Side::Long => (exit - self.avg_entry) * self.size,
            Side::Short => (self.avg_entry - exit) * self.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(side: Side) -> Position {
        Position {
            id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            symbol: "EURUSD".to_string(),
            side,
            size: dec!(1.0),
            avg_entry: dec!(1.1000),
            stop_loss: Some(dec!(1.0950)),
            take_profit: Some(dec!(1.1150)),
            opened_at: Utc::now(),
            closed_at: None,
            status: PositionStatus::Open,
        }
    }

    #[test]
    fn test_long_pnl() {
        assert_eq!(position(Side::Long).pnl_at(dec!(1.1150)), dec!(0.0150));
    }

    #[test]
    fn test_short_pnl() {
        assert_eq!(position(Side::Short).pnl_at(dec!(1.1150)), dec!(-0.0150));
    }
}
