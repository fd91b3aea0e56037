use crate::domain::types::UserId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Per-user account backing the simulation adapter. Persisted so simulated
/// equity survives restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationAccount {
    pub user_id: UserId,
    pub balance: Decimal,
    pub equity: Decimal,
    pub initial_balance: Decimal,
    pub slippage_pips: Decimal,
    pub commission_per_lot: Decimal,
    pub latency_ms: u64,
    pub fill_probability: f64,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub total_pnl: Decimal,
    pub last_reset_at: DateTime<Utc>,
}

impl SimulationAccount {
    pub fn new(user_id: UserId, initial_balance: Decimal) -> Self {
        Self {
            user_id,
            balance: initial_balance,
            equity: initial_balance,
            initial_balance,
            slippage_pips: dec!(0.5),
            commission_per_lot: dec!(3.5),
            latency_ms: 20,
            fill_probability: 1.0,
            total_trades: 0,
            winning_trades: 0,
            total_pnl: Decimal::ZERO,
            last_reset_at: Utc::now(),
        }
    }

    pub fn record_close(&mut self, pnl: Decimal) {
        self.total_trades += 1;
        if pnl > Decimal::ZERO {
            self.winning_trades += 1;
        }
        self.total_pnl += pnl;
        self.balance += pnl;
        self.equity = self.balance;
    }

    pub fn reset(&mut self) {
        self.balance = self.initial_balance;
        self.equity = self.initial_balance;
        self.total_trades = 0;
        self.winning_trades = 0;
        self.total_pnl = Decimal::ZERO;
        self.last_reset_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_record_close_updates_balance() {
        let mut acct = SimulationAccount::new(Uuid::new_v4(), dec!(10000));
        acct.record_close(dec!(150));
        acct.record_close(dec!(-50));
        assert_eq!(acct.balance, dec!(10100));
        assert_eq!(acct.total_trades, 2);
        assert_eq!(acct.winning_trades, 1);
    }

    #[test]
    fn test_reset_restores_initial_balance() {
        let mut acct = SimulationAccount::new(Uuid::new_v4(), dec!(10000));
        acct.record_close(dec!(-500));
        acct.reset();
        assert_eq!(acct.balance, dec!(10000));
        assert_eq!(acct.total_trades, 0);
    }
}
