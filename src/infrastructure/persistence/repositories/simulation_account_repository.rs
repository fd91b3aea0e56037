use crate::domain::repositories::SimulationAccountRepository;
use crate::domain::simulation::SimulationAccount;
use crate::domain::types::UserId;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{fmt_dt, parse_dec, parse_dt, parse_uuid};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;

pub struct SqliteSimulationAccountRepository {
    database: Database,
}

impl SqliteSimulationAccountRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl SimulationAccountRepository for SqliteSimulationAccountRepository {
    async fn save(&self, account: &SimulationAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO simulation_accounts (
                user_id, balance, equity, initial_balance, slippage_pips,
                commission_per_lot, latency_ms, fill_probability, total_trades,
                winning_trades, total_pnl, last_reset_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT(user_id) DO UPDATE SET
                balance = excluded.balance,
                equity = excluded.equity,
                slippage_pips = excluded.slippage_pips,
                commission_per_lot = excluded.commission_per_lot,
                latency_ms = excluded.latency_ms,
                fill_probability = excluded.fill_probability,
                total_trades = excluded.total_trades,
                winning_trades = excluded.winning_trades,
                total_pnl = excluded.total_pnl,
                last_reset_at = excluded.last_reset_at
            "#,
        )
        .bind(account.user_id.to_string())
        .bind(account.balance.to_string())
        .bind(account.equity.to_string())
        .bind(account.initial_balance.to_string())
        .bind(account.slippage_pips.to_string())
        .bind(account.commission_per_lot.to_string())
        .bind(account.latency_ms as i64)
        .bind(account.fill_probability)
        .bind(account.total_trades as i64)
        .bind(account.winning_trades as i64)
        .bind(account.total_pnl.to_string())
        .bind(fmt_dt(&account.last_reset_at))
        .execute(&self.database.pool)
        .await
        .context("Failed to save simulation account")?;
        Ok(())
    }

    async fn load(&self, user_id: UserId) -> Result<Option<SimulationAccount>> {
        let row = sqlx::query("SELECT * FROM simulation_accounts WHERE user_id = $1")
            .bind(user_id.to_string())
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load simulation account")?;

        row.map(|row| {
            Ok(SimulationAccount {
                user_id: parse_uuid(row.try_get("user_id")?)?,
                balance: parse_dec(row.try_get("balance")?)?,
                equity: parse_dec(row.try_get("equity")?)?,
                initial_balance: parse_dec(row.try_get("initial_balance")?)?,
                slippage_pips: parse_dec(row.try_get("slippage_pips")?)?,
                commission_per_lot: parse_dec(row.try_get("commission_per_lot")?)?,
                latency_ms: row.try_get::<i64, _>("latency_ms")? as u64,
                fill_probability: row.try_get("fill_probability")?,
                total_trades: row.try_get::<i64, _>("total_trades")? as u32,
                winning_trades: row.try_get::<i64, _>("winning_trades")? as u32,
                total_pnl: parse_dec(row.try_get("total_pnl")?)?,
                last_reset_at: parse_dt(row.try_get("last_reset_at")?)?,
            })
        })
        .transpose()
    }
}
