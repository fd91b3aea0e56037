use crate::domain::repositories::RiskStateRepository;
use crate::domain::risk::AccountRiskState;
use crate::domain::types::UserId;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{fmt_dt, parse_dec, parse_dt, parse_uuid};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;

pub struct SqliteRiskStateRepository {
    database: Database,
}

impl SqliteRiskStateRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl RiskStateRepository for SqliteRiskStateRepository {
    /// Save the account risk state (upsert).
    async fn save(&self, state: &AccountRiskState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_risk_state (
                user_id, balance, equity, peak_equity, daily_pnl, daily_pnl_reset_at,
                open_positions_count, trades_today, hourly_trade_times,
                emergency_shutdown, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT(user_id) DO UPDATE SET
                balance = excluded.balance,
                equity = excluded.equity,
                peak_equity = excluded.peak_equity,
                daily_pnl = excluded.daily_pnl,
                daily_pnl_reset_at = excluded.daily_pnl_reset_at,
                open_positions_count = excluded.open_positions_count,
                trades_today = excluded.trades_today,
                hourly_trade_times = excluded.hourly_trade_times,
                emergency_shutdown = excluded.emergency_shutdown,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(state.user_id.to_string())
        .bind(state.balance.to_string())
        .bind(state.equity.to_string())
        .bind(state.peak_equity.to_string())
        .bind(state.daily_pnl.to_string())
        .bind(fmt_dt(&state.daily_pnl_reset_at))
        .bind(state.open_positions_count as i64)
        .bind(state.trades_today as i64)
        .bind(serde_json::to_string(&state.hourly_trade_times)?)
        .bind(state.emergency_shutdown)
        .bind(fmt_dt(&state.updated_at))
        .execute(&self.database.pool)
        .await
        .context("Failed to save risk state")?;
        Ok(())
    }

    async fn load(&self, user_id: UserId) -> Result<Option<AccountRiskState>> {
        let row = sqlx::query("SELECT * FROM account_risk_state WHERE user_id = $1")
            .bind(user_id.to_string())
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load risk state")?;

        row.map(|row| {
            Ok(AccountRiskState {
                user_id: parse_uuid(row.try_get("user_id")?)?,
                balance: parse_dec(row.try_get("balance")?)?,
                equity: parse_dec(row.try_get("equity")?)?,
                peak_equity: parse_dec(row.try_get("peak_equity")?)?,
                daily_pnl: parse_dec(row.try_get("daily_pnl")?)?,
                daily_pnl_reset_at: parse_dt(row.try_get("daily_pnl_reset_at")?)?,
                open_positions_count: row.try_get::<i64, _>("open_positions_count")? as u32,
                trades_today: row.try_get::<i64, _>("trades_today")? as u32,
                hourly_trade_times: serde_json::from_str(row.try_get("hourly_trade_times")?)?,
                emergency_shutdown: row.try_get("emergency_shutdown")?,
                updated_at: parse_dt(row.try_get("updated_at")?)?,
            })
        })
        .transpose()
    }
}
