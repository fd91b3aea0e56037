use crate::domain::repositories::StrategyBudgetRepository;
use crate::domain::risk::StrategyBudget;
use crate::domain::types::UserId;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    fmt_opt_dt, parse_dec, parse_opt_dt, parse_uuid,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;

pub struct SqliteStrategyBudgetRepository {
    database: Database,
}

impl SqliteStrategyBudgetRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StrategyBudget> {
        Ok(StrategyBudget {
            user_id: parse_uuid(row.try_get("user_id")?)?,
            strategy_name: row.try_get("strategy_name")?,
            symbol: row.try_get("symbol")?,
            enabled: row.try_get("enabled")?,
            consecutive_losses: row.try_get::<i64, _>("consecutive_losses")? as u32,
            total_trades: row.try_get::<i64, _>("total_trades")? as u32,
            winning_trades: row.try_get::<i64, _>("winning_trades")? as u32,
            gross_profit: parse_dec(row.try_get("gross_profit")?)?,
            gross_loss: parse_dec(row.try_get("gross_loss")?)?,
            last_trade_at: parse_opt_dt(row.try_get("last_trade_at")?)?,
            disabled_reason: row.try_get("disabled_reason")?,
        })
    }
}

#[async_trait]
impl StrategyBudgetRepository for SqliteStrategyBudgetRepository {
    async fn save(&self, budget: &StrategyBudget) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO strategy_budgets (
                user_id, strategy_name, symbol, enabled, consecutive_losses,
                total_trades, winning_trades, gross_profit, gross_loss,
                last_trade_at, disabled_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT(user_id, strategy_name, symbol) DO UPDATE SET
                enabled = excluded.enabled,
                consecutive_losses = excluded.consecutive_losses,
                total_trades = excluded.total_trades,
                winning_trades = excluded.winning_trades,
                gross_profit = excluded.gross_profit,
                gross_loss = excluded.gross_loss,
                last_trade_at = excluded.last_trade_at,
                disabled_reason = excluded.disabled_reason
            "#,
        )
        .bind(budget.user_id.to_string())
        .bind(&budget.strategy_name)
        .bind(&budget.symbol)
        .bind(budget.enabled)
        .bind(budget.consecutive_losses as i64)
        .bind(budget.total_trades as i64)
        .bind(budget.winning_trades as i64)
        .bind(budget.gross_profit.to_string())
        .bind(budget.gross_loss.to_string())
        .bind(fmt_opt_dt(&budget.last_trade_at))
        .bind(&budget.disabled_reason)
        .execute(&self.database.pool)
        .await
        .context("Failed to save strategy budget")?;
        Ok(())
    }

    async fn load(
        &self,
        user_id: UserId,
        strategy_name: &str,
        symbol: &str,
    ) -> Result<Option<StrategyBudget>> {
        let row = sqlx::query(
            "SELECT * FROM strategy_budgets
             WHERE user_id = $1 AND strategy_name = $2 AND symbol = $3",
        )
        .bind(user_id.to_string())
        .bind(strategy_name)
        .bind(symbol)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load strategy budget")?;
        row.map(|r| Self::from_row(&r)).transpose()
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<StrategyBudget>> {
        let rows = sqlx::query("SELECT * FROM strategy_budgets WHERE user_id = $1")
            .bind(user_id.to_string())
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to list strategy budgets")?;
        rows.iter().map(Self::from_row).collect()
    }
}
