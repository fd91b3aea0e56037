use crate::domain::repositories::SignalRepository;
use crate::domain::signal::{Signal, SignalStatus};
use crate::domain::types::UserId;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    enum_str, fmt_dt, parse_dec, parse_dt, parse_enum, parse_uuid,
};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

pub struct SqliteSignalRepository {
    database: Database,
}

impl SqliteSignalRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Signal> {
        Ok(Signal {
            id: parse_uuid(row.try_get("id")?)?,
            strategy_name: row.try_get("strategy_name")?,
            user_id: parse_uuid(row.try_get("user_id")?)?,
            symbol: row.try_get("symbol")?,
            side: parse_enum(row.try_get("side")?)?,
            entry: parse_dec(row.try_get("entry")?)?,
            stop_loss: parse_dec(row.try_get("stop_loss")?)?,
            take_profit: parse_dec(row.try_get("take_profit")?)?,
            risk_pct: parse_dec(row.try_get("risk_pct")?)?,
            confidence: row.try_get("confidence")?,
            status: parse_enum(row.try_get("status")?)?,
            signal_time: parse_dt(row.try_get("signal_time")?)?,
        })
    }
}

#[async_trait]
impl SignalRepository for SqliteSignalRepository {
    async fn insert(&self, signal: &Signal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signals
                (id, strategy_name, user_id, symbol, side, entry, stop_loss, take_profit,
                 risk_pct, confidence, status, signal_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(signal.id.to_string())
        .bind(&signal.strategy_name)
        .bind(signal.user_id.to_string())
        .bind(&signal.symbol)
        .bind(enum_str(&signal.side)?)
        .bind(signal.entry.to_string())
        .bind(signal.stop_loss.to_string())
        .bind(signal.take_profit.to_string())
        .bind(signal.risk_pct.to_string())
        .bind(signal.confidence)
        .bind(enum_str(&signal.status)?)
        .bind(fmt_dt(&signal.signal_time))
        .execute(&self.database.pool)
        .await
        .context("Failed to insert signal")?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Signal>> {
        let row = sqlx::query("SELECT * FROM signals WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load signal")?;
        row.map(|r| Self::from_row(&r)).transpose()
    }

    async fn set_status(&self, id: Uuid, status: SignalStatus) -> Result<()> {
        // Status only ever advances; the guard runs in the same transaction
        // as the write.
        let mut tx = self.database.pool.begin().await?;
        let row = sqlx::query("SELECT status FROM signals WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .with_context(|| format!("signal {} not found", id))?;
        let current: SignalStatus = parse_enum(row.try_get("status")?)?;
        if !current.can_advance_to(status) {
            bail!("signal {} cannot advance from {} to {}", id, current, status);
        }
        sqlx::query("UPDATE signals SET status = $1 WHERE id = $2")
            .bind(enum_str(&status)?)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId, limit: u32) -> Result<Vec<Signal>> {
        let rows = sqlx::query(
            "SELECT * FROM signals WHERE user_id = $1 ORDER BY signal_time DESC LIMIT $2",
        )
        .bind(user_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to list signals")?;
        rows.iter().map(Self::from_row).collect()
    }
}
