use crate::domain::position::Position;
use crate::domain::repositories::PositionRepository;
use crate::domain::types::UserId;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    enum_str, fmt_dt, fmt_opt_dt, parse_dec, parse_dt, parse_enum, parse_opt_dec, parse_opt_dt,
    parse_uuid,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

pub struct SqlitePositionRepository {
    database: Database,
}

impl SqlitePositionRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Position> {
        Ok(Position {
            id: parse_uuid(row.try_get("id")?)?,
            signal_id: parse_uuid(row.try_get("signal_id")?)?,
            user_id: parse_uuid(row.try_get("user_id")?)?,
            symbol: row.try_get("symbol")?,
            side: parse_enum(row.try_get("side")?)?,
            size: parse_dec(row.try_get("size")?)?,
            avg_entry: parse_dec(row.try_get("avg_entry")?)?,
            stop_loss: parse_opt_dec(row.try_get("stop_loss")?)?,
            take_profit: parse_opt_dec(row.try_get("take_profit")?)?,
            opened_at: parse_dt(row.try_get("opened_at")?)?,
            closed_at: parse_opt_dt(row.try_get("closed_at")?)?,
            status: parse_enum(row.try_get("status")?)?,
        })
    }
}

#[async_trait]
impl PositionRepository for SqlitePositionRepository {
    async fn insert(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions
                (id, signal_id, user_id, symbol, side, size, avg_entry, stop_loss,
                 take_profit, opened_at, closed_at, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(position.id.to_string())
        .bind(position.signal_id.to_string())
        .bind(position.user_id.to_string())
        .bind(&position.symbol)
        .bind(enum_str(&position.side)?)
        .bind(position.size.to_string())
        .bind(position.avg_entry.to_string())
        .bind(position.stop_loss.map(|d| d.to_string()))
        .bind(position.take_profit.map(|d| d.to_string()))
        .bind(fmt_dt(&position.opened_at))
        .bind(fmt_opt_dt(&position.closed_at))
        .bind(enum_str(&position.status)?)
        .execute(&self.database.pool)
        .await
        .context("Failed to insert position")?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load position")?;
        row.map(|r| Self::from_row(&r)).transpose()
    }

    async fn update(&self, position: &Position) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE positions SET
                size = $1, avg_entry = $2, stop_loss = $3, take_profit = $4,
                closed_at = $5, status = $6
            WHERE id = $7
            "#,
        )
        .bind(position.size.to_string())
        .bind(position.avg_entry.to_string())
        .bind(position.stop_loss.map(|d| d.to_string()))
        .bind(position.take_profit.map(|d| d.to_string()))
        .bind(fmt_opt_dt(&position.closed_at))
        .bind(enum_str(&position.status)?)
        .bind(position.id.to_string())
        .execute(&self.database.pool)
        .await
        .context("Failed to update position")?;
        anyhow::ensure!(result.rows_affected() == 1, "position {} not found", position.id);
        Ok(())
    }

    async fn open_for_user(&self, user_id: UserId) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            "SELECT * FROM positions WHERE user_id = $1 AND closed_at IS NULL",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to list open positions")?;
        rows.iter().map(Self::from_row).collect()
    }
}
