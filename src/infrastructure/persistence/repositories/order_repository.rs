use crate::domain::order::{ExecutionLogEntry, ExecutionOrder, OrderStatus};
use crate::domain::repositories::{OrderInsert, OrderRepository};
use crate::domain::types::UserId;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    enum_str, fmt_dt, fmt_opt_dt, parse_dec, parse_dt, parse_enum, parse_opt_dec, parse_opt_dt,
    parse_opt_uuid, parse_uuid,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

pub struct SqliteOrderRepository {
    database: Database,
}

impl SqliteOrderRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionOrder> {
        Ok(ExecutionOrder {
            id: parse_uuid(row.try_get("id")?)?,
            client_order_id: row.try_get("client_order_id")?,
            broker_order_id: row.try_get("broker_order_id")?,
            broker_type: parse_enum(row.try_get("broker_type")?)?,
            symbol: row.try_get("symbol")?,
            order_type: parse_enum(row.try_get("order_type")?)?,
            side: parse_enum(row.try_get("side")?)?,
            qty: parse_dec(row.try_get("qty")?)?,
            price: parse_opt_dec(row.try_get("price")?)?,
            stop_price: parse_opt_dec(row.try_get("stop_price")?)?,
            stop_loss: parse_opt_dec(row.try_get("stop_loss")?)?,
            take_profit: parse_opt_dec(row.try_get("take_profit")?)?,
            status: parse_enum(row.try_get("status")?)?,
            filled_qty: parse_dec(row.try_get("filled_qty")?)?,
            avg_fill_price: parse_opt_dec(row.try_get("avg_fill_price")?)?,
            submitted_at: parse_opt_dt(row.try_get("submitted_at")?)?,
            filled_at: parse_opt_dt(row.try_get("filled_at")?)?,
            signal_id: parse_uuid(row.try_get("signal_id")?)?,
            position_id: parse_opt_uuid(row.try_get("position_id")?)?,
            strategy_name: row.try_get("strategy_name")?,
            error_msg: row.try_get("error_msg")?,
            retry_count: row.try_get::<i64, _>("retry_count")? as u32,
            user_id: parse_uuid(row.try_get("user_id")?)?,
        })
    }

    fn log_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionLogEntry> {
        let old_status: Option<String> = row.try_get("old_status")?;
        let new_status: Option<String> = row.try_get("new_status")?;
        Ok(ExecutionLogEntry {
            id: parse_uuid(row.try_get("id")?)?,
            order_id: parse_uuid(row.try_get("order_id")?)?,
            event_type: row.try_get("event_type")?,
            event_data: serde_json::from_str(row.try_get("event_data")?)?,
            old_status: old_status.as_deref().map(parse_enum).transpose()?,
            new_status: new_status.as_deref().map(parse_enum).transpose()?,
            event_time: parse_dt(row.try_get("event_time")?)?,
        })
    }

    fn terminal_statuses() -> &'static str {
        "('filled', 'cancelled', 'rejected', 'expired', 'failed')"
    }
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn insert(&self, order: &ExecutionOrder) -> Result<OrderInsert> {
        let result = sqlx::query(
            r#"
            INSERT INTO execution_orders
                (id, client_order_id, broker_order_id, broker_type, symbol, order_type, side,
                 qty, price, stop_price, stop_loss, take_profit, status, filled_qty,
                 avg_fill_price, submitted_at, filled_at, signal_id, position_id,
                 strategy_name, error_msg, retry_count, user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(order.id.to_string())
        .bind(&order.client_order_id)
        .bind(&order.broker_order_id)
        .bind(enum_str(&order.broker_type)?)
        .bind(&order.symbol)
        .bind(enum_str(&order.order_type)?)
        .bind(enum_str(&order.side)?)
        .bind(order.qty.to_string())
        .bind(order.price.map(|d| d.to_string()))
        .bind(order.stop_price.map(|d| d.to_string()))
        .bind(order.stop_loss.map(|d| d.to_string()))
        .bind(order.take_profit.map(|d| d.to_string()))
        .bind(enum_str(&order.status)?)
        .bind(order.filled_qty.to_string())
        .bind(order.avg_fill_price.map(|d| d.to_string()))
        .bind(fmt_opt_dt(&order.submitted_at))
        .bind(fmt_opt_dt(&order.filled_at))
        .bind(order.signal_id.to_string())
        .bind(order.position_id.map(|u| u.to_string()))
        .bind(&order.strategy_name)
        .bind(&order.error_msg)
        .bind(order.retry_count as i64)
        .bind(order.user_id.to_string())
        .execute(&self.database.pool)
        .await;

        match result {
            Ok(_) => Ok(OrderInsert::Inserted),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                // The idempotency key matched: hand back the existing row.
                let existing = self
                    .by_client_order_id(&order.client_order_id)
                    .await?
                    .context("unique violation but no existing order")?;
                Ok(OrderInsert::Duplicate(existing))
            }
            Err(e) => Err(e).context("Failed to insert order"),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExecutionOrder>> {
        let row = sqlx::query("SELECT * FROM execution_orders WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load order")?;
        row.map(|r| Self::from_row(&r)).transpose()
    }

    async fn by_client_order_id(&self, client_order_id: &str) -> Result<Option<ExecutionOrder>> {
        let row = sqlx::query("SELECT * FROM execution_orders WHERE client_order_id = $1")
            .bind(client_order_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load order by client id")?;
        row.map(|r| Self::from_row(&r)).transpose()
    }

    async fn by_broker_order_id(&self, broker_order_id: &str) -> Result<Option<ExecutionOrder>> {
        let row = sqlx::query("SELECT * FROM execution_orders WHERE broker_order_id = $1")
            .bind(broker_order_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load order by broker id")?;
        row.map(|r| Self::from_row(&r)).transpose()
    }

    async fn update(&self, order: &ExecutionOrder) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE execution_orders SET
                broker_order_id = $1, status = $2, filled_qty = $3, avg_fill_price = $4,
                submitted_at = $5, filled_at = $6, position_id = $7, error_msg = $8,
                retry_count = $9
            WHERE id = $10
            "#,
        )
        .bind(&order.broker_order_id)
        .bind(enum_str(&order.status)?)
        .bind(order.filled_qty.to_string())
        .bind(order.avg_fill_price.map(|d| d.to_string()))
        .bind(fmt_opt_dt(&order.submitted_at))
        .bind(fmt_opt_dt(&order.filled_at))
        .bind(order.position_id.map(|u| u.to_string()))
        .bind(&order.error_msg)
        .bind(order.retry_count as i64)
        .bind(order.id.to_string())
        .execute(&self.database.pool)
        .await
        .context("Failed to update order")?;
        anyhow::ensure!(result.rows_affected() == 1, "order {} not found", order.id);
        Ok(())
    }

    async fn non_terminal(&self) -> Result<Vec<ExecutionOrder>> {
        let query = format!(
            "SELECT * FROM execution_orders WHERE status NOT IN {}",
            Self::terminal_statuses()
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to list non-terminal orders")?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn non_terminal_for_user(&self, user_id: UserId) -> Result<Vec<ExecutionOrder>> {
        let query = format!(
            "SELECT * FROM execution_orders WHERE user_id = $1 AND status NOT IN {}",
            Self::terminal_statuses()
        );
        let rows = sqlx::query(&query)
            .bind(user_id.to_string())
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to list non-terminal orders for user")?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
        limit: u32,
    ) -> Result<Vec<ExecutionOrder>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM execution_orders WHERE user_id = $1 AND status = $2
                     ORDER BY submitted_at DESC LIMIT $3",
                )
                .bind(user_id.to_string())
                .bind(enum_str(&status)?)
                .bind(limit as i64)
                .fetch_all(&self.database.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM execution_orders WHERE user_id = $1
                     ORDER BY submitted_at DESC LIMIT $2",
                )
                .bind(user_id.to_string())
                .bind(limit as i64)
                .fetch_all(&self.database.pool)
                .await
            }
        }
        .context("Failed to list orders")?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_log
                (id, order_id, event_type, event_data, old_status, new_status, event_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.order_id.to_string())
        .bind(&entry.event_type)
        .bind(entry.event_data.to_string())
        .bind(entry.old_status.map(|s| enum_str(&s)).transpose()?)
        .bind(entry.new_status.map(|s| enum_str(&s)).transpose()?)
        .bind(fmt_dt(&entry.event_time))
        .execute(&self.database.pool)
        .await
        .context("Failed to append execution log")?;
        Ok(())
    }

    async fn logs_for_order(&self, order_id: Uuid) -> Result<Vec<ExecutionLogEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM execution_log WHERE order_id = $1 ORDER BY event_time ASC",
        )
        .bind(order_id.to_string())
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to read execution log")?;
        rows.iter().map(Self::log_from_row).collect()
    }
}
