use crate::domain::journal::JournalEntry;
use crate::domain::repositories::JournalRepository;
use crate::domain::types::UserId;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    enum_str, fmt_dt, parse_dec, parse_dt, parse_enum, parse_uuid,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

/// Insert-only by construction; the table's triggers abort any UPDATE or
/// DELETE regardless of what callers attempt.
pub struct SqliteJournalRepository {
    database: Database,
}

impl SqliteJournalRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<JournalEntry> {
        Ok(JournalEntry {
            id: parse_uuid(row.try_get("id")?)?,
            entry_uid: row.try_get("entry_uid")?,
            strategy_name: row.try_get("strategy_name")?,
            symbol: row.try_get("symbol")?,
            user_id: parse_uuid(row.try_get("user_id")?)?,
            source: parse_enum(row.try_get("source")?)?,
            side: parse_enum(row.try_get("side")?)?,
            entry: parse_dec(row.try_get("entry")?)?,
            exit: parse_dec(row.try_get("exit_price")?)?,
            size: parse_dec(row.try_get("size")?)?,
            pnl: parse_dec(row.try_get("pnl")?)?,
            duration_secs: row.try_get("duration_secs")?,
            exit_reason: parse_enum(row.try_get("exit_reason")?)?,
            opened_at: parse_dt(row.try_get("opened_at")?)?,
            closed_at: parse_dt(row.try_get("closed_at")?)?,
            signal_id: parse_uuid(row.try_get("signal_id")?)?,
            order_id: parse_uuid(row.try_get("order_id")?)?,
        })
    }
}

#[async_trait]
impl JournalRepository for SqliteJournalRepository {
    async fn insert(&self, entry: &JournalEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO journal_entries
                (id, entry_uid, strategy_name, symbol, user_id, source, side, entry,
                 exit_price, size, pnl, duration_secs, exit_reason, opened_at, closed_at,
                 signal_id, order_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.entry_uid)
        .bind(&entry.strategy_name)
        .bind(&entry.symbol)
        .bind(entry.user_id.to_string())
        .bind(enum_str(&entry.source)?)
        .bind(enum_str(&entry.side)?)
        .bind(entry.entry.to_string())
        .bind(entry.exit.to_string())
        .bind(entry.size.to_string())
        .bind(entry.pnl.to_string())
        .bind(entry.duration_secs)
        .bind(enum_str(&entry.exit_reason)?)
        .bind(fmt_dt(&entry.opened_at))
        .bind(fmt_dt(&entry.closed_at))
        .bind(entry.signal_id.to_string())
        .bind(entry.order_id.to_string())
        .execute(&self.database.pool)
        .await
        .context("Failed to insert journal entry")?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId, limit: u32) -> Result<Vec<JournalEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM journal_entries WHERE user_id = $1 ORDER BY closed_at DESC LIMIT $2",
        )
        .bind(user_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to list journal entries")?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn window(
        &self,
        user_id: UserId,
        strategy_name: &str,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<JournalEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM journal_entries
            WHERE user_id = $1 AND strategy_name = $2 AND symbol = $3 AND closed_at >= $4
            ORDER BY closed_at ASC
            "#,
        )
        .bind(user_id.to_string())
        .bind(strategy_name)
        .bind(symbol)
        .bind(fmt_dt(&since))
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to read journal window")?;
        rows.iter().map(Self::from_row).collect()
    }
}
