use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Singleton database wrapper
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create users table")?;

        // Singleton row keyed on id=1; version drives the CAS.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create settings table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings_audit (
                id TEXT PRIMARY KEY,
                version INTEGER NOT NULL UNIQUE,
                changed_by TEXT,
                changed_at TEXT NOT NULL,
                change_type TEXT NOT NULL,
                old_values TEXT NOT NULL,
                new_values TEXT NOT NULL,
                reason TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create settings_audit table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                strategy_name TEXT NOT NULL,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                risk_pct TEXT NOT NULL,
                confidence REAL NOT NULL,
                status TEXT NOT NULL,
                signal_time TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create signals table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                signal_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                size TEXT NOT NULL,
                avg_entry TEXT NOT NULL,
                stop_loss TEXT,
                take_profit TEXT,
                opened_at TEXT NOT NULL,
                closed_at TEXT,
                status TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create positions table")?;

        // client_order_id uniqueness is the idempotency guarantee.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_orders (
                id TEXT PRIMARY KEY,
                client_order_id TEXT NOT NULL UNIQUE,
                broker_order_id TEXT,
                broker_type TEXT NOT NULL,
                symbol TEXT NOT NULL,
                order_type TEXT NOT NULL,
                side TEXT NOT NULL,
                qty TEXT NOT NULL,
                price TEXT,
                stop_price TEXT,
                stop_loss TEXT,
                take_profit TEXT,
                status TEXT NOT NULL,
                filled_qty TEXT NOT NULL,
                avg_fill_price TEXT,
                submitted_at TEXT,
                filled_at TEXT,
                signal_id TEXT NOT NULL,
                position_id TEXT,
                strategy_name TEXT NOT NULL,
                error_msg TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                user_id TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create execution_orders table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_orders_user_status
            ON execution_orders (user_id, status);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create order index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_log (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_data TEXT NOT NULL,
                old_status TEXT,
                new_status TEXT,
                event_time TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create execution_log table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_decisions (
                id TEXT PRIMARY KEY,
                signal_id TEXT,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                reason_code TEXT,
                severity TEXT NOT NULL,
                checks_passed TEXT NOT NULL,
                checks_failed TEXT NOT NULL,
                snapshot TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create risk_decisions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_risk_state (
                user_id TEXT PRIMARY KEY,
                balance TEXT NOT NULL,
                equity TEXT NOT NULL,
                peak_equity TEXT NOT NULL,
                daily_pnl TEXT NOT NULL,
                daily_pnl_reset_at TEXT NOT NULL,
                open_positions_count INTEGER NOT NULL,
                trades_today INTEGER NOT NULL,
                hourly_trade_times TEXT NOT NULL,
                emergency_shutdown INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create account_risk_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategy_budgets (
                user_id TEXT NOT NULL,
                strategy_name TEXT NOT NULL,
                symbol TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                consecutive_losses INTEGER NOT NULL,
                total_trades INTEGER NOT NULL,
                winning_trades INTEGER NOT NULL,
                gross_profit TEXT NOT NULL,
                gross_loss TEXT NOT NULL,
                last_trade_at TEXT,
                disabled_reason TEXT,
                PRIMARY KEY (user_id, strategy_name, symbol)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create strategy_budgets table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS journal_entries (
                id TEXT PRIMARY KEY,
                entry_uid TEXT NOT NULL UNIQUE,
                strategy_name TEXT NOT NULL,
                symbol TEXT NOT NULL,
                user_id TEXT NOT NULL,
                source TEXT NOT NULL,
                side TEXT NOT NULL,
                entry TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                size TEXT NOT NULL,
                pnl TEXT NOT NULL,
                duration_secs INTEGER NOT NULL,
                exit_reason TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                closed_at TEXT NOT NULL,
                signal_id TEXT NOT NULL,
                order_id TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create journal_entries table")?;

        // The journal is append-only at the storage layer: any UPDATE or
        // DELETE aborts the statement.
        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS journal_entries_no_update
            BEFORE UPDATE ON journal_entries
            BEGIN
                SELECT RAISE(ABORT, 'journal entries are immutable');
            END;
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create journal update trigger")?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS journal_entries_no_delete
            BEFORE DELETE ON journal_entries
            BEGIN
                SELECT RAISE(ABORT, 'journal entries are immutable');
            END;
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create journal delete trigger")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feedback_decisions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                strategy_name TEXT NOT NULL,
                symbol TEXT NOT NULL,
                action TEXT NOT NULL,
                report TEXT NOT NULL,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create feedback_decisions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS simulation_accounts (
                user_id TEXT PRIMARY KEY,
                balance TEXT NOT NULL,
                equity TEXT NOT NULL,
                initial_balance TEXT NOT NULL,
                slippage_pips TEXT NOT NULL,
                commission_per_lot TEXT NOT NULL,
                latency_ms INTEGER NOT NULL,
                fill_probability REAL NOT NULL,
                total_trades INTEGER NOT NULL,
                winning_trades INTEGER NOT NULL,
                total_pnl TEXT NOT NULL,
                last_reset_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create simulation_accounts table")?;

        info!("Database schema initialized");
        Ok(())
    }
}
