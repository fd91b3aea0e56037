use crate::domain::journal::FeedbackDecision;
use crate::domain::repositories::FeedbackRepository;
use crate::domain::types::UserId;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    enum_str, fmt_dt, parse_dt, parse_enum, parse_uuid,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;

pub struct SqliteFeedbackRepository {
    database: Database,
}

impl SqliteFeedbackRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl FeedbackRepository for SqliteFeedbackRepository {
    async fn insert(&self, decision: &FeedbackDecision) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO feedback_decisions
                (id, user_id, strategy_name, symbol, action, report, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(decision.id.to_string())
        .bind(decision.user_id.to_string())
        .bind(&decision.strategy_name)
        .bind(&decision.symbol)
        .bind(enum_str(&decision.action)?)
        .bind(serde_json::to_string(&decision.report)?)
        .bind(&decision.reason)
        .bind(fmt_dt(&decision.created_at))
        .execute(&self.database.pool)
        .await
        .context("Failed to insert feedback decision")?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId, limit: u32) -> Result<Vec<FeedbackDecision>> {
        let rows = sqlx::query(
            "SELECT * FROM feedback_decisions WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to list feedback decisions")?;

        rows.iter()
            .map(|row| {
                Ok(FeedbackDecision {
                    id: parse_uuid(row.try_get("id")?)?,
                    user_id: parse_uuid(row.try_get("user_id")?)?,
                    strategy_name: row.try_get("strategy_name")?,
                    symbol: row.try_get("symbol")?,
                    action: parse_enum(row.try_get("action")?)?,
                    report: serde_json::from_str(row.try_get("report")?)?,
                    reason: row.try_get("reason")?,
                    created_at: parse_dt(row.try_get("created_at")?)?,
                })
            })
            .collect()
    }
}
