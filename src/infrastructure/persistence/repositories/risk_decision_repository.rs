use crate::domain::repositories::RiskDecisionRepository;
use crate::domain::risk::RiskDecision;
use crate::domain::types::UserId;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    enum_str, fmt_dt, parse_dt, parse_enum, parse_opt_uuid, parse_uuid,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;

pub struct SqliteRiskDecisionRepository {
    database: Database,
}

impl SqliteRiskDecisionRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<RiskDecision> {
        Ok(RiskDecision {
            id: parse_uuid(row.try_get("id")?)?,
            signal_id: parse_opt_uuid(row.try_get("signal_id")?)?,
            user_id: parse_uuid(row.try_get("user_id")?)?,
            kind: parse_enum(row.try_get("kind")?)?,
            reason_code: row.try_get("reason_code")?,
            severity: parse_enum(row.try_get("severity")?)?,
            checks_passed: serde_json::from_str(row.try_get("checks_passed")?)?,
            checks_failed: serde_json::from_str(row.try_get("checks_failed")?)?,
            snapshot: serde_json::from_str(row.try_get("snapshot")?)?,
            created_at: parse_dt(row.try_get("created_at")?)?,
        })
    }
}

#[async_trait]
impl RiskDecisionRepository for SqliteRiskDecisionRepository {
    async fn insert(&self, decision: &RiskDecision) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO risk_decisions
                (id, signal_id, user_id, kind, reason_code, severity,
                 checks_passed, checks_failed, snapshot, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(decision.id.to_string())
        .bind(decision.signal_id.map(|u| u.to_string()))
        .bind(decision.user_id.to_string())
        .bind(enum_str(&decision.kind)?)
        .bind(&decision.reason_code)
        .bind(enum_str(&decision.severity)?)
        .bind(serde_json::to_string(&decision.checks_passed)?)
        .bind(serde_json::to_string(&decision.checks_failed)?)
        .bind(decision.snapshot.to_string())
        .bind(fmt_dt(&decision.created_at))
        .execute(&self.database.pool)
        .await
        .context("Failed to insert risk decision")?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId, limit: u32) -> Result<Vec<RiskDecision>> {
        let rows = sqlx::query(
            "SELECT * FROM risk_decisions WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to list risk decisions")?;
        rows.iter().map(Self::from_row).collect()
    }
}
