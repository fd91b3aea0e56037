use crate::domain::repositories::SettingsRepository;
use crate::domain::settings::{Settings, SettingsAudit};
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    enum_str, fmt_dt, parse_dt, parse_enum, parse_opt_uuid, parse_uuid,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;

pub struct SqliteSettingsRepository {
    database: Database,
}

impl SqliteSettingsRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    async fn insert_audit<'t>(
        tx: &mut sqlx::Transaction<'t, sqlx::Sqlite>,
        audit: &SettingsAudit,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings_audit
                (id, version, changed_by, changed_at, change_type, old_values, new_values, reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(audit.id.to_string())
        .bind(audit.version)
        .bind(audit.changed_by.map(|u| u.to_string()))
        .bind(fmt_dt(&audit.changed_at))
        .bind(enum_str(&audit.change_type)?)
        .bind(audit.old_values.to_string())
        .bind(audit.new_values.to_string())
        .bind(&audit.reason)
        .execute(&mut **tx)
        .await
        .context("Failed to insert settings audit row")?;
        Ok(())
    }
}

#[async_trait]
impl SettingsRepository for SqliteSettingsRepository {
    async fn load(&self) -> Result<Option<Settings>> {
        let row = sqlx::query("SELECT payload FROM settings WHERE id = 1")
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load settings")?;

        match row {
            Some(row) => {
                let payload: String = row.try_get("payload")?;
                Ok(Some(
                    serde_json::from_str(&payload).context("Corrupt settings payload")?,
                ))
            }
            None => Ok(None),
        }
    }

    async fn insert_default(&self, settings: &Settings, audit: &SettingsAudit) -> Result<()> {
        let mut tx = self.database.pool.begin().await?;
        sqlx::query(
            "INSERT INTO settings (id, version, payload, updated_at) VALUES (1, $1, $2, $3)",
        )
        .bind(settings.version)
        .bind(serde_json::to_string(settings)?)
        .bind(fmt_dt(&settings.updated_at))
        .execute(&mut *tx)
        .await
        .context("Failed to insert default settings")?;
        Self::insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn compare_and_update(
        &self,
        expected_version: i64,
        settings: &Settings,
        audit: &SettingsAudit,
    ) -> Result<bool> {
        let mut tx = self.database.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE settings SET version = $1, payload = $2, updated_at = $3
             WHERE id = 1 AND version = $4",
        )
        .bind(settings.version)
        .bind(serde_json::to_string(settings)?)
        .bind(fmt_dt(&settings.updated_at))
        .bind(expected_version)
        .execute(&mut *tx)
        .await
        .context("Failed to CAS settings")?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        Self::insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn audit_log(&self, limit: u32) -> Result<Vec<SettingsAudit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, version, changed_by, changed_at, change_type, old_values, new_values, reason
            FROM settings_audit
            ORDER BY version DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to read settings audit")?;

        rows.into_iter()
            .map(|row| {
                Ok(SettingsAudit {
                    id: parse_uuid(row.try_get("id")?)?,
                    version: row.try_get("version")?,
                    changed_by: parse_opt_uuid(row.try_get("changed_by")?)?,
                    changed_at: parse_dt(row.try_get("changed_at")?)?,
                    change_type: parse_enum(row.try_get("change_type")?)?,
                    old_values: serde_json::from_str(row.try_get("old_values")?)?,
                    new_values: serde_json::from_str(row.try_get("new_values")?)?,
                    reason: row.try_get("reason")?,
                })
            })
            .collect()
    }
}
