use crate::domain::repositories::UserRepository;
use crate::domain::types::UserId;
use crate::domain::user::UserAccount;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{fmt_dt, parse_dt, parse_uuid};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;

pub struct SqliteUserRepository {
    database: Database,
}

impl SqliteUserRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<UserAccount> {
        Ok(UserAccount {
            id: parse_uuid(row.try_get("id")?)?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            created_at: parse_dt(row.try_get("created_at")?)?,
        })
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn insert(&self, user: &UserAccount) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(fmt_dt(&user.created_at))
        .execute(&self.database.pool)
        .await
        .context("Failed to insert user")?;
        Ok(())
    }

    async fn by_id(&self, id: UserId) -> Result<Option<UserAccount>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load user")?;
        row.map(|r| Self::from_row(&r)).transpose()
    }

    async fn by_email(&self, email: &str) -> Result<Option<UserAccount>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load user by email")?;
        row.map(|r| Self::from_row(&r)).transpose()
    }
}
