//! Repository traits for every persisted aggregate. Sqlite implementations
//! live under `infrastructure::persistence`; in-memory implementations back
//! the tests and the `memory` persistence mode.

use crate::domain::journal::{FeedbackDecision, JournalEntry};
use crate::domain::order::{ExecutionLogEntry, ExecutionOrder, OrderStatus};
use crate::domain::position::Position;
use crate::domain::risk::{AccountRiskState, RiskDecision, StrategyBudget};
use crate::domain::settings::{Settings, SettingsAudit};
use crate::domain::signal::{Signal, SignalStatus};
use crate::domain::simulation::SimulationAccount;
use crate::domain::types::UserId;
use crate::domain::user::UserAccount;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Result of an idempotent order insert: either the row landed, or the
/// unique `client_order_id` constraint matched an existing row.
#[derive(Debug, Clone)]
pub enum OrderInsert {
    Inserted,
    Duplicate(ExecutionOrder),
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn load(&self) -> Result<Option<Settings>>;

    /// Bootstrap: insert the default record together with its audit row in
    /// one transaction. Fails if a record already exists.
    async fn insert_default(&self, settings: &Settings, audit: &SettingsAudit) -> Result<()>;

    /// Compare-and-swap on `expected_version`; writes the new record and its
    /// audit row atomically. Returns false when the version was stale.
    async fn compare_and_update(
        &self,
        expected_version: i64,
        settings: &Settings,
        audit: &SettingsAudit,
    ) -> Result<bool>;

    async fn audit_log(&self, limit: u32) -> Result<Vec<SettingsAudit>>;
}

#[async_trait]
pub trait SignalRepository: Send + Sync {
    async fn insert(&self, signal: &Signal) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Signal>>;

    /// Advances the status; illegal (non-monotonic) advances are an error.
    async fn set_status(&self, id: Uuid, status: SignalStatus) -> Result<()>;

    async fn list_for_user(&self, user_id: UserId, limit: u32) -> Result<Vec<Signal>>;
}

#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn insert(&self, position: &Position) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Position>>;
    async fn update(&self, position: &Position) -> Result<()>;
    async fn open_for_user(&self, user_id: UserId) -> Result<Vec<Position>>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Idempotent insert keyed on `client_order_id`.
    async fn insert(&self, order: &ExecutionOrder) -> Result<OrderInsert>;
    async fn get(&self, id: Uuid) -> Result<Option<ExecutionOrder>>;
    async fn by_client_order_id(&self, client_order_id: &str) -> Result<Option<ExecutionOrder>>;
    async fn by_broker_order_id(&self, broker_order_id: &str) -> Result<Option<ExecutionOrder>>;
    async fn update(&self, order: &ExecutionOrder) -> Result<()>;
    async fn non_terminal(&self) -> Result<Vec<ExecutionOrder>>;
    async fn non_terminal_for_user(&self, user_id: UserId) -> Result<Vec<ExecutionOrder>>;
    async fn list_for_user(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
        limit: u32,
    ) -> Result<Vec<ExecutionOrder>>;

    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<()>;
    async fn logs_for_order(&self, order_id: Uuid) -> Result<Vec<ExecutionLogEntry>>;
}

#[async_trait]
pub trait RiskStateRepository: Send + Sync {
    async fn load(&self, user_id: UserId) -> Result<Option<AccountRiskState>>;
    async fn save(&self, state: &AccountRiskState) -> Result<()>;
}

#[async_trait]
pub trait StrategyBudgetRepository: Send + Sync {
    async fn load(
        &self,
        user_id: UserId,
        strategy_name: &str,
        symbol: &str,
    ) -> Result<Option<StrategyBudget>>;
    async fn save(&self, budget: &StrategyBudget) -> Result<()>;
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<StrategyBudget>>;
}

#[async_trait]
pub trait RiskDecisionRepository: Send + Sync {
    async fn insert(&self, decision: &RiskDecision) -> Result<()>;
    async fn list_for_user(&self, user_id: UserId, limit: u32) -> Result<Vec<RiskDecision>>;
}

#[async_trait]
pub trait JournalRepository: Send + Sync {
    /// Insert-only. Implementations must reject updates and deletes at the
    /// storage layer, not merely omit the methods.
    async fn insert(&self, entry: &JournalEntry) -> Result<()>;
    async fn list_for_user(&self, user_id: UserId, limit: u32) -> Result<Vec<JournalEntry>>;
    async fn window(
        &self,
        user_id: UserId,
        strategy_name: &str,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<JournalEntry>>;
}

#[async_trait]
pub trait FeedbackRepository: Send + Sync {
    async fn insert(&self, decision: &FeedbackDecision) -> Result<()>;
    async fn list_for_user(&self, user_id: UserId, limit: u32) -> Result<Vec<FeedbackDecision>>;
}

#[async_trait]
pub trait SimulationAccountRepository: Send + Sync {
    async fn load(&self, user_id: UserId) -> Result<Option<SimulationAccount>>;
    async fn save(&self, account: &SimulationAccount) -> Result<()>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn insert(&self, user: &UserAccount) -> Result<()>;
    async fn by_id(&self, id: UserId) -> Result<Option<UserAccount>>;
    async fn by_email(&self, email: &str) -> Result<Option<UserAccount>>;
}
