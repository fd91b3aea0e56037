//! In-memory implementations of the repository traits.
//!
//! Thread-safe via `Arc<RwLock>`; used by the test suites and the `memory`
//! persistence mode. Data is lost on restart.

use crate::domain::journal::{FeedbackDecision, JournalEntry};
use crate::domain::order::{ExecutionLogEntry, ExecutionOrder, OrderStatus};
use crate::domain::position::Position;
use crate::domain::repositories::{
    FeedbackRepository, JournalRepository, OrderInsert, OrderRepository, PositionRepository,
    RiskDecisionRepository, RiskStateRepository, SettingsRepository, SignalRepository,
    SimulationAccountRepository, StrategyBudgetRepository, UserRepository,
};
use crate::domain::risk::{AccountRiskState, RiskDecision, StrategyBudget};
use crate::domain::settings::{Settings, SettingsAudit};
use crate::domain::signal::{Signal, SignalStatus};
use crate::domain::simulation::SimulationAccount;
use crate::domain::types::UserId;
use crate::domain::user::UserAccount;
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemorySettingsRepository {
    inner: Arc<RwLock<(Option<Settings>, Vec<SettingsAudit>)>>,
}

impl InMemorySettingsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsRepository for InMemorySettingsRepository {
    async fn load(&self) -> Result<Option<Settings>> {
        Ok(self.inner.read().await.0.clone())
    }

    async fn insert_default(&self, settings: &Settings, audit: &SettingsAudit) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.0.is_some() {
            bail!("settings record already exists");
        }
        inner.0 = Some(settings.clone());
        inner.1.push(audit.clone());
        Ok(())
    }

    async fn compare_and_update(
        &self,
        expected_version: i64,
        settings: &Settings,
        audit: &SettingsAudit,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match &inner.0 {
            Some(current) if current.version == expected_version => {
                inner.0 = Some(settings.clone());
                inner.1.push(audit.clone());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => bail!("settings record missing"),
        }
    }

    async fn audit_log(&self, limit: u32) -> Result<Vec<SettingsAudit>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<SettingsAudit> = inner.1.clone();
        rows.sort_by(|a, b| b.version.cmp(&a.version));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

#[derive(Default)]
pub struct InMemorySignalRepository {
    signals: Arc<RwLock<HashMap<Uuid, Signal>>>,
}

impl InMemorySignalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalRepository for InMemorySignalRepository {
    async fn insert(&self, signal: &Signal) -> Result<()> {
        self.signals.write().await.insert(signal.id, signal.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Signal>> {
        Ok(self.signals.read().await.get(&id).cloned())
    }

    async fn set_status(&self, id: Uuid, status: SignalStatus) -> Result<()> {
        let mut signals = self.signals.write().await;
        let signal = signals
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("signal {} not found", id))?;
        if !signal.status.can_advance_to(status) {
            bail!(
                "signal {} cannot advance from {} to {}",
                id,
                signal.status,
                status
            );
        }
        signal.status = status;
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId, limit: u32) -> Result<Vec<Signal>> {
        let signals = self.signals.read().await;
        let mut rows: Vec<Signal> = signals
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.signal_time.cmp(&a.signal_time));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

#[derive(Default)]
pub struct InMemoryPositionRepository {
    positions: Arc<RwLock<HashMap<Uuid, Position>>>,
}

impl InMemoryPositionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionRepository for InMemoryPositionRepository {
    async fn insert(&self, position: &Position) -> Result<()> {
        self.positions
            .write()
            .await
            .insert(position.id, position.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Position>> {
        Ok(self.positions.read().await.get(&id).cloned())
    }

    async fn update(&self, position: &Position) -> Result<()> {
        let mut positions = self.positions.write().await;
        if !positions.contains_key(&position.id) {
            bail!("position {} not found", position.id);
        }
        positions.insert(position.id, position.clone());
        Ok(())
    }

    async fn open_for_user(&self, user_id: UserId) -> Result<Vec<Position>> {
        let positions = self.positions.read().await;
        Ok(positions
            .values()
            .filter(|p| p.user_id == user_id && p.closed_at.is_none())
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<HashMap<Uuid, ExecutionOrder>>>,
    by_client_id: Arc<RwLock<HashMap<String, Uuid>>>,
    logs: Arc<RwLock<Vec<ExecutionLogEntry>>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: raw count of log rows.
    pub async fn log_count(&self) -> usize {
        self.logs.read().await.len()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &ExecutionOrder) -> Result<OrderInsert> {
        // Both maps under one critical section: the uniqueness check and the
        // insert must not interleave with a concurrent duplicate.
        let mut by_client = self.by_client_id.write().await;
        let mut orders = self.orders.write().await;
        if let Some(existing_id) = by_client.get(&order.client_order_id) {
            let existing = orders
                .get(existing_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("client order index out of sync"))?;
            return Ok(OrderInsert::Duplicate(existing));
        }
        by_client.insert(order.client_order_id.clone(), order.id);
        orders.insert(order.id, order.clone());
        Ok(OrderInsert::Inserted)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExecutionOrder>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn by_client_order_id(&self, client_order_id: &str) -> Result<Option<ExecutionOrder>> {
        let by_client = self.by_client_id.read().await;
        let orders = self.orders.read().await;
        Ok(by_client
            .get(client_order_id)
            .and_then(|id| orders.get(id))
            .cloned())
    }

    async fn by_broker_order_id(&self, broker_order_id: &str) -> Result<Option<ExecutionOrder>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .find(|o| o.broker_order_id.as_deref() == Some(broker_order_id))
            .cloned())
    }

    async fn update(&self, order: &ExecutionOrder) -> Result<()> {
        let mut orders = self.orders.write().await;
        if !orders.contains_key(&order.id) {
            bail!("order {} not found", order.id);
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn non_terminal(&self) -> Result<Vec<ExecutionOrder>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn non_terminal_for_user(&self, user_id: UserId) -> Result<Vec<ExecutionOrder>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .filter(|o| o.user_id == user_id && !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
        limit: u32,
    ) -> Result<Vec<ExecutionOrder>> {
        let orders = self.orders.read().await;
        let mut rows: Vec<ExecutionOrder> = orders
            .values()
            .filter(|o| o.user_id == user_id && status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<()> {
        self.logs.write().await.push(entry.clone());
        Ok(())
    }

    async fn logs_for_order(&self, order_id: Uuid) -> Result<Vec<ExecutionLogEntry>> {
        let logs = self.logs.read().await;
        Ok(logs
            .iter()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryRiskStateRepository {
    states: Arc<RwLock<HashMap<UserId, AccountRiskState>>>,
}

impl InMemoryRiskStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RiskStateRepository for InMemoryRiskStateRepository {
    async fn load(&self, user_id: UserId) -> Result<Option<AccountRiskState>> {
        Ok(self.states.read().await.get(&user_id).cloned())
    }

    async fn save(&self, state: &AccountRiskState) -> Result<()> {
        self.states
            .write()
            .await
            .insert(state.user_id, state.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryStrategyBudgetRepository {
    budgets: Arc<RwLock<HashMap<(UserId, String, String), StrategyBudget>>>,
}

impl InMemoryStrategyBudgetRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StrategyBudgetRepository for InMemoryStrategyBudgetRepository {
    async fn load(
        &self,
        user_id: UserId,
        strategy_name: &str,
        symbol: &str,
    ) -> Result<Option<StrategyBudget>> {
        let key = (user_id, strategy_name.to_string(), symbol.to_string());
        Ok(self.budgets.read().await.get(&key).cloned())
    }

    async fn save(&self, budget: &StrategyBudget) -> Result<()> {
        let key = (
            budget.user_id,
            budget.strategy_name.clone(),
            budget.symbol.clone(),
        );
        self.budgets.write().await.insert(key, budget.clone());
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<StrategyBudget>> {
        let budgets = self.budgets.read().await;
        Ok(budgets
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryRiskDecisionRepository {
    decisions: Arc<RwLock<Vec<RiskDecision>>>,
}

impl InMemoryRiskDecisionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: total decision rows, all users.
    pub async fn count(&self) -> usize {
        self.decisions.read().await.len()
    }
}

#[async_trait]
impl RiskDecisionRepository for InMemoryRiskDecisionRepository {
    async fn insert(&self, decision: &RiskDecision) -> Result<()> {
        self.decisions.write().await.push(decision.clone());
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId, limit: u32) -> Result<Vec<RiskDecision>> {
        let decisions = self.decisions.read().await;
        let mut rows: Vec<RiskDecision> = decisions
            .iter()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

#[derive(Default)]
pub struct InMemoryJournalRepository {
    entries: Arc<RwLock<Vec<JournalEntry>>>,
}

impl InMemoryJournalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl JournalRepository for InMemoryJournalRepository {
    async fn insert(&self, entry: &JournalEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.entry_uid == entry.entry_uid) {
            bail!("journal entry {} already exists", entry.entry_uid);
        }
        entries.push(entry.clone());
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId, limit: u32) -> Result<Vec<JournalEntry>> {
        let entries = self.entries.read().await;
        let mut rows: Vec<JournalEntry> = entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn window(
        &self,
        user_id: UserId,
        strategy_name: &str,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<JournalEntry>> {
        let entries = self.entries.read().await;
        let mut rows: Vec<JournalEntry> = entries
            .iter()
            .filter(|e| {
                e.user_id == user_id
                    && e.strategy_name == strategy_name
                    && e.symbol == symbol
                    && e.closed_at >= since
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.closed_at.cmp(&b.closed_at));
        Ok(rows)
    }
}

#[derive(Default)]
pub struct InMemoryFeedbackRepository {
    decisions: Arc<RwLock<Vec<FeedbackDecision>>>,
}

impl InMemoryFeedbackRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedbackRepository for InMemoryFeedbackRepository {
    async fn insert(&self, decision: &FeedbackDecision) -> Result<()> {
        self.decisions.write().await.push(decision.clone());
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId, limit: u32) -> Result<Vec<FeedbackDecision>> {
        let decisions = self.decisions.read().await;
        let mut rows: Vec<FeedbackDecision> = decisions
            .iter()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

#[derive(Default)]
pub struct InMemorySimulationAccountRepository {
    accounts: Arc<RwLock<HashMap<UserId, SimulationAccount>>>,
}

impl InMemorySimulationAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SimulationAccountRepository for InMemorySimulationAccountRepository {
    async fn load(&self, user_id: UserId) -> Result<Option<SimulationAccount>> {
        Ok(self.accounts.read().await.get(&user_id).cloned())
    }

    async fn save(&self, account: &SimulationAccount) -> Result<()> {
        self.accounts
            .write()
            .await
            .insert(account.user_id, account.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: Arc<RwLock<HashMap<UserId, UserAccount>>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn insert(&self, user: &UserAccount) -> Result<()> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email) {
            bail!("email {} already registered", user.email);
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn by_id(&self, id: UserId) -> Result<Option<UserAccount>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn by_email(&self, email: &str) -> Result<Option<UserAccount>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{BrokerType, OrderType, Side};
    use rust_decimal_macros::dec;

    fn order(client_order_id: &str) -> ExecutionOrder {
        ExecutionOrder {
            id: Uuid::new_v4(),
            client_order_id: client_order_id.to_string(),
            broker_order_id: None,
            broker_type: BrokerType::Simulation,
            symbol: "EURUSD".to_string(),
            order_type: OrderType::Market,
            side: Side::Long,
            qty: dec!(1.0),
            price: Some(dec!(1.1000)),
            stop_price: None,
            stop_loss: Some(dec!(1.0950)),
            take_profit: Some(dec!(1.1150)),
            status: OrderStatus::Pending,
            filled_qty: dec!(0),
            avg_fill_price: None,
            submitted_at: None,
            filled_at: None,
            signal_id: Uuid::new_v4(),
            position_id: None,
            strategy_name: "sma_cross".to_string(),
            error_msg: None,
            retry_count: 0,
            user_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_client_order_id_returns_existing() {
        let repo = InMemoryOrderRepository::new();
        let first = order("coid-1");
        assert!(matches!(
            repo.insert(&first).await.unwrap(),
            OrderInsert::Inserted
        ));

        let mut second = order("coid-1");
        second.id = Uuid::new_v4();
        match repo.insert(&second).await.unwrap() {
            OrderInsert::Duplicate(existing) => assert_eq!(existing.id, first.id),
            OrderInsert::Inserted => panic!("duplicate insert must not land"),
        }
    }

    #[tokio::test]
    async fn test_journal_rejects_duplicate_uid() {
        let repo = InMemoryJournalRepository::new();
        let entry = JournalEntry {
            id: Uuid::new_v4(),
            entry_uid: "uid-1".to_string(),
            strategy_name: "sma_cross".to_string(),
            symbol: "EURUSD".to_string(),
            user_id: Uuid::new_v4(),
            source: crate::domain::journal::TradeSource::Simulation,
            side: Side::Long,
            entry: dec!(1.1),
            exit: dec!(1.2),
            size: dec!(1),
            pnl: dec!(0.1),
            duration_secs: 60,
            exit_reason: crate::domain::journal::ExitReason::TakeProfit,
            opened_at: Utc::now(),
            closed_at: Utc::now(),
            signal_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
        };
        repo.insert(&entry).await.unwrap();
        assert!(repo.insert(&entry).await.is_err());
    }

    #[tokio::test]
    async fn test_signal_status_monotonic() {
        let repo = InMemorySignalRepository::new();
        let signal = Signal {
            id: Uuid::new_v4(),
            strategy_name: "sma_cross".to_string(),
            user_id: Uuid::new_v4(),
            symbol: "EURUSD".to_string(),
            side: Side::Long,
            entry: dec!(1.1),
            stop_loss: dec!(1.05),
            take_profit: dec!(1.25),
            risk_pct: dec!(1.0),
            confidence: 0.9,
            status: SignalStatus::Pending,
            signal_time: Utc::now(),
        };
        repo.insert(&signal).await.unwrap();
        repo.set_status(signal.id, SignalStatus::Approved)
            .await
            .unwrap();
        repo.set_status(signal.id, SignalStatus::Executed)
            .await
            .unwrap();
        assert!(
            repo.set_status(signal.id, SignalStatus::Pending)
                .await
                .is_err()
        );
    }
}
