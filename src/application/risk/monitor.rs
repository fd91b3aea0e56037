use crate::domain::constants::HardLimits;
use crate::domain::events::ControlEvent;
use crate::domain::repositories::{
    RiskDecisionRepository, RiskStateRepository, StrategyBudgetRepository,
};
use crate::domain::risk::{
    AccountRiskState, BUDGET_DISABLED_CONSECUTIVE_LOSSES, DecisionKind, RiskDecision, Severity,
    StrategyBudget,
};
use crate::domain::types::UserId;
use crate::infrastructure::event_bus::EventBus;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Settings subset the monitor needs for budget auto-disable. Kept as a plain
/// value so the monitor does not depend on the settings service.
#[derive(Debug, Clone, Copy)]
pub struct BudgetPolicy {
    pub auto_disable_strategies: bool,
    pub strategy_disable_threshold: u32,
}

/// State-derivation service for account risk and strategy budgets. Pure
/// bookkeeping: it never vetoes anything itself, the validator does.
pub struct RiskMonitor {
    state_repo: Arc<dyn RiskStateRepository>,
    budget_repo: Arc<dyn StrategyBudgetRepository>,
    decisions: Arc<dyn RiskDecisionRepository>,
    events: EventBus,
    hard: &'static HardLimits,
    initial_balance: Decimal,
}

impl RiskMonitor {
    pub fn new(
        state_repo: Arc<dyn RiskStateRepository>,
        budget_repo: Arc<dyn StrategyBudgetRepository>,
        decisions: Arc<dyn RiskDecisionRepository>,
        events: EventBus,
        initial_balance: Decimal,
    ) -> Self {
        Self {
            state_repo,
            budget_repo,
            decisions,
            events,
            hard: HardLimits::get(),
            initial_balance,
        }
    }

    /// Loads the per-user state, creating a fresh one on first contact.
    pub async fn account_state(&self, user_id: UserId) -> Result<AccountRiskState> {
        if let Some(state) = self.state_repo.load(user_id).await? {
            return Ok(state);
        }
        let state = AccountRiskState::new(user_id, self.initial_balance);
        self.state_repo.save(&state).await?;
        Ok(state)
    }

    /// One accepted trade entered the market: bump the day and hour counters
    /// and the open-position count.
    pub async fn record_trade_open(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.account_state(user_id).await?;
        state.trades_today += 1;
        state.hourly_trade_times.push_back(at);
        state.trades_in_last_hour(at);
        state.open_positions_count += 1;
        state.updated_at = at;
        self.state_repo.save(&state).await?;
        Ok(())
    }

    /// Folds a realized close into equity and the daily P&L, maintaining the
    /// peak and latching the emergency flag when drawdown crosses the hard
    /// threshold. The latch is idempotent.
    pub async fn record_trade_close(
        &self,
        user_id: UserId,
        pnl: Decimal,
        at: DateTime<Utc>,
    ) -> Result<AccountRiskState> {
        let mut state = self.account_state(user_id).await?;
        state.balance += pnl;
        state.equity = state.balance;
        state.peak_equity = state.peak_equity.max(state.equity);
        state.daily_pnl += pnl;
        state.open_positions_count = state.open_positions_count.saturating_sub(1);
        state.updated_at = at;

        let drawdown = state.current_drawdown_pct();
        if drawdown >= self.hard.emergency_drawdown_pct && !state.emergency_shutdown {
            state.emergency_shutdown = true;
            warn!(
                "RiskMonitor: EMERGENCY SHUTDOWN latched for {} (drawdown {:.2}%)",
                user_id, drawdown
            );
            self.record_decision(
                user_id,
                None,
                DecisionKind::Shutdown,
                Some("account_drawdown".to_string()),
                Severity::Emergency,
                json!({
                    "equity": state.equity,
                    "peak_equity": state.peak_equity,
                    "drawdown_pct": drawdown,
                }),
            )
            .await?;
            self.events.publish(ControlEvent::EmergencyShutdown {
                user_id,
                drawdown_pct: drawdown,
            });
        }

        self.state_repo.save(&state).await?;
        Ok(state)
    }

    /// Budget bookkeeping for one closed trade, with the auto-disable rule:
    /// the streak reaching the (soft-capped) threshold benches the strategy.
    pub async fn update_strategy_budget(
        &self,
        user_id: UserId,
        strategy_name: &str,
        symbol: &str,
        pnl: Decimal,
        at: DateTime<Utc>,
        policy: BudgetPolicy,
    ) -> Result<StrategyBudget> {
        let mut budget = self
            .budget_repo
            .load(user_id, strategy_name, symbol)
            .await?
            .unwrap_or_else(|| StrategyBudget::new(user_id, strategy_name, symbol));

        budget.record_trade(pnl, at);

        let threshold = policy
            .strategy_disable_threshold
            .min(self.hard.strategy_auto_disable_threshold);
        if policy.auto_disable_strategies
            && budget.enabled
            && budget.consecutive_losses >= threshold
        {
            budget.enabled = false;
            budget.disabled_reason = Some(BUDGET_DISABLED_CONSECUTIVE_LOSSES.to_string());
            warn!(
                "RiskMonitor: Auto-disabled strategy {}/{} for {} after {} consecutive losses",
                strategy_name, symbol, user_id, budget.consecutive_losses
            );
            self.record_decision(
                user_id,
                None,
                DecisionKind::BudgetDisable,
                Some(BUDGET_DISABLED_CONSECUTIVE_LOSSES.to_string()),
                Severity::Critical,
                json!({
                    "strategy": strategy_name,
                    "symbol": symbol,
                    "consecutive_losses": budget.consecutive_losses,
                    "threshold": threshold,
                }),
            )
            .await?;
        }

        self.budget_repo.save(&budget).await?;
        Ok(budget)
    }

    /// Manual override: clear the emergency latch. Audited.
    pub async fn reset_emergency(&self, user_id: UserId) -> Result<AccountRiskState> {
        let mut state = self.account_state(user_id).await?;
        state.emergency_shutdown = false;
        // The peak is rebased so the same drawdown does not instantly
        // re-latch the flag.
        state.peak_equity = state.equity;
        state.updated_at = Utc::now();
        self.state_repo.save(&state).await?;

        info!("RiskMonitor: Emergency shutdown reset for {}", user_id);
        self.record_decision(
            user_id,
            None,
            DecisionKind::ManualReset,
            Some("emergency_reset".to_string()),
            Severity::Warn,
            json!({ "equity": state.equity }),
        )
        .await?;
        Ok(state)
    }

    /// Rolls the 24h window: counters to zero, window anchor to `now`.
    /// Invoked by the market-day scheduler or the manual endpoint; audited
    /// either way.
    pub async fn reset_daily(&self, user_id: UserId, reason: &str) -> Result<AccountRiskState> {
        let mut state = self.account_state(user_id).await?;
        let previous_pnl = state.daily_pnl;
        state.trades_today = 0;
        state.daily_pnl = Decimal::ZERO;
        state.daily_pnl_reset_at = Utc::now();
        state.updated_at = state.daily_pnl_reset_at;
        self.state_repo.save(&state).await?;

        info!(
            "RiskMonitor: Daily window reset for {} (closed day pnl {})",
            user_id, previous_pnl
        );
        self.record_decision(
            user_id,
            None,
            DecisionKind::ManualReset,
            Some("daily_reset".to_string()),
            Severity::Info,
            json!({ "reason": reason, "closed_day_pnl": previous_pnl }),
        )
        .await?;
        Ok(state)
    }

    /// Bench a strategy outright (feedback-loop path). Audited; idempotent.
    pub async fn disable_strategy(
        &self,
        user_id: UserId,
        strategy_name: &str,
        symbol: &str,
        reason: &str,
    ) -> Result<StrategyBudget> {
        let mut budget = self
            .budget_repo
            .load(user_id, strategy_name, symbol)
            .await?
            .unwrap_or_else(|| StrategyBudget::new(user_id, strategy_name, symbol));
        if !budget.enabled {
            return Ok(budget);
        }
        budget.enabled = false;
        budget.disabled_reason = Some(reason.to_string());
        self.budget_repo.save(&budget).await?;

        warn!(
            "RiskMonitor: Strategy {}/{} disabled for {} ({})",
            strategy_name, symbol, user_id, reason
        );
        self.record_decision(
            user_id,
            None,
            DecisionKind::BudgetDisable,
            Some(reason.to_string()),
            Severity::Critical,
            json!({ "strategy": strategy_name, "symbol": symbol }),
        )
        .await?;
        Ok(budget)
    }

    /// Manual override: put a benched strategy back to work. Audited.
    pub async fn enable_strategy(
        &self,
        user_id: UserId,
        strategy_name: &str,
        symbol: &str,
    ) -> Result<StrategyBudget> {
        let mut budget = self
            .budget_repo
            .load(user_id, strategy_name, symbol)
            .await?
            .unwrap_or_else(|| StrategyBudget::new(user_id, strategy_name, symbol));
        budget.enabled = true;
        budget.disabled_reason = None;
        budget.consecutive_losses = 0;
        self.budget_repo.save(&budget).await?;

        info!(
            "RiskMonitor: Strategy {}/{} re-enabled for {}",
            strategy_name, symbol, user_id
        );
        self.record_decision(
            user_id,
            None,
            DecisionKind::ManualReset,
            Some("strategy_enabled".to_string()),
            Severity::Info,
            json!({ "strategy": strategy_name, "symbol": symbol }),
        )
        .await?;
        Ok(budget)
    }

    pub async fn budgets(&self, user_id: UserId) -> Result<Vec<StrategyBudget>> {
        self.budget_repo.list_for_user(user_id).await
    }

    async fn record_decision(
        &self,
        user_id: UserId,
        signal_id: Option<Uuid>,
        kind: DecisionKind,
        reason_code: Option<String>,
        severity: Severity,
        snapshot: serde_json::Value,
    ) -> Result<()> {
        let decision = RiskDecision {
            id: Uuid::new_v4(),
            signal_id,
            user_id,
            kind,
            reason_code,
            severity,
            checks_passed: Vec::new(),
            checks_failed: Vec::new(),
            snapshot,
            created_at: Utc::now(),
        };
        self.decisions.insert(&decision).await?;
        self.events
            .publish(ControlEvent::RiskDecisionRecorded { user_id, kind });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::in_memory::{
        InMemoryRiskDecisionRepository, InMemoryRiskStateRepository,
        InMemoryStrategyBudgetRepository,
    };
    use rust_decimal_macros::dec;

    fn monitor() -> (RiskMonitor, Arc<InMemoryRiskDecisionRepository>) {
        let decisions = Arc::new(InMemoryRiskDecisionRepository::new());
        let monitor = RiskMonitor::new(
            Arc::new(InMemoryRiskStateRepository::new()),
            Arc::new(InMemoryStrategyBudgetRepository::new()),
            decisions.clone(),
            EventBus::new(),
            dec!(10000),
        );
        (monitor, decisions)
    }

    fn policy() -> BudgetPolicy {
        BudgetPolicy {
            auto_disable_strategies: true,
            strategy_disable_threshold: 5,
        }
    }

    #[tokio::test]
    async fn test_trade_open_bumps_counters() {
        let (monitor, _) = monitor();
        let user = Uuid::new_v4();
        monitor.record_trade_open(user, Utc::now()).await.unwrap();
        let state = monitor.account_state(user).await.unwrap();
        assert_eq!(state.trades_today, 1);
        assert_eq!(state.open_positions_count, 1);
        assert_eq!(state.hourly_trade_times.len(), 1);
    }

    #[tokio::test]
    async fn test_emergency_latches_at_threshold_inclusive() {
        let (monitor, decisions) = monitor();
        let user = Uuid::new_v4();
        // 15% of 10_000 equals the hard threshold exactly.
        let state = monitor
            .record_trade_close(user, dec!(-1500), Utc::now())
            .await
            .unwrap();
        assert!(state.emergency_shutdown);
        assert_eq!(state.current_drawdown_pct(), dec!(15));
        assert_eq!(decisions.count().await, 1);

        // Latch is idempotent: a further loss records no second shutdown row.
        let state = monitor
            .record_trade_close(user, dec!(-100), Utc::now())
            .await
            .unwrap();
        assert!(state.emergency_shutdown);
        assert_eq!(decisions.count().await, 1);
    }

    #[tokio::test]
    async fn test_reset_emergency_clears_and_audits() {
        let (monitor, decisions) = monitor();
        let user = Uuid::new_v4();
        monitor
            .record_trade_close(user, dec!(-1600), Utc::now())
            .await
            .unwrap();

        let state = monitor.reset_emergency(user).await.unwrap();
        assert!(!state.emergency_shutdown);
        assert_eq!(state.peak_equity, state.equity);

        let rows = decisions.list_for_user(user, 10).await.unwrap();
        assert!(rows.iter().any(|d| d.kind == DecisionKind::ManualReset));
    }

    #[tokio::test]
    async fn test_budget_auto_disables_at_threshold() {
        let (monitor, decisions) = monitor();
        let user = Uuid::new_v4();
        let mut budget = None;
        for _ in 0..5 {
            budget = Some(
                monitor
                    .update_strategy_budget(user, "nbb", "EURUSD", dec!(-10), Utc::now(), policy())
                    .await
                    .unwrap(),
            );
        }
        let budget = budget.unwrap();
        assert!(!budget.enabled);
        assert_eq!(
            budget.disabled_reason.as_deref(),
            Some(BUDGET_DISABLED_CONSECUTIVE_LOSSES)
        );
        assert_eq!(decisions.count().await, 1);
    }

    #[tokio::test]
    async fn test_win_resets_streak_before_threshold() {
        let (monitor, _) = monitor();
        let user = Uuid::new_v4();
        for _ in 0..4 {
            monitor
                .update_strategy_budget(user, "nbb", "EURUSD", dec!(-10), Utc::now(), policy())
                .await
                .unwrap();
        }
        let budget = monitor
            .update_strategy_budget(user, "nbb", "EURUSD", dec!(25), Utc::now(), policy())
            .await
            .unwrap();
        assert!(budget.enabled);
        assert_eq!(budget.consecutive_losses, 0);
    }

    #[tokio::test]
    async fn test_enable_strategy_restores() {
        let (monitor, _) = monitor();
        let user = Uuid::new_v4();
        for _ in 0..5 {
            monitor
                .update_strategy_budget(user, "nbb", "EURUSD", dec!(-10), Utc::now(), policy())
                .await
                .unwrap();
        }
        let budget = monitor.enable_strategy(user, "nbb", "EURUSD").await.unwrap();
        assert!(budget.enabled);
        assert_eq!(budget.consecutive_losses, 0);
        assert!(budget.disabled_reason.is_none());
    }

    #[tokio::test]
    async fn test_daily_reset_zeroes_window() {
        let (monitor, _) = monitor();
        let user = Uuid::new_v4();
        monitor.record_trade_open(user, Utc::now()).await.unwrap();
        monitor
            .record_trade_close(user, dec!(-50), Utc::now())
            .await
            .unwrap();

        let state = monitor.reset_daily(user, "scheduled tick").await.unwrap();
        assert_eq!(state.trades_today, 0);
        assert_eq!(state.daily_pnl, Decimal::ZERO);
    }
}
