use crate::application::halt::Halt;
use crate::application::journal::PerformanceAnalyzer;
use crate::application::journal::analyzer::{
    MIN_PROFIT_FACTOR, MIN_SAMPLE_SIZE, MIN_WIN_RATE,
};
use crate::application::risk::RiskMonitor;
use crate::application::settings_service::SettingsService;
use crate::domain::constants::HardLimits;
use crate::domain::events::ControlEvent;
use crate::domain::journal::{FeedbackAction, FeedbackDecision};
use crate::domain::repositories::{FeedbackRepository, StrategyBudgetRepository};
use crate::domain::risk::BUDGET_DISABLED_CONSECUTIVE_LOSSES;
use crate::domain::types::UserId;
use crate::infrastructure::event_bus::EventBus;
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};
use uuid::Uuid;

/// Periodic analyzer over the journal. May bench a strategy budget and emit
/// optimization events; never touches settings.
pub struct FeedbackLoop {
    analyzer: Arc<PerformanceAnalyzer>,
    feedback_repo: Arc<dyn FeedbackRepository>,
    budget_repo: Arc<dyn StrategyBudgetRepository>,
    monitor: Arc<RiskMonitor>,
    settings: Arc<SettingsService>,
    events: EventBus,
    window: ChronoDuration,
}

impl FeedbackLoop {
    pub fn new(
        analyzer: Arc<PerformanceAnalyzer>,
        feedback_repo: Arc<dyn FeedbackRepository>,
        budget_repo: Arc<dyn StrategyBudgetRepository>,
        monitor: Arc<RiskMonitor>,
        settings: Arc<SettingsService>,
        events: EventBus,
        window: ChronoDuration,
    ) -> Self {
        Self {
            analyzer,
            feedback_repo,
            budget_repo,
            monitor,
            settings,
            events,
            window,
        }
    }

    /// One cycle over a (strategy, symbol): analyze, decide, record.
    pub async fn run_cycle(
        &self,
        user_id: UserId,
        strategy_name: &str,
        symbol: &str,
    ) -> Result<FeedbackDecision> {
        let report = self
            .analyzer
            .analyze(user_id, strategy_name, symbol, self.window)
            .await?;
        let settings = self.settings.get().await?;
        let consecutive_losses = self
            .budget_repo
            .load(user_id, strategy_name, symbol)
            .await?
            .map(|b| b.consecutive_losses)
            .unwrap_or(0);
        let threshold = settings
            .strategy_disable_threshold
            .min(HardLimits::get().strategy_auto_disable_threshold);

        let (action, reason) = if report.sample_size < MIN_SAMPLE_SIZE {
            (
                FeedbackAction::Monitor,
                format!(
                    "sample {} below minimum {}",
                    report.sample_size, MIN_SAMPLE_SIZE
                ),
            )
        } else if consecutive_losses >= threshold && settings.auto_disable_strategies {
            (
                FeedbackAction::DisableStrategy,
                format!("{} consecutive losses (threshold {})", consecutive_losses, threshold),
            )
        } else if report.win_rate < MIN_WIN_RATE || report.profit_factor < MIN_PROFIT_FACTOR {
            (
                FeedbackAction::TriggerOptimization,
                format!(
                    "win_rate {:.2} / profit_factor {:.2} below floor",
                    report.win_rate, report.profit_factor
                ),
            )
        } else {
            (FeedbackAction::Monitor, "within performance bands".to_string())
        };

        match action {
            FeedbackAction::DisableStrategy => {
                self.monitor
                    .disable_strategy(
                        user_id,
                        strategy_name,
                        symbol,
                        BUDGET_DISABLED_CONSECUTIVE_LOSSES,
                    )
                    .await?;
            }
            FeedbackAction::TriggerOptimization => {
                // Typed event only; the optimizer is a collaborator behind
                // the bus, never called directly.
                self.events.publish(ControlEvent::OptimizationRequested {
                    user_id,
                    strategy_name: strategy_name.to_string(),
                    symbol: symbol.to_string(),
                    reason: reason.clone(),
                });
            }
            FeedbackAction::Monitor => {}
        }

        let decision = FeedbackDecision {
            id: Uuid::new_v4(),
            user_id,
            strategy_name: strategy_name.to_string(),
            symbol: symbol.to_string(),
            action,
            report,
            reason,
            created_at: Utc::now(),
        };
        self.feedback_repo.insert(&decision).await?;
        info!(
            "FeedbackLoop: {}/{} -> {} ({})",
            strategy_name, symbol, decision.action, decision.reason
        );
        Ok(decision)
    }

    pub async fn decisions_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<FeedbackDecision>> {
        self.feedback_repo.list_for_user(user_id, limit).await
    }

    /// Worker lane: every tick, run a cycle for each budget the users hold.
    pub async fn run(self: Arc<Self>, users: Vec<UserId>, tick: Duration, halt: Halt) {
        let mut ticker = interval(tick);
        let mut halt_rx = halt.subscribe();
        info!("FeedbackLoop: Worker started (interval {:?})", tick);

        loop {
            tokio::select! {
                changed = halt_rx.changed() => {
                    if changed.is_err() || *halt_rx.borrow() {
                        info!("FeedbackLoop: Halted");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    for user in &users {
                        let budgets = match self.budget_repo.list_for_user(*user).await {
                            Ok(budgets) => budgets,
                            Err(e) => {
                                error!("FeedbackLoop: Budget listing failed: {:#}", e);
                                continue;
                            }
                        };
                        for budget in budgets {
                            if let Err(e) = self
                                .run_cycle(*user, &budget.strategy_name, &budget.symbol)
                                .await
                            {
                                error!("FeedbackLoop: Cycle failed: {:#}", e);
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::journal::{ExitReason, JournalEntry, TradeSource};
    use crate::domain::repositories::JournalRepository;
    use crate::domain::risk::StrategyBudget;
    use crate::domain::types::Side;
    use crate::infrastructure::repositories::in_memory::{
        InMemoryFeedbackRepository, InMemoryJournalRepository, InMemoryRiskDecisionRepository,
        InMemoryRiskStateRepository, InMemorySettingsRepository, InMemoryStrategyBudgetRepository,
        InMemoryUserRepository,
    };
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Fixture {
        feedback: FeedbackLoop,
        journal_repo: Arc<InMemoryJournalRepository>,
        budget_repo: Arc<InMemoryStrategyBudgetRepository>,
        events: EventBus,
    }

    fn fixture() -> Fixture {
        let journal_repo = Arc::new(InMemoryJournalRepository::new());
        let budget_repo = Arc::new(InMemoryStrategyBudgetRepository::new());
        let events = EventBus::new();
        let settings = Arc::new(SettingsService::new(
            Arc::new(InMemorySettingsRepository::new()),
            Arc::new(InMemoryUserRepository::new()),
            events.clone(),
        ));
        let monitor = Arc::new(RiskMonitor::new(
            Arc::new(InMemoryRiskStateRepository::new()),
            budget_repo.clone(),
            Arc::new(InMemoryRiskDecisionRepository::new()),
            events.clone(),
            dec!(10000),
        ));
        let feedback = FeedbackLoop::new(
            Arc::new(PerformanceAnalyzer::new(journal_repo.clone())),
            Arc::new(InMemoryFeedbackRepository::new()),
            budget_repo.clone(),
            monitor,
            settings,
            events.clone(),
            ChronoDuration::days(30),
        );
        Fixture {
            feedback,
            journal_repo,
            budget_repo,
            events,
        }
    }

    async fn seed_entries(repo: &InMemoryJournalRepository, user: UserId, pnls: &[Decimal]) {
        for pnl in pnls {
            repo.insert(&JournalEntry {
                id: Uuid::new_v4(),
                entry_uid: Uuid::new_v4().to_string(),
                strategy_name: "nbb".to_string(),
                symbol: "EURUSD".to_string(),
                user_id: user,
                source: TradeSource::Simulation,
                side: Side::Long,
                entry: dec!(1.1),
                exit: dec!(1.1) + pnl,
                size: dec!(1),
                pnl: *pnl,
                duration_secs: 60,
                exit_reason: ExitReason::TakeProfit,
                opened_at: Utc::now(),
                closed_at: Utc::now(),
                signal_id: Uuid::new_v4(),
                order_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_insufficient_samples_monitors() {
        let f = fixture();
        let user = Uuid::new_v4();
        seed_entries(&f.journal_repo, user, &[dec!(-10); 5]).await;

        let decision = f.feedback.run_cycle(user, "nbb", "EURUSD").await.unwrap();
        assert_eq!(decision.action, FeedbackAction::Monitor);
        assert!(decision.reason.contains("below minimum"));
    }

    #[tokio::test]
    async fn test_loss_streak_disables_budget() {
        let f = fixture();
        let user = Uuid::new_v4();
        seed_entries(&f.journal_repo, user, &[dec!(-10); 12]).await;
        let mut budget = StrategyBudget::new(user, "nbb", "EURUSD");
        budget.consecutive_losses = 5;
        f.budget_repo.save(&budget).await.unwrap();

        let decision = f.feedback.run_cycle(user, "nbb", "EURUSD").await.unwrap();
        assert_eq!(decision.action, FeedbackAction::DisableStrategy);

        let budget = f
            .budget_repo
            .load(user, "nbb", "EURUSD")
            .await
            .unwrap()
            .unwrap();
        assert!(!budget.enabled);
        assert_eq!(
            budget.disabled_reason.as_deref(),
            Some(BUDGET_DISABLED_CONSECUTIVE_LOSSES)
        );
    }

    #[tokio::test]
    async fn test_poor_metrics_trigger_optimization_event() {
        let f = fixture();
        let user = Uuid::new_v4();
        // 30% win rate, losing overall, but no live streak.
        let mut pnls = vec![dec!(-10); 7];
        pnls.extend([dec!(8), dec!(8), dec!(8)]);
        seed_entries(&f.journal_repo, user, &pnls).await;

        let mut events = f.events.subscribe();
        let decision = f.feedback.run_cycle(user, "nbb", "EURUSD").await.unwrap();
        assert_eq!(decision.action, FeedbackAction::TriggerOptimization);

        let requested = std::iter::from_fn(|| events.try_recv().ok())
            .any(|event| matches!(event, ControlEvent::OptimizationRequested { .. }));
        assert!(requested, "optimization event must be emitted");
    }

    #[tokio::test]
    async fn test_healthy_strategy_keeps_monitoring() {
        let f = fixture();
        let user = Uuid::new_v4();
        let mut pnls = vec![dec!(15); 8];
        pnls.extend([dec!(-5); 4]);
        seed_entries(&f.journal_repo, user, &pnls).await;

        let decision = f.feedback.run_cycle(user, "nbb", "EURUSD").await.unwrap();
        assert_eq!(decision.action, FeedbackAction::Monitor);
        assert!(decision.reason.contains("within performance bands"));
    }
}
