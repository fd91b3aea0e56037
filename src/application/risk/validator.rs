use crate::application::risk::monitor::RiskMonitor;
use crate::application::settings_service::SettingsService;
use crate::domain::constants::HardLimits;
use crate::domain::events::ControlEvent;
use crate::domain::repositories::{
    RiskDecisionRepository, RiskStateRepository, StrategyBudgetRepository,
};
use crate::domain::risk::{DecisionKind, RiskCheck, RiskDecision, Severity};
use crate::domain::settings::Settings;
use crate::domain::signal::Signal;
use crate::domain::types::UserId;
use crate::infrastructure::event_bus::EventBus;
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// The absolute veto. Nine ordered checks over one consistent snapshot of the
/// user's risk state; the first failure short-circuits. Every call records
/// exactly one decision row, approved or not.
pub struct RiskValidator {
    monitor: Arc<RiskMonitor>,
    state_repo: Arc<dyn RiskStateRepository>,
    budget_repo: Arc<dyn StrategyBudgetRepository>,
    decisions: Arc<dyn RiskDecisionRepository>,
    settings: Arc<SettingsService>,
    events: EventBus,
    hard: &'static HardLimits,
    // Serializes validate-and-mutate per user so no concurrent fill or
    // second validation can interleave between two checks.
    user_locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

/// Outcome of one check: either it passed, or it carries the §7 reason code
/// and the severity of the rejection.
enum CheckOutcome {
    Pass,
    Fail {
        reason_code: &'static str,
        severity: Severity,
    },
}

impl RiskValidator {
    pub fn new(
        monitor: Arc<RiskMonitor>,
        state_repo: Arc<dyn RiskStateRepository>,
        budget_repo: Arc<dyn StrategyBudgetRepository>,
        decisions: Arc<dyn RiskDecisionRepository>,
        settings: Arc<SettingsService>,
        events: EventBus,
    ) -> Self {
        Self {
            monitor,
            state_repo,
            budget_repo,
            decisions,
            settings,
            events,
            hard: HardLimits::get(),
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn user_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks.entry(user_id).or_default().clone()
    }

    /// Runs the nine checks in order against a single snapshot. Returns the
    /// recorded decision; persistence failures are the only `Err` path.
    pub async fn validate(&self, signal: &Signal, requested_size: Decimal) -> Result<RiskDecision> {
        let lock = self.user_lock(signal.user_id).await;
        let _guard = lock.lock().await;

        let settings = self.settings.get().await?;
        let mut state = self.monitor.account_state(signal.user_id).await?;
        let now = Utc::now();

        let mut checks_passed: Vec<String> = Vec::new();

        for check in RiskCheck::ORDERED {
            let outcome = match check {
                RiskCheck::EmergencyShutdown => {
                    if state.emergency_shutdown {
                        CheckOutcome::Fail {
                            reason_code: "emergency_shutdown",
                            severity: Severity::Emergency,
                        }
                    } else {
                        CheckOutcome::Pass
                    }
                }
                RiskCheck::AccountDrawdown => {
                    let drawdown = state.current_drawdown_pct();
                    if drawdown >= self.hard.emergency_drawdown_pct {
                        // Latch atomically with the decision row; the next
                        // validation will already fail check 1.
                        state.emergency_shutdown = true;
                        state.updated_at = now;
                        self.state_repo.save(&state).await?;
                        warn!(
                            "RiskValidator: Drawdown {:.2}% >= {}% - emergency shutdown for {}",
                            drawdown, self.hard.emergency_drawdown_pct, signal.user_id
                        );

                        let decision = self
                            .record(
                                signal,
                                DecisionKind::Shutdown,
                                Some("drawdown_exceeded".to_string()),
                                Severity::Emergency,
                                checks_passed,
                                vec![check.code().to_string()],
                                &state_snapshot(&state, &settings),
                            )
                            .await?;
                        self.events.publish(ControlEvent::EmergencyShutdown {
                            user_id: signal.user_id,
                            drawdown_pct: drawdown,
                        });
                        return Ok(decision);
                    }
                    CheckOutcome::Pass
                }
                RiskCheck::MaxOpenPositions => {
                    let limit = settings.max_open_positions.min(self.hard.max_open_positions);
                    if state.open_positions_count >= limit {
                        CheckOutcome::Fail {
                            reason_code: "max_open_positions",
                            severity: Severity::Warn,
                        }
                    } else {
                        CheckOutcome::Pass
                    }
                }
                RiskCheck::DailyTradeLimit => {
                    // The 24h window is rolled by the scheduled tick; an
                    // elapsed window counts as zero here either way.
                    let trades_today = if state.daily_window_elapsed(now) {
                        0
                    } else {
                        state.trades_today
                    };
                    let limit = settings.max_trades_per_day.min(self.hard.max_trades_per_day);
                    if trades_today >= limit {
                        CheckOutcome::Fail {
                            reason_code: "daily_limit",
                            severity: Severity::Warn,
                        }
                    } else {
                        CheckOutcome::Pass
                    }
                }
                RiskCheck::HourlyTradeLimit => {
                    let in_window = state.trades_in_last_hour(now);
                    let limit = settings
                        .max_trades_per_hour
                        .min(self.hard.max_trades_per_hour);
                    if in_window >= limit {
                        CheckOutcome::Fail {
                            reason_code: "hourly_limit",
                            severity: Severity::Warn,
                        }
                    } else {
                        CheckOutcome::Pass
                    }
                }
                RiskCheck::PositionSize => {
                    let lot_cap = settings
                        .max_position_size_lots
                        .min(self.hard.max_position_size_lots);
                    let pct_cap = settings
                        .max_position_size_pct
                        .min(self.hard.max_position_size_pct);
                    let notional = requested_size * signal.entry;
                    let value_cap = pct_cap / dec!(100) * state.balance;
                    if requested_size > lot_cap || notional > value_cap {
                        CheckOutcome::Fail {
                            reason_code: "position_size",
                            severity: Severity::Warn,
                        }
                    } else {
                        CheckOutcome::Pass
                    }
                }
                RiskCheck::RiskReward => {
                    // Soft floor is validated to sit at or above the hard
                    // floor; equality passes.
                    let floor = settings
                        .min_risk_reward_ratio
                        .max(self.hard.min_risk_reward_ratio);
                    if signal.risk_reward() < floor {
                        CheckOutcome::Fail {
                            reason_code: "rr_too_low",
                            severity: Severity::Warn,
                        }
                    } else {
                        CheckOutcome::Pass
                    }
                }
                RiskCheck::StrategyBudget => {
                    let budget = self
                        .budget_repo
                        .load(signal.user_id, &signal.strategy_name, &signal.symbol)
                        .await?;
                    let threshold = settings
                        .strategy_disable_threshold
                        .min(self.hard.strategy_auto_disable_threshold);
                    let blocked = budget.as_ref().is_some_and(|b| {
                        !b.enabled || b.consecutive_losses >= threshold
                    });
                    if blocked {
                        CheckOutcome::Fail {
                            reason_code: "budget_disabled",
                            severity: Severity::Critical,
                        }
                    } else {
                        CheckOutcome::Pass
                    }
                }
                RiskCheck::DailyLossLimit => {
                    let projected_loss = signal.risk_pct / dec!(100) * state.balance;
                    let realized_loss = if state.daily_window_elapsed(now) {
                        Decimal::ZERO
                    } else {
                        state.realized_loss_today()
                    };
                    let budget = settings.max_daily_loss_pct.min(self.hard.max_daily_loss_pct)
                        / dec!(100)
                        * state.balance;
                    if projected_loss + realized_loss >= budget {
                        CheckOutcome::Fail {
                            reason_code: "daily_loss",
                            severity: Severity::Critical,
                        }
                    } else {
                        CheckOutcome::Pass
                    }
                }
            };

            match outcome {
                CheckOutcome::Pass => checks_passed.push(check.code().to_string()),
                CheckOutcome::Fail {
                    reason_code,
                    severity,
                } => {
                    info!(
                        "RiskValidator: REJECTED signal {} at check {} ({})",
                        signal.id, check, reason_code
                    );
                    return self
                        .record(
                            signal,
                            DecisionKind::Rejection,
                            Some(reason_code.to_string()),
                            severity,
                            checks_passed,
                            vec![check.code().to_string()],
                            &state_snapshot(&state, &settings),
                        )
                        .await;
                }
            }
        }

        info!(
            "RiskValidator: APPROVED signal {} for {} (size {})",
            signal.id, signal.user_id, requested_size
        );
        self.record(
            signal,
            DecisionKind::Approval,
            None,
            Severity::Info,
            checks_passed,
            Vec::new(),
            &state_snapshot(&state, &settings),
        )
        .await
    }

    pub async fn decisions_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<RiskDecision>> {
        self.decisions.list_for_user(user_id, limit).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        signal: &Signal,
        kind: DecisionKind,
        reason_code: Option<String>,
        severity: Severity,
        checks_passed: Vec<String>,
        checks_failed: Vec<String>,
        snapshot: &serde_json::Value,
    ) -> Result<RiskDecision> {
        let decision = RiskDecision {
            id: Uuid::new_v4(),
            signal_id: Some(signal.id),
            user_id: signal.user_id,
            kind,
            reason_code,
            severity,
            checks_passed,
            checks_failed,
            snapshot: snapshot.clone(),
            created_at: Utc::now(),
        };
        self.decisions.insert(&decision).await?;
        self.events.publish(ControlEvent::RiskDecisionRecorded {
            user_id: signal.user_id,
            kind,
        });
        Ok(decision)
    }
}

fn state_snapshot(
    state: &crate::domain::risk::AccountRiskState,
    settings: &Settings,
) -> serde_json::Value {
    json!({
        "balance": state.balance,
        "equity": state.equity,
        "peak_equity": state.peak_equity,
        "drawdown_pct": state.current_drawdown_pct(),
        "daily_pnl": state.daily_pnl,
        "open_positions": state.open_positions_count,
        "trades_today": state.trades_today,
        "emergency_shutdown": state.emergency_shutdown,
        "settings_version": settings.version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::StrategyBudget;
    use crate::domain::signal::SignalStatus;
    use crate::domain::types::Side;
    use crate::infrastructure::repositories::in_memory::{
        InMemoryRiskDecisionRepository, InMemoryRiskStateRepository, InMemorySettingsRepository,
        InMemoryStrategyBudgetRepository, InMemoryUserRepository,
    };

    struct Fixture {
        validator: RiskValidator,
        state_repo: Arc<InMemoryRiskStateRepository>,
        budget_repo: Arc<InMemoryStrategyBudgetRepository>,
        decisions: Arc<InMemoryRiskDecisionRepository>,
        monitor: Arc<RiskMonitor>,
    }

    fn fixture() -> Fixture {
        let state_repo = Arc::new(InMemoryRiskStateRepository::new());
        let budget_repo = Arc::new(InMemoryStrategyBudgetRepository::new());
        let decisions = Arc::new(InMemoryRiskDecisionRepository::new());
        let events = EventBus::new();
        let settings = Arc::new(SettingsService::new(
            Arc::new(InMemorySettingsRepository::new()),
            Arc::new(InMemoryUserRepository::new()),
            events.clone(),
        ));
        let monitor = Arc::new(RiskMonitor::new(
            state_repo.clone(),
            budget_repo.clone(),
            decisions.clone(),
            events.clone(),
            dec!(10000),
        ));
        let validator = RiskValidator::new(
            monitor.clone(),
            state_repo.clone(),
            budget_repo.clone(),
            decisions.clone(),
            settings,
            events,
        );
        Fixture {
            validator,
            state_repo,
            budget_repo,
            decisions,
            monitor,
        }
    }

    fn good_signal(user: UserId) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            strategy_name: "nbb".to_string(),
            user_id: user,
            symbol: "EURUSD".to_string(),
            side: Side::Long,
            entry: dec!(1.1000),
            stop_loss: dec!(1.0950),
            take_profit: dec!(1.1150),
            risk_pct: dec!(1.0),
            confidence: 0.8,
            status: SignalStatus::Pending,
            signal_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_clean_account_approves_and_records_all_checks() {
        let f = fixture();
        let user = Uuid::new_v4();
        let decision = f
            .validator
            .validate(&good_signal(user), dec!(0.5))
            .await
            .unwrap();
        assert!(decision.is_approved());
        assert_eq!(decision.checks_passed.len(), 9);
        assert!(decision.checks_failed.is_empty());
        assert_eq!(f.decisions.count().await, 1);
    }

    #[tokio::test]
    async fn test_emergency_flag_rejects_first() {
        let f = fixture();
        let user = Uuid::new_v4();
        let mut state = f.monitor.account_state(user).await.unwrap();
        state.emergency_shutdown = true;
        f.state_repo.save(&state).await.unwrap();

        let decision = f
            .validator
            .validate(&good_signal(user), dec!(0.5))
            .await
            .unwrap();
        assert_eq!(decision.kind, DecisionKind::Rejection);
        assert_eq!(decision.reason_code.as_deref(), Some("emergency_shutdown"));
        assert_eq!(decision.severity, Severity::Emergency);
        assert!(decision.checks_passed.is_empty());
    }

    #[tokio::test]
    async fn test_drawdown_at_threshold_latches_shutdown() {
        let f = fixture();
        let user = Uuid::new_v4();
        let mut state = f.monitor.account_state(user).await.unwrap();
        state.equity = dec!(8500); // exactly 15% below the 10_000 peak
        f.state_repo.save(&state).await.unwrap();

        let decision = f
            .validator
            .validate(&good_signal(user), dec!(0.5))
            .await
            .unwrap();
        assert_eq!(decision.kind, DecisionKind::Shutdown);
        assert_eq!(decision.reason_code.as_deref(), Some("drawdown_exceeded"));

        // Flag persists; the next call rejects at check 1.
        let next = f
            .validator
            .validate(&good_signal(user), dec!(0.5))
            .await
            .unwrap();
        assert_eq!(next.reason_code.as_deref(), Some("emergency_shutdown"));
        assert_eq!(f.decisions.count().await, 2);
    }

    #[tokio::test]
    async fn test_open_position_cap() {
        let f = fixture();
        let user = Uuid::new_v4();
        let mut state = f.monitor.account_state(user).await.unwrap();
        state.open_positions_count = 10;
        f.state_repo.save(&state).await.unwrap();

        let decision = f
            .validator
            .validate(&good_signal(user), dec!(0.5))
            .await
            .unwrap();
        assert_eq!(decision.reason_code.as_deref(), Some("max_open_positions"));
        assert_eq!(decision.checks_failed, vec!["max_open_positions"]);
    }

    #[tokio::test]
    async fn test_daily_limit_boundary() {
        let f = fixture();
        let user = Uuid::new_v4();
        let mut state = f.monitor.account_state(user).await.unwrap();
        state.trades_today = 19; // limit is 20: one left
        f.state_repo.save(&state).await.unwrap();

        let decision = f
            .validator
            .validate(&good_signal(user), dec!(0.5))
            .await
            .unwrap();
        assert!(decision.is_approved());

        let mut state = f.state_repo.load(user).await.unwrap().unwrap();
        state.trades_today = 20;
        f.state_repo.save(&state).await.unwrap();

        let decision = f
            .validator
            .validate(&good_signal(user), dec!(0.5))
            .await
            .unwrap();
        assert_eq!(decision.reason_code.as_deref(), Some("daily_limit"));
    }

    #[tokio::test]
    async fn test_hourly_sliding_window() {
        let f = fixture();
        let user = Uuid::new_v4();
        let mut state = f.monitor.account_state(user).await.unwrap();
        let now = Utc::now();
        for minutes in [5, 10, 20, 30, 40] {
            state
                .hourly_trade_times
                .push_back(now - chrono::Duration::minutes(minutes));
        }
        f.state_repo.save(&state).await.unwrap();

        let decision = f
            .validator
            .validate(&good_signal(user), dec!(0.5))
            .await
            .unwrap();
        assert_eq!(decision.reason_code.as_deref(), Some("hourly_limit"));

        // Aged-out trades fall out of the window.
        let mut state = f.state_repo.load(user).await.unwrap().unwrap();
        state.hourly_trade_times.clear();
        for minutes in [70, 80, 90] {
            state
                .hourly_trade_times
                .push_back(now - chrono::Duration::minutes(minutes));
        }
        f.state_repo.save(&state).await.unwrap();
        let decision = f
            .validator
            .validate(&good_signal(user), dec!(0.5))
            .await
            .unwrap();
        assert!(decision.is_approved());
    }

    #[tokio::test]
    async fn test_position_size_lot_cap() {
        let f = fixture();
        let user = Uuid::new_v4();
        let decision = f
            .validator
            .validate(&good_signal(user), dec!(1.5)) // hard lot cap is 1.0
            .await
            .unwrap();
        assert_eq!(decision.reason_code.as_deref(), Some("position_size"));
    }

    #[tokio::test]
    async fn test_position_size_notional_cap() {
        let f = fixture();
        let user = Uuid::new_v4();
        let mut signal = good_signal(user);
        // 1 lot at 1500 = 15% of a 10_000 balance; cap is 10%.
        signal.entry = dec!(1500);
        signal.stop_loss = dec!(1490);
        signal.take_profit = dec!(1530);
        let decision = f.validator.validate(&signal, dec!(1.0)).await.unwrap();
        assert_eq!(decision.reason_code.as_deref(), Some("position_size"));
    }

    #[tokio::test]
    async fn test_risk_reward_floor_inclusive() {
        let f = fixture();
        let user = Uuid::new_v4();
        let mut signal = good_signal(user);
        // rr exactly 1.5: |1.1075-1.1|/|1.1-1.095| = 1.5
        signal.take_profit = dec!(1.1075);
        let decision = f.validator.validate(&signal, dec!(0.5)).await.unwrap();
        assert!(decision.is_approved(), "rr == floor must pass");

        signal.take_profit = dec!(1.1070);
        signal.id = Uuid::new_v4();
        let decision = f.validator.validate(&signal, dec!(0.5)).await.unwrap();
        assert_eq!(decision.reason_code.as_deref(), Some("rr_too_low"));
    }

    #[tokio::test]
    async fn test_disabled_budget_rejects() {
        let f = fixture();
        let user = Uuid::new_v4();
        let mut budget = StrategyBudget::new(user, "nbb", "EURUSD");
        budget.enabled = false;
        budget.disabled_reason = Some("consecutive_losses".to_string());
        f.budget_repo.save(&budget).await.unwrap();

        let decision = f
            .validator
            .validate(&good_signal(user), dec!(0.5))
            .await
            .unwrap();
        assert_eq!(decision.reason_code.as_deref(), Some("budget_disabled"));
        assert_eq!(decision.checks_failed, vec!["strategy_budget"]);
    }

    #[tokio::test]
    async fn test_daily_loss_projection() {
        let f = fixture();
        let user = Uuid::new_v4();
        let mut state = f.monitor.account_state(user).await.unwrap();
        state.daily_pnl = dec!(-450); // 4.5% of 10_000 already lost
        f.state_repo.save(&state).await.unwrap();

        // 1% projected + 4.5% realized >= 5% budget
        let decision = f
            .validator
            .validate(&good_signal(user), dec!(0.5))
            .await
            .unwrap();
        assert_eq!(decision.reason_code.as_deref(), Some("daily_loss"));
    }

    #[tokio::test]
    async fn test_every_call_records_exactly_one_decision() {
        let f = fixture();
        let user = Uuid::new_v4();
        for _ in 0..3 {
            f.validator
                .validate(&good_signal(user), dec!(0.5))
                .await
                .unwrap();
        }
        assert_eq!(f.decisions.count().await, 3);
    }
}
