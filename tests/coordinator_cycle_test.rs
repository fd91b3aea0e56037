//! Coordinator cycles: deterministic phase ordering, the halt
//! short-circuit, and the advisor health gate.

mod common;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use common::TestSystem;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tradewarden::application::coordinator::{Coordinator, CycleOutcome, CyclePhase};
use tradewarden::domain::ports::Strategy;
use tradewarden::domain::repositories::{RiskStateRepository, SignalRepository};
use tradewarden::domain::signal::{SignalDraft, SignalStatus};
use tradewarden::domain::types::{Candle, Side};
use uuid::Uuid;

/// Advisor that always proposes the same well-formed long.
struct AlwaysLong;

#[async_trait]
impl Strategy for AlwaysLong {
    fn name(&self) -> &str {
        "always_long"
    }

    async fn analyze(&self, candles: &[Candle]) -> Result<Option<SignalDraft>> {
        let last = match candles.last() {
            Some(candle) => candle,
            None => return Ok(None),
        };
        Ok(Some(SignalDraft {
            symbol: last.symbol.clone(),
            side: Side::Long,
            entry: last.close,
            stop_loss: last.close - dec!(0.0050),
            take_profit: last.close + dec!(0.0150),
            risk_pct: dec!(1.0),
            confidence: 0.9,
        }))
    }
}

/// Advisor that fails every batch.
struct Flaky;

#[async_trait]
impl Strategy for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn analyze(&self, _candles: &[Candle]) -> Result<Option<SignalDraft>> {
        anyhow::bail!("indicator pipeline exploded")
    }
}

fn candles(n: usize, close: Decimal) -> Vec<Candle> {
    (0..n)
        .map(|_| Candle {
            symbol: "EURUSD".to_string(),
            open: close,
            high: close + dec!(0.0010),
            low: close - dec!(0.0010),
            close,
            volume: dec!(1000),
            timestamp: Utc::now(),
        })
        .collect()
}

async fn coordinator_with(sys: &TestSystem, strategy: Arc<dyn Strategy>) -> Coordinator {
    let mut coordinator = Coordinator::new(
        sys.validator.clone(),
        sys.engine.clone(),
        sys.signals.clone(),
        sys.monitor.clone(),
        sys.settings.clone(),
        sys.halt.clone(),
    );
    coordinator.register_strategy(strategy).await;
    coordinator
}

#[tokio::test]
async fn test_cycle_runs_all_phases_and_executes() {
    let sys = TestSystem::new().await;
    let coordinator = coordinator_with(&sys, Arc::new(AlwaysLong)).await;
    let user = Uuid::new_v4();

    let report = coordinator
        .run_cycle(user, "EURUSD", &candles(30, dec!(1.1000)))
        .await
        .unwrap();

    assert_eq!(
        report.phases_completed,
        vec![
            CyclePhase::StrategyAnalysis,
            CyclePhase::RiskValidation,
            CyclePhase::Execution,
            CyclePhase::JournalUpdate,
        ]
    );
    let order_id = match report.outcome {
        CycleOutcome::Executed { order_id } => order_id,
        other => panic!("expected execution, got {other:?}"),
    };

    let (order, _) = sys.engine.order_with_log(order_id).await.unwrap();
    assert_eq!(order.user_id, user);
    // Sizing is risk-based: 1% of 10_000 across a 50-pip stop, capped at
    // the hard 1-lot ceiling.
    assert_eq!(order.qty, dec!(1.0));

    let signal = sys.signals.get(report.signal_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(signal.status, SignalStatus::Executed);
}

#[tokio::test]
async fn test_rejected_cycle_marks_signal_rejected() {
    let sys = TestSystem::new().await;
    let coordinator = coordinator_with(&sys, Arc::new(AlwaysLong)).await;
    let user = Uuid::new_v4();

    // Latch the emergency flag first; the validator must veto the proposal.
    let mut state = sys.monitor.account_state(user).await.unwrap();
    state.emergency_shutdown = true;
    sys.state_repo.save(&state).await.unwrap();

    let report = coordinator
        .run_cycle(user, "EURUSD", &candles(30, dec!(1.1000)))
        .await
        .unwrap();

    match &report.outcome {
        CycleOutcome::Rejected(decision) => {
            assert_eq!(decision.reason_code.as_deref(), Some("emergency_shutdown"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(!report.phases_completed.contains(&CyclePhase::Execution));

    let signal = sys.signals.get(report.signal_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(signal.status, SignalStatus::Rejected);
}

#[tokio::test]
async fn test_halt_short_circuits_cycle() {
    let sys = TestSystem::new().await;
    let coordinator = coordinator_with(&sys, Arc::new(AlwaysLong)).await;
    sys.halt.halt();

    let report = coordinator
        .run_cycle(Uuid::new_v4(), "EURUSD", &candles(30, dec!(1.1000)))
        .await
        .unwrap();
    assert!(matches!(report.outcome, CycleOutcome::Halted));
    assert!(report.phases_completed.is_empty());

    // Clearing the halt resumes cycles.
    sys.halt.clear();
    let report = coordinator
        .run_cycle(Uuid::new_v4(), "EURUSD", &candles(30, dec!(1.1000)))
        .await
        .unwrap();
    assert!(matches!(report.outcome, CycleOutcome::Executed { .. }));
}

#[tokio::test]
async fn test_unhealthy_advisor_refuses_cycle() {
    let sys = TestSystem::new().await;
    let coordinator = coordinator_with(&sys, Arc::new(Flaky)).await;
    let user = Uuid::new_v4();

    // Drive the error rate over 50%: every batch fails.
    for _ in 0..12 {
        let report = coordinator
            .run_cycle(user, "EURUSD", &candles(30, dec!(1.1000)))
            .await
            .unwrap();
        // While healthy-enough, the failing advisor just yields no signal.
        if let CycleOutcome::Unhealthy { advisor } = &report.outcome {
            assert_eq!(advisor, "flaky");
            return;
        }
        assert!(matches!(report.outcome, CycleOutcome::NoSignal));
    }
    panic!("advisor was never quarantined despite a 100% error rate");
}

#[tokio::test]
async fn test_no_signal_cycle_stops_after_analysis() {
    let sys = TestSystem::new().await;
    let coordinator = coordinator_with(&sys, Arc::new(AlwaysLong)).await;

    let report = coordinator
        .run_cycle(Uuid::new_v4(), "EURUSD", &[])
        .await
        .unwrap();
    assert!(matches!(report.outcome, CycleOutcome::NoSignal));
    assert_eq!(report.phases_completed, vec![CyclePhase::StrategyAnalysis]);
}
