//! End-to-end scenarios over the full in-process pipeline: execute in
//! simulation, close on take-profit, journal and budgets update.

mod common;

use common::TestSystem;
use rust_decimal_macros::dec;
use tradewarden::application::execution::ExecuteRequest;
use tradewarden::domain::order::OrderStatus;
use tradewarden::domain::ports::BrokerAdapter;
use tradewarden::domain::repositories::{SignalRepository, StrategyBudgetRepository};
use tradewarden::domain::signal::SignalStatus;
use uuid::Uuid;

#[tokio::test]
async fn test_happy_path_simulation_fill_and_close() {
    let sys = TestSystem::new().await;
    let user = Uuid::new_v4();
    let signal = sys.seed_signal(user).await;
    let mut sim_events = sys.simulation.subscribe_events().unwrap();

    // Defaults are exec_mode=simulation, mode=guide; simulation never needs
    // autonomy.
    let order = sys
        .engine
        .execute(ExecuteRequest::new(signal.id, dec!(0.5)))
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Filled);
    // Half a pip of slippage against the long.
    assert_eq!(order.avg_fill_price, Some(dec!(1.10005)));
    assert_eq!(order.filled_qty, dec!(0.5));
    assert!(order.position_id.is_some());

    // Signal advanced and counters moved.
    let signal = sys.signals.get(signal.id).await.unwrap().unwrap();
    assert_eq!(signal.status, SignalStatus::Executed);
    let state = sys.monitor.account_state(user).await.unwrap();
    assert_eq!(state.trades_today, 1);
    assert_eq!(state.open_positions_count, 1);

    // Price runs through the take-profit: the ticker closes the position
    // and the lifecycle writes exactly one journal row.
    sys.simulation.on_price_tick("EURUSD", dec!(1.1200)).await;
    assert_eq!(sys.drain_sim_events(&mut sim_events).await, 1);

    assert_eq!(sys.journal_repo.count().await, 1);
    let entries = sys.journal.entries_for_user(user, 10).await.unwrap();
    assert_eq!(entries[0].exit, dec!(1.1150));
    assert!(entries[0].pnl > rust_decimal::Decimal::ZERO);

    let state = sys.monitor.account_state(user).await.unwrap();
    assert_eq!(state.open_positions_count, 0);
    assert!(state.equity > common::INITIAL_BALANCE);

    // A second tick through the level must not journal the trade twice.
    sys.simulation.on_price_tick("EURUSD", dec!(1.1300)).await;
    sys.drain_sim_events(&mut sim_events).await;
    assert_eq!(sys.journal_repo.count().await, 1);

    // Budget recorded a winner.
    let budget = sys
        .budgets
        .load(user, "nbb", "EURUSD")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(budget.total_trades, 1);
    assert_eq!(budget.winning_trades, 1);
    assert_eq!(budget.consecutive_losses, 0);
}

#[tokio::test]
async fn test_stop_loss_close_feeds_risk_state() {
    let sys = TestSystem::new().await;
    let user = Uuid::new_v4();
    let signal = sys.seed_signal(user).await;
    let mut sim_events = sys.simulation.subscribe_events().unwrap();

    sys.engine
        .execute(ExecuteRequest::new(signal.id, dec!(0.5)))
        .await
        .unwrap();

    sys.simulation.on_price_tick("EURUSD", dec!(1.0900)).await;
    assert_eq!(sys.drain_sim_events(&mut sim_events).await, 1);

    let entries = sys.journal.entries_for_user(user, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].pnl < rust_decimal::Decimal::ZERO);

    let state = sys.monitor.account_state(user).await.unwrap();
    assert!(state.daily_pnl < rust_decimal::Decimal::ZERO);
    assert!(state.equity < common::INITIAL_BALANCE);

    let budget = sys
        .budgets
        .load(user, "nbb", "EURUSD")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(budget.consecutive_losses, 1);
}

#[tokio::test]
async fn test_full_validate_then_execute_flow() {
    let sys = TestSystem::new().await;
    let user = Uuid::new_v4();
    let signal = sys.seed_signal(user).await;

    let decision = sys.validator.validate(&signal, dec!(0.5)).await.unwrap();
    assert!(decision.is_approved());
    sys.signals
        .set_status(signal.id, SignalStatus::Approved)
        .await
        .unwrap();

    let order = sys
        .engine
        .execute(ExecuteRequest::new(signal.id, dec!(0.5)))
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Filled);

    // One decision row for the validation, regardless of outcome.
    assert_eq!(sys.decisions.count().await, 1);
}
