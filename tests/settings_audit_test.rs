//! Settings invariants at the system level: version/audit lockstep and the
//! cancel-before-visible ordering of mode switches.

mod common;

use common::TestSystem;
use rust_decimal_macros::dec;
use tradewarden::application::execution::ExecuteRequest;
use tradewarden::domain::constants::HardLimits;
use tradewarden::domain::errors::ExecutionError;
use tradewarden::domain::order::OrderStatus;
use tradewarden::domain::repositories::OrderRepository;
use tradewarden::domain::settings::SettingsPatch;
use tradewarden::domain::types::{BrokerType, ExecutionMode, TradingMode};

#[tokio::test]
async fn test_every_mutation_bumps_version_with_one_audit_row() {
    let sys = TestSystem::new().await;
    let before = sys.settings.get().await.unwrap();

    let patches = [
        SettingsPatch {
            max_trades_per_day: Some(10),
            ..Default::default()
        },
        SettingsPatch {
            max_risk_per_trade_pct: Some(dec!(1.5)),
            ..Default::default()
        },
        SettingsPatch {
            cancel_orders_on_mode_switch: Some(false),
            ..Default::default()
        },
    ];

    let mut expected_version = before.version;
    for patch in &patches {
        let after = sys.settings.update(patch, None, "tuning").await.unwrap();
        expected_version += 1;
        assert_eq!(after.version, expected_version);
        after.validate(HardLimits::get()).unwrap();
    }

    // Bootstrap row + one per mutation, each with a distinct version.
    let audit = sys.settings.audit(50).await.unwrap();
    assert_eq!(audit.len(), 1 + patches.len());
    let mut versions: Vec<i64> = audit.iter().map(|a| a.version).collect();
    versions.dedup();
    assert_eq!(versions.len(), audit.len());
}

#[tokio::test]
async fn test_mode_switch_cancels_open_orders_first() {
    let sys = TestSystem::new().await;
    let user = sys.create_user("ops@example.com", "hunter2").await;

    // Live + autonomous against the mock broker, with two resting orders.
    sys.settings
        .set_mode(TradingMode::Autonomous, Some(user), "test")
        .await
        .unwrap();
    sys.settings
        .update(
            &SettingsPatch {
                broker_type: Some(BrokerType::Mock),
                ..Default::default()
            },
            Some(user),
            "route live to mock",
        )
        .await
        .unwrap();
    sys.settings
        .set_execution_mode(
            ExecutionMode::Live,
            Some(user),
            Some("hunter2"),
            true,
            "live test",
        )
        .await
        .unwrap();

    for _ in 0..2 {
        sys.mock_broker
            .push_script(tradewarden::infrastructure::mock::ScriptedSubmit::AcceptResting)
            .await;
        let signal = sys.seed_signal(user).await;
        let order = sys
            .engine
            .execute(ExecuteRequest::new(signal.id, dec!(0.5)))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Submitted);
    }
    assert_eq!(sys.orders.non_terminal().await.unwrap().len(), 2);

    // Dropping back to guide cancels both orders before the new mode is
    // observable.
    sys.settings
        .set_mode(TradingMode::Guide, Some(user), "pulling the plug")
        .await
        .unwrap();

    assert!(sys.orders.non_terminal().await.unwrap().is_empty());
    let orders = sys.engine.orders_for_user(user, None, 10).await.unwrap();
    assert_eq!(orders.len(), 2);
    for order in &orders {
        assert_eq!(order.status, OrderStatus::Cancelled);
        let (_, log) = sys.engine.order_with_log(order.id).await.unwrap();
        assert!(
            log.iter()
                .any(|l| l.new_status == Some(OrderStatus::Cancelled))
        );
    }

    // And new executes are gated as guide mode.
    let signal = sys.seed_signal(user).await;
    let err = sys
        .engine
        .execute(ExecuteRequest::new(signal.id, dec!(0.5)))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::ModeBlocked { .. }));
}

#[tokio::test]
async fn test_mode_switch_leaves_orders_when_disabled() {
    let sys = TestSystem::new().await;
    let user = sys.create_user("ops@example.com", "hunter2").await;

    sys.settings
        .update(
            &SettingsPatch {
                cancel_orders_on_mode_switch: Some(false),
                broker_type: Some(BrokerType::Mock),
                ..Default::default()
            },
            Some(user),
            "keep orders across switches",
        )
        .await
        .unwrap();
    sys.settings
        .set_mode(TradingMode::Autonomous, Some(user), "test")
        .await
        .unwrap();
    sys.settings
        .set_execution_mode(
            ExecutionMode::Live,
            Some(user),
            Some("hunter2"),
            true,
            "live test",
        )
        .await
        .unwrap();

    sys.mock_broker
        .push_script(tradewarden::infrastructure::mock::ScriptedSubmit::AcceptResting)
        .await;
    let signal = sys.seed_signal(user).await;
    sys.engine
        .execute(ExecuteRequest::new(signal.id, dec!(0.5)))
        .await
        .unwrap();

    sys.settings
        .set_mode(TradingMode::Guide, Some(user), "back to guide")
        .await
        .unwrap();

    // The working order survived the switch.
    assert_eq!(sys.orders.non_terminal().await.unwrap().len(), 1);
}
