//! Storage-layer invariants that only the real database can prove: the
//! journal's immutability triggers, the order idempotency constraint, and
//! the settings CAS.

use chrono::Utc;
use rust_decimal_macros::dec;
use tradewarden::domain::constants::HardLimits;
use tradewarden::domain::journal::{ExitReason, JournalEntry, TradeSource};
use tradewarden::domain::order::{ExecutionOrder, OrderStatus};
use tradewarden::domain::repositories::{
    JournalRepository, OrderInsert, OrderRepository, SettingsRepository,
};
use tradewarden::domain::settings::{ChangeType, Settings, SettingsAudit};
use tradewarden::domain::types::{BrokerType, OrderType, Side};
use tradewarden::infrastructure::persistence::Database;
use tradewarden::infrastructure::persistence::repositories::{
    SqliteJournalRepository, SqliteOrderRepository, SqliteSettingsRepository,
};
use uuid::Uuid;

async fn test_db() -> Database {
    let path = std::env::temp_dir().join(format!("tradewarden-test-{}.db", Uuid::new_v4()));
    Database::new(&format!("sqlite://{}", path.display()))
        .await
        .expect("test database must open")
}

fn entry(user: Uuid) -> JournalEntry {
    JournalEntry {
        id: Uuid::new_v4(),
        entry_uid: format!("jr-{}", Uuid::new_v4()),
        strategy_name: "nbb".to_string(),
        symbol: "EURUSD".to_string(),
        user_id: user,
        source: TradeSource::Simulation,
        side: Side::Long,
        entry: dec!(1.1000),
        exit: dec!(1.1150),
        size: dec!(1.0),
        pnl: dec!(0.0150),
        duration_secs: 1800,
        exit_reason: ExitReason::TakeProfit,
        opened_at: Utc::now(),
        closed_at: Utc::now(),
        signal_id: Uuid::new_v4(),
        order_id: Uuid::new_v4(),
    }
}

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
        strategy_name: "nbb".to_string(),
        error_msg: None,
        retry_count: 0,
        user_id: Uuid::new_v4(),
    }
}

#[tokio::test]
async fn test_journal_rejects_update_and_delete() {
    let db = test_db().await;
    let repo = SqliteJournalRepository::new(db.clone());
    let user = Uuid::new_v4();
    let entry = entry(user);
    repo.insert(&entry).await.unwrap();

    // Direct SQL against the table; the triggers must abort both.
    let update = sqlx::query("UPDATE journal_entries SET pnl = '999' WHERE id = $1")
        .bind(entry.id.to_string())
        .execute(&db.pool)
        .await;
    assert!(update.is_err(), "journal update must be rejected");

    let delete = sqlx::query("DELETE FROM journal_entries WHERE id = $1")
        .bind(entry.id.to_string())
        .execute(&db.pool)
        .await;
    assert!(delete.is_err(), "journal delete must be rejected");

    // The row is untouched.
    let rows = repo.list_for_user(user, 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].pnl, dec!(0.0150));
}

#[tokio::test]
async fn test_journal_round_trips_fields() {
    let db = test_db().await;
    let repo = SqliteJournalRepository::new(db);
    let user = Uuid::new_v4();
    let original = entry(user);
    repo.insert(&original).await.unwrap();

    let loaded = repo.list_for_user(user, 10).await.unwrap().remove(0);
    assert_eq!(loaded.entry_uid, original.entry_uid);
    assert_eq!(loaded.exit_reason, ExitReason::TakeProfit);
    assert_eq!(loaded.source, TradeSource::Simulation);
    assert_eq!(loaded.exit, original.exit);
}

#[tokio::test]
async fn test_duplicate_client_order_id_is_detected() {
    let db = test_db().await;
    let repo = SqliteOrderRepository::new(db);
    let first = order("coid-sql-1");
    assert!(matches!(
        repo.insert(&first).await.unwrap(),
        OrderInsert::Inserted
    ));

    let mut second = order("coid-sql-1");
    second.id = Uuid::new_v4();
    match repo.insert(&second).await.unwrap() {
        OrderInsert::Duplicate(existing) => assert_eq!(existing.id, first.id),
        OrderInsert::Inserted => panic!("unique constraint must hold"),
    }
}

#[tokio::test]
async fn test_settings_cas_detects_stale_version() {
    let db = test_db().await;
    let repo = SqliteSettingsRepository::new(db);
    let settings = Settings::defaults(HardLimits::get());
    let audit = SettingsAudit {
        id: Uuid::new_v4(),
        version: 1,
        changed_by: None,
        changed_at: Utc::now(),
        change_type: ChangeType::Bootstrap,
        old_values: serde_json::json!({}),
        new_values: serde_json::json!({}),
        reason: "bootstrap".to_string(),
    };
    repo.insert_default(&settings, &audit).await.unwrap();

    let mut next = settings.clone();
    next.version = 2;
    next.max_trades_per_day = 10;
    let next_audit = SettingsAudit {
        id: Uuid::new_v4(),
        version: 2,
        change_type: ChangeType::Update,
        ..audit.clone()
    };

    // Winning write goes through; a second write against the stale version
    // is refused and leaves no audit row.
    assert!(repo.compare_and_update(1, &next, &next_audit).await.unwrap());
    let mut stale = settings.clone();
    stale.version = 2;
    let stale_audit = SettingsAudit {
        id: Uuid::new_v4(),
        version: 2,
        ..audit.clone()
    };
    assert!(!repo.compare_and_update(1, &stale, &stale_audit).await.unwrap());

    let audit_rows = repo.audit_log(10).await.unwrap();
    assert_eq!(audit_rows.len(), 2);
    assert_eq!(audit_rows[0].version, 2);
}

#[tokio::test]
async fn test_order_update_and_log_round_trip() {
    let db = test_db().await;
    let repo = SqliteOrderRepository::new(db);
    let mut order = order("coid-sql-2");
    repo.insert(&order).await.unwrap();

    order.status = OrderStatus::Submitted;
    order.broker_order_id = Some("sim-42".to_string());
    repo.update(&order).await.unwrap();

    let loaded = repo.get(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, OrderStatus::Submitted);
    assert_eq!(loaded.broker_order_id.as_deref(), Some("sim-42"));

    let by_broker = repo.by_broker_order_id("sim-42").await.unwrap().unwrap();
    assert_eq!(by_broker.id, order.id);
}
