use crate::application::risk::RiskMonitor;
use crate::application::settings_service::{ModeSwitchGuard, SettingsService};
use crate::domain::errors::{BrokerError, ExecutionError};
use crate::domain::events::ControlEvent;
use crate::domain::order::{
    ExecutionLogEntry, ExecutionOrder, OrderEvent, OrderStatus, client_order_id, transition,
};
use crate::domain::ports::{BrokerAdapter, BrokerOrderStatus, SubmitAck};
use crate::domain::position::{Position, PositionStatus};
use crate::domain::repositories::{
    OrderInsert, OrderRepository, PositionRepository, SignalRepository,
};
use crate::domain::signal::{Signal, SignalStatus};
use crate::domain::types::{BrokerType, ExecutionMode, OrderType, TradingMode, UserId};
use crate::infrastructure::event_bus::EventBus;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Everything `execute` needs beyond the signal itself.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub signal_id: Uuid,
    pub size: Decimal,
    /// Live-mode broker override; simulation and paper modes ignore it.
    pub broker_type: Option<BrokerType>,
    /// Set only by the guide-mode per-trade approval path.
    pub manual_override: bool,
    /// Folded into the idempotency key; identical retries must reuse it.
    pub nonce: Option<String>,
}

impl ExecuteRequest {
    pub fn new(signal_id: Uuid, size: Decimal) -> Self {
        Self {
            signal_id,
            size,
            broker_type: None,
            manual_override: false,
            nonce: None,
        }
    }
}

/// The only path to a broker. Owns the pre-execution gate, the idempotent
/// order insert, the lifecycle state machine, and the execution log.
pub struct ExecutionEngine {
    orders: Arc<dyn OrderRepository>,
    signals: Arc<dyn SignalRepository>,
    positions: Arc<dyn PositionRepository>,
    settings: Arc<SettingsService>,
    monitor: Arc<RiskMonitor>,
    brokers: RwLock<HashMap<BrokerType, Arc<dyn BrokerAdapter>>>,
    events: EventBus,
    max_retries: u32,
    submit_timeout: Duration,
    // Per-order mutex: transitions for one order never interleave.
    order_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ExecutionEngine {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        signals: Arc<dyn SignalRepository>,
        positions: Arc<dyn PositionRepository>,
        settings: Arc<SettingsService>,
        monitor: Arc<RiskMonitor>,
        events: EventBus,
        max_retries: u32,
        submit_timeout: Duration,
    ) -> Self {
        Self {
            orders,
            signals,
            positions,
            settings,
            monitor,
            brokers: RwLock::new(HashMap::new()),
            events,
            max_retries,
            submit_timeout,
            order_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register_broker(&self, adapter: Arc<dyn BrokerAdapter>) {
        let broker_type = adapter.broker_type();
        self.brokers.write().await.insert(broker_type, adapter);
        info!("ExecutionEngine: Registered {} adapter", broker_type);
    }

    async fn order_lock(&self, order_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.order_locks.lock().await;
        locks.entry(order_id).or_default().clone()
    }

    async fn broker(&self, broker_type: BrokerType) -> Result<Arc<dyn BrokerAdapter>, ExecutionError> {
        self.brokers
            .read()
            .await
            .get(&broker_type)
            .cloned()
            .ok_or(ExecutionError::UnknownBroker(broker_type))
    }

    /// The public operation. Gate, idempotent insert, submit, transition.
    pub async fn execute(&self, req: ExecuteRequest) -> Result<ExecutionOrder, ExecutionError> {
        // 1. Signal must still be actionable.
        let signal = self
            .signals
            .get(req.signal_id)
            .await?
            .ok_or(ExecutionError::SignalNotFound)?;

        // Idempotency first: a retry of an already-executed request must
        // return the existing order without re-running the gate (the fill
        // will have advanced the signal past `approved`).
        let nonce = req.nonce.as_deref().unwrap_or("0");
        let coid = client_order_id(
            &signal.strategy_name,
            &signal.symbol,
            signal.id,
            signal.user_id,
            nonce,
        );
        if let Some(existing) = self.orders.by_client_order_id(&coid).await? {
            info!(
                "ExecutionEngine: Duplicate client_order_id {} - returning existing order {}",
                existing.client_order_id, existing.id
            );
            return Ok(existing);
        }

        if !matches!(signal.status, SignalStatus::Pending | SignalStatus::Approved) {
            return Err(ExecutionError::SignalNotExecutable {
                status: signal.status,
            });
        }

        // 2. Mode gate. Simulation never routes to a real broker; live
        // requires autonomy or an explicit per-call user approval.
        let settings = self.settings.get().await.map_err(anyhow::Error::from)?;
        let broker_type = match settings.exec_mode {
            ExecutionMode::Simulation => BrokerType::Simulation,
            ExecutionMode::Paper => BrokerType::Paper,
            ExecutionMode::Live => {
                if settings.mode != TradingMode::Autonomous && !req.manual_override {
                    info!(
                        "ExecutionEngine: BLOCKED live execution for signal {} (mode={})",
                        signal.id, settings.mode
                    );
                    return Err(ExecutionError::ModeBlocked {
                        exec_mode: settings.exec_mode,
                        reason: "mode_requires_autonomous".to_string(),
                    });
                }
                req.broker_type.unwrap_or(settings.broker_type)
            }
        };

        // 3. Lazy, idempotent connect.
        let adapter = self.broker(broker_type).await?;
        if !adapter.is_connected().await {
            adapter.connect().await?;
        }

        // 4. Idempotent order insert. The unique constraint is authoritative
        // under races the lookup above cannot see.
        let order = ExecutionOrder {
            id: Uuid::new_v4(),
            client_order_id: coid,
            broker_order_id: None,
            broker_type,
            symbol: signal.symbol.clone(),
            order_type: OrderType::Market,
            side: signal.side,
            qty: req.size,
            price: Some(signal.entry),
            stop_price: None,
            stop_loss: Some(signal.stop_loss),
            take_profit: Some(signal.take_profit),
            status: OrderStatus::Pending,
            filled_qty: Decimal::ZERO,
            avg_fill_price: None,
            submitted_at: None,
            filled_at: None,
            signal_id: signal.id,
            position_id: None,
            strategy_name: signal.strategy_name.clone(),
            error_msg: None,
            retry_count: 0,
            user_id: signal.user_id,
        };

        match self.orders.insert(&order).await? {
            OrderInsert::Duplicate(existing) => {
                info!(
                    "ExecutionEngine: Duplicate client_order_id {} - returning existing order {}",
                    existing.client_order_id, existing.id
                );
                return Ok(existing);
            }
            OrderInsert::Inserted => {}
        }
        self.orders
            .append_log(&ExecutionLogEntry {
                id: Uuid::new_v4(),
                order_id: order.id,
                event_type: "order_created".to_string(),
                event_data: json!({ "signal_id": signal.id, "broker_type": broker_type }),
                old_status: None,
                new_status: Some(OrderStatus::Pending),
                event_time: Utc::now(),
            })
            .await?;

        // 5. Submit under the order lock.
        let lock = self.order_lock(order.id).await;
        let _guard = lock.lock().await;
        let mut order = order;
        self.submit_once(&mut order, adapter.as_ref()).await?;
        Ok(order)
    }

    /// One submission attempt plus state-machine bookkeeping. Transient
    /// failures leave the order `pending` for the monitor loop.
    async fn submit_once(
        &self,
        order: &mut ExecutionOrder,
        adapter: &dyn BrokerAdapter,
    ) -> Result<(), ExecutionError> {
        order.submitted_at = Some(Utc::now());

        let submit = tokio::time::timeout(self.submit_timeout, adapter.submit(order)).await;
        let outcome: Result<SubmitAck, BrokerError> = match submit {
            Ok(result) => result,
            Err(_elapsed) => Err(BrokerError::Timeout {
                seconds: self.submit_timeout.as_secs(),
            }),
        };

        match outcome {
            Ok(ack) => {
                order.broker_order_id = Some(ack.broker_order_id.clone());
                match ack.status {
                    BrokerOrderStatus::Filled => {
                        self.apply_transition(
                            order,
                            OrderEvent::SubmitFilled,
                            json!({ "broker_order_id": ack.broker_order_id }),
                        )
                        .await?;
                        order.filled_qty = ack.filled_qty;
                        order.avg_fill_price = ack.avg_price;
                        order.filled_at = Some(Utc::now());
                        self.orders.update(order).await?;
                        self.on_filled(order).await?;
                    }
                    BrokerOrderStatus::Accepted => {
                        self.apply_transition(
                            order,
                            OrderEvent::SubmitAccepted,
                            json!({ "broker_order_id": ack.broker_order_id }),
                        )
                        .await?;
                        self.orders.update(order).await?;
                    }
                    BrokerOrderStatus::PartiallyFilled => {
                        self.apply_transition(order, OrderEvent::SubmitAccepted, json!({}))
                            .await?;
                        self.apply_transition(
                            order,
                            OrderEvent::PartialFill,
                            json!({ "filled_qty": ack.filled_qty }),
                        )
                        .await?;
                        order.filled_qty = ack.filled_qty;
                        self.orders.update(order).await?;
                    }
                    other => {
                        warn!(
                            "ExecutionEngine: Unexpected submit ack status {:?} for {}",
                            other, order.id
                        );
                        self.orders.update(order).await?;
                    }
                }
            }
            Err(BrokerError::Rejected { reason }) => {
                order.error_msg = Some(reason.clone());
                self.apply_transition(
                    order,
                    OrderEvent::BrokerRejected,
                    json!({ "reason": reason }),
                )
                .await?;
                self.orders.update(order).await?;
            }
            Err(err) if err.is_retriable() => {
                order.retry_count += 1;
                order.error_msg = Some(err.to_string());
                warn!(
                    "ExecutionEngine: Transient submit failure for {} (attempt {}/{}): {}",
                    order.id, order.retry_count, self.max_retries, err
                );
                self.orders
                    .append_log(&ExecutionLogEntry {
                        id: Uuid::new_v4(),
                        order_id: order.id,
                        event_type: "submit_retry".to_string(),
                        event_data: json!({
                            "error": err.to_string(),
                            "retry_count": order.retry_count,
                        }),
                        old_status: None,
                        new_status: None,
                        event_time: Utc::now(),
                    })
                    .await?;

                if order.retry_count >= self.max_retries {
                    self.fail_after_retries(order, adapter).await?;
                } else {
                    self.orders.update(order).await?;
                }
            }
            Err(err) => {
                // Not connected / unknown order at submit time: treat like a
                // transient wire problem, it is not the order's fault.
                order.retry_count += 1;
                order.error_msg = Some(err.to_string());
                if order.retry_count >= self.max_retries {
                    self.fail_after_retries(order, adapter).await?;
                } else {
                    self.orders.update(order).await?;
                }
            }
        }

        Ok(())
    }

    /// Retry budget exhausted: best-effort cancel against the broker (the
    /// submit may have landed despite the timeout), then `failed`. No ghost
    /// fills.
    async fn fail_after_retries(
        &self,
        order: &mut ExecutionOrder,
        adapter: &dyn BrokerAdapter,
    ) -> Result<(), ExecutionError> {
        if let Some(broker_order_id) = order.broker_order_id.clone() {
            match adapter.cancel(&broker_order_id).await {
                Ok(cancelled) => info!(
                    "ExecutionEngine: Best-effort cancel for {} -> {}",
                    order.id, cancelled
                ),
                Err(e) => warn!(
                    "ExecutionEngine: Best-effort cancel for {} failed: {}",
                    order.id, e
                ),
            }
        }
        self.apply_transition(
            order,
            OrderEvent::RetriesExhausted,
            json!({ "retry_count": order.retry_count }),
        )
        .await?;
        self.orders.update(order).await?;
        error!(
            "ExecutionEngine: Order {} FAILED after {} attempts",
            order.id, order.retry_count
        );
        Ok(())
    }

    /// Applies one lifecycle event: legal transitions get exactly one log
    /// row; illegal attempts get a log row and an error, and the order is
    /// left untouched.
    async fn apply_transition(
        &self,
        order: &mut ExecutionOrder,
        event: OrderEvent,
        event_data: serde_json::Value,
    ) -> Result<(), ExecutionError> {
        match transition(order.status, event) {
            Ok(new_status) => {
                if new_status != order.status {
                    self.orders
                        .append_log(&ExecutionLogEntry::for_transition(
                            order.id,
                            event,
                            order.status,
                            new_status,
                            event_data,
                        ))
                        .await?;
                    order.status = new_status;
                    if new_status.is_terminal() {
                        self.events.publish(ControlEvent::OrderTerminal {
                            user_id: order.user_id,
                            order_id: order.id,
                            status: new_status,
                        });
                    }
                }
                Ok(())
            }
            Err(invalid) => {
                self.orders
                    .append_log(&ExecutionLogEntry {
                        id: Uuid::new_v4(),
                        order_id: order.id,
                        event_type: "invalid_transition".to_string(),
                        event_data: json!({
                            "from": order.status,
                            "event": event,
                        }),
                        old_status: Some(order.status),
                        new_status: None,
                        event_time: Utc::now(),
                    })
                    .await?;
                warn!(
                    "ExecutionEngine: Rejected illegal transition for {}: {}",
                    order.id, invalid
                );
                Err(ExecutionError::InvalidTransition(invalid))
            }
        }
    }

    /// Fill side-effects: signal becomes `executed`, a position opens, the
    /// risk counters advance.
    async fn on_filled(&self, order: &mut ExecutionOrder) -> Result<(), ExecutionError> {
        if let Err(e) = self
            .signals
            .set_status(order.signal_id, SignalStatus::Executed)
            .await
        {
            // The signal may already be executed from a previous partial
            // poll; the order fill stands either way.
            warn!("ExecutionEngine: Signal status advance failed: {}", e);
        }

        let position = Position {
            id: Uuid::new_v4(),
            signal_id: order.signal_id,
            user_id: order.user_id,
            symbol: order.symbol.clone(),
            side: order.side,
            size: order.filled_qty,
            avg_entry: order.avg_fill_price.unwrap_or_default(),
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            opened_at: order.filled_at.unwrap_or_else(Utc::now),
            closed_at: None,
            status: PositionStatus::Open,
        };
        self.positions.insert(&position).await?;
        order.position_id = Some(position.id);
        self.orders.update(order).await?;

        self.monitor
            .record_trade_open(order.user_id, position.opened_at)
            .await?;

        info!(
            "ExecutionEngine: Order {} FILLED ({} {} @ {:?}) - position {}",
            order.id, order.qty, order.symbol, order.avg_fill_price, position.id
        );
        self.events.publish(ControlEvent::OrderFilled {
            user_id: order.user_id,
            order_id: order.id,
            symbol: order.symbol.clone(),
        });
        Ok(())
    }

    /// User-facing cancel of a non-terminal order.
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<ExecutionOrder, ExecutionError> {
        let lock = self.order_lock(order_id).await;
        let _guard = lock.lock().await;

        let mut order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(ExecutionError::OrderNotFound)?;
        if order.status.is_terminal() {
            return Err(ExecutionError::NotCancellable {
                status: order.status,
            });
        }

        match (order.broker_order_id.clone(), order.status) {
            // Never reached the broker: cancel is engine-local.
            (None, OrderStatus::Pending) => {
                self.apply_transition(
                    &mut order,
                    OrderEvent::CancelConfirmed,
                    json!({ "local": true }),
                )
                .await?;
                self.orders.update(&order).await?;
            }
            (Some(broker_order_id), _) => {
                let adapter = self.broker(order.broker_type).await?;
                let cancelled = adapter.cancel(&broker_order_id).await?;
                if cancelled {
                    self.apply_transition(&mut order, OrderEvent::CancelConfirmed, json!({}))
                        .await?;
                    self.orders.update(&order).await?;
                } else {
                    // Too late to cancel; the poll loop will pick up the
                    // final state.
                    return Err(ExecutionError::NotCancellable {
                        status: order.status,
                    });
                }
            }
            (None, status) => {
                return Err(ExecutionError::NotCancellable { status });
            }
        }

        Ok(order)
    }

    /// Cancels every non-terminal order for `user` (or all users when the
    /// change is system-wide). Called by the settings service before a mode
    /// flip becomes visible.
    pub async fn cancel_all_open(&self, user_id: Option<UserId>) -> anyhow::Result<u32> {
        let open = match user_id {
            Some(user) => self.orders.non_terminal_for_user(user).await?,
            None => self.orders.non_terminal().await?,
        };
        let mut cancelled = 0;
        for order in open {
            match self.cancel_order(order.id).await {
                Ok(_) => cancelled += 1,
                Err(ExecutionError::NotCancellable { status }) => {
                    info!(
                        "ExecutionEngine: Order {} not cancellable in {} during mode switch",
                        order.id, status
                    );
                }
                Err(e) => warn!(
                    "ExecutionEngine: Cancel of {} during mode switch failed: {}",
                    order.id, e
                ),
            }
        }
        info!(
            "ExecutionEngine: Mode switch cancelled {} open order(s)",
            cancelled
        );
        Ok(cancelled)
    }

    /// One monitor-loop pass: poll every non-terminal order and apply the
    /// resulting transitions. Safe to run concurrently per order.
    pub async fn poll_open_orders(&self) -> anyhow::Result<()> {
        let open = self.orders.non_terminal().await?;
        for order in open {
            if let Err(e) = self.poll_order(order.id).await {
                warn!("ExecutionEngine: Poll of order {} failed: {}", order.id, e);
            }
        }
        Ok(())
    }

    async fn poll_order(&self, order_id: Uuid) -> Result<(), ExecutionError> {
        let lock = self.order_lock(order_id).await;
        let _guard = lock.lock().await;

        let mut order = match self.orders.get(order_id).await? {
            Some(order) if !order.status.is_terminal() => order,
            _ => return Ok(()),
        };
        let adapter = self.broker(order.broker_type).await?;
        if !adapter.is_connected().await {
            adapter.connect().await?;
        }

        match order.status {
            OrderStatus::Pending => {
                // Stuck before or during submit: retry, then give up cleanly.
                if order.retry_count >= self.max_retries {
                    self.fail_after_retries(&mut order, adapter.as_ref()).await?;
                } else {
                    self.submit_once(&mut order, adapter.as_ref()).await?;
                }
            }
            OrderStatus::Submitted | OrderStatus::PartiallyFilled => {
                let broker_order_id = match &order.broker_order_id {
                    Some(id) => id.clone(),
                    None => return Ok(()),
                };
                let snapshot = match adapter.status(&broker_order_id).await {
                    Ok(snapshot) => snapshot,
                    Err(BrokerError::UnknownOrder { .. }) => {
                        // Broker has forgotten a working order: it is gone,
                        // expire it after a best-effort cancel.
                        warn!(
                            "ExecutionEngine: Broker lost order {} - expiring",
                            order.id
                        );
                        let _ = adapter.cancel(&broker_order_id).await;
                        self.apply_transition(
                            &mut order,
                            OrderEvent::Expiry,
                            json!({ "reason": "unknown_order" }),
                        )
                        .await?;
                        self.orders.update(&order).await?;
                        return Ok(());
                    }
                    Err(e) if e.is_retriable() => return Ok(()), // next tick
                    Err(e) => return Err(e.into()),
                };

                match snapshot.status {
                    BrokerOrderStatus::Accepted => {}
                    BrokerOrderStatus::PartiallyFilled => {
                        if order.status == OrderStatus::Submitted {
                            self.apply_transition(
                                &mut order,
                                OrderEvent::PartialFill,
                                json!({ "filled_qty": snapshot.filled_qty }),
                            )
                            .await?;
                        }
                        order.filled_qty = snapshot.filled_qty;
                        self.orders.update(&order).await?;
                    }
                    BrokerOrderStatus::Filled => {
                        self.apply_transition(
                            &mut order,
                            OrderEvent::Fill,
                            json!({ "filled_qty": snapshot.filled_qty }),
                        )
                        .await?;
                        order.filled_qty = snapshot.filled_qty;
                        order.avg_fill_price = snapshot.avg_price;
                        order.filled_at = Some(Utc::now());
                        self.orders.update(&order).await?;
                        self.on_filled(&mut order).await?;
                    }
                    BrokerOrderStatus::Cancelled => {
                        self.apply_transition(&mut order, OrderEvent::CancelConfirmed, json!({}))
                            .await?;
                        self.orders.update(&order).await?;
                    }
                    BrokerOrderStatus::Expired | BrokerOrderStatus::Rejected => {
                        // A post-accept broker rejection is treated as expiry
                        // of the working order; the raw status is kept in the
                        // log row.
                        self.apply_transition(
                            &mut order,
                            OrderEvent::Expiry,
                            json!({ "broker_status": snapshot.status }),
                        )
                        .await?;
                        self.orders.update(&order).await?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn order_with_log(
        &self,
        order_id: Uuid,
    ) -> Result<(ExecutionOrder, Vec<ExecutionLogEntry>), ExecutionError> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(ExecutionError::OrderNotFound)?;
        let log = self.orders.logs_for_order(order_id).await?;
        Ok((order, log))
    }

    pub async fn orders_for_user(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
        limit: u32,
    ) -> anyhow::Result<Vec<ExecutionOrder>> {
        self.orders.list_for_user(user_id, status, limit).await
    }

    /// Whether the adapter selected by the current settings can reach its
    /// venue. Consulted by the autonomy gate.
    pub async fn active_broker_connected(&self) -> bool {
        let Ok(settings) = self.settings.get().await else {
            return false;
        };
        let broker_type = match settings.exec_mode {
            ExecutionMode::Simulation => BrokerType::Simulation,
            ExecutionMode::Paper => BrokerType::Paper,
            ExecutionMode::Live => settings.broker_type,
        };
        match self.brokers.read().await.get(&broker_type) {
            Some(adapter) => adapter.is_connected().await,
            None => false,
        }
    }
}

/// Cancel-on-mode-switch hook: the settings service calls this before the
/// new mode becomes observable.
pub struct EngineModeGuard {
    engine: Arc<ExecutionEngine>,
}

impl EngineModeGuard {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ModeSwitchGuard for EngineModeGuard {
    async fn before_mode_change(&self, user_id: Option<UserId>) -> anyhow::Result<()> {
        self.engine.cancel_all_open(user_id).await?;
        Ok(())
    }
}

// Re-exported for signal lookups by the API layer.
impl ExecutionEngine {
    pub async fn signal(&self, id: Uuid) -> anyhow::Result<Option<Signal>> {
        self.signals.get(id).await
    }
}
