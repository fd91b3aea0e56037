use crate::domain::errors::BrokerError;
use crate::domain::journal::ExitReason;
use crate::domain::order::ExecutionOrder;
use crate::domain::ports::{
    BrokerAdapter, BrokerEvent, BrokerOrderStatus, BrokerPosition, OrderSnapshot, SubmitAck,
};
use crate::domain::repositories::SimulationAccountRepository;
use crate::domain::simulation::SimulationAccount;
use crate::domain::types::{BrokerType, OrderType, Side, UserId};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};
use uuid::Uuid;

/// One FX pip; slippage configuration is expressed in pips.
const PIP: Decimal = dec!(0.0001);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimOrderState {
    /// Limit order waiting for price to cross.
    Resting,
    /// Filled; position is live and SL/TP are watched.
    Open,
    /// Position closed by SL/TP.
    Closed,
    Cancelled,
}

#[derive(Debug, Clone)]
struct SimOrder {
    user_id: UserId,
    symbol: String,
    side: Side,
    qty: Decimal,
    limit_price: Option<Decimal>,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
    state: SimOrderState,
    fill_price: Option<Decimal>,
}

/// Simulation reference adapter. Persists its account, applies slippage,
/// commission, latency and a Bernoulli fill-probability reject, and closes
/// positions on SL/TP from price ticks, emitting synthetic fill events.
pub struct SimulationAdapter {
    accounts: std::sync::Arc<dyn SimulationAccountRepository>,
    connected: AtomicBool,
    orders: RwLock<HashMap<String, SimOrder>>,
    events_tx: broadcast::Sender<BrokerEvent>,
    defaults: SimulationDefaults,
}

/// Account parameters used when a user trades for the first time.
#[derive(Debug, Clone, Copy)]
pub struct SimulationDefaults {
    pub initial_balance: Decimal,
    pub slippage_pips: Decimal,
    pub commission_per_lot: Decimal,
    pub latency_ms: u64,
    pub fill_probability: f64,
}

impl Default for SimulationDefaults {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            slippage_pips: dec!(0.5),
            commission_per_lot: dec!(3.5),
            latency_ms: 20,
            fill_probability: 1.0,
        }
    }
}

impl SimulationAdapter {
    pub fn new(
        accounts: std::sync::Arc<dyn SimulationAccountRepository>,
        defaults: SimulationDefaults,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            accounts,
            connected: AtomicBool::new(false),
            orders: RwLock::new(HashMap::new()),
            events_tx,
            defaults,
        }
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(BrokerError::NotConnected);
        }
        Ok(())
    }

    async fn account_for(&self, user_id: UserId) -> Result<SimulationAccount, BrokerError> {
        match self.accounts.load(user_id).await {
            Ok(Some(account)) => Ok(account),
            Ok(None) => {
                let mut account = SimulationAccount::new(user_id, self.defaults.initial_balance);
                account.slippage_pips = self.defaults.slippage_pips;
                account.commission_per_lot = self.defaults.commission_per_lot;
                account.latency_ms = self.defaults.latency_ms;
                account.fill_probability = self.defaults.fill_probability;
                self.accounts
                    .save(&account)
                    .await
                    .map_err(|e| BrokerError::Transport {
                        reason: e.to_string(),
                    })?;
                Ok(account)
            }
            Err(e) => Err(BrokerError::Transport {
                reason: e.to_string(),
            }),
        }
    }

    fn slipped(&self, side: Side, price: Decimal, slippage_pips: Decimal) -> Decimal {
        let offset = slippage_pips * PIP;
        match side {
            Side::Long => price + offset,
            Side::Short => price - offset,
        }
    }

    /// Feed one price observation. Rests limit orders fill on cross; open
    /// positions close when the price touches SL or TP, which emits a
    /// synthetic `PositionClosed` event for the lifecycle worker.
    pub async fn on_price_tick(&self, symbol: &str, price: Decimal) {
        let mut closes: Vec<(String, Decimal, ExitReason, UserId, Decimal)> = Vec::new();

        {
            let mut orders = self.orders.write().await;
            for (broker_order_id, order) in orders.iter_mut() {
                if order.symbol != symbol {
                    continue;
                }
                match order.state {
                    SimOrderState::Resting => {
                        let limit = order.limit_price.unwrap_or(price);
                        let crossed = match order.side {
                            Side::Long => price <= limit,
                            Side::Short => price >= limit,
                        };
                        if crossed {
                            order.state = SimOrderState::Open;
                            order.fill_price = Some(limit);
                            debug!(
                                "SimulationAdapter: Limit order {} filled @ {}",
                                broker_order_id, limit
                            );
                        }
                    }
                    SimOrderState::Open => {
                        let entry = order.fill_price.unwrap_or(price);
                        let (hit, reason) = match order.side {
                            Side::Long => {
                                if order.stop_loss.is_some_and(|sl| price <= sl) {
                                    (order.stop_loss, ExitReason::StopLoss)
                                } else if order.take_profit.is_some_and(|tp| price >= tp) {
                                    (order.take_profit, ExitReason::TakeProfit)
                                } else {
                                    (None, ExitReason::Manual)
                                }
                            }
                            Side::Short => {
                                if order.stop_loss.is_some_and(|sl| price >= sl) {
                                    (order.stop_loss, ExitReason::StopLoss)
                                } else if order.take_profit.is_some_and(|tp| price <= tp) {
                                    (order.take_profit, ExitReason::TakeProfit)
                                } else {
                                    (None, ExitReason::Manual)
                                }
                            }
                        };
                        if let Some(exit_price) = hit {
                            order.state = SimOrderState::Closed;
                            let pnl = match order.side {
                                Side::Long => (exit_price - entry) * order.qty,
                                Side::Short => (entry - exit_price) * order.qty,
                            };
                            closes.push((
                                broker_order_id.clone(),
                                exit_price,
                                reason,
                                order.user_id,
                                pnl,
                            ));
                        }
                    }
                    SimOrderState::Closed | SimOrderState::Cancelled => {}
                }
            }
        }

        for (broker_order_id, exit_price, reason, user_id, gross_pnl) in closes {
            if let Ok(mut account) = self.account_for(user_id).await {
                let commission = account.commission_per_lot; // per closed lot-trade
                let net_pnl = gross_pnl - commission;
                account.record_close(net_pnl);
                if let Err(e) = self.accounts.save(&account).await {
                    tracing::error!("SimulationAdapter: Failed to persist account: {}", e);
                }
                info!(
                    "SimulationAdapter: Position {} closed ({}) @ {} pnl {}",
                    broker_order_id, reason, exit_price, net_pnl
                );
            }
            let _ = self.events_tx.send(BrokerEvent::PositionClosed {
                broker_order_id,
                exit_price,
                exit_reason: reason,
                closed_at: Utc::now(),
            });
        }
    }
}

#[async_trait]
impl BrokerAdapter for SimulationAdapter {
    fn broker_type(&self) -> BrokerType {
        BrokerType::Simulation
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        if !self.connected.swap(true, Ordering::AcqRel) {
            info!("SimulationAdapter: Connected");
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        info!("SimulationAdapter: Disconnected");
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn submit(&self, order: &ExecutionOrder) -> Result<SubmitAck, BrokerError> {
        self.ensure_connected()?;

        let account = self.account_for(order.user_id).await?;

        if account.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(account.latency_ms)).await;
        }

        // Bernoulli reject: a configurable fraction of submissions bounce,
        // mimicking a broker-side risk desk.
        if account.fill_probability < 1.0 && rand::random::<f64>() > account.fill_probability {
            debug!("SimulationAdapter: Order {} rejected by fill-probability draw", order.id);
            return Err(BrokerError::Rejected {
                reason: "simulated broker rejection".to_string(),
            });
        }

        let requested = order.price.ok_or_else(|| BrokerError::Rejected {
            reason: "simulation adapter requires a reference price".to_string(),
        })?;
        let broker_order_id = format!("sim-{}", Uuid::new_v4());

        let (state, fill_price, ack_status) = match order.order_type {
            OrderType::Market => {
                let fill = self.slipped(order.side, requested, account.slippage_pips);
                (SimOrderState::Open, Some(fill), BrokerOrderStatus::Filled)
            }
            // Limit and stop orders rest until the ticker crosses them.
            OrderType::Limit | OrderType::Stop => {
                (SimOrderState::Resting, None, BrokerOrderStatus::Accepted)
            }
        };

        self.orders.write().await.insert(
            broker_order_id.clone(),
            SimOrder {
                user_id: order.user_id,
                symbol: order.symbol.clone(),
                side: order.side,
                qty: order.qty,
                limit_price: order.price,
                stop_loss: order.stop_loss,
                take_profit: order.take_profit,
                state,
                fill_price,
            },
        );

        info!(
            "SimulationAdapter: Submitted {} {} {} -> {:?}",
            order.side, order.qty, order.symbol, ack_status
        );
        Ok(SubmitAck {
            broker_order_id,
            status: ack_status,
            filled_qty: if ack_status == BrokerOrderStatus::Filled {
                order.qty
            } else {
                Decimal::ZERO
            },
            avg_price: fill_price,
        })
    }

    async fn cancel(&self, broker_order_id: &str) -> Result<bool, BrokerError> {
        self.ensure_connected()?;
        let mut orders = self.orders.write().await;
        match orders.get_mut(broker_order_id) {
            Some(order) if order.state == SimOrderState::Resting => {
                order.state = SimOrderState::Cancelled;
                info!("SimulationAdapter: Cancelled resting order {}", broker_order_id);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(BrokerError::UnknownOrder {
                id: broker_order_id.to_string(),
            }),
        }
    }

    async fn modify(
        &self,
        broker_order_id: &str,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<bool, BrokerError> {
        self.ensure_connected()?;
        let mut orders = self.orders.write().await;
        match orders.get_mut(broker_order_id) {
            Some(order) if order.state != SimOrderState::Closed => {
                if stop_loss.is_some() {
                    order.stop_loss = stop_loss;
                }
                if take_profit.is_some() {
                    order.take_profit = take_profit;
                }
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(BrokerError::UnknownOrder {
                id: broker_order_id.to_string(),
            }),
        }
    }

    async fn status(&self, broker_order_id: &str) -> Result<OrderSnapshot, BrokerError> {
        self.ensure_connected()?;
        let orders = self.orders.read().await;
        let order = orders
            .get(broker_order_id)
            .ok_or_else(|| BrokerError::UnknownOrder {
                id: broker_order_id.to_string(),
            })?;
        let snapshot = match order.state {
            SimOrderState::Resting => OrderSnapshot {
                status: BrokerOrderStatus::Accepted,
                filled_qty: Decimal::ZERO,
                avg_price: None,
            },
            SimOrderState::Open | SimOrderState::Closed => OrderSnapshot {
                status: BrokerOrderStatus::Filled,
                filled_qty: order.qty,
                avg_price: order.fill_price,
            },
            SimOrderState::Cancelled => OrderSnapshot {
                status: BrokerOrderStatus::Cancelled,
                filled_qty: Decimal::ZERO,
                avg_price: None,
            },
        };
        Ok(snapshot)
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        self.ensure_connected()?;
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .filter(|o| o.state == SimOrderState::Open)
            .map(|o| BrokerPosition {
                symbol: o.symbol.clone(),
                side: o.side,
                size: o.qty,
                avg_entry: o.fill_price.unwrap_or(Decimal::ZERO),
            })
            .collect())
    }

    async fn balance(&self) -> Result<Decimal, BrokerError> {
        self.ensure_connected()?;
        Ok(self.defaults.initial_balance)
    }

    fn subscribe_events(&self) -> Option<broadcast::Receiver<BrokerEvent>> {
        Some(self.events_tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderStatus;
    use crate::infrastructure::repositories::in_memory::InMemorySimulationAccountRepository;
    use std::sync::Arc;

    fn defaults() -> SimulationDefaults {
        SimulationDefaults {
            latency_ms: 0,
            ..Default::default()
        }
    }

    fn adapter() -> SimulationAdapter {
        SimulationAdapter::new(Arc::new(InMemorySimulationAccountRepository::new()), defaults())
    }

    fn market_order(user: UserId, sl: Decimal, tp: Decimal) -> ExecutionOrder {
        ExecutionOrder {
            id: Uuid::new_v4(),
            client_order_id: Uuid::new_v4().to_string(),
            broker_order_id: None,
            broker_type: BrokerType::Simulation,
            symbol: "EURUSD".to_string(),
            order_type: OrderType::Market,
            side: Side::Long,
            qty: dec!(1.0),
            price: Some(dec!(1.1000)),
            stop_price: None,
            stop_loss: Some(sl),
            take_profit: Some(tp),
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
            user_id: user,
        }
    }

    #[tokio::test]
    async fn test_market_order_fills_with_slippage() {
        let sim = adapter();
        sim.connect().await.unwrap();
        let ack = sim
            .submit(&market_order(Uuid::new_v4(), dec!(1.0950), dec!(1.1150)))
            .await
            .unwrap();
        assert_eq!(ack.status, BrokerOrderStatus::Filled);
        // 0.5 pips of slippage on a long
        assert_eq!(ack.avg_price, Some(dec!(1.10005)));
    }

    #[tokio::test]
    async fn test_take_profit_tick_emits_close_event() {
        let sim = adapter();
        sim.connect().await.unwrap();
        let user = Uuid::new_v4();
        let mut events = sim.subscribe_events().unwrap();

        sim.submit(&market_order(user, dec!(1.0950), dec!(1.1150)))
            .await
            .unwrap();
        sim.on_price_tick("EURUSD", dec!(1.1200)).await;

        match events.try_recv().unwrap() {
            BrokerEvent::PositionClosed {
                exit_price,
                exit_reason,
                ..
            } => {
                assert_eq!(exit_price, dec!(1.1150));
                assert_eq!(exit_reason, ExitReason::TakeProfit);
            }
        }
    }

    #[tokio::test]
    async fn test_stop_loss_tick_closes_and_persists_account() {
        let accounts = Arc::new(InMemorySimulationAccountRepository::new());
        let sim = SimulationAdapter::new(accounts.clone(), defaults());
        sim.connect().await.unwrap();
        let user = Uuid::new_v4();

        sim.submit(&market_order(user, dec!(1.0950), dec!(1.1150)))
            .await
            .unwrap();
        sim.on_price_tick("EURUSD", dec!(1.0900)).await;

        let account = accounts.load(user).await.unwrap().unwrap();
        assert_eq!(account.total_trades, 1);
        assert!(account.total_pnl < Decimal::ZERO);
        assert!(account.balance < dec!(10000));
    }

    #[tokio::test]
    async fn test_limit_order_rests_then_fills_on_cross() {
        let sim = adapter();
        sim.connect().await.unwrap();
        let mut order = market_order(Uuid::new_v4(), dec!(1.0900), dec!(1.1150));
        order.order_type = OrderType::Limit;
        order.price = Some(dec!(1.0950));

        let ack = sim.submit(&order).await.unwrap();
        assert_eq!(ack.status, BrokerOrderStatus::Accepted);

        let snapshot = sim.status(&ack.broker_order_id).await.unwrap();
        assert_eq!(snapshot.status, BrokerOrderStatus::Accepted);

        sim.on_price_tick("EURUSD", dec!(1.0940)).await;
        let snapshot = sim.status(&ack.broker_order_id).await.unwrap();
        assert_eq!(snapshot.status, BrokerOrderStatus::Filled);
        assert_eq!(snapshot.avg_price, Some(dec!(1.0950)));
    }

    #[tokio::test]
    async fn test_resting_order_can_be_cancelled() {
        let sim = adapter();
        sim.connect().await.unwrap();
        let mut order = market_order(Uuid::new_v4(), dec!(1.0900), dec!(1.1150));
        order.order_type = OrderType::Limit;

        let ack = sim.submit(&order).await.unwrap();
        assert!(sim.cancel(&ack.broker_order_id).await.unwrap());
        let snapshot = sim.status(&ack.broker_order_id).await.unwrap();
        assert_eq!(snapshot.status, BrokerOrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_zero_fill_probability_always_rejects() {
        let accounts = Arc::new(InMemorySimulationAccountRepository::new());
        let sim = SimulationAdapter::new(
            accounts,
            SimulationDefaults {
                fill_probability: 0.0,
                latency_ms: 0,
                ..Default::default()
            },
        );
        sim.connect().await.unwrap();
        let err = sim
            .submit(&market_order(Uuid::new_v4(), dec!(1.0950), dec!(1.1150)))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Rejected { .. }));
    }
}
