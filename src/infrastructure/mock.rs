//! In-process market-data and broker stand-ins: a scriptable broker for
//! tests, plus the random-walk candle feed that drives simulation-mode runs
//! when no real ingestion client is wired.

use crate::domain::errors::BrokerError;
use crate::domain::order::ExecutionOrder;
use crate::domain::ports::{
    BrokerAdapter, BrokerOrderStatus, BrokerPosition, CandleFeed, OrderSnapshot, SubmitAck,
};
use crate::domain::types::{BrokerType, Candle};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, Receiver};
use tracing::info;
use uuid::Uuid;

/// Scripted submit outcomes, consumed in order. An empty script means
/// "accept and fill instantly at the requested price".
pub enum ScriptedSubmit {
    FillNow,
    AcceptResting,
    Reject(String),
    Transport(String),
    Timeout(u64),
}

/// Broker test double. Scripts drive submit results; every call is counted so
/// tests can assert how often the wire was actually touched.
pub struct MockBroker {
    connected: AtomicBool,
    pub submit_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    script: RwLock<VecDeque<ScriptedSubmit>>,
    statuses: RwLock<HashMap<String, OrderSnapshot>>,
    balance: Decimal,
}

impl MockBroker {
    pub fn new(balance: Decimal) -> Self {
        Self {
            connected: AtomicBool::new(false),
            submit_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
            script: RwLock::new(VecDeque::new()),
            statuses: RwLock::new(HashMap::new()),
            balance,
        }
    }

    pub async fn push_script(&self, outcome: ScriptedSubmit) {
        self.script.write().await.push_back(outcome);
    }

    /// Overwrite the status a later `status()` poll reports for an order.
    pub async fn set_status(&self, broker_order_id: &str, snapshot: OrderSnapshot) {
        self.statuses
            .write()
            .await
            .insert(broker_order_id.to_string(), snapshot);
    }

    pub fn submissions(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerAdapter for MockBroker {
    fn broker_type(&self) -> BrokerType {
        BrokerType::Mock
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn submit(&self, order: &ExecutionOrder) -> Result<SubmitAck, BrokerError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(BrokerError::NotConnected);
        }
        self.submit_calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self.script.write().await.pop_front();
        let broker_order_id = format!("mock-{}", Uuid::new_v4());
        match scripted.unwrap_or(ScriptedSubmit::FillNow) {
            ScriptedSubmit::FillNow => {
                let snapshot = OrderSnapshot {
                    status: BrokerOrderStatus::Filled,
                    filled_qty: order.qty,
                    avg_price: order.price,
                };
                self.statuses
                    .write()
                    .await
                    .insert(broker_order_id.clone(), snapshot);
                Ok(SubmitAck {
                    broker_order_id,
                    status: BrokerOrderStatus::Filled,
                    filled_qty: order.qty,
                    avg_price: order.price,
                })
            }
            ScriptedSubmit::AcceptResting => {
                let snapshot = OrderSnapshot {
                    status: BrokerOrderStatus::Accepted,
                    filled_qty: Decimal::ZERO,
                    avg_price: None,
                };
                self.statuses
                    .write()
                    .await
                    .insert(broker_order_id.clone(), snapshot);
                Ok(SubmitAck {
                    broker_order_id,
                    status: BrokerOrderStatus::Accepted,
                    filled_qty: Decimal::ZERO,
                    avg_price: None,
                })
            }
            ScriptedSubmit::Reject(reason) => Err(BrokerError::Rejected { reason }),
            ScriptedSubmit::Transport(reason) => Err(BrokerError::Transport { reason }),
            ScriptedSubmit::Timeout(seconds) => Err(BrokerError::Timeout { seconds }),
        }
    }

    async fn cancel(&self, broker_order_id: &str) -> Result<bool, BrokerError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.write().await;
        match statuses.get_mut(broker_order_id) {
            Some(snapshot) if snapshot.status == BrokerOrderStatus::Accepted => {
                snapshot.status = BrokerOrderStatus::Cancelled;
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
        _stop_loss: Option<Decimal>,
        _take_profit: Option<Decimal>,
    ) -> Result<bool, BrokerError> {
        Ok(self.statuses.read().await.contains_key(broker_order_id))
    }

    async fn status(&self, broker_order_id: &str) -> Result<OrderSnapshot, BrokerError> {
        self.statuses
            .read()
            .await
            .get(broker_order_id)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownOrder {
                id: broker_order_id.to_string(),
            })
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(Vec::new())
    }

    async fn balance(&self) -> Result<Decimal, BrokerError> {
        Ok(self.balance)
    }
}

/// Random-walk candle generator. Each tick drifts every symbol's price a
/// fraction of a percent and emits one candle per symbol. Prices are shared
/// across subscribers, so `latest_price` and the emitted series agree.
pub struct SimulatedCandleFeed {
    tick_interval: Duration,
    start_price: Decimal,
    prices: Arc<RwLock<HashMap<String, Decimal>>>,
}

impl SimulatedCandleFeed {
    pub fn new(tick_interval: Duration, start_price: Decimal) -> Self {
        Self {
            tick_interval,
            start_price,
            prices: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// One step of the walk: +/- 0.1% max, floored well above zero.
    fn next_close(price: Decimal) -> Decimal {
        let step = (rand::random::<f64>() - 0.5) * 0.002;
        let factor = Decimal::from_f64(1.0 + step).unwrap_or(Decimal::ONE);
        (price * factor).max(dec!(0.0001))
    }
}

#[async_trait]
impl CandleFeed for SimulatedCandleFeed {
    async fn subscribe(&self, symbols: Vec<String>) -> Result<Receiver<Candle>> {
        let (tx, rx) = mpsc::channel(64);
        let tick_interval = self.tick_interval;
        let start_price = self.start_price;
        let prices = self.prices.clone();

        info!(
            "SimulatedCandleFeed: Generating {:?} every {:?}",
            symbols, tick_interval
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            loop {
                ticker.tick().await;
                for symbol in &symbols {
                    let close = {
                        let mut prices = prices.write().await;
                        let price = prices.entry(symbol.clone()).or_insert(start_price);
                        *price = Self::next_close(*price);
                        *price
                    };
                    // Wick half a step either side of the close.
                    let wick = close * dec!(0.0005);
                    let candle = Candle {
                        symbol: symbol.clone(),
                        open: close,
                        high: close + wick,
                        low: close - wick,
                        close,
                        volume: dec!(1000),
                        timestamp: Utc::now(),
                    };
                    if tx.send(candle).await.is_err() {
                        // Subscriber gone; stop generating.
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn latest_price(&self, symbol: &str) -> Result<Option<Decimal>> {
        Ok(self.prices.read().await.get(symbol).copied())
    }
}
