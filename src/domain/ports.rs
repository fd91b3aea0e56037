use crate::domain::errors::BrokerError;
use crate::domain::order::ExecutionOrder;
use crate::domain::signal::SignalDraft;
use crate::domain::types::{BrokerType, Candle, Side};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::mpsc::Receiver;

/// Broker-side order status as reported by `status()` polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerOrderStatus {
    Accepted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Expired,
    Rejected,
}

/// What a broker answers to a submit. A broker-side rejection is returned as
/// `BrokerError::Rejected`, not as an ack.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitAck {
    pub broker_order_id: String,
    pub status: BrokerOrderStatus,
    pub filled_qty: Decimal,
    pub avg_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSnapshot {
    pub status: BrokerOrderStatus,
    pub filled_qty: Decimal,
    pub avg_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerPosition {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub avg_entry: Decimal,
}

/// Out-of-band lifecycle notifications a broker may push (the simulation
/// adapter emits synthetic SL/TP fills from its price ticker).
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    PositionClosed {
        broker_order_id: String,
        exit_price: Decimal,
        exit_reason: crate::domain::journal::ExitReason,
        closed_at: DateTime<Utc>,
    },
}

/// The single contract every broker integration satisfies. All methods are
/// cancel-safe; `connect` is idempotent and safe to race.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    fn broker_type(&self) -> BrokerType;

    async fn connect(&self) -> Result<(), BrokerError>;
    async fn disconnect(&self);
    async fn is_connected(&self) -> bool;

    async fn submit(&self, order: &ExecutionOrder) -> Result<SubmitAck, BrokerError>;
    async fn cancel(&self, broker_order_id: &str) -> Result<bool, BrokerError>;
    async fn modify(
        &self,
        broker_order_id: &str,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<bool, BrokerError>;
    async fn status(&self, broker_order_id: &str) -> Result<OrderSnapshot, BrokerError>;

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;
    async fn balance(&self) -> Result<Decimal, BrokerError>;

    /// Brokers that push lifecycle events return a subscription; the default
    /// is a poll-only adapter.
    fn subscribe_events(&self) -> Option<broadcast::Receiver<BrokerEvent>> {
        None
    }
}

/// Market-data ingestion port. The feed implementation is a collaborator;
/// the core only consumes candle batches.
#[async_trait]
pub trait CandleFeed: Send + Sync {
    async fn subscribe(&self, symbols: Vec<String>) -> Result<Receiver<Candle>>;
    async fn latest_price(&self, symbol: &str) -> Result<Option<Decimal>>;
}

/// Strategy algorithm port. Internals are unspecified; the contract is
/// candles in, at most one proposal out.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;
    async fn analyze(&self, candles: &[Candle]) -> Result<Option<SignalDraft>>;
}
