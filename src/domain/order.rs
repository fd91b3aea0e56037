use crate::domain::types::{BrokerType, OrderType, Side, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Expired
                | OrderStatus::Failed
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Submitted => "submitted",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
            OrderStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Everything that can advance an order through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEvent {
    SubmitAccepted,
    SubmitFilled,
    BrokerRejected,
    TransientFailure,
    RetriesExhausted,
    PartialFill,
    Fill,
    CancelConfirmed,
    Expiry,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid transition: {from} + {event:?}")]
pub struct InvalidTransition {
    pub from: OrderStatus,
    pub event: OrderEvent,
}

/// The lifecycle table. `TransientFailure` keeps the order in `pending` (the
/// retry counter lives on the order row, not in the machine); everything else
/// either advances or is illegal.
pub fn transition(from: OrderStatus, event: OrderEvent) -> Result<OrderStatus, InvalidTransition> {
    use OrderEvent::*;
    use OrderStatus::*;

    let to = match (from, event) {
        (Pending, SubmitAccepted) => Submitted,
        (Pending, SubmitFilled) => Filled,
        (Pending, BrokerRejected) => Rejected,
        (Pending, TransientFailure) => Pending,
        (Pending, RetriesExhausted) => Failed,
        (Pending, CancelConfirmed) => Cancelled,
        (Submitted, PartialFill) => PartiallyFilled,
        (Submitted, Fill) | (PartiallyFilled, Fill) => Filled,
        (Submitted, CancelConfirmed) | (PartiallyFilled, CancelConfirmed) => Cancelled,
        (Submitted, Expiry) | (PartiallyFilled, Expiry) => Expired,
        (PartiallyFilled, PartialFill) => PartiallyFilled,
        _ => return Err(InvalidTransition { from, event }),
    };
    Ok(to)
}

/// A single submission attempt against a broker. `client_order_id` is the
/// idempotency key; the persistence layer enforces its uniqueness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOrder {
    pub id: Uuid,
    pub client_order_id: String,
    pub broker_order_id: Option<String>,
    pub broker_type: BrokerType,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: Side,
    pub qty: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub signal_id: Uuid,
    pub position_id: Option<Uuid>,
    pub strategy_name: String,
    pub error_msg: Option<String>,
    pub retry_count: u32,
    pub user_id: UserId,
}

/// Deterministic idempotency key. Two calls with the same inputs hash to the
/// same key, so an arbitrary retry maps onto the existing order row.
pub fn client_order_id(
    strategy_name: &str,
    symbol: &str,
    signal_id: Uuid,
    user_id: UserId,
    nonce: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(strategy_name.as_bytes());
    hasher.update(b"|");
    hasher.update(symbol.as_bytes());
    hasher.update(b"|");
    hasher.update(signal_id.as_bytes());
    hasher.update(b"|");
    hasher.update(user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(nonce.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Append-only lifecycle trace. One row per state change (and one per
/// rejected illegal transition attempt).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub old_status: Option<OrderStatus>,
    pub new_status: Option<OrderStatus>,
    pub event_time: DateTime<Utc>,
}

impl ExecutionLogEntry {
    pub fn for_transition(
        order_id: Uuid,
        event: OrderEvent,
        old_status: OrderStatus,
        new_status: OrderStatus,
        event_data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            event_type: format!("{:?}", event),
            event_data,
            old_status: Some(old_status),
            new_status: Some(new_status),
            event_time: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_fill() {
        let s = transition(OrderStatus::Pending, OrderEvent::SubmitAccepted).unwrap();
        assert_eq!(s, OrderStatus::Submitted);
        let s = transition(s, OrderEvent::PartialFill).unwrap();
        assert_eq!(s, OrderStatus::PartiallyFilled);
        let s = transition(s, OrderEvent::Fill).unwrap();
        assert_eq!(s, OrderStatus::Filled);
        assert!(s.is_terminal());
    }

    #[test]
    fn test_instant_fill_from_pending() {
        assert_eq!(
            transition(OrderStatus::Pending, OrderEvent::SubmitFilled).unwrap(),
            OrderStatus::Filled
        );
    }

    #[test]
    fn test_transient_failure_stays_pending() {
        assert_eq!(
            transition(OrderStatus::Pending, OrderEvent::TransientFailure).unwrap(),
            OrderStatus::Pending
        );
    }

    #[test]
    fn test_no_transition_from_terminal() {
        for terminal in [
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
            OrderStatus::Failed,
        ] {
            for event in [
                OrderEvent::SubmitAccepted,
                OrderEvent::Fill,
                OrderEvent::CancelConfirmed,
                OrderEvent::Expiry,
            ] {
                assert!(
                    transition(terminal, event).is_err(),
                    "{terminal} + {event:?} must be illegal"
                );
            }
        }
    }

    #[test]
    fn test_client_order_id_is_deterministic() {
        let signal = Uuid::new_v4();
        let user = Uuid::new_v4();
        let a = client_order_id("nbb", "EURUSD", signal, user, "0");
        let b = client_order_id("nbb", "EURUSD", signal, user, "0");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_client_order_id_varies_with_nonce() {
        let signal = Uuid::new_v4();
        let user = Uuid::new_v4();
        assert_ne!(
            client_order_id("nbb", "EURUSD", signal, user, "0"),
            client_order_id("nbb", "EURUSD", signal, user, "1")
        );
    }
}
