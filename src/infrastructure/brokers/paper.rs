use crate::domain::errors::BrokerError;
use crate::domain::order::ExecutionOrder;
use crate::domain::ports::{
    BrokerAdapter, BrokerOrderStatus, BrokerPosition, OrderSnapshot, SubmitAck,
};
use crate::domain::types::{BrokerType, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Instant-fill reference adapter: every market order fills at the requested
/// price plus configured slippage, no latency, no rejections. Useful for
/// dry-running strategy flow without the simulation account machinery.
pub struct PaperAdapter {
    connected: AtomicBool,
    slippage: Decimal,
    cash: RwLock<Decimal>,
    fills: RwLock<HashMap<String, OrderSnapshot>>,
    positions: RwLock<Vec<BrokerPosition>>,
}

impl PaperAdapter {
    pub fn new(initial_cash: Decimal, slippage: Decimal) -> Self {
        Self {
            connected: AtomicBool::new(false),
            slippage,
            cash: RwLock::new(initial_cash),
            fills: RwLock::new(HashMap::new()),
            positions: RwLock::new(Vec::new()),
        }
    }

    fn fill_price(&self, side: Side, requested: Decimal) -> Decimal {
        // Slippage always works against the taker.
        match side {
            Side::Long => requested + self.slippage,
            Side::Short => requested - self.slippage,
        }
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(BrokerError::NotConnected);
        }
        Ok(())
    }
}

impl Default for PaperAdapter {
    fn default() -> Self {
        Self::new(dec!(100000), dec!(0.0001))
    }
}

#[async_trait]
impl BrokerAdapter for PaperAdapter {
    fn broker_type(&self) -> BrokerType {
        BrokerType::Paper
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        // Idempotent: a second connect is a no-op.
        if !self.connected.swap(true, Ordering::AcqRel) {
            info!("PaperAdapter: Connected");
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        info!("PaperAdapter: Disconnected");
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn submit(&self, order: &ExecutionOrder) -> Result<SubmitAck, BrokerError> {
        self.ensure_connected()?;

        let requested = order.price.ok_or_else(|| BrokerError::Rejected {
            reason: "paper adapter requires a reference price".to_string(),
        })?;
        let fill = self.fill_price(order.side, requested);
        let broker_order_id = format!("paper-{}", Uuid::new_v4());

        let snapshot = OrderSnapshot {
            status: BrokerOrderStatus::Filled,
            filled_qty: order.qty,
            avg_price: Some(fill),
        };
        self.fills
            .write()
            .await
            .insert(broker_order_id.clone(), snapshot);
        self.positions.write().await.push(BrokerPosition {
            symbol: order.symbol.clone(),
            side: order.side,
            size: order.qty,
            avg_entry: fill,
        });
        *self.cash.write().await -= fill * order.qty;

        info!(
            "PaperAdapter: Filled {} {} {} @ {}",
            order.side, order.qty, order.symbol, fill
        );
        Ok(SubmitAck {
            broker_order_id,
            status: BrokerOrderStatus::Filled,
            filled_qty: order.qty,
            avg_price: Some(fill),
        })
    }

    async fn cancel(&self, broker_order_id: &str) -> Result<bool, BrokerError> {
        self.ensure_connected()?;
        // Everything fills instantly; there is never a working order left to
        // cancel.
        if self.fills.read().await.contains_key(broker_order_id) {
            Ok(false)
        } else {
            Err(BrokerError::UnknownOrder {
                id: broker_order_id.to_string(),
            })
        }
    }

    async fn modify(
        &self,
        broker_order_id: &str,
        _stop_loss: Option<Decimal>,
        _take_profit: Option<Decimal>,
    ) -> Result<bool, BrokerError> {
        self.ensure_connected()?;
        if self.fills.read().await.contains_key(broker_order_id) {
            Ok(true)
        } else {
            Err(BrokerError::UnknownOrder {
                id: broker_order_id.to_string(),
            })
        }
    }

    async fn status(&self, broker_order_id: &str) -> Result<OrderSnapshot, BrokerError> {
        self.ensure_connected()?;
        self.fills
            .read()
            .await
            .get(broker_order_id)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownOrder {
                id: broker_order_id.to_string(),
            })
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        self.ensure_connected()?;
        Ok(self.positions.read().await.clone())
    }

    async fn balance(&self) -> Result<Decimal, BrokerError> {
        self.ensure_connected()?;
        Ok(*self.cash.read().await)
    }
}
