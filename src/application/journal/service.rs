use crate::domain::events::ControlEvent;
use crate::domain::journal::{ExitReason, JournalEntry, TradeSource};
use crate::domain::order::ExecutionOrder;
use crate::domain::position::Position;
use crate::domain::repositories::JournalRepository;
use crate::domain::types::{BrokerType, UserId};
use crate::infrastructure::event_bus::EventBus;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Writes one immutable entry per closed trade. The storage layer rejects
/// updates and deletes; this service only ever inserts.
pub struct JournalService {
    journal: Arc<dyn JournalRepository>,
    events: EventBus,
}

impl JournalService {
    pub fn new(journal: Arc<dyn JournalRepository>, events: EventBus) -> Self {
        Self { journal, events }
    }

    pub async fn record_close(
        &self,
        position: &Position,
        order: &ExecutionOrder,
        exit_price: Decimal,
        exit_reason: ExitReason,
        closed_at: DateTime<Utc>,
    ) -> Result<JournalEntry> {
        let pnl = position.pnl_at(exit_price);
        let entry = JournalEntry {
            id: Uuid::new_v4(),
            // One journal row per position close; duplicates bounce on the
            // unique uid.
            entry_uid: format!("jr-{}", position.id),
            strategy_name: order.strategy_name.clone(),
            symbol: position.symbol.clone(),
            user_id: position.user_id,
            source: source_for(order.broker_type),
            side: position.side,
            entry: position.avg_entry,
            exit: exit_price,
            size: position.size,
            pnl,
            duration_secs: (closed_at - position.opened_at).num_seconds(),
            exit_reason,
            opened_at: position.opened_at,
            closed_at,
            signal_id: position.signal_id,
            order_id: order.id,
        };
        self.journal.insert(&entry).await?;
        info!(
            "Journal: Recorded close of {} ({}) pnl {} [{}]",
            position.symbol, position.id, pnl, exit_reason
        );
        self.events.publish(ControlEvent::TradeJournaled {
            user_id: entry.user_id,
            exit_reason,
        });
        Ok(entry)
    }

    pub async fn entries_for_user(&self, user_id: UserId, limit: u32) -> Result<Vec<JournalEntry>> {
        self.journal.list_for_user(user_id, limit).await
    }
}

fn source_for(broker_type: BrokerType) -> TradeSource {
    match broker_type {
        BrokerType::Simulation => TradeSource::Simulation,
        BrokerType::Paper => TradeSource::Paper,
        // The mock stands in for a live venue in wiring tests.
        BrokerType::Mock => TradeSource::Paper,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderStatus;
    use crate::domain::position::PositionStatus;
    use crate::domain::types::{OrderType, Side};
    use crate::infrastructure::repositories::in_memory::InMemoryJournalRepository;
    use rust_decimal_macros::dec;

    fn fixture() -> (JournalService, Arc<InMemoryJournalRepository>, Position, ExecutionOrder) {
        let repo = Arc::new(InMemoryJournalRepository::new());
        let service = JournalService::new(repo.clone(), EventBus::new());
        let user = Uuid::new_v4();
        let position = Position {
            id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            user_id: user,
            symbol: "EURUSD".to_string(),
            side: Side::Long,
            size: dec!(1.0),
            avg_entry: dec!(1.1000),
            stop_loss: Some(dec!(1.0950)),
            take_profit: Some(dec!(1.1150)),
            opened_at: Utc::now() - chrono::Duration::minutes(30),
            closed_at: None,
            status: PositionStatus::Open,
        };
        let order = ExecutionOrder {
            id: Uuid::new_v4(),
            client_order_id: Uuid::new_v4().to_string(),
            broker_order_id: Some("sim-1".to_string()),
            broker_type: BrokerType::Simulation,
            symbol: "EURUSD".to_string(),
            order_type: OrderType::Market,
            side: Side::Long,
            qty: dec!(1.0),
            price: Some(dec!(1.1000)),
            stop_price: None,
            stop_loss: Some(dec!(1.0950)),
            take_profit: Some(dec!(1.1150)),
            status: OrderStatus::Filled,
            filled_qty: dec!(1.0),
            avg_fill_price: Some(dec!(1.1000)),
            submitted_at: Some(Utc::now()),
            filled_at: Some(Utc::now()),
            signal_id: position.signal_id,
            position_id: Some(position.id),
            strategy_name: "nbb".to_string(),
            error_msg: None,
            retry_count: 0,
            user_id: user,
        };
        (service, repo, position, order)
    }

    #[tokio::test]
    async fn test_record_close_computes_pnl_and_duration() {
        let (service, repo, position, order) = fixture();
        let entry = service
            .record_close(&position, &order, dec!(1.1150), ExitReason::TakeProfit, Utc::now())
            .await
            .unwrap();
        assert_eq!(entry.pnl, dec!(0.0150));
        assert!(entry.duration_secs >= 1790);
        assert_eq!(entry.source, TradeSource::Simulation);
        assert_eq!(repo.count().await, 1);
    }

    #[tokio::test]
    async fn test_double_close_is_rejected() {
        let (service, repo, position, order) = fixture();
        service
            .record_close(&position, &order, dec!(1.1150), ExitReason::TakeProfit, Utc::now())
            .await
            .unwrap();
        let err = service
            .record_close(&position, &order, dec!(1.1150), ExitReason::TakeProfit, Utc::now())
            .await;
        assert!(err.is_err());
        assert_eq!(repo.count().await, 1);
    }
}
