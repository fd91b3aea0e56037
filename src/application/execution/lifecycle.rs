use crate::application::halt::Halt;
use crate::application::journal::JournalService;
use crate::application::risk::{BudgetPolicy, RiskMonitor};
use crate::application::settings_service::SettingsService;
use crate::domain::events::ControlEvent;
use crate::domain::journal::ExitReason;
use crate::domain::ports::BrokerEvent;
use crate::domain::position::PositionStatus;
use crate::domain::repositories::{OrderRepository, PositionRepository};
use crate::infrastructure::event_bus::EventBus;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Consumes broker close events (SL/TP triggers, synthetic simulation fills)
/// and drives the close-side bookkeeping: position, journal, risk state,
/// strategy budget.
pub struct PositionLifecycle {
    orders: Arc<dyn OrderRepository>,
    positions: Arc<dyn PositionRepository>,
    journal: Arc<JournalService>,
    monitor: Arc<RiskMonitor>,
    settings: Arc<SettingsService>,
    events: EventBus,
}

impl PositionLifecycle {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        positions: Arc<dyn PositionRepository>,
        journal: Arc<JournalService>,
        monitor: Arc<RiskMonitor>,
        settings: Arc<SettingsService>,
        events: EventBus,
    ) -> Self {
        Self {
            orders,
            positions,
            journal,
            monitor,
            settings,
            events,
        }
    }

    /// Close-side bookkeeping for one broker event. Idempotent per position:
    /// the journal's unique uid rejects a second close.
    pub async fn handle_close(
        &self,
        broker_order_id: &str,
        exit_price: Decimal,
        exit_reason: ExitReason,
        closed_at: DateTime<Utc>,
    ) -> Result<()> {
        let order = self
            .orders
            .by_broker_order_id(broker_order_id)
            .await?
            .with_context(|| format!("no order for broker id {}", broker_order_id))?;
        let position_id = order
            .position_id
            .with_context(|| format!("order {} carries no position", order.id))?;
        let mut position = self
            .positions
            .get(position_id)
            .await?
            .with_context(|| format!("position {} not found", position_id))?;

        if position.status == PositionStatus::Closed {
            warn!(
                "PositionLifecycle: Position {} already closed, ignoring event",
                position.id
            );
            return Ok(());
        }

        position.status = PositionStatus::Closed;
        position.closed_at = Some(closed_at);
        self.positions.update(&position).await?;

        let entry = self
            .journal
            .record_close(&position, &order, exit_price, exit_reason, closed_at)
            .await?;

        self.monitor
            .record_trade_close(position.user_id, entry.pnl, closed_at)
            .await?;

        let settings = self.settings.get().await?;
        self.monitor
            .update_strategy_budget(
                position.user_id,
                &order.strategy_name,
                &position.symbol,
                entry.pnl,
                closed_at,
                BudgetPolicy {
                    auto_disable_strategies: settings.auto_disable_strategies,
                    strategy_disable_threshold: settings.strategy_disable_threshold,
                },
            )
            .await?;

        info!(
            "PositionLifecycle: {} closed ({}) pnl {}",
            position.symbol, exit_reason, entry.pnl
        );
        self.events.publish(ControlEvent::PositionClosed {
            user_id: position.user_id,
            position_id: position.id,
            pnl: entry.pnl,
            closed_at,
        });
        Ok(())
    }

    /// Worker lane: drains the broker's event stream until halt.
    pub async fn run(self: Arc<Self>, mut events_rx: broadcast::Receiver<BrokerEvent>, halt: Halt) {
        let mut halt_rx = halt.subscribe();
        info!("PositionLifecycle: Worker started");
        loop {
            tokio::select! {
                changed = halt_rx.changed() => {
                    if changed.is_err() || *halt_rx.borrow() {
                        info!("PositionLifecycle: Halted");
                        return;
                    }
                }
                event = events_rx.recv() => {
                    match event {
                        Ok(BrokerEvent::PositionClosed { broker_order_id, exit_price, exit_reason, closed_at }) => {
                            if let Err(e) = self
                                .handle_close(&broker_order_id, exit_price, exit_reason, closed_at)
                                .await
                            {
                                error!("PositionLifecycle: Close handling failed: {:#}", e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("PositionLifecycle: Lagged, missed {} events", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("PositionLifecycle: Event stream closed");
                            return;
                        }
                    }
                }
            }
        }
    }
}
