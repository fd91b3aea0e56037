//! Prometheus metrics definitions.
//!
//! All metrics use the `tradewarden_` prefix. Counters are driven by the
//! control-event stream (see [`MetricsListener`]); gauges are refreshed by
//! the push reporter's snapshot pass.

use crate::application::halt::Halt;
use crate::domain::events::ControlEvent;
use prometheus::{
    CounterVec, Gauge, Opts, Registry,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Clone)]
pub struct Metrics {
    #[allow(dead_code)]
    registry: Arc<Registry>,
    /// Risk decisions by kind (approval, rejection, shutdown, ...)
    pub risk_decisions_total: CounterVec,
    /// Orders by terminal status
    pub orders_total: CounterVec,
    /// Closed trades journaled
    pub journal_entries_total: CounterVec,
    /// Latched emergency shutdowns (1 = at least one user latched)
    pub emergency_shutdown: GenericGauge<AtomicF64>,
    /// Last observed account equity
    pub account_equity: GenericGauge<AtomicF64>,
    /// Uptime in seconds
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let risk_decisions_total = CounterVec::new(
            Opts::new(
                "tradewarden_risk_decisions_total",
                "Risk decisions by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(risk_decisions_total.clone()))?;

        let orders_total = CounterVec::new(
            Opts::new("tradewarden_orders_total", "Orders by terminal status"),
            &["status"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let journal_entries_total = CounterVec::new(
            Opts::new(
                "tradewarden_journal_entries_total",
                "Journaled closed trades by exit reason",
            ),
            &["exit_reason"],
        )?;
        registry.register(Box::new(journal_entries_total.clone()))?;

        let emergency_shutdown = Gauge::with_opts(Opts::new(
            "tradewarden_emergency_shutdown",
            "1 when any account has the emergency latch set",
        ))?;
        registry.register(Box::new(emergency_shutdown.clone()))?;

        let account_equity = Gauge::with_opts(Opts::new(
            "tradewarden_account_equity",
            "Last observed account equity",
        ))?;
        registry.register(Box::new(account_equity.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "tradewarden_uptime_seconds",
            "Process uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            risk_decisions_total,
            orders_total,
            journal_entries_total,
            emergency_shutdown,
            account_equity,
            uptime_seconds,
        })
    }
}

/// Drives the counters off the control-event stream. One lane, no locks:
/// the validator, engine and journal never touch Prometheus directly.
pub struct MetricsListener {
    metrics: Metrics,
}

impl MetricsListener {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }

    fn handle(&self, event: &ControlEvent) {
        match event {
            ControlEvent::RiskDecisionRecorded { kind, .. } => {
                self.metrics
                    .risk_decisions_total
                    .with_label_values(&[kind.as_str()])
                    .inc();
            }
            ControlEvent::OrderTerminal { status, .. } => {
                self.metrics
                    .orders_total
                    .with_label_values(&[&status.to_string()])
                    .inc();
            }
            ControlEvent::TradeJournaled { exit_reason, .. } => {
                self.metrics
                    .journal_entries_total
                    .with_label_values(&[&exit_reason.to_string()])
                    .inc();
            }
            ControlEvent::EmergencyShutdown { .. } => {
                self.metrics.emergency_shutdown.set(1.0);
            }
            _ => {}
        }
    }

    pub async fn run(self, mut events: broadcast::Receiver<ControlEvent>, halt: Halt) {
        let mut halt_rx = halt.subscribe();
        info!("MetricsListener: Started");
        loop {
            tokio::select! {
                changed = halt_rx.changed() => {
                    if changed.is_err() || *halt_rx.borrow() {
                        info!("MetricsListener: Halted");
                        return;
                    }
                }
                event = events.recv() => {
                    match event {
                        Ok(event) => self.handle(&event),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("MetricsListener: Lagged, missed {} events", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("MetricsListener: Event stream closed");
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::journal::ExitReason;
    use crate::domain::order::OrderStatus;
    use crate::domain::risk::DecisionKind;
    use uuid::Uuid;

    #[test]
    fn test_metrics_register_cleanly() {
        let metrics = Metrics::new().unwrap();
        metrics.uptime_seconds.set(1.0);
        assert_eq!(metrics.uptime_seconds.get(), 1.0);
    }

    #[test]
    fn test_listener_counts_decisions_orders_and_journal() {
        let metrics = Metrics::new().unwrap();
        let listener = MetricsListener::new(metrics.clone());
        let user = Uuid::new_v4();

        listener.handle(&ControlEvent::RiskDecisionRecorded {
            user_id: user,
            kind: DecisionKind::Approval,
        });
        listener.handle(&ControlEvent::RiskDecisionRecorded {
            user_id: user,
            kind: DecisionKind::Rejection,
        });
        listener.handle(&ControlEvent::OrderTerminal {
            user_id: user,
            order_id: Uuid::new_v4(),
            status: OrderStatus::Filled,
        });
        listener.handle(&ControlEvent::TradeJournaled {
            user_id: user,
            exit_reason: ExitReason::TakeProfit,
        });

        assert_eq!(
            metrics
                .risk_decisions_total
                .with_label_values(&["approval"])
                .get(),
            1.0
        );
        assert_eq!(
            metrics
                .risk_decisions_total
                .with_label_values(&["rejection"])
                .get(),
            1.0
        );
        assert_eq!(
            metrics.orders_total.with_label_values(&["filled"]).get(),
            1.0
        );
        assert_eq!(
            metrics
                .journal_entries_total
                .with_label_values(&["take_profit"])
                .get(),
            1.0
        );
    }
}
