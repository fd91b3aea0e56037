//! Push-based metrics reporter.
//!
//! Periodically snapshots the pipeline's risk state and counters and emits
//! them as one structured JSON log line, prefixed `METRICS_JSON:` for log
//! shippers to scrape. No HTTP server, no incoming connections.

use crate::application::halt::Halt;
use crate::application::risk::RiskMonitor;
use crate::domain::types::UserId;
use crate::infrastructure::observability::metrics::Metrics;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{info, warn};

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub accounts: Vec<AccountSnapshot>,
}

#[derive(Serialize)]
pub struct AccountSnapshot {
    pub user_id: UserId,
    pub equity: f64,
    pub drawdown_pct: f64,
    pub daily_pnl: f64,
    pub open_positions: u32,
    pub trades_today: u32,
    pub emergency_shutdown: bool,
}

/// Outbound-only reporter: one JSON line per interval.
pub struct MetricsReporter {
    monitor: Arc<RiskMonitor>,
    metrics: Metrics,
    users: Vec<UserId>,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(
        monitor: Arc<RiskMonitor>,
        metrics: Metrics,
        users: Vec<UserId>,
        interval_seconds: u64,
    ) -> Self {
        Self {
            monitor,
            metrics,
            users,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds.max(1)),
        }
    }

    pub async fn run(self, halt: Halt) {
        let mut ticker = interval(self.interval);
        let mut halt_rx = halt.subscribe();
        info!(
            "MetricsReporter: Started push-based metrics (interval {:?})",
            self.interval
        );

        loop {
            tokio::select! {
                changed = halt_rx.changed() => {
                    if changed.is_err() || *halt_rx.borrow() {
                        info!("MetricsReporter: Halted");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    self.emit().await;
                }
            }
        }
    }

    async fn emit(&self) {
        let uptime = self.start_time.elapsed().as_secs();
        self.metrics.uptime_seconds.set(uptime as f64);

        let mut accounts = Vec::new();
        let mut any_emergency = false;
        for user in &self.users {
            match self.monitor.account_state(*user).await {
                Ok(state) => {
                    any_emergency |= state.emergency_shutdown;
                    self.metrics
                        .account_equity
                        .set(state.equity.to_f64().unwrap_or(0.0));
                    accounts.push(AccountSnapshot {
                        user_id: *user,
                        equity: state.equity.to_f64().unwrap_or(0.0),
                        drawdown_pct: state.current_drawdown_pct().to_f64().unwrap_or(0.0),
                        daily_pnl: state.daily_pnl.to_f64().unwrap_or(0.0),
                        open_positions: state.open_positions_count,
                        trades_today: state.trades_today,
                        emergency_shutdown: state.emergency_shutdown,
                    });
                }
                Err(e) => warn!("MetricsReporter: State read failed for {}: {:#}", user, e),
            }
        }
        self.metrics
            .emergency_shutdown
            .set(if any_emergency { 1.0 } else { 0.0 });

        let snapshot = MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            accounts,
        };
        match serde_json::to_string(&snapshot) {
            Ok(json) => println!("METRICS_JSON:{}", json),
            Err(e) => warn!("MetricsReporter: Serialization failed: {}", e),
        }
    }
}
