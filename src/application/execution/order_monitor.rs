use crate::application::execution::engine::ExecutionEngine;
use crate::application::halt::Halt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

/// Floor on the poll cadence: anything faster risks hammering a broker's
/// rate limits for no informational gain.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Background ticker that reconciles every non-terminal order against the
/// broker's view. Per-order locking inside the engine makes concurrent
/// passes safe.
pub struct OrderMonitorLoop {
    engine: Arc<ExecutionEngine>,
    poll_interval: Duration,
    halt: Halt,
}

impl OrderMonitorLoop {
    pub fn new(engine: Arc<ExecutionEngine>, poll_interval: Duration, halt: Halt) -> Self {
        let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        Self {
            engine,
            poll_interval,
            halt,
        }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.poll_interval);
        let mut halt_rx = self.halt.subscribe();
        info!(
            "OrderMonitorLoop: Started (interval {:?})",
            self.poll_interval
        );

        loop {
            tokio::select! {
                changed = halt_rx.changed() => {
                    if changed.is_err() || *halt_rx.borrow() {
                        info!("OrderMonitorLoop: Halted");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if self.halt.is_halted() {
                        continue;
                    }
                    if let Err(e) = self.engine.poll_open_orders().await {
                        warn!("OrderMonitorLoop: Poll pass failed: {:#}", e);
                    }
                }
            }
        }
    }
}
