use crate::domain::events::ControlEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// Events buffered per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 256;

/// Deterministic in-process fan-out of control events over a bounded
/// broadcast channel, the same primitive the broker event stream uses.
/// Publishing never blocks: with no live subscribers the event is dropped,
/// and a subscriber that falls behind observes `Lagged` instead of stalling
/// the publisher.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ControlEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget dispatch. Delivery is best-effort by design: control
    /// events are advisory signals, the source of truth stays in the store.
    pub fn publish(&self, event: ControlEvent) {
        let kind = event.kind();
        match self.tx.send(event) {
            Ok(delivered) => {
                debug!("EventBus: {} delivered to {} subscriber(s)", kind, delivered);
            }
            Err(_) => {
                debug!("EventBus: {} dropped (no subscribers)", kind);
            }
        }
    }

    /// Get count of live subscribers (for testing)
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::TradingMode;

    fn mode_event() -> ControlEvent {
        ControlEvent::ModeChanged {
            user_id: None,
            old_mode: TradingMode::Guide,
            new_mode: TradingMode::Autonomous,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(mode_event());

        assert_eq!(rx1.try_recv().unwrap(), mode_event());
        assert_eq!(rx2.try_recv().unwrap(), mode_event());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        // Must not panic or block.
        bus.publish(mode_event());
    }

    #[tokio::test]
    async fn test_clone_shares_channel() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();
        let mut rx = bus2.subscribe();

        bus1.publish(mode_event());
        assert_eq!(rx.try_recv().unwrap(), mode_event());
        assert_eq!(bus1.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::with_capacity(4);
        let mut rx = bus.subscribe();
        for _ in 0..10 {
            bus.publish(mode_event());
        }
        // The backlog overflowed the buffer; the subscriber learns it lagged.
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }
}
