use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::warn;

/// Process-wide halt broadcast. The flag is a lock-free store-release /
/// load-acquire pair; the watch channel wakes sleeping workers so in-flight
/// cycles stop without polling.
#[derive(Clone)]
pub struct Halt {
    flag: Arc<AtomicBool>,
    tx: watch::Sender<bool>,
}

impl Halt {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            tx,
        }
    }

    pub fn halt(&self) {
        warn!("Halt: Global halt raised");
        self.flag.store(true, Ordering::Release);
        let _ = self.tx.send(true);
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
        let _ = self.tx.send(false);
    }

    pub fn is_halted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Halt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_halt_wakes_subscribers() {
        let halt = Halt::new();
        let mut rx = halt.subscribe();
        assert!(!halt.is_halted());

        halt.halt();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(halt.is_halted());

        halt.clear();
        assert!(!halt.is_halted());
    }
}
