use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Sliding-window request limiter keyed by client identity. Old hits fall
/// out of the window as time passes, so bursts right at the boundary do not
/// double-count.
#[derive(Clone)]
pub struct RateLimiter {
    max_hits: u32,
    window: Duration,
    hits: Arc<RwLock<HashMap<String, VecDeque<Instant>>>>,
}

impl RateLimiter {
    pub fn new(max_hits: u32, window: Duration) -> Self {
        Self {
            max_hits,
            window,
            hits: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Records one hit; false means the caller is over the limit.
    pub async fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.write().await;
        let window = hits.entry(key.to_string()).or_default();
        while let Some(front) = window.front() {
            if now.duration_since(*front) > self.window {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() as u32 >= self.max_hits {
            return false;
        }
        window.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limit_enforced_per_key() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.check("1.2.3.4").await);
        }
        assert!(!limiter.check("1.2.3.4").await);
        // Another key has its own window.
        assert!(limiter.check("5.6.7.8").await);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_millis(50));
        assert!(limiter.check("k").await);
        assert!(!limiter.check("k").await);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.check("k").await);
    }
}
