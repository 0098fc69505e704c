//! Per-guest attempt limiter for bill-number lookups.
//!
//! State lives in process memory; a restart simply forgets past attempts.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AttemptLimiter {
    attempts: Arc<RwLock<HashMap<i64, Vec<Instant>>>>,
    max_attempts: usize,
    window: Duration,
}

impl AttemptLimiter {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: Arc::new(RwLock::new(HashMap::new())),
            max_attempts,
            window,
        }
    }

    /// Records an attempt for `user_id`; false once the window is full.
    pub async fn try_acquire(&self, user_id: i64) -> bool {
        let now = Instant::now();
        let mut attempts = self.attempts.write().await;
        let history = attempts.entry(user_id).or_default();
        history.retain(|&at| now.duration_since(at) < self.window);

        if history.len() < self.max_attempts {
            history.push(now);
            true
        } else {
            false
        }
    }

    /// Drops guests whose attempts all fell out of the window.
    pub async fn prune(&self) -> usize {
        let now = Instant::now();
        let mut attempts = self.attempts.write().await;
        attempts.retain(|_, history| {
            history.retain(|&at| now.duration_since(at) < self.window);
            !history.is_empty()
        });
        attempts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limits_per_guest() {
        let limiter = AttemptLimiter::new(2, Duration::from_secs(60));

        assert!(limiter.try_acquire(1).await);
        assert!(limiter.try_acquire(1).await);
        assert!(!limiter.try_acquire(1).await);

        assert!(limiter.try_acquire(2).await);
    }

    #[tokio::test]
    async fn test_prune_forgets_old_attempts() {
        let limiter = AttemptLimiter::new(1, Duration::from_millis(50));
        assert!(limiter.try_acquire(1).await);
        assert!(!limiter.try_acquire(1).await);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(limiter.prune().await, 0);
        assert!(limiter.try_acquire(1).await);
    }
}
