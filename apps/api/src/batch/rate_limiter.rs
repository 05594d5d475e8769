use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Admits callers no faster than one per `interval`, across every worker that
/// shares the instance.
///
/// Waiters queue on a fair async mutex, so acquisitions are served in request
/// order. The lock is held for the whole wait; that serialisation is what makes
/// the spacing guarantee global.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_acquired: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_acquired: Mutex::new(None),
        }
    }

    /// Waits for the next slot and returns the instant it was granted.
    pub async fn acquire(&self) -> Instant {
        let mut last = self.last_acquired.lock().await;
        if let Some(previous) = *last {
            sleep_until(previous + self.interval).await;
        }
        let now = Instant::now();
        *last = Some(now);
        now
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_acquire_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(2));
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquisitions_are_spaced_across_tasks() {
        let interval = Duration::from_millis(500);
        let limiter = Arc::new(RateLimiter::new(interval));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();

        let mut granted = Vec::new();
        for handle in handles {
            granted.push(handle.await.unwrap());
        }
        granted.sort();
        for pair in granted.windows(2) {
            assert!(pair[1] - pair[0] >= interval, "{:?}", pair);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_limiter_does_not_delay() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        let before = Instant::now();
        limiter.acquire().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
