//! Sliding-window call limiter

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Time source for the limiter
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Tokio-backed clock, follows paused time in tests
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Rate limit configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Max create calls per window
    #[serde(rename = "max-calls")]
    pub max_calls: u32,

    /// Window length in milliseconds
    #[serde(rename = "window-ms")]
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 10,
            window_ms: 1000,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Admits at most `max_calls` acquisitions in any rolling window
///
/// A call at time `t` occupies a slot until `t + window`.
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
    calls: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    pub fn with_clock(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        debug!(?config, "RateLimiter::with_clock: called");
        Self {
            max_calls: config.max_calls.max(1) as usize,
            window: config.window(),
            clock,
            calls: VecDeque::new(),
        }
    }

    /// Take a slot now, or report how long until one frees
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        let now = self.clock.now();
        while let Some(&oldest) = self.calls.front() {
            if now.duration_since(oldest) >= self.window {
                self.calls.pop_front();
            } else {
                break;
            }
        }

        match self.calls.front() {
            Some(&oldest) if self.calls.len() >= self.max_calls => {
                Err(self.window.saturating_sub(now.duration_since(oldest)))
            }
            _ => {
                self.calls.push_back(now);
                Ok(())
            }
        }
    }

    /// Wait until a slot is free, then take it
    pub async fn acquire(&mut self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(retry_after) => {
                    debug!(?retry_after, in_flight = self.in_flight(), "RateLimiter::acquire: budget spent, waiting");
                    self.clock.sleep(retry_after).await;
                }
            }
        }
    }

    /// Slots in use within the current window
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Clock that only moves when slept on or advanced by hand
    pub struct ManualClock {
        base: Instant,
        offset: Mutex<Duration>,
        sleeps: Mutex<Vec<Duration>>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
                sleeps: Mutex::new(Vec::new()),
            }
        }

        pub fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }

        pub fn elapsed(&self) -> Duration {
            *self.offset.lock().unwrap()
        }

        pub fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
            self.advance(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::ManualClock;
    use super::*;

    fn limiter(clock: &Arc<ManualClock>) -> RateLimiter {
        RateLimiter::with_clock(&RateLimitConfig::default(), clock.clone())
    }

    #[tokio::test]
    async fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(250)).await;
        assert_eq!(clock.now() - start, Duration::from_millis(250));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(250)]);
    }

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_calls, 10);
        assert_eq!(config.window(), Duration::from_secs(1));
    }

    #[test]
    fn test_try_acquire_reports_retry_after() {
        let clock = Arc::new(ManualClock::new());
        let mut limiter = limiter(&clock);

        for _ in 0..10 {
            assert!(limiter.try_acquire().is_ok());
        }
        clock.advance(Duration::from_millis(300));
        assert_eq!(limiter.try_acquire(), Err(Duration::from_millis(700)));

        clock.advance(Duration::from_millis(700));
        assert!(limiter.try_acquire().is_ok());
        assert_eq!(limiter.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_slot() {
        let clock = Arc::new(ManualClock::new());
        let mut limiter = limiter(&clock);

        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert!(clock.sleeps().is_empty());

        limiter.acquire().await;
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_never_more_than_budget_in_any_window() {
        let clock = Arc::new(ManualClock::new());
        let mut limiter = limiter(&clock);
        let start = clock.now();

        let mut stamps = Vec::new();
        for i in 0..35 {
            if i % 7 == 0 {
                clock.advance(Duration::from_millis(130));
            }
            limiter.acquire().await;
            stamps.push(clock.now() - start);
        }

        for (i, &t) in stamps.iter().enumerate() {
            let in_window = stamps[i..].iter().filter(|&&s| s < t + Duration::from_secs(1)).count();
            assert!(in_window <= 10, "{} calls within 1s of {:?}", in_window, t);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let mut limiter = RateLimiter::new(&RateLimitConfig {
            max_calls: 2,
            window_ms: 500,
        });
        let start = tokio::time::Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }
}
