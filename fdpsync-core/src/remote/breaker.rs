//! Circuit breaker shared by the batches of one run.
//!
//! Once one batch has exhausted its retries the service is treated as down,
//! and the remaining batches fail fast instead of repeating the same backoff
//! schedule. The breaker closes again after the cooldown, or when the next
//! run starts and calls [`CircuitBreaker::reset`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct CircuitBreaker {
    tripped_at: Mutex<Option<Instant>>,
    cooldown: Duration,
    consecutive_failures: AtomicU32,
    failure_threshold: u32,
}

impl CircuitBreaker {
    /// Trips after `failure_threshold` consecutive exhausted fetches.
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            tripped_at: Mutex::new(None),
            cooldown,
            consecutive_failures: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// A breaker that never opens.
    pub fn disabled() -> Self {
        Self::new(u32::MAX, Duration::ZERO)
    }

    pub fn is_allowed(&self) -> bool {
        let mut tripped_at = self.tripped_at.lock().unwrap_or_else(PoisonError::into_inner);
        match *tripped_at {
            None => true,
            Some(at) if at.elapsed() >= self.cooldown => {
                *tripped_at = None;
                self.consecutive_failures.store(0, Ordering::SeqCst);
                true
            }
            Some(_) => false,
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            self.trip();
        }
    }

    pub fn trip(&self) {
        *self.tripped_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// Close the breaker and forget earlier failures.
    pub fn reset(&self) {
        *self.tripped_at.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }
}

impl Default for CircuitBreaker {
    /// Open after the first exhausted batch, for the rest of a typical run.
    fn default() -> Self {
        Self::new(1, Duration::from_secs(10 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed() {
        assert!(CircuitBreaker::default().is_allowed());
    }

    #[test]
    fn trips_at_threshold() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(60));
        cb.record_failure();
        assert!(cb.is_allowed());
        cb.record_failure();
        assert!(!cb.is_allowed());
    }

    #[test]
    fn success_resets_counter() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(60));
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert!(cb.is_allowed());
    }

    #[test]
    fn closes_after_cooldown() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.trip();
        assert!(!cb.is_allowed());
        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.is_allowed());
    }

    #[test]
    fn reset_closes_and_clears_the_count() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(60));
        cb.trip();
        cb.record_failure();
        cb.reset();
        assert!(cb.is_allowed());
        cb.record_failure();
        assert!(cb.is_allowed());
    }

    #[test]
    fn disabled_never_opens() {
        let cb = CircuitBreaker::disabled();
        for _ in 0..100 {
            cb.record_failure();
        }
        assert!(cb.is_allowed());
    }
}
