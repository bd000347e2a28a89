use crate::error::ReadinessError;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One generation call per window, account wide.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(5);

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Where the last accepted request time lives.
///
/// `claim_if` reads the stored time, hands it to `admit`, and records
/// `now_millis` only when `admit` returns true. Read and write happen in one
/// critical section. Returns the time that was stored before the call.
pub trait WindowStore: Send + Sync {
    fn claim_if(&self, now_millis: i64, admit: &dyn Fn(Option<i64>) -> bool) -> Result<Option<i64>, ReadinessError>;
}

/// Process-local store, for tests and embedders with a single long-lived process.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    last_request_millis: Mutex<Option<i64>>,
}

impl WindowStore for MemoryWindowStore {
    fn claim_if(&self, now_millis: i64, admit: &dyn Fn(Option<i64>) -> bool) -> Result<Option<i64>, ReadinessError> {
        let mut last = self
            .last_request_millis
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = *last;
        if admit(previous) {
            *last = Some(now_millis);
        }
        Ok(previous)
    }
}

/// Milliseconds left in the window opened at `last`. A stamp from the future
/// (clock stepped back) does not hold the gate shut.
fn remaining_millis(last: Option<i64>, now_millis: i64, window_millis: i64) -> Option<i64> {
    let elapsed = now_millis - last?;
    (0..window_millis).contains(&elapsed).then(|| window_millis - elapsed)
}

/// Reject-not-queue gate: a call inside the window fails immediately.
pub struct RateLimiter {
    window: Duration,
    clock: Arc<dyn Clock>,
    store: Arc<dyn WindowStore>,
}

impl RateLimiter {
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::with_store(window, clock, Arc::new(MemoryWindowStore::default()))
    }

    pub fn with_store(window: Duration, clock: Arc<dyn Clock>, store: Arc<dyn WindowStore>) -> Self {
        Self { window, clock, store }
    }

    /// Claims the window or reports how many seconds remain in it.
    pub fn try_acquire(&self) -> Result<(), ReadinessError> {
        let now = self.clock.now_millis();
        let window_ms = self.window.as_millis() as i64;

        let previous = self
            .store
            .claim_if(now, &|last| remaining_millis(last, now, window_ms).is_none())?;

        match remaining_millis(previous, now, window_ms) {
            Some(remaining) => {
                let retry_after_secs = ((remaining + 999) / 1000) as u64;
                log::warn!("generation call rejected, window reopens in {retry_after_secs}s");
                Err(ReadinessError::RateLimitExceeded { retry_after_secs })
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let limiter = RateLimiter::new(RATE_LIMIT_WINDOW, clock.clone());
        (clock, limiter)
    }

    #[test]
    fn first_call_proceeds() {
        let (_clock, limiter) = limiter();
        assert!(limiter.try_acquire().is_ok());
    }

    #[test]
    fn second_call_inside_window_is_rejected_with_ceiling_wait() {
        let (clock, limiter) = limiter();
        limiter.try_acquire().expect("first call");

        clock.advance(Duration::from_millis(1_200));
        match limiter.try_acquire() {
            Err(ReadinessError::RateLimitExceeded { retry_after_secs }) => assert_eq!(retry_after_secs, 4),
            other => panic!("expected rate limit, got {other:?}"),
        }

        clock.advance(Duration::from_millis(3_799));
        match limiter.try_acquire() {
            Err(ReadinessError::RateLimitExceeded { retry_after_secs }) => assert_eq!(retry_after_secs, 1),
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[test]
    fn rejected_calls_do_not_extend_the_window() {
        let (clock, limiter) = limiter();
        limiter.try_acquire().expect("first call");
        clock.advance(Duration::from_secs(3));
        assert!(limiter.try_acquire().is_err());
        clock.advance(Duration::from_secs(2));
        assert!(limiter.try_acquire().is_ok());
    }

    #[test]
    fn immediate_retry_reports_full_window() {
        let (_clock, limiter) = limiter();
        limiter.try_acquire().expect("first call");
        let err = limiter.try_acquire().expect_err("same instant");
        assert_eq!(err.retry_after_secs(), Some(5));
    }

    #[test]
    fn limiters_sharing_a_store_share_the_window() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store: Arc<dyn WindowStore> = Arc::new(MemoryWindowStore::default());
        let first = RateLimiter::with_store(RATE_LIMIT_WINDOW, clock.clone(), store.clone());
        let second = RateLimiter::with_store(RATE_LIMIT_WINDOW, clock.clone(), store);

        first.try_acquire().expect("first limiter");
        assert!(second.try_acquire().is_err());
    }

    #[test]
    fn future_stamp_does_not_lock_the_gate() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryWindowStore::default());
        store.claim_if(60_000, &|_| true).expect("seed");

        let limiter = RateLimiter::with_store(RATE_LIMIT_WINDOW, clock, store);
        assert!(limiter.try_acquire().is_ok());
    }
}
