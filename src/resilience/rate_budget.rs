use crate::{Error, ErrorContext, Result};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Length of the window a budget's capacity is expressed over.
pub const BUDGET_WINDOW: Duration = Duration::from_secs(60);

/// Floor for a single wait, so a tiny shortfall never turns into a busy loop.
pub const DEFAULT_MIN_WAIT: Duration = Duration::from_millis(50);

/// Returned when a waiter gives up because the batch was cancelled.
///
/// No budget is spent by an acquire that ends this way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error("rate budget wait cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RateBudgetSnapshot {
    /// Units granted per 60-second window (also the burst size).
    pub capacity: u64,
    pub available: f64,
    pub refill_per_ms: f64,
    /// Estimated wait until one unit is available (ms), if currently short.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug)]
struct State {
    available: f64,
    last_refill: Instant,
}

/// Token bucket that caps cumulative spend per minute.
///
/// - Starts full, refills continuously at `capacity / 60_000` units per ms
/// - `acquire` suspends the caller until the requested amount fits, then deducts it
/// - Waiters wake on their computed deadline or when another caller observes a refill
pub struct RateBudget {
    capacity: f64,
    refill_per_ms: f64,
    min_wait: Duration,
    state: Mutex<State>,
    refilled: Notify,
}

impl RateBudget {
    /// Budget of `capacity` units per minute.
    pub fn per_minute(capacity: u32) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::configuration_with_context(
                "rate budget capacity must be positive",
                ErrorContext::new()
                    .with_field_path("tokens_per_minute")
                    .with_source("rate_budget"),
            ));
        }
        let capacity = capacity as f64;
        Ok(Self {
            capacity,
            refill_per_ms: capacity / BUDGET_WINDOW.as_millis() as f64,
            min_wait: DEFAULT_MIN_WAIT,
            state: Mutex::new(State {
                available: capacity,
                last_refill: Instant::now(),
            }),
            refilled: Notify::new(),
        })
    }

    /// Override the minimum sleep between re-checks.
    pub fn with_min_wait(mut self, min_wait: Duration) -> Self {
        self.min_wait = min_wait.max(Duration::from_millis(1));
        self
    }

    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }

    fn refill_locked(&self, st: &mut State) {
        let now = Instant::now();
        let elapsed_ms = now.saturating_duration_since(st.last_refill).as_millis() as u64;
        if elapsed_ms == 0 {
            return;
        }
        // Advance by whole milliseconds so the fractional remainder carries over.
        st.last_refill += Duration::from_millis(elapsed_ms);
        let before = st.available;
        st.available = (st.available + elapsed_ms as f64 * self.refill_per_ms).min(self.capacity);
        if st.available > before {
            self.refilled.notify_waiters();
        }
    }

    fn requested_units(&self, amount: u64) -> f64 {
        let requested = amount as f64;
        if requested > self.capacity {
            tracing::warn!(
                amount,
                capacity = self.capacity as u64,
                "requested spend exceeds rate budget capacity, clamping to one full window"
            );
            self.capacity
        } else {
            requested
        }
    }

    /// Wait until `amount` units are available, then spend them.
    ///
    /// `amount == 0` returns immediately. Cancellation while waiting leaves the
    /// budget untouched.
    pub async fn acquire(
        &self,
        amount: u64,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), AcquireError> {
        if amount == 0 {
            return Ok(());
        }
        let requested = self.requested_units(amount);

        loop {
            if cancel.is_cancelled() {
                return Err(AcquireError::Cancelled);
            }

            let (wait, refilled) = {
                let mut st = self.state.lock().await;
                self.refill_locked(&mut st);

                if st.available >= requested {
                    st.available -= requested;
                    return Ok(());
                }

                let shortfall = requested - st.available;
                let wait_ms = (shortfall / self.refill_per_ms).ceil() as u64;
                // Register for refill wakeups before releasing the lock.
                (
                    Duration::from_millis(wait_ms).max(self.min_wait),
                    self.refilled.notified(),
                )
            };

            tracing::trace!(amount, wait_ms = wait.as_millis() as u64, "waiting for rate budget");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                _ = refilled => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Spend `amount` units if they are available right now.
    pub async fn try_acquire(&self, amount: u64) -> bool {
        if amount == 0 {
            return true;
        }
        let requested = self.requested_units(amount);
        let mut st = self.state.lock().await;
        self.refill_locked(&mut st);
        if st.available >= requested {
            st.available -= requested;
            true
        } else {
            false
        }
    }

    pub async fn snapshot(&self) -> RateBudgetSnapshot {
        let mut st = self.state.lock().await;
        self.refill_locked(&mut st);

        let estimated_wait_ms = if st.available < 1.0 {
            Some(((1.0 - st.available) / self.refill_per_ms).ceil() as u64)
        } else {
            None
        };

        RateBudgetSnapshot {
            capacity: self.capacity as u64,
            available: st.available,
            refill_per_ms: self.refill_per_ms,
            estimated_wait_ms,
        }
    }
}

impl std::fmt::Debug for RateBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateBudget")
            .field("capacity", &self.capacity)
            .field("refill_per_ms", &self.refill_per_ms)
            .field("min_wait", &self.min_wait)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_zero_capacity_is_configuration_error() {
        let err = RateBudget::per_minute(0).unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_full() {
        let budget = RateBudget::per_minute(600).unwrap();
        let snapshot = budget.snapshot().await;
        assert_eq!(snapshot.capacity, 600);
        assert_eq!(snapshot.available, 600.0);
        assert!(snapshot.estimated_wait_ms.is_none());
        assert!((snapshot.refill_per_ms - 0.01).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_amount_is_noop() {
        let budget = RateBudget::per_minute(10).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Even a cancelled token does not matter for a zero spend.
        assert!(budget.acquire(0, &cancel).await.is_ok());
        assert_eq!(budget.snapshot().await.available, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_drains_then_refuses() {
        let budget = RateBudget::per_minute(3).unwrap();
        assert!(budget.try_acquire(1).await);
        assert!(budget.try_acquire(2).await);
        assert!(!budget.try_acquire(1).await);
        assert!(budget.snapshot().await.estimated_wait_ms.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_continuous() {
        // 600/min = 0.01 units per ms, so 10 units take one second.
        let budget = RateBudget::per_minute(600).unwrap();
        assert!(budget.try_acquire(600).await);
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!budget.try_acquire(10).await);
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(budget.try_acquire(10).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_never_exceeds_capacity() {
        let budget = RateBudget::per_minute(60).unwrap();
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(budget.snapshot().await.available, 60.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_shortfall() {
        let budget = RateBudget::per_minute(600).unwrap();
        let cancel = CancellationToken::new();
        budget.acquire(600, &cancel).await.unwrap();

        let start = Instant::now();
        budget.acquire(10, &cancel).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(1000), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(1100), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_floored_at_min_wait() {
        let budget = RateBudget::per_minute(60_000)
            .unwrap()
            .with_min_wait(Duration::from_millis(50));
        let cancel = CancellationToken::new();
        budget.acquire(60_000, &cancel).await.unwrap();

        // One unit refills in 1ms, but the waiter sleeps at least the quantum.
        let start = Instant::now();
        budget.acquire(1, &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_observed_refill_wakes_waiter_before_deadline() {
        // With a 10s quantum the waiter's own timer fires long after one unit refills.
        let budget = Arc::new(
            RateBudget::per_minute(600)
                .unwrap()
                .with_min_wait(Duration::from_secs(10)),
        );
        let cancel = CancellationToken::new();
        budget.acquire(600, &cancel).await.unwrap();

        let start = Instant::now();
        let waiter = {
            let budget = budget.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                budget.acquire(1, &cancel).await.unwrap();
                Instant::now()
            })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        // Any caller that refills the bucket wakes the sleeping waiter.
        let _ = budget.snapshot().await;

        let granted_at = waiter.await.unwrap();
        let waited = granted_at - start;
        assert!(waited >= Duration::from_millis(200), "waited {:?}", waited);
        assert!(waited < Duration::from_secs(1), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_is_clamped() {
        let budget = RateBudget::per_minute(100).unwrap();
        let cancel = CancellationToken::new();
        budget.acquire(1_000, &cancel).await.unwrap();
        assert_eq!(budget.snapshot().await.available, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_unwinds_without_spending() {
        let budget = Arc::new(RateBudget::per_minute(60).unwrap());
        let cancel = CancellationToken::new();
        budget.acquire(50, &cancel).await.unwrap();

        let waiter = {
            let budget = budget.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { budget.acquire(30, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        assert_eq!(waiter.await.unwrap(), Err(AcquireError::Cancelled));
        // 10 left plus whatever refilled; nothing deducted for the cancelled waiter.
        let available = budget.snapshot().await.available;
        assert!(available >= 10.0 && available < 11.0, "available {}", available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_token_fails_fast_when_short() {
        let budget = RateBudget::per_minute(5).unwrap();
        let cancel = CancellationToken::new();
        budget.acquire(5, &cancel).await.unwrap();
        cancel.cancel();
        assert_eq!(budget.acquire(1, &cancel).await, Err(AcquireError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_all_eventually_served() {
        let budget = Arc::new(RateBudget::per_minute(120).unwrap());
        let cancel = CancellationToken::new();
        budget.acquire(120, &cancel).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let budget = budget.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { budget.acquire(2, &cancel).await }));
        }
        let start = Instant::now();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        // 8 units at 2 per second.
        assert!(start.elapsed() >= Duration::from_secs(4));
    }
}
