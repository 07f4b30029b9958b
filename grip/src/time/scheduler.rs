//! One-shot timer scheduling.
//!
//! Timers are scoped acquisitions: every arming pairs with a guaranteed
//! clear on cancel, detach, or completion. The returned [`TimerHandle`]
//! cancels idempotently, so disarm paths never need to know whether the
//! timer already fired.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Callback invoked when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

/// Arms one-shot timers.
///
/// The production implementation is [`TokioScheduler`]; tests running under
/// tokio's paused clock get deterministic firing through
/// `tokio::time::advance`.
pub trait Scheduler: Send + Sync {
    /// Arms a one-shot timer that runs `callback` after `delay`.
    ///
    /// A zero (or elapsed) delay fires on the next timer tick rather than
    /// inline, so callers may arm timers while holding locks the callback
    /// will take.
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
}

/// Handle to an armed timer.
///
/// Dropping the handle does NOT cancel the timer; cancellation is always an
/// explicit `cancel()` so that ownership moves do not silently disarm work.
#[derive(Debug)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    /// Creates a handle wrapping the given cancellation token.
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Cancels the timer. Idempotent; a no-op after the timer fired.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true if `cancel()` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Tokio-backed scheduler: each timer is a spawned task sleeping under a
/// per-timer cancellation token.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let token = CancellationToken::new();
        let guard = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = guard.cancelled() => {}
                _ = tokio::time::sleep(delay) => callback(),
            }
        });
        TimerHandle::new(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);

        let _handle = TokioScheduler.schedule(
            Duration::from_millis(100),
            Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::advance(Duration::from_millis(99)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);

        let handle = TokioScheduler.schedule(
            Duration::from_millis(100),
            Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        handle.cancel();
        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let handle = TokioScheduler.schedule(Duration::from_millis(10), Box::new(|| {}));
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_fires_on_next_tick() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);

        let _handle = TokioScheduler.schedule(
            Duration::ZERO,
            Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::advance(Duration::ZERO).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_is_harmless() {
        let handle = TokioScheduler.schedule(Duration::from_millis(5), Box::new(|| {}));
        tokio::time::advance(Duration::from_millis(10)).await;
        settle().await;
        handle.cancel();
    }
}
