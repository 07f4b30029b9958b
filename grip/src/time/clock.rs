//! Wall-clock abstraction.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock timestamp in milliseconds.
pub type Millis = u64;

/// Source of wall-clock time.
///
/// All timestamps recorded in request states and history entries come from
/// a clock implementation, never from `SystemTime` directly.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time in milliseconds.
    fn now_millis(&self) -> Millis;
}

/// Production clock backed by `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Millis {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Millis)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Shared freely across threads; `advance` and `set` are atomic.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock starting at the given time.
    pub fn new(start: Millis) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Advances the clock by the given number of milliseconds.
    pub fn advance(&self, delta: Millis) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, now: Millis) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}
