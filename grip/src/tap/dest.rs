//! Per-destination runtime state.

use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;

use crate::graph::{Context, ContextId};
use crate::time::TimerHandle;

use super::history::HistoryRing;
use super::state::RequestState;

/// Runtime record for one destination context.
///
/// Created lazily on the first connect of any grip the tap provides,
/// survives request-key changes, and is torn down on tap detach. The
/// context back-reference is weak so destination teardown without an
/// explicit disconnect does not leak the record's context.
pub(crate) struct DestState {
    /// The destination's id, kept for timer callbacks.
    pub id: ContextId,
    /// Weak back-reference to the destination context.
    pub context: Weak<Context>,
    /// Current lifecycle state.
    pub current: RequestState,
    /// Fingerprint of the current request parameters.
    pub request_key: Option<String>,
    /// Output-grip subscribers only; state/controller grips never count.
    pub listener_count: usize,
    /// Zero-based backoff exponent; incremented at schedule time.
    pub retry_attempt: u32,
    /// Armed retry timer, if any.
    pub retry_timer: Option<TimerHandle>,
    /// Armed TTL refresh timer, if any.
    pub refresh_timer: Option<TimerHandle>,
    /// Cancellation handle for the in-flight request, if any.
    pub abort_handle: Option<CancellationToken>,
    /// Bounded transition log.
    pub history: HistoryRing,
    /// True while a live controller is published for this destination.
    pub controller_live: bool,
    /// Monotonic sequence for latest-only completion routing.
    pub inflight_seq: u64,
}

impl DestState {
    /// Creates the record for a destination, starting idle.
    pub fn new(context: &Arc<Context>, history_size: usize) -> Self {
        Self {
            id: context.id(),
            context: Arc::downgrade(context),
            current: RequestState::Idle,
            request_key: None,
            listener_count: 0,
            retry_attempt: 0,
            retry_timer: None,
            refresh_timer: None,
            abort_handle: None,
            history: HistoryRing::new(history_size),
            controller_live: false,
            inflight_seq: 0,
        }
    }

    /// Returns true if data is currently available on this destination.
    pub fn has_data(&self) -> bool {
        self.current.has_data()
    }

    /// Cancels and clears the retry timer, if armed.
    pub fn cancel_retry_timer(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.cancel();
        }
    }

    /// Cancels and clears the TTL refresh timer, if armed.
    pub fn cancel_refresh_timer(&mut self) {
        if let Some(timer) = self.refresh_timer.take() {
            timer.cancel();
        }
    }

    /// Cancels and clears both timers.
    pub fn cancel_timers(&mut self) {
        self.cancel_retry_timer();
        self.cancel_refresh_timer();
    }

    /// Cancels the in-flight request, if any, and invalidates its sequence
    /// so a late completion can never be applied.
    ///
    /// Returns true if a request was actually aborted.
    pub fn abort_inflight(&mut self) -> bool {
        match self.abort_handle.take() {
            Some(token) => {
                token.cancel();
                self.inflight_seq += 1;
                true
            }
            None => false,
        }
    }
}
