//! Per-destination control handle.
//!
//! A [`TapController`] is a stateless projection: it closes over the tap
//! core and a destination id, and every method dispatches through the core's
//! current per-destination state. When a destination loses its last
//! output-grip listener the published controller is swapped for a no-op, so
//! stale references held by consumers cannot resurrect work on a dead
//! destination.

use std::fmt;
use std::sync::Weak;

use crate::graph::ContextId;

/// Internal dispatch surface the controller routes through.
///
/// Implemented by the tap core; object-safe so controllers stay untyped
/// while cores are generic over params and results.
pub(crate) trait ControllerOps: Send + Sync {
    fn retry(&self, dest: ContextId, force: bool);
    fn refresh(&self, dest: ContextId, force: bool);
    fn cancel_retry(&self, dest: ContextId);
    fn reset(&self, dest: ContextId);
}

#[derive(Clone)]
enum ControllerInner {
    /// All methods return silently.
    Noop,
    /// Dispatches into a live tap core.
    Live {
        ops: Weak<dyn ControllerOps>,
        dest: ContextId,
    },
}

/// Control handle published on a tap's controller grip.
///
/// Cloneable; clones share the same target destination. A controller whose
/// tap has been dropped degrades to a no-op.
#[derive(Clone)]
pub struct TapController {
    inner: ControllerInner,
}

impl TapController {
    /// Creates the inert controller used as the grip default and as the
    /// gated substitute.
    pub fn noop() -> Self {
        Self {
            inner: ControllerInner::Noop,
        }
    }

    pub(crate) fn live(ops: Weak<dyn ControllerOps>, dest: ContextId) -> Self {
        Self {
            inner: ControllerInner::Live { ops, dest },
        }
    }

    /// Returns true if this handle dispatches into a live tap.
    pub fn is_live(&self) -> bool {
        match &self.inner {
            ControllerInner::Noop => false,
            ControllerInner::Live { ops, .. } => ops.strong_count() > 0,
        }
    }

    /// Aborts any in-flight request, bumps the retry attempt, and starts a
    /// new fetch. Error recovery: backoff keeps growing.
    pub fn retry(&self, force: bool) {
        if let ControllerInner::Live { ops, dest } = &self.inner {
            if let Some(ops) = ops.upgrade() {
                ops.retry(*dest, force);
            }
        }
    }

    /// Aborts any in-flight request and starts a new fetch without touching
    /// the retry attempt. Freshness, not error recovery.
    pub fn refresh(&self, force: bool) {
        if let ControllerInner::Live { ops, dest } = &self.inner {
            if let Some(ops) = ops.upgrade() {
                ops.refresh(*dest, force);
            }
        }
    }

    /// Cancels any scheduled retry and TTL refresh without starting work.
    pub fn cancel_retry(&self) {
        if let ControllerInner::Live { ops, dest } = &self.inner {
            if let Some(ops) = ops.upgrade() {
                ops.cancel_retry(*dest);
            }
        }
    }

    /// Aborts everything and returns the destination to idle with empty
    /// history.
    pub fn reset(&self) {
        if let ControllerInner::Live { ops, dest } = &self.inner {
            if let Some(ops) = ops.upgrade() {
                ops.reset(*dest);
            }
        }
    }
}

impl fmt::Debug for TapController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ControllerInner::Noop => write!(f, "TapController(noop)"),
            ControllerInner::Live { dest, .. } => write!(f, "TapController(dest={dest:?})"),
        }
    }
}
