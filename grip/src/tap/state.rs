//! Request lifecycle states and published snapshots.
//!
//! [`RequestState`] is the closed set of six lifecycle states an async
//! request moves through. Every transition produces a new value; existing
//! references are never mutated. The data itself travels on the tap's
//! output grips - states only describe the request, which is what lets a
//! status-driven UI and a data-driven view observe the same tap without
//! coupling to each other.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::time::Millis;

use super::history::HistoryEntry;

/// What failed while satisfying a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The fetcher signalled failure.
    Fetch,
    /// The fetch succeeded but the result could not be mapped to grips.
    Mapping,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Fetch => write!(f, "fetch failed"),
            ErrorKind::Mapping => write!(f, "result mapping failed"),
        }
    }
}

/// A request failure as carried in states and history entries.
///
/// Cloneable by design: the same error value appears in the current state,
/// in history entries, and in every published snapshot that includes them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RequestError {
    kind: ErrorKind,
    message: String,
}

impl RequestError {
    /// Creates a fetch failure.
    pub fn fetch(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Fetch,
            message: message.into(),
        }
    }

    /// Creates a result-mapping failure.
    pub fn mapping(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Mapping,
            message: message.into(),
        }
    }

    /// Returns the failure category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Lifecycle state of an async request.
///
/// Every non-idle variant carries `retry_at`: a future wall-clock time when
/// scheduled work (retry or TTL refresh) will run, or `None` when nothing is
/// scheduled. `Idle` has no such field, so an idle state can never claim
/// scheduled work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    /// No request has been made.
    Idle,
    /// First fetch in flight; no data available yet.
    Loading {
        initiated_at: Millis,
        retry_at: Option<Millis>,
    },
    /// Data retrieved and current.
    Success {
        retrieved_at: Millis,
        retry_at: Option<Millis>,
    },
    /// Fetch failed and no data is available.
    Error {
        error: RequestError,
        failed_at: Millis,
        retry_at: Option<Millis>,
    },
    /// A refresh is in flight while previously retrieved data is served.
    StaleWhileRevalidate {
        retrieved_at: Millis,
        refresh_initiated_at: Millis,
        retry_at: Option<Millis>,
    },
    /// A refresh failed; previously retrieved data is still served.
    StaleWithError {
        retrieved_at: Millis,
        error: RequestError,
        failed_at: Millis,
        retry_at: Option<Millis>,
    },
}

impl Default for RequestState {
    fn default() -> Self {
        RequestState::Idle
    }
}

impl RequestState {
    /// Returns true if data is available on the output grips.
    pub fn has_data(&self) -> bool {
        matches!(
            self,
            RequestState::Success { .. }
                | RequestState::StaleWhileRevalidate { .. }
                | RequestState::StaleWithError { .. }
        )
    }

    /// Returns true if the available data may be out of date.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            RequestState::StaleWhileRevalidate { .. } | RequestState::StaleWithError { .. }
        )
    }

    /// Returns true if a request is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        matches!(
            self,
            RequestState::Loading { .. } | RequestState::StaleWhileRevalidate { .. }
        )
    }

    /// Returns true if a request is in flight with stale data still served.
    pub fn is_refreshing_with_data(&self) -> bool {
        matches!(self, RequestState::StaleWhileRevalidate { .. })
    }

    /// Returns true if a first fetch is in flight (guaranteed no data).
    pub fn is_loading(&self) -> bool {
        matches!(self, RequestState::Loading { .. })
    }

    /// Returns true if no request has been made.
    pub fn is_idle(&self) -> bool {
        matches!(self, RequestState::Idle)
    }

    /// Returns true if the last fetch failed.
    pub fn has_error(&self) -> bool {
        matches!(
            self,
            RequestState::Error { .. } | RequestState::StaleWithError { .. }
        )
    }

    /// Returns the error, if the state carries one.
    pub fn error(&self) -> Option<&RequestError> {
        match self {
            RequestState::Error { error, .. } | RequestState::StaleWithError { error, .. } => {
                Some(error)
            }
            _ => None,
        }
    }

    /// Returns when the available data was retrieved, if any.
    pub fn data_retrieved_at(&self) -> Option<Millis> {
        match self {
            RequestState::Success { retrieved_at, .. }
            | RequestState::StaleWhileRevalidate { retrieved_at, .. }
            | RequestState::StaleWithError { retrieved_at, .. } => Some(*retrieved_at),
            _ => None,
        }
    }

    /// Returns when the in-flight request was initiated, if any.
    pub fn request_initiated_at(&self) -> Option<Millis> {
        match self {
            RequestState::Loading { initiated_at, .. } => Some(*initiated_at),
            RequestState::StaleWhileRevalidate {
                refresh_initiated_at,
                ..
            } => Some(*refresh_initiated_at),
            _ => None,
        }
    }

    /// Returns when the last failure occurred, if any.
    pub fn error_failed_at(&self) -> Option<Millis> {
        match self {
            RequestState::Error { failed_at, .. }
            | RequestState::StaleWithError { failed_at, .. } => Some(*failed_at),
            _ => None,
        }
    }

    /// Returns the scheduled retry/refresh time, if any.
    pub fn retry_at(&self) -> Option<Millis> {
        match self {
            RequestState::Idle => None,
            RequestState::Loading { retry_at, .. }
            | RequestState::Success { retry_at, .. }
            | RequestState::Error { retry_at, .. }
            | RequestState::StaleWhileRevalidate { retry_at, .. }
            | RequestState::StaleWithError { retry_at, .. } => *retry_at,
        }
    }

    /// Sets the scheduled retry/refresh time. A no-op on `Idle`.
    pub fn set_retry_at(&mut self, at: Option<Millis>) {
        match self {
            RequestState::Idle => {}
            RequestState::Loading { retry_at, .. }
            | RequestState::Success { retry_at, .. }
            | RequestState::Error { retry_at, .. }
            | RequestState::StaleWhileRevalidate { retry_at, .. }
            | RequestState::StaleWithError { retry_at, .. } => *retry_at = at,
        }
    }

    /// Returns true if scheduled work lies in the future.
    pub fn has_scheduled_retry(&self, now: Millis) -> bool {
        self.retry_at().is_some_and(|at| at > now)
    }

    /// Returns milliseconds until the scheduled work, if any.
    pub fn retry_time_remaining(&self, now: Millis) -> Option<Millis> {
        self.retry_at().map(|at| at.saturating_sub(now))
    }

    /// Human-readable status string for display surfaces.
    pub fn status_message(&self) -> String {
        match self {
            RequestState::Idle => "idle".to_string(),
            RequestState::Loading { .. } => "loading".to_string(),
            RequestState::Success { .. } => "loaded".to_string(),
            RequestState::Error { error, .. } => format!("failed: {error}"),
            RequestState::StaleWhileRevalidate { .. } => "refreshing (serving stale data)".to_string(),
            RequestState::StaleWithError { error, .. } => {
                format!("refresh failed: {error} (serving stale data)")
            }
        }
    }

    /// Short variant tag for logging.
    pub fn variant(&self) -> &'static str {
        match self {
            RequestState::Idle => "idle",
            RequestState::Loading { .. } => "loading",
            RequestState::Success { .. } => "success",
            RequestState::Error { .. } => "error",
            RequestState::StaleWhileRevalidate { .. } => "stale-while-revalidate",
            RequestState::StaleWithError { .. } => "stale-with-error",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status_message())
    }
}

/// Published snapshot of a destination's request lifecycle.
///
/// Carried on the tap's state grip. Immutable by contract: the history
/// slice is frozen at publish time and shared by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncRequestState {
    /// Current lifecycle state.
    pub state: RequestState,
    /// Fingerprint of the current request parameters, if resolved.
    pub request_key: Option<String>,
    /// True while any output grip of this destination has subscribers.
    pub has_listeners: bool,
    /// Recent transitions, oldest first.
    pub history: Arc<[HistoryEntry]>,
}

impl Default for AsyncRequestState {
    fn default() -> Self {
        Self {
            state: RequestState::Idle,
            request_key: None,
            has_listeners: false,
            history: Arc::from(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_state(retry_at: Option<Millis>) -> RequestState {
        RequestState::Error {
            error: RequestError::fetch("boom"),
            failed_at: 50,
            retry_at,
        }
    }

    #[test]
    fn test_data_availability_predicates() {
        assert!(!RequestState::Idle.has_data());
        assert!(!RequestState::Loading {
            initiated_at: 0,
            retry_at: None
        }
        .has_data());
        assert!(RequestState::Success {
            retrieved_at: 0,
            retry_at: None
        }
        .has_data());
        assert!(RequestState::StaleWhileRevalidate {
            retrieved_at: 0,
            refresh_initiated_at: 10,
            retry_at: None
        }
        .has_data());
        assert!(RequestState::StaleWithError {
            retrieved_at: 0,
            error: RequestError::fetch("x"),
            failed_at: 10,
            retry_at: None
        }
        .has_data());
        assert!(!error_state(None).has_data());
    }

    #[test]
    fn test_refreshing_predicates() {
        let loading = RequestState::Loading {
            initiated_at: 0,
            retry_at: None,
        };
        let swr = RequestState::StaleWhileRevalidate {
            retrieved_at: 0,
            refresh_initiated_at: 10,
            retry_at: None,
        };

        assert!(loading.is_refreshing());
        assert!(swr.is_refreshing());
        assert!(!loading.is_refreshing_with_data());
        assert!(swr.is_refreshing_with_data());
        assert!(loading.is_loading());
        assert!(!swr.is_loading());
    }

    #[test]
    fn test_error_accessors() {
        let state = error_state(None);
        assert!(state.has_error());
        assert_eq!(state.error().unwrap().message(), "boom");
        assert_eq!(state.error_failed_at(), Some(50));

        let success = RequestState::Success {
            retrieved_at: 10,
            retry_at: None,
        };
        assert!(!success.has_error());
        assert!(success.error().is_none());
    }

    #[test]
    fn test_timestamp_accessors() {
        let swr = RequestState::StaleWhileRevalidate {
            retrieved_at: 100,
            refresh_initiated_at: 900,
            retry_at: None,
        };
        assert_eq!(swr.data_retrieved_at(), Some(100));
        assert_eq!(swr.request_initiated_at(), Some(900));

        let loading = RequestState::Loading {
            initiated_at: 40,
            retry_at: None,
        };
        assert_eq!(loading.request_initiated_at(), Some(40));
        assert_eq!(loading.data_retrieved_at(), None);
    }

    #[test]
    fn test_idle_never_has_retry_at() {
        let mut idle = RequestState::Idle;
        assert_eq!(idle.retry_at(), None);
        idle.set_retry_at(Some(500));
        assert_eq!(idle.retry_at(), None);
    }

    #[test]
    fn test_scheduled_retry_queries() {
        let state = error_state(Some(150));
        assert!(state.has_scheduled_retry(100));
        assert!(!state.has_scheduled_retry(150));
        assert_eq!(state.retry_time_remaining(100), Some(50));
        assert_eq!(state.retry_time_remaining(200), Some(0));
        assert_eq!(error_state(None).retry_time_remaining(100), None);
    }

    #[test]
    fn test_set_retry_at_updates_state() {
        let mut state = error_state(None);
        state.set_retry_at(Some(777));
        assert_eq!(state.retry_at(), Some(777));
        state.set_retry_at(None);
        assert_eq!(state.retry_at(), None);
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(RequestState::Idle.status_message(), "idle");
        assert_eq!(
            RequestState::Loading {
                initiated_at: 0,
                retry_at: None
            }
            .status_message(),
            "loading"
        );
        assert!(error_state(None).status_message().contains("boom"));
        assert!(RequestState::StaleWhileRevalidate {
            retrieved_at: 0,
            refresh_initiated_at: 1,
            retry_at: None
        }
        .status_message()
        .contains("stale"));
    }

    #[test]
    fn test_request_error_display() {
        let err = RequestError::fetch("connection refused");
        assert_eq!(format!("{err}"), "fetch failed: connection refused");
        let err = RequestError::mapping("missing field");
        assert_eq!(err.kind(), ErrorKind::Mapping);
        assert_eq!(format!("{err}"), "result mapping failed: missing field");
    }

    #[test]
    fn test_default_snapshot_is_idle() {
        let snapshot = AsyncRequestState::default();
        assert!(snapshot.state.is_idle());
        assert_eq!(snapshot.request_key, None);
        assert!(!snapshot.has_listeners);
        assert!(snapshot.history.is_empty());
    }
}
