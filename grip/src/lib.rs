//! GRIP - framework-agnostic reactive data-graph runtime.
//!
//! Consumers declare data needs by typed keys ([`Grip`]s); producers (taps)
//! satisfy them through a hierarchical context graph. This crate contains the
//! async request-state core: [`AsyncTap`] drives an external fetch through its
//! full lifecycle (idle, loading, success/error, stale refresh, retry),
//! publishes immutable [`AsyncRequestState`] snapshots back through the graph,
//! and hands consumers a [`TapController`] for manual retry/refresh control.
//!
//! # High-Level API
//!
//! ```ignore
//! use grip::{AsyncTap, Grip, RetryConfig};
//!
//! let user: Grip<Option<User>> = Grip::new("user", None);
//! let user_id: Grip<Option<u64>> = Grip::new("user_id", None);
//!
//! let tap = AsyncTap::builder()
//!     .provide(&user)
//!     .dest_param(&user_id)
//!     .resolve_params({
//!         let user_id = user_id.clone();
//!         move |view| view.dest(&user_id)
//!     })
//!     .request_key_of(|id: &Option<u64>| id.map(|id| format!("user:{id}")))
//!     .fetcher(|id, cancel| async move { fetch_user(id, cancel).await })
//!     .map_result(move |user| Ok(vec![grip_update(&user_grip, user.clone())]))
//!     .retry(RetryConfig::default().with_max_retries(5))
//!     .build()?;
//!
//! tap.on_connect(&dest, &user.erased());
//! ```

pub mod cache;
pub mod graph;
pub mod tap;
pub mod time;

pub use cache::{CacheEntry, CachePolicy, CacheStats, RequestCache};
pub use graph::{AnyGrip, Context, ContextId, Grip, GripId, GripValue, ParamView};
pub use tap::{
    AsyncRequestState, AsyncTap, AsyncTapBuilder, HistoryEntry, RequestError, RequestState,
    RetryConfig, TapBuildError, TapController, TransitionReason,
};
pub use time::{Clock, ManualClock, Millis, Scheduler, SystemClock, TimerHandle, TokioScheduler};

/// Version of the GRIP library.
///
/// Synchronized across all components in the workspace; defined in
/// `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
