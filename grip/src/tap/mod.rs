//! Async request-state tap.
//!
//! An [`AsyncTap`] satisfies output grips by driving an external fetch
//! through its full lifecycle, per destination context:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        AsyncTap facade                       │
//! │  on_attach / on_detach / on_connect / on_disconnect /        │
//! │  produce / get_request_state                                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │                      Request runner                          │
//! │  kickoff funnel: cache consult, abort + latest-only routing, │
//! │  key-change handling, transition + publish pipeline          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐ ┌──────────────┐ ┌─────────────────────────┐ │
//! │  │ DestState  │ │ Retry / TTL  │ │ RequestCache (LRU+TTL)  │ │
//! │  │ store      │ │ timers       │ │ shared per request key  │ │
//! │  └────────────┘ └──────────────┘ └─────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! - **Output grips** carry the fetched data; subscribing to one is what
//!   keeps a destination's network work alive.
//! - **State grip** (optional) carries [`AsyncRequestState`] snapshots.
//!   Observing it never starts or sustains work.
//! - **Controller grip** (optional) carries a [`TapController`]. When a
//!   destination has no output-grip listeners the published controller is
//!   a no-op substitute.
//! - **Request key**: fingerprint of the resolved parameters; the cache
//!   and deduplication axis. A key change aborts in-flight work, rewinds
//!   the retry counter, and starts over; history is preserved.

mod builder;
mod controller;
mod dest;
mod history;
mod retry;
mod runner;
mod state;

pub use builder::{
    AsyncTapBuilder, FetchFn, GripUpdate, MapResultFn, RequestKeyFn, ResolveParamsFn,
    TapBuildError, TapOptions,
};
pub use controller::TapController;
pub use history::{HistoryEntry, TransitionReason};
pub use retry::{RetryConfig, RetryPredicate};
pub use state::{AsyncRequestState, ErrorKind, RequestError, RequestState};

use std::sync::Arc;

use crate::cache::RequestCache;
use crate::graph::{AnyGrip, Context};

use runner::TapCore;

/// A producer that satisfies its output grips by fetching externally.
///
/// `P` is the resolved parameter type, `R` the fetch result type. Built via
/// [`AsyncTap::builder`]; driven by the graph runtime through the six
/// operations below.
pub struct AsyncTap<P, R> {
    core: Arc<TapCore<P, R>>,
}

impl<P, R> AsyncTap<P, R>
where
    P: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Starts building a tap.
    pub fn builder() -> AsyncTapBuilder<P, R> {
        AsyncTapBuilder::default()
    }

    pub(crate) fn from_core(core: Arc<TapCore<P, R>>) -> Self {
        Self { core }
    }

    /// Attaches the tap to its home context.
    pub fn on_attach(&self, home: &Arc<Context>) {
        self.core.on_attach(home);
    }

    /// Detaches the tap: every timer is cleared and every in-flight request
    /// aborted, deterministically.
    pub fn on_detach(&self) {
        self.core.on_detach();
    }

    /// Signals that `grip` gained a subscriber on `dest`.
    ///
    /// Output-grip subscriptions gate all network work; state and
    /// controller subscriptions only observe.
    pub fn on_connect(&self, dest: &Arc<Context>, grip: &AnyGrip) {
        self.core.on_connect(dest, grip);
    }

    /// Signals that `grip` lost a subscriber on `dest`.
    pub fn on_disconnect(&self, dest: &Arc<Context>, grip: &AnyGrip) {
        self.core.on_disconnect(dest, grip);
    }

    /// Nudges recomputation for a destination, e.g. after parameter edits.
    pub fn produce(&self, dest: &Arc<Context>) {
        self.core.produce(dest);
    }

    /// Synchronously reads the current snapshot for a destination.
    pub fn get_request_state(&self, dest: &Arc<Context>) -> AsyncRequestState {
        self.core.get_request_state(dest.id())
    }

    /// Returns the output grips this tap provides.
    pub fn provides(&self) -> Vec<AnyGrip> {
        self.core.provided_grips().cloned().collect()
    }

    /// Returns how many output-grip listeners across all destinations
    /// currently resolve to the given request key.
    pub fn key_listener_count(&self, key: &str) -> usize {
        self.core.key_listener_count(key)
    }

    /// Returns the request cache backing this tap.
    pub fn cache(&self) -> Arc<RequestCache<R>> {
        Arc::clone(self.core.cache())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Grip;
    use crate::time::{Clock, ManualClock, TokioScheduler};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test rig: one output grip, state + controller grips, a scripted key
    /// and a fetcher that doubles the id after a virtual-time delay.
    struct Rig {
        tap: AsyncTap<Option<u64>, u64>,
        out: Grip<u64>,
        id_param: Grip<Option<u64>>,
        state_grip: Grip<AsyncRequestState>,
        controller_grip: Grip<TapController>,
        clock: Arc<ManualClock>,
        fetch_calls: Arc<AtomicUsize>,
    }

    fn rig(fetch_delay_ms: u64) -> Rig {
        let out: Grip<u64> = Grip::new("value", 0);
        let id_param: Grip<Option<u64>> = Grip::new("id", None);
        let state_grip: Grip<AsyncRequestState> =
            Grip::new("value_state", AsyncRequestState::default());
        let controller_grip: Grip<TapController> =
            Grip::new("value_ctrl", TapController::noop());
        let clock = Arc::new(ManualClock::new(0));
        let fetch_calls = Arc::new(AtomicUsize::new(0));

        let calls = Arc::clone(&fetch_calls);
        let id_for_resolve = id_param.clone();
        let out_for_map = out.clone();
        let tap = AsyncTap::builder()
            .provide(&out)
            .state_grip(&state_grip)
            .controller_grip(&controller_grip)
            .dest_param(&id_param)
            .resolve_params(move |view| view.dest(&id_for_resolve))
            .request_key_of(|id: &Option<u64>| id.map(|id| format!("item:{id}")))
            .fetcher(move |id: Option<u64>, _cancel| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if fetch_delay_ms > 0 {
                        tokio::time::sleep(std::time::Duration::from_millis(fetch_delay_ms)).await;
                    }
                    match id {
                        Some(id) => Ok(id * 2),
                        None => Err(RequestError::fetch("no id")),
                    }
                }
            })
            .map_result(move |value| Ok(vec![(out_for_map.erased(), out_for_map.value(*value))]))
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .scheduler(Arc::new(TokioScheduler))
            .build()
            .expect("rig builds");

        Rig {
            tap,
            out,
            id_param,
            state_grip,
            controller_grip,
            clock,
            fetch_calls,
        }
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_unresolved_params_stays_idle() {
        let rig = rig(0);
        let dest = Context::new("dest");

        rig.tap.on_connect(&dest, &rig.out.erased());
        settle().await;

        let snapshot = rig.tap.get_request_state(&dest);
        assert!(snapshot.state.is_idle());
        assert_eq!(snapshot.request_key, None);
        assert!(snapshot.has_listeners);
        assert_eq!(rig.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_kicks_off_fetch_and_publishes() {
        let rig = rig(0);
        let dest = Context::new("dest");
        dest.set_param(&rig.id_param, Some(21));

        rig.tap.on_connect(&dest, &rig.out.erased());
        settle().await;

        assert_eq!(dest.get(&rig.out), 42);
        let snapshot = rig.tap.get_request_state(&dest);
        assert!(matches!(snapshot.state, RequestState::Success { .. }));
        assert_eq!(snapshot.request_key.as_deref(), Some("item:21"));
        assert_eq!(rig.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_grip_subscription_does_not_start_work() {
        let rig = rig(0);
        let dest = Context::new("dest");
        dest.set_param(&rig.id_param, Some(1));

        rig.tap.on_connect(&dest, &rig.state_grip.erased());
        settle().await;

        assert_eq!(rig.fetch_calls.load(Ordering::SeqCst), 0);
        let snapshot = dest.get(&rig.state_grip);
        assert!(snapshot.state.is_idle());
        assert!(!snapshot.has_listeners);
        // The controller is live even though work stays gated.
        assert!(dest.get(&rig.controller_grip).is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_freezes_and_swaps_in_noop_controller() {
        let rig = rig(0);
        let dest = Context::new("dest");
        dest.set_param(&rig.id_param, Some(3));

        let out = rig.out.erased();
        rig.tap.on_connect(&dest, &out);
        settle().await;
        assert!(dest.get(&rig.controller_grip).is_live());

        rig.tap.on_disconnect(&dest, &out);
        settle().await;

        let snapshot = rig.tap.get_request_state(&dest);
        assert!(!snapshot.has_listeners);
        assert!(matches!(snapshot.state, RequestState::Success { .. }));
        assert!(!dest.get(&rig.controller_grip).is_live());
        // Data stays published for late readers.
        assert_eq!(dest.get(&rig.out), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_tears_down_destinations() {
        let rig = rig(50);
        let dest = Context::new("dest");
        dest.set_param(&rig.id_param, Some(5));

        rig.tap.on_connect(&dest, &rig.out.erased());
        settle().await;
        assert!(rig.tap.get_request_state(&dest).state.is_loading());

        rig.tap.on_detach();
        tokio::time::advance(std::time::Duration::from_millis(100)).await;
        settle().await;

        // The record is gone; reads fall back to the default snapshot and
        // the aborted fetch never lands.
        let snapshot = rig.tap.get_request_state(&dest);
        assert!(snapshot.state.is_idle());
        assert_eq!(dest.get(&rig.out), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_produce_reresolves_params() {
        let rig = rig(0);
        let dest = Context::new("dest");
        dest.set_param(&rig.id_param, Some(2));

        rig.tap.on_connect(&dest, &rig.out.erased());
        settle().await;
        assert_eq!(dest.get(&rig.out), 4);

        rig.clock.advance(10);
        dest.set_param(&rig.id_param, Some(7));
        rig.tap.produce(&dest);
        settle().await;

        assert_eq!(dest.get(&rig.out), 14);
        let snapshot = rig.tap.get_request_state(&dest);
        assert_eq!(snapshot.request_key.as_deref(), Some("item:7"));
        assert_eq!(rig.fetch_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_listener_does_not_restart_fetch() {
        let rig = rig(50);
        let dest = Context::new("dest");
        dest.set_param(&rig.id_param, Some(2));

        let out = rig.out.erased();
        rig.tap.on_connect(&dest, &out);
        settle().await;
        rig.tap.on_connect(&dest, &out);
        settle().await;

        assert_eq!(rig.fetch_calls.load(Ordering::SeqCst), 1);
        let snapshot = rig.tap.get_request_state(&dest);
        assert!(snapshot.state.is_loading());
    }
}
