//! The request runner: state-machine driver for async taps.
//!
//! Every entry into the runner - connect, parameter change, manual
//! retry/refresh, scheduled retry, scheduled TTL refresh - funnels through
//! a single kickoff operation. The runner owns all per-destination state
//! behind one mutex; only fetches and timers suspend, and both re-enter
//! through the core's entry points, so all state mutations sit on one
//! logical timeline.
//!
//! # Completion routing
//!
//! Fetches run as spawned tasks racing the fetcher against its cancellation
//! token. Each request captures a monotonic sequence number; a completion
//! whose sequence is no longer current is discarded without a transition,
//! so aborted requests can finish whenever they like.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::RequestCache;
use crate::graph::{AnyGrip, Context, ContextId, Grip, GripId, ParamView};
use crate::time::{Clock, Millis, Scheduler};

use super::builder::{FetchFn, GripUpdate, MapResultFn, RequestKeyFn, ResolveParamsFn, TapOptions};
use super::controller::{ControllerOps, TapController};
use super::dest::DestState;
use super::history::{HistoryEntry, TransitionReason};
use super::state::{AsyncRequestState, RequestError, RequestState};

/// Everything a tap core is built from.
pub(crate) struct TapConfig<P, R> {
    pub provides: Vec<AnyGrip>,
    pub state_grip: Option<Grip<AsyncRequestState>>,
    pub controller_grip: Option<Grip<TapController>>,
    pub dest_params: Vec<AnyGrip>,
    pub home_params: Vec<AnyGrip>,
    pub resolve_params: ResolveParamsFn<P>,
    pub request_key_of: RequestKeyFn<P>,
    pub fetcher: FetchFn<P, R>,
    pub map_result: MapResultFn<R>,
    pub cache: Arc<RequestCache<R>>,
    pub options: TapOptions,
    pub clock: Arc<dyn Clock>,
    pub scheduler: Arc<dyn Scheduler>,
}

/// What caused a kickoff; selects the transition reason recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KickoffOrigin {
    Connect,
    Produce,
    ManualRetry,
    ManualRefresh,
    ScheduledRetry,
    ScheduledRefresh,
}

impl KickoffOrigin {
    fn start_reason(self, has_data: bool) -> TransitionReason {
        match self {
            KickoffOrigin::ScheduledRetry => TransitionReason::RetryExecuted,
            KickoffOrigin::ScheduledRefresh => TransitionReason::TtlRefreshExecuted,
            KickoffOrigin::ManualRetry => TransitionReason::ManualRetry,
            KickoffOrigin::ManualRefresh => TransitionReason::ManualRefresh,
            KickoffOrigin::Connect | KickoffOrigin::Produce => {
                if has_data {
                    TransitionReason::RefreshInitiated
                } else {
                    TransitionReason::RequestInitiated
                }
            }
        }
    }
}

struct CoreState {
    home: Option<Arc<Context>>,
    dests: HashMap<ContextId, DestState>,
    /// Output-grip listeners aggregated per request key across destinations.
    key_listeners: HashMap<String, usize>,
}

/// Shared core of an async tap.
///
/// Owned by the [`AsyncTap`](super::AsyncTap) facade; controllers and timer
/// callbacks hold weak references into it.
pub(crate) struct TapCore<P, R> {
    self_weak: Weak<TapCore<P, R>>,
    provides: HashMap<GripId, AnyGrip>,
    state_grip: Option<Grip<AsyncRequestState>>,
    controller_grip: Option<Grip<TapController>>,
    #[allow(dead_code)]
    dest_params: Vec<AnyGrip>,
    #[allow(dead_code)]
    home_params: Vec<AnyGrip>,
    resolve_params: ResolveParamsFn<P>,
    request_key_of: RequestKeyFn<P>,
    fetcher: FetchFn<P, R>,
    map_result: MapResultFn<R>,
    cache: Arc<RequestCache<R>>,
    opts: TapOptions,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<CoreState>,
}

impl<P, R> TapCore<P, R>
where
    P: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub fn new(config: TapConfig<P, R>) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            self_weak: self_weak.clone(),
            provides: config
                .provides
                .into_iter()
                .map(|grip| (grip.id(), grip))
                .collect(),
            state_grip: config.state_grip,
            controller_grip: config.controller_grip,
            dest_params: config.dest_params,
            home_params: config.home_params,
            resolve_params: config.resolve_params,
            request_key_of: config.request_key_of,
            fetcher: config.fetcher,
            map_result: config.map_result,
            cache: config.cache,
            opts: config.options,
            clock: config.clock,
            scheduler: config.scheduler,
            state: Mutex::new(CoreState {
                home: None,
                dests: HashMap::new(),
                key_listeners: HashMap::new(),
            }),
        })
    }

    pub fn cache(&self) -> &Arc<RequestCache<R>> {
        &self.cache
    }

    pub fn provided_grips(&self) -> impl Iterator<Item = &AnyGrip> {
        self.provides.values()
    }

    // =========================================================================
    // Graph-facing operations
    // =========================================================================

    pub fn on_attach(&self, home: &Arc<Context>) {
        let mut state = self.state.lock().unwrap();
        state.home = Some(Arc::clone(home));
        tracing::debug!(home = %home.id(), "async tap attached");
    }

    /// Tears down every destination: clears all timers and aborts all
    /// in-flight requests deterministically.
    pub fn on_detach(&self) {
        let mut state = self.state.lock().unwrap();
        for (_, mut dest) in state.dests.drain() {
            dest.cancel_timers();
            dest.abort_inflight();
        }
        state.key_listeners.clear();
        state.home = None;
        tracing::debug!("async tap detached");
    }

    pub fn on_connect(&self, dest_ctx: &Arc<Context>, grip: &AnyGrip) {
        let mut kick = false;
        {
            let mut state = self.state.lock().unwrap();
            let CoreState {
                dests,
                key_listeners,
                ..
            } = &mut *state;

            let dest = dests
                .entry(dest_ctx.id())
                .or_insert_with(|| DestState::new(dest_ctx, self.opts.history_size));

            if self.provides.contains_key(&grip.id()) {
                dest.listener_count += 1;
                add_key_listeners(key_listeners, &dest.request_key, 1);
                kick = dest.listener_count == 1 || dest.current.is_idle();
            }

            if self.controller_grip.is_some() && !dest.controller_live {
                dest.controller_live = true;
                let ops: Weak<dyn ControllerOps> = self.self_weak.clone();
                self.publish_controller(dest, TapController::live(ops, dest.id));
            }

            self.publish_state(dest);
        }

        if kick {
            self.kickoff(dest_ctx.id(), false, KickoffOrigin::Connect);
        }
    }

    pub fn on_disconnect(&self, dest_ctx: &Arc<Context>, grip: &AnyGrip) {
        let mut state = self.state.lock().unwrap();
        let CoreState {
            dests,
            key_listeners,
            ..
        } = &mut *state;

        let Some(dest) = dests.get_mut(&dest_ctx.id()) else {
            return;
        };

        if self.provides.contains_key(&grip.id()) && dest.listener_count > 0 {
            dest.listener_count -= 1;
            remove_key_listeners(key_listeners, &dest.request_key, 1);

            if dest.listener_count == 0 {
                // The state freezes at its last value: timers go, scheduled
                // work is unscheduled, and the live controller is withdrawn.
                dest.cancel_timers();
                if dest.current.retry_at().is_some() {
                    self.record_history(dest, TransitionReason::ListenerUnsubscribed);
                    dest.current.set_retry_at(None);
                }
                if dest.controller_live {
                    dest.controller_live = false;
                    self.publish_controller(dest, TapController::noop());
                }
                tracing::debug!(dest = %dest.id, "last listener gone; destination frozen");
            }
        }

        self.publish_state(dest);
    }

    /// Nudges recomputation for a destination (e.g. after a parameter edit).
    pub fn produce(&self, dest_ctx: &Arc<Context>) {
        let known = {
            let state = self.state.lock().unwrap();
            state.dests.contains_key(&dest_ctx.id())
        };
        if known {
            self.kickoff(dest_ctx.id(), false, KickoffOrigin::Produce);
        } else {
            tracing::debug!(dest = %dest_ctx.id(), "produce for unknown destination ignored");
        }
    }

    /// Output-grip listeners aggregated across destinations resolving to
    /// the same request key. This is the key-level work-gating signal:
    /// zero means nobody anywhere is consuming data for that fingerprint.
    pub fn key_listener_count(&self, key: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.key_listeners.get(key).copied().unwrap_or(0)
    }

    /// Synchronous read of the current snapshot for a destination.
    pub fn get_request_state(&self, dest: ContextId) -> AsyncRequestState {
        let state = self.state.lock().unwrap();
        state
            .dests
            .get(&dest)
            .map(|d| self.snapshot_for(d))
            .unwrap_or_default()
    }

    // =========================================================================
    // Kickoff and completion
    // =========================================================================

    /// The single funnel every request start goes through.
    fn kickoff(&self, dest_id: ContextId, force_refetch: bool, origin: KickoffOrigin) {
        let mut state = self.state.lock().unwrap();
        let CoreState {
            dests,
            key_listeners,
            home,
        } = &mut *state;

        let dest_ctx = match dests.get(&dest_id).map(|d| d.context.upgrade()) {
            None => return,
            Some(Some(ctx)) => ctx,
            Some(None) => {
                // Destination context was dropped without a disconnect; tear
                // the record down in its place.
                if let Some(mut dead) = dests.remove(&dest_id) {
                    remove_key_listeners(key_listeners, &dead.request_key, dead.listener_count);
                    dead.cancel_timers();
                    dead.abort_inflight();
                }
                tracing::debug!(dest = %dest_id, "destination context dropped; record removed");
                return;
            }
        };
        let Some(dest) = dests.get_mut(&dest_id) else {
            return;
        };

        if dest.listener_count == 0 {
            tracing::trace!(dest = %dest_id, "kickoff skipped: no output listeners");
            return;
        }

        let view = ParamView::new(&dest_ctx, home.as_ref());
        let params = (self.resolve_params)(&view);
        let new_key = (self.request_key_of)(&params);

        if new_key != dest.request_key {
            // First resolution of a key on an idle destination is initial
            // assignment, not a change.
            if dest.request_key.is_none() && dest.current.is_idle() {
                remove_key_listeners(key_listeners, &dest.request_key, dest.listener_count);
                dest.request_key = new_key.clone();
                add_key_listeners(key_listeners, &dest.request_key, dest.listener_count);
            } else {
                self.handle_key_change(dest, key_listeners, new_key, params);
                return;
            }
        }

        let Some(key) = dest.request_key.clone() else {
            // Params unresolved: stay idle, nothing to fetch.
            return;
        };

        if dest.abort_inflight() {
            self.record_history(dest, TransitionReason::ConcurrentRequestAborted);
        }
        dest.cancel_timers();

        if !force_refetch && self.try_cache_hit(dest, &key) {
            return;
        }

        let now = self.clock.now_millis();
        let has_data = dest.has_data();
        let next = if has_data {
            RequestState::StaleWhileRevalidate {
                retrieved_at: dest.current.data_retrieved_at().unwrap_or(now),
                refresh_initiated_at: now,
                retry_at: None,
            }
        } else {
            RequestState::Loading {
                initiated_at: now,
                retry_at: None,
            }
        };
        self.transition(dest, next, origin.start_reason(has_data));
        self.spawn_fetch(dest, key, params);
    }

    /// Request-key change: abort, rewind retry state, reset outputs, and
    /// start over under the new key. History is preserved.
    fn handle_key_change(
        &self,
        dest: &mut DestState,
        key_listeners: &mut HashMap<String, usize>,
        new_key: Option<String>,
        params: P,
    ) {
        if dest.abort_inflight() {
            self.record_history(dest, TransitionReason::RequestKeyChangedAborted);
        }
        dest.cancel_timers();
        dest.retry_attempt = 0;

        remove_key_listeners(key_listeners, &dest.request_key, dest.listener_count);
        add_key_listeners(key_listeners, &new_key, dest.listener_count);

        let had_data = dest.has_data();
        tracing::debug!(
            dest = %dest.id,
            old_key = dest.request_key.as_deref().unwrap_or("-"),
            new_key = new_key.as_deref().unwrap_or("-"),
            "request key changed"
        );
        dest.request_key = new_key.clone();
        self.record_history(dest, TransitionReason::RequestKeyChanged);

        if had_data {
            self.publish_output_defaults(dest);
        }

        match new_key {
            None => {
                dest.current = RequestState::Idle;
                self.publish_state(dest);
            }
            Some(key) => {
                dest.current = RequestState::Loading {
                    initiated_at: self.clock.now_millis(),
                    retry_at: None,
                };
                self.publish_state(dest);
                if !self.try_cache_hit(dest, &key) {
                    self.spawn_fetch(dest, key, params);
                }
            }
        }
    }

    /// Serves a fresh cache entry without a network call.
    ///
    /// Entries inside the TTL-refresh margin count as due for revalidation
    /// and are not served as fresh. Returns true if the hit was served.
    fn try_cache_hit(&self, dest: &mut DestState, key: &str) -> bool {
        let now = self.clock.now_millis();
        let Some(entry) = self.cache.get(key) else {
            return false;
        };
        if !entry.is_fresh_within(now, self.opts.refresh_before_expiry_ms) {
            return false;
        }
        match (self.map_result)(&entry.result) {
            Ok(updates) => {
                self.publish_updates(dest, updates);
                dest.retry_attempt = 0;
                self.transition(
                    dest,
                    RequestState::Success {
                        retrieved_at: now,
                        retry_at: None,
                    },
                    TransitionReason::CacheHit,
                );
                self.schedule_ttl_refresh(dest);
                true
            }
            Err(error) => {
                // A cached result we can no longer map is useless; drop it
                // and fall through to a real fetch.
                tracing::warn!(key = %key, error = %error, "cached result failed mapping");
                self.cache.delete(key);
                false
            }
        }
    }

    /// Spawns the fetch driver for the current request.
    fn spawn_fetch(&self, dest: &mut DestState, key: String, params: P) {
        let token = CancellationToken::new();
        dest.abort_handle = Some(token.clone());
        let my_seq = dest.inflight_seq;
        let dest_id = dest.id;

        let Some(core) = self.self_weak.upgrade() else {
            return;
        };
        let future = (self.fetcher)(params, token.clone());
        tokio::spawn(async move {
            tokio::select! {
                result = future => core.on_fetch_complete(dest_id, key, my_seq, result),
                _ = token.cancelled() => {
                    tracing::trace!(dest = %dest_id, seq = my_seq, "fetch cancelled");
                }
            }
        });
    }

    /// Routes a fetch completion back onto the timeline.
    fn on_fetch_complete(
        &self,
        dest_id: ContextId,
        key: String,
        my_seq: u64,
        result: Result<R, RequestError>,
    ) {
        let mut state = self.state.lock().unwrap();
        let Some(dest) = state.dests.get_mut(&dest_id) else {
            return;
        };

        if self.opts.latest_only && my_seq != dest.inflight_seq {
            tracing::trace!(
                dest = %dest_id,
                seq = my_seq,
                current = dest.inflight_seq,
                "stale completion discarded"
            );
            return;
        }
        if my_seq == dest.inflight_seq {
            dest.abort_handle = None;
        }

        let now = self.clock.now_millis();
        let mapped = result.and_then(|result| {
            (self.map_result)(&result).map(|updates| (result, updates))
        });
        match mapped {
            Ok((result, updates)) => {
                self.cache.set(&key, result, self.opts.cache_ttl_ms);
                self.publish_updates(dest, updates);
                let reason = if dest.current.is_refreshing_with_data() {
                    TransitionReason::RefreshSuccess
                } else {
                    TransitionReason::FetchSuccess
                };
                dest.retry_attempt = 0;
                self.transition(
                    dest,
                    RequestState::Success {
                        retrieved_at: now,
                        retry_at: None,
                    },
                    reason,
                );
                self.schedule_ttl_refresh(dest);
            }
            Err(error) => self.handle_failure(dest, error, now),
        }
    }

    /// Failure routing: terminal state selection, retry budgeting, and
    /// backoff scheduling.
    fn handle_failure(&self, dest: &mut DestState, error: RequestError, now: Millis) {
        let retryable = self.opts.retry.should_retry(&error)
            && dest.listener_count > 0
            && self.opts.retry.budget_allows(dest.retry_attempt);

        let retry_at = if retryable {
            let delay = self.opts.retry.delay_for_attempt(dest.retry_attempt);
            // Incremented at schedule time so the counter names the next
            // attempt, not the one that just failed.
            dest.retry_attempt += 1;
            Some(now + delay)
        } else {
            None
        };

        tracing::debug!(
            dest = %dest.id,
            error = %error,
            attempt = dest.retry_attempt,
            retry_at = ?retry_at,
            "fetch failed"
        );

        let was_refreshing = dest.current.is_refreshing_with_data();
        let next = if dest.has_data() {
            RequestState::StaleWithError {
                retrieved_at: dest.current.data_retrieved_at().unwrap_or(now),
                error,
                failed_at: now,
                retry_at,
            }
        } else {
            RequestState::Error {
                error,
                failed_at: now,
                retry_at,
            }
        };
        let reason = if was_refreshing {
            TransitionReason::RefreshError
        } else {
            TransitionReason::FetchError
        };
        self.transition(dest, next, reason);

        if let Some(at) = retry_at {
            self.arm_retry_timer(dest, at.saturating_sub(now));
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    fn arm_retry_timer(&self, dest: &mut DestState, delay_ms: u64) {
        let weak = self.self_weak.clone();
        let dest_id = dest.id;
        let key = dest.request_key.clone();
        let handle = self.scheduler.schedule(
            Duration::from_millis(delay_ms),
            Box::new(move || {
                if let Some(core) = weak.upgrade() {
                    core.on_timer_fired(dest_id, key, KickoffOrigin::ScheduledRetry);
                }
            }),
        );
        dest.retry_timer = Some(handle);
    }

    /// Schedules a pre-expiry refresh after a success publication.
    ///
    /// The scheduled time is recorded as `retry_at` on the current state -
    /// the field carries whatever future work is next, retry or refresh.
    fn schedule_ttl_refresh(&self, dest: &mut DestState) {
        if self.opts.cache_ttl_ms == 0 || dest.listener_count == 0 {
            return;
        }
        let Some(retrieved_at) = dest.current.data_retrieved_at() else {
            return;
        };
        let refresh_at = (retrieved_at + self.opts.cache_ttl_ms)
            .saturating_sub(self.opts.refresh_before_expiry_ms);
        let now = self.clock.now_millis();
        if refresh_at <= now {
            return;
        }

        let weak = self.self_weak.clone();
        let dest_id = dest.id;
        let key = dest.request_key.clone();
        let handle = self.scheduler.schedule(
            Duration::from_millis(refresh_at - now),
            Box::new(move || {
                if let Some(core) = weak.upgrade() {
                    core.on_timer_fired(dest_id, key, KickoffOrigin::ScheduledRefresh);
                }
            }),
        );
        dest.refresh_timer = Some(handle);

        let mut next = dest.current.clone();
        next.set_retry_at(Some(refresh_at));
        self.transition(dest, next, TransitionReason::TtlRefreshScheduled);
    }

    /// Shared execution preconditions for retry and TTL-refresh timers.
    fn on_timer_fired(&self, dest_id: ContextId, scheduled_key: Option<String>, origin: KickoffOrigin) {
        {
            let mut state = self.state.lock().unwrap();
            let Some(dest) = state.dests.get_mut(&dest_id) else {
                return;
            };
            match origin {
                KickoffOrigin::ScheduledRetry => dest.retry_timer = None,
                _ => dest.refresh_timer = None,
            }

            // Listener gate: a destination nobody observes does no work.
            if dest.listener_count == 0 {
                if dest.current.retry_at().is_some() {
                    self.record_history(dest, TransitionReason::ListenerUnsubscribed);
                    dest.current.set_retry_at(None);
                    self.publish_state(dest);
                }
                return;
            }

            if dest.request_key != scheduled_key {
                tracing::debug!(
                    dest = %dest_id,
                    "request key moved since timer was armed; delegating to key change"
                );
            }
        }
        // Key equality and parameter resolution are re-checked inside
        // kickoff, which delegates to key-change handling on mismatch.
        let force = origin == KickoffOrigin::ScheduledRetry;
        self.kickoff(dest_id, force, origin);
    }

    // =========================================================================
    // Publication
    // =========================================================================

    fn snapshot_for(&self, dest: &DestState) -> AsyncRequestState {
        AsyncRequestState {
            state: dest.current.clone(),
            request_key: dest.request_key.clone(),
            has_listeners: dest.listener_count > 0,
            history: dest.history.snapshot(),
        }
    }

    fn publish_state(&self, dest: &DestState) {
        let Some(state_grip) = &self.state_grip else {
            return;
        };
        let Some(ctx) = dest.context.upgrade() else {
            return;
        };
        ctx.publish(state_grip.id(), Arc::new(self.snapshot_for(dest)));
    }

    fn publish_controller(&self, dest: &DestState, controller: TapController) {
        let Some(controller_grip) = &self.controller_grip else {
            return;
        };
        let Some(ctx) = dest.context.upgrade() else {
            return;
        };
        ctx.publish(controller_grip.id(), Arc::new(controller));
    }

    fn publish_updates(&self, dest: &DestState, updates: Vec<GripUpdate>) {
        let Some(ctx) = dest.context.upgrade() else {
            return;
        };
        for (grip, value) in updates {
            if self.provides.contains_key(&grip.id()) {
                ctx.publish(grip.id(), value);
            } else {
                tracing::warn!(grip = %grip.name(), "mapped update targets a grip the tap does not provide");
            }
        }
    }

    fn publish_output_defaults(&self, dest: &DestState) {
        let Some(ctx) = dest.context.upgrade() else {
            return;
        };
        for grip in self.provides.values() {
            ctx.publish(grip.id(), grip.default_value());
        }
    }

    /// Applies a state transition: records the state being left, swaps in
    /// the new one, and publishes a snapshot.
    fn transition(&self, dest: &mut DestState, next: RequestState, reason: TransitionReason) {
        let now = self.clock.now_millis();
        tracing::debug!(
            dest = %dest.id,
            from = dest.current.variant(),
            to = next.variant(),
            reason = reason.as_str(),
            "state transition"
        );
        let prev = std::mem::replace(&mut dest.current, next);
        dest.history.push(HistoryEntry {
            state: prev,
            timestamp: now,
            request_key: dest.request_key.clone(),
            reason,
        });
        self.publish_state(dest);
    }

    /// Records a history entry for the state currently in effect, without a
    /// variant change (abort records, listener gating).
    fn record_history(&self, dest: &mut DestState, reason: TransitionReason) {
        let now = self.clock.now_millis();
        dest.history.push(HistoryEntry {
            state: dest.current.clone(),
            timestamp: now,
            request_key: dest.request_key.clone(),
            reason,
        });
    }
}

impl<P, R> ControllerOps for TapCore<P, R>
where
    P: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn retry(&self, dest_id: ContextId, force: bool) {
        {
            let mut state = self.state.lock().unwrap();
            let Some(dest) = state.dests.get_mut(&dest_id) else {
                return;
            };
            if dest.listener_count == 0 {
                return;
            }
            dest.cancel_timers();
            dest.retry_attempt += 1;
        }
        self.kickoff(dest_id, force, KickoffOrigin::ManualRetry);
    }

    fn refresh(&self, dest_id: ContextId, force: bool) {
        {
            let mut state = self.state.lock().unwrap();
            let Some(dest) = state.dests.get_mut(&dest_id) else {
                return;
            };
            if dest.listener_count == 0 {
                return;
            }
            dest.cancel_timers();
        }
        self.kickoff(dest_id, force, KickoffOrigin::ManualRefresh);
    }

    fn cancel_retry(&self, dest_id: ContextId) {
        let mut state = self.state.lock().unwrap();
        let Some(dest) = state.dests.get_mut(&dest_id) else {
            return;
        };
        dest.cancel_timers();
        if dest.current.retry_at().is_some() {
            dest.current.set_retry_at(None);
            self.publish_state(dest);
        }
    }

    fn reset(&self, dest_id: ContextId) {
        let mut state = self.state.lock().unwrap();
        let Some(dest) = state.dests.get_mut(&dest_id) else {
            return;
        };
        dest.abort_inflight();
        dest.cancel_timers();
        dest.retry_attempt = 0;
        dest.history.clear();
        self.publish_output_defaults(dest);
        dest.current = RequestState::Idle;
        self.publish_state(dest);
        tracing::debug!(dest = %dest_id, "destination reset to idle");
    }
}

fn add_key_listeners(map: &mut HashMap<String, usize>, key: &Option<String>, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(key) = key {
        *map.entry(key.clone()).or_insert(0) += count;
    }
}

fn remove_key_listeners(map: &mut HashMap<String, usize>, key: &Option<String>, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(key) = key {
        if let Some(existing) = map.get_mut(key) {
            *existing = existing.saturating_sub(count);
            if *existing == 0 {
                map.remove(key);
            }
        }
    }
}
