//! Construction surface for async taps.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cache::{CachePolicy, RequestCache};
use crate::graph::{AnyGrip, Grip, GripValue, ParamView};
use crate::time::{Clock, Millis, Scheduler, SystemClock, TokioScheduler};

use super::controller::TapController;
use super::retry::RetryConfig;
use super::runner::{TapConfig, TapCore};
use super::state::{AsyncRequestState, RequestError};
use super::AsyncTap;

/// One output publication: a grip and the value to carry on it.
pub type GripUpdate = (AnyGrip, GripValue);

/// Resolves a destination's parameters from the graph.
pub type ResolveParamsFn<P> = Arc<dyn for<'a> Fn(&ParamView<'a>) -> P + Send + Sync>;

/// Derives the request fingerprint from resolved parameters.
///
/// `None` means the parameters are unresolved: the destination idles and no
/// fetch is made.
pub type RequestKeyFn<P> = Arc<dyn Fn(&P) -> Option<String> + Send + Sync>;

/// Performs the external fetch.
///
/// Receives a cancellation token it should observe to release resources
/// promptly; late completions are discarded by the runner regardless.
pub type FetchFn<P, R> =
    Arc<dyn Fn(P, CancellationToken) -> BoxFuture<'static, Result<R, RequestError>> + Send + Sync>;

/// Maps a fetch result onto output-grip publications.
pub type MapResultFn<R> = Arc<dyn Fn(&R) -> Result<Vec<GripUpdate>, RequestError> + Send + Sync>;

/// Behavioural options for an async tap.
#[derive(Clone)]
pub struct TapOptions {
    /// TTL applied to cached results (default: 0 = expire immediately,
    /// which disables TTL refresh scheduling but keeps data available for
    /// stale-while-revalidate).
    pub cache_ttl_ms: Millis,
    /// How long before cache expiry a refresh is scheduled (default: 0).
    pub refresh_before_expiry_ms: Millis,
    /// Discard completions that are not the latest request (default: true).
    pub latest_only: bool,
    /// History ring capacity (default: 10; 0 disables).
    pub history_size: usize,
    /// Retry policy for failed fetches.
    pub retry: RetryConfig,
}

impl Default for TapOptions {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 0,
            refresh_before_expiry_ms: 0,
            latest_only: true,
            history_size: 10,
            retry: RetryConfig::default(),
        }
    }
}

/// Why a tap could not be built.
#[derive(Debug, Error)]
pub enum TapBuildError {
    /// No output grips were declared.
    #[error("async tap declares no output grips")]
    NoOutputGrips,

    /// No parameter resolver was provided.
    #[error("async tap has no parameter resolver")]
    MissingParamsResolver,

    /// No request-key function was provided.
    #[error("async tap has no request key function")]
    MissingRequestKey,

    /// No fetcher was provided.
    #[error("async tap has no fetcher")]
    MissingFetcher,

    /// No result mapper was provided.
    #[error("async tap has no result mapper")]
    MissingMapResult,
}

/// Builder for [`AsyncTap`].
///
/// `P` is the resolved parameter type, `R` the fetch result type.
pub struct AsyncTapBuilder<P, R> {
    pub(crate) provides: Vec<AnyGrip>,
    pub(crate) state_grip: Option<Grip<AsyncRequestState>>,
    pub(crate) controller_grip: Option<Grip<TapController>>,
    pub(crate) dest_params: Vec<AnyGrip>,
    pub(crate) home_params: Vec<AnyGrip>,
    pub(crate) resolve_params: Option<ResolveParamsFn<P>>,
    pub(crate) request_key_of: Option<RequestKeyFn<P>>,
    pub(crate) fetcher: Option<FetchFn<P, R>>,
    pub(crate) map_result: Option<MapResultFn<R>>,
    pub(crate) cache: Option<Arc<RequestCache<R>>>,
    pub(crate) cache_policy: CachePolicy,
    pub(crate) options: TapOptions,
    pub(crate) clock: Option<Arc<dyn Clock>>,
    pub(crate) scheduler: Option<Arc<dyn Scheduler>>,
}

impl<P, R> Default for AsyncTapBuilder<P, R> {
    fn default() -> Self {
        Self {
            provides: Vec::new(),
            state_grip: None,
            controller_grip: None,
            dest_params: Vec::new(),
            home_params: Vec::new(),
            resolve_params: None,
            request_key_of: None,
            fetcher: None,
            map_result: None,
            cache: None,
            cache_policy: CachePolicy::default(),
            options: TapOptions::default(),
            clock: None,
            scheduler: None,
        }
    }
}

impl<P, R> AsyncTapBuilder<P, R>
where
    P: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Declares an output grip the tap provides.
    pub fn provide<T: Clone + Send + Sync + 'static>(mut self, grip: &Grip<T>) -> Self {
        self.provides.push(grip.erased());
        self
    }

    /// Declares several output grips at once.
    pub fn provides(mut self, grips: impl IntoIterator<Item = AnyGrip>) -> Self {
        self.provides.extend(grips);
        self
    }

    /// Publishes lifecycle snapshots on the given grip.
    pub fn state_grip(mut self, grip: &Grip<AsyncRequestState>) -> Self {
        self.state_grip = Some(grip.clone());
        self
    }

    /// Publishes the per-destination controller on the given grip.
    pub fn controller_grip(mut self, grip: &Grip<TapController>) -> Self {
        self.controller_grip = Some(grip.clone());
        self
    }

    /// Declares a destination-scoped parameter grip.
    pub fn dest_param<T: Clone + Send + Sync + 'static>(mut self, grip: &Grip<T>) -> Self {
        self.dest_params.push(grip.erased());
        self
    }

    /// Declares a home-scoped parameter grip.
    pub fn home_param<T: Clone + Send + Sync + 'static>(mut self, grip: &Grip<T>) -> Self {
        self.home_params.push(grip.erased());
        self
    }

    /// Sets the parameter resolver.
    pub fn resolve_params(
        mut self,
        resolve: impl for<'a> Fn(&ParamView<'a>) -> P + Send + Sync + 'static,
    ) -> Self {
        self.resolve_params = Some(Arc::new(resolve));
        self
    }

    /// Sets the request-key function.
    pub fn request_key_of(
        mut self,
        key_of: impl Fn(&P) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.request_key_of = Some(Arc::new(key_of));
        self
    }

    /// Sets the fetcher.
    pub fn fetcher<F, Fut>(mut self, fetch: F) -> Self
    where
        F: Fn(P, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RequestError>> + Send + 'static,
    {
        self.fetcher = Some(Arc::new(move |params, cancel| fetch(params, cancel).boxed()));
        self
    }

    /// Sets the result mapper.
    pub fn map_result(
        mut self,
        map: impl Fn(&R) -> Result<Vec<GripUpdate>, RequestError> + Send + Sync + 'static,
    ) -> Self {
        self.map_result = Some(Arc::new(map));
        self
    }

    /// Shares an existing request cache instead of building a per-tap one.
    pub fn cache(mut self, cache: Arc<RequestCache<R>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the sizing policy for the per-tap cache.
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Sets the TTL applied to cached results.
    pub fn cache_ttl_ms(mut self, ttl: Millis) -> Self {
        self.options.cache_ttl_ms = ttl;
        self
    }

    /// Sets how long before expiry a TTL refresh is scheduled.
    pub fn refresh_before_expiry_ms(mut self, margin: Millis) -> Self {
        self.options.refresh_before_expiry_ms = margin;
        self
    }

    /// Sets whether stale completions are discarded.
    pub fn latest_only(mut self, latest_only: bool) -> Self {
        self.options.latest_only = latest_only;
        self
    }

    /// Sets the history ring capacity.
    pub fn history_size(mut self, size: usize) -> Self {
        self.options.history_size = size;
        self
    }

    /// Sets the retry policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.options.retry = retry;
        self
    }

    /// Injects a clock. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Injects a timer scheduler. Defaults to [`TokioScheduler`].
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Builds the tap, validating that all required pieces are present.
    pub fn build(self) -> Result<AsyncTap<P, R>, TapBuildError> {
        if self.provides.is_empty() {
            return Err(TapBuildError::NoOutputGrips);
        }
        let resolve_params = self
            .resolve_params
            .ok_or(TapBuildError::MissingParamsResolver)?;
        let request_key_of = self.request_key_of.ok_or(TapBuildError::MissingRequestKey)?;
        let fetcher = self.fetcher.ok_or(TapBuildError::MissingFetcher)?;
        let map_result = self.map_result.ok_or(TapBuildError::MissingMapResult)?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(TokioScheduler) as Arc<dyn Scheduler>);
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(RequestCache::new(self.cache_policy, Arc::clone(&clock))));

        let core = TapCore::new(TapConfig {
            provides: self.provides,
            state_grip: self.state_grip,
            controller_grip: self.controller_grip,
            dest_params: self.dest_params,
            home_params: self.home_params,
            resolve_params,
            request_key_of,
            fetcher,
            map_result,
            cache,
            options: self.options,
            clock,
            scheduler,
        });

        Ok(AsyncTap::from_core(core))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_builder() -> AsyncTapBuilder<Option<u64>, u64> {
        let out: Grip<u64> = Grip::new("out", 0);
        let out_clone = out.clone();
        AsyncTapBuilder::default()
            .provide(&out)
            .resolve_params(|_view| None)
            .request_key_of(|id: &Option<u64>| id.map(|id| format!("item:{id}")))
            .fetcher(|_id, _cancel| async { Ok(1u64) })
            .map_result(move |value| Ok(vec![(out_clone.erased(), out.value(*value))]))
    }

    #[test]
    fn test_build_with_minimal_inputs() {
        assert!(minimal_builder().build().is_ok());
    }

    #[test]
    fn test_build_requires_output_grips() {
        let builder: AsyncTapBuilder<Option<u64>, u64> = AsyncTapBuilder::default()
            .resolve_params(|_view| None)
            .request_key_of(|_: &Option<u64>| None)
            .fetcher(|_id, _cancel| async { Ok(1u64) })
            .map_result(|_value| Ok(vec![]));
        assert!(matches!(
            builder.build(),
            Err(TapBuildError::NoOutputGrips)
        ));
    }

    #[test]
    fn test_build_requires_fetcher() {
        let out: Grip<u64> = Grip::new("out", 0);
        let builder: AsyncTapBuilder<Option<u64>, u64> = AsyncTapBuilder::default()
            .provide(&out)
            .resolve_params(|_view| None)
            .request_key_of(|_: &Option<u64>| None)
            .map_result(|_value| Ok(vec![]));
        assert!(matches!(builder.build(), Err(TapBuildError::MissingFetcher)));
    }

    #[test]
    fn test_options_defaults() {
        let options = TapOptions::default();
        assert_eq!(options.cache_ttl_ms, 0);
        assert_eq!(options.refresh_before_expiry_ms, 0);
        assert!(options.latest_only);
        assert_eq!(options.history_size, 10);
        assert_eq!(options.retry.max_retries, 3);
    }
}
