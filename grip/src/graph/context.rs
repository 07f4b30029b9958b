//! Contexts: nodes where grips resolve to values.
//!
//! A [`Context`] plays two roles at the tap boundary. As a *destination* it
//! carries consumer-set parameter values and receives the values a tap
//! publishes for it. As a *home* it carries tap-level parameters shared by
//! every destination. Both sides are plain grip-keyed maps; the hierarchy
//! walk and subscription fan-out belong to the surrounding graph runtime.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::grip::{Grip, GripId, GripValue};

/// Global counter for generating unique context IDs.
static CONTEXT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a context.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(CONTEXT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextId({})", self.0)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
struct ContextInner {
    /// Parameter values set by the consumer side.
    params: HashMap<GripId, GripValue>,
    /// Values published by taps for this context.
    published: HashMap<GripId, GripValue>,
}

/// A node in the scope graph where grips are resolved to values.
pub struct Context {
    id: ContextId,
    name: String,
    inner: Mutex<ContextInner>,
}

impl Context {
    /// Creates a new context with the given debug name.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: ContextId::next(),
            name: name.into(),
            inner: Mutex::new(ContextInner::default()),
        })
    }

    /// Returns the context's unique identifier.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Returns the context's debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets a parameter value on this context.
    pub fn set_param<T: Clone + Send + Sync + 'static>(&self, grip: &Grip<T>, value: T) {
        let mut inner = self.inner.lock().unwrap();
        inner.params.insert(grip.id(), Arc::new(value));
    }

    /// Removes a parameter value, falling back to the grip default.
    pub fn clear_param<T: Clone + Send + Sync + 'static>(&self, grip: &Grip<T>) {
        let mut inner = self.inner.lock().unwrap();
        inner.params.remove(&grip.id());
    }

    /// Reads a parameter value, if one has been set.
    pub fn param<T: Clone + Send + Sync + 'static>(&self, grip: &Grip<T>) -> Option<T> {
        let inner = self.inner.lock().unwrap();
        inner
            .params
            .get(&grip.id())
            .cloned()
            .and_then(downcast_value)
    }

    /// Publishes an erased value on a grip channel for this context.
    ///
    /// Values are delivered to this context only. Taps call this;
    /// consumers read with [`Context::get`].
    pub fn publish(&self, grip_id: GripId, value: GripValue) {
        let mut inner = self.inner.lock().unwrap();
        inner.published.insert(grip_id, value);
    }

    /// Reads the latest published value on a grip, if any.
    pub fn published<T: Clone + Send + Sync + 'static>(&self, grip: &Grip<T>) -> Option<T> {
        let inner = self.inner.lock().unwrap();
        inner
            .published
            .get(&grip.id())
            .cloned()
            .and_then(downcast_value)
    }

    /// Reads the latest published value on a grip, falling back to the default.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, grip: &Grip<T>) -> T {
        self.published(grip).unwrap_or_else(|| grip.default_value())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn downcast_value<T: Clone + Send + Sync + 'static>(value: GripValue) -> Option<T> {
    value.downcast::<T>().ok().map(|arc| (*arc).clone())
}

/// Read-only view resolving a tap's declared parameters.
///
/// Destination-scoped grips resolve on the destination context; home-scoped
/// grips resolve on the tap's home context. Both fall back to grip defaults,
/// so a parameter closure never has to handle a missing channel.
pub struct ParamView<'a> {
    dest: &'a Context,
    home: Option<&'a Arc<Context>>,
}

impl<'a> ParamView<'a> {
    pub(crate) fn new(dest: &'a Context, home: Option<&'a Arc<Context>>) -> Self {
        Self { dest, home }
    }

    /// Resolves a destination-scoped parameter, falling back to the default.
    pub fn dest<T: Clone + Send + Sync + 'static>(&self, grip: &Grip<T>) -> T {
        self.dest.param(grip).unwrap_or_else(|| grip.default_value())
    }

    /// Resolves a destination-scoped parameter without the default fallback.
    pub fn dest_opt<T: Clone + Send + Sync + 'static>(&self, grip: &Grip<T>) -> Option<T> {
        self.dest.param(grip)
    }

    /// Resolves a home-scoped parameter, falling back to the default.
    pub fn home<T: Clone + Send + Sync + 'static>(&self, grip: &Grip<T>) -> T {
        self.home_opt(grip).unwrap_or_else(|| grip.default_value())
    }

    /// Resolves a home-scoped parameter without the default fallback.
    pub fn home_opt<T: Clone + Send + Sync + 'static>(&self, grip: &Grip<T>) -> Option<T> {
        self.home.and_then(|home| home.param(grip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ids_unique() {
        let a = Context::new("a");
        let b = Context::new("b");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_param_set_and_read() {
        let ctx = Context::new("dest");
        let grip: Grip<u64> = Grip::new("user_id", 0);

        assert_eq!(ctx.param(&grip), None);
        ctx.set_param(&grip, 42);
        assert_eq!(ctx.param(&grip), Some(42));
    }

    #[test]
    fn test_clear_param_restores_default() {
        let ctx = Context::new("dest");
        let grip: Grip<u64> = Grip::new("user_id", 0);

        ctx.set_param(&grip, 42);
        ctx.clear_param(&grip);
        assert_eq!(ctx.param(&grip), None);
    }

    #[test]
    fn test_publish_and_get() {
        let ctx = Context::new("dest");
        let grip: Grip<String> = Grip::new("label", "default".to_string());

        assert_eq!(ctx.get(&grip), "default");
        ctx.publish(grip.id(), grip.value("published".to_string()));
        assert_eq!(ctx.get(&grip), "published");
        assert_eq!(ctx.published(&grip), Some("published".to_string()));
    }

    #[test]
    fn test_publish_overwrites_previous_value() {
        let ctx = Context::new("dest");
        let grip: Grip<u32> = Grip::new("count", 0);

        ctx.publish(grip.id(), grip.value(1));
        ctx.publish(grip.id(), grip.value(2));
        assert_eq!(ctx.get(&grip), 2);
    }

    #[test]
    fn test_published_values_do_not_leak_across_contexts() {
        let a = Context::new("a");
        let b = Context::new("b");
        let grip: Grip<u32> = Grip::new("count", 0);

        a.publish(grip.id(), grip.value(5));
        assert_eq!(a.get(&grip), 5);
        assert_eq!(b.get(&grip), 0);
    }

    #[test]
    fn test_param_view_resolution_order() {
        let dest = Context::new("dest");
        let home = Context::new("home");
        let dest_grip: Grip<u32> = Grip::new("page", 1);
        let home_grip: Grip<String> = Grip::new("endpoint", "prod".to_string());

        dest.set_param(&dest_grip, 3);
        home.set_param(&home_grip, "staging".to_string());

        let view = ParamView::new(&dest, Some(&home));
        assert_eq!(view.dest(&dest_grip), 3);
        assert_eq!(view.home(&home_grip), "staging");
        // Home-scoped grips never read the destination.
        assert_eq!(view.home_opt(&dest_grip), None);
    }

    #[test]
    fn test_param_view_without_home_falls_back_to_defaults() {
        let dest = Context::new("dest");
        let grip: Grip<String> = Grip::new("endpoint", "prod".to_string());

        let view = ParamView::new(&dest, None);
        assert_eq!(view.home(&grip), "prod");
        assert_eq!(view.home_opt(&grip), None);
    }
}
