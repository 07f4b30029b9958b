//! Typed keys for data channels.
//!
//! A [`Grip`] is a cheap-to-clone identifier for a data channel. It carries a
//! debug name and a default value; consumers that read a channel nobody has
//! published to see the default. Two grips are the same channel iff they share
//! a [`GripId`] - cloning a grip preserves identity, constructing a new one
//! (even with the same name) does not.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Global counter for generating unique grip IDs.
static GRIP_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a grip.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GripId(u64);

impl GripId {
    fn next() -> Self {
        Self(GRIP_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for GripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GripId({})", self.0)
    }
}

impl fmt::Display for GripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-erased value carried on a grip channel.
///
/// Contexts store published values erased; typed reads downcast back through
/// the grip that named the channel.
pub type GripValue = Arc<dyn Any + Send + Sync>;

struct GripInner<T> {
    id: GripId,
    name: String,
    default: T,
}

/// A typed, immutable identifier for a data channel.
///
/// Clones share identity with the original. The default value is returned by
/// [`Context::get`](super::Context::get) when nothing has been published.
pub struct Grip<T> {
    inner: Arc<GripInner<T>>,
}

impl<T> Clone for Grip<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Grip<T> {
    /// Creates a new grip with the given debug name and default value.
    pub fn new(name: impl Into<String>, default: T) -> Self {
        Self {
            inner: Arc::new(GripInner {
                id: GripId::next(),
                name: name.into(),
                default,
            }),
        }
    }

    /// Returns the grip's unique identifier.
    pub fn id(&self) -> GripId {
        self.inner.id
    }

    /// Returns the grip's debug name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns a clone of the default value.
    pub fn default_value(&self) -> T {
        self.inner.default.clone()
    }

    /// Erases the grip's value type for heterogeneous storage.
    pub fn erased(&self) -> AnyGrip {
        AnyGrip {
            id: self.inner.id,
            name: Arc::from(self.inner.name.as_str()),
            default: Arc::new(self.inner.default.clone()),
        }
    }

    /// Wraps a value for publication on this grip's channel.
    pub fn value(&self, value: T) -> GripValue {
        Arc::new(value)
    }
}

impl<T> fmt::Debug for Grip<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Grip({}, {:?})", self.inner.name, self.inner.id)
    }
}

impl<T> PartialEq for Grip<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<T> Eq for Grip<T> {}

/// Type-erased grip: identity, name, and erased default value.
///
/// Used wherever grips of different value types mix - a tap's `provides`
/// set, connect/disconnect signals, and output publication lists.
#[derive(Clone)]
pub struct AnyGrip {
    id: GripId,
    name: Arc<str>,
    default: GripValue,
}

impl AnyGrip {
    /// Returns the grip's unique identifier.
    pub fn id(&self) -> GripId {
        self.id
    }

    /// Returns the grip's debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the erased default value.
    pub fn default_value(&self) -> GripValue {
        Arc::clone(&self.default)
    }
}

impl fmt::Debug for AnyGrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyGrip({}, {:?})", self.name, self.id)
    }
}

impl PartialEq for AnyGrip {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AnyGrip {}

impl std::hash::Hash for AnyGrip {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: Clone + Send + Sync + 'static> From<&Grip<T>> for AnyGrip {
    fn from(grip: &Grip<T>) -> Self {
        grip.erased()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grip_identity_survives_clone() {
        let grip: Grip<u32> = Grip::new("count", 0);
        let clone = grip.clone();
        assert_eq!(grip, clone);
        assert_eq!(grip.id(), clone.id());
    }

    #[test]
    fn test_grips_with_same_name_are_distinct() {
        let a: Grip<u32> = Grip::new("count", 0);
        let b: Grip<u32> = Grip::new("count", 0);
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_grip_default_value() {
        let grip: Grip<String> = Grip::new("label", "n/a".to_string());
        assert_eq!(grip.default_value(), "n/a");
    }

    #[test]
    fn test_erased_grip_preserves_identity() {
        let grip: Grip<u32> = Grip::new("count", 7);
        let erased = grip.erased();
        assert_eq!(erased.id(), grip.id());
        assert_eq!(erased.name(), "count");
    }

    #[test]
    fn test_erased_default_downcasts() {
        let grip: Grip<u32> = Grip::new("count", 7);
        let default = grip.erased().default_value();
        let value = default.downcast::<u32>().expect("u32 default");
        assert_eq!(*value, 7);
    }

    #[test]
    fn test_any_grip_equality_by_id() {
        let grip: Grip<u32> = Grip::new("count", 0);
        let a = grip.erased();
        let b = AnyGrip::from(&grip);
        assert_eq!(a, b);

        let other: Grip<u32> = Grip::new("count", 0);
        assert_ne!(a, other.erased());
    }
}
