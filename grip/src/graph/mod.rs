//! Graph collaborator surface: typed keys and contexts.
//!
//! The full grip/context DAG (resolver cache, query system, framework
//! bindings) lives outside this crate. What taps need from it is small:
//! typed keys with default values ([`Grip`]), nodes that carry resolved
//! parameter values and receive published values ([`Context`]), and a
//! read-only view that resolves a tap's declared parameters against the
//! destination and home contexts ([`ParamView`]).

mod context;
mod grip;

pub use context::{Context, ContextId, ParamView};
pub use grip::{AnyGrip, Grip, GripId, GripValue};
