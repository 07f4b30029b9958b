//! Injectable time: clocks and timer scheduling.
//!
//! Every time read in the tap core goes through a [`Clock`] and every timer
//! through a [`Scheduler`], so request lifecycles can be driven by virtual
//! time in tests while production uses the system clock and tokio timers.

mod clock;
mod scheduler;

pub use clock::{Clock, ManualClock, Millis, SystemClock};
pub use scheduler::{Scheduler, TimerCallback, TimerHandle, TokioScheduler};
