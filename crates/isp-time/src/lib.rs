//! Virtual time and timer scheduling primitives for ISP device models.
//!
//! Devices use **guest virtual time** (monotonic nanoseconds) as the single
//! source of truth for frame timing. In production the clock is derived from a
//! monotonic host clock, while unit tests drive the system deterministically
//! via [`ManualClock`].

#![forbid(unsafe_code)]

mod clock;
mod timer_queue;

pub use clock::{Clock, ManualClock, NullClock, StdClock};
pub use timer_queue::{TimerId, TimerQueue, DEFAULT_MAX_TIMERS};
