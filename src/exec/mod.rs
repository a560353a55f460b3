//! The asynchronous execution core: cold emitters, type-erased value
//! boxes, stop-token cancellation, and the combinator layer that composes
//! them into pipelines.
//!
//! The wire client is built entirely from these pieces; nothing here knows
//! about MongoDB. See [`combine`] for the composition vocabulary and
//! [`future`] for `async`/`await` interop.

pub mod boxed;
pub mod combine;
pub mod emitter;
pub mod future;
pub mod stop;

pub use boxed::ValueBox;
pub use combine::{
    RaceOutcome, detach, detach_start, first_completed, first_where, just, just_status,
    just_value, schedule, schedule_later, tie, timeout, when_all,
};
pub use emitter::{Emitter, EmitterResult, Handler, Operation};
pub use stop::{StopCallback, StopSource, StopToken};
