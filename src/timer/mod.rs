//! Transaction timers: identities and durations ([`types`]) and the scheduling
//! primitive ([`service`]). The state machines decide *which* timer to arm and
//! for how long; the stack turns those decisions into scheduled callbacks that
//! re-enter its command loop with a [`TimerPolicy`] record.

pub mod service;
pub mod types;

pub use service::{TimerHandle, TimerService, TokioTimerService};
pub use types::{TimerKind, TimerPolicy, TimerSettings};
