//! Server-side transaction state machines.

pub mod invite;
pub mod non_invite;

pub use invite::{ServerInviteEvent, ServerInviteState, ServerInviteTransaction};
pub use non_invite::{ServerNonInviteEvent, ServerNonInviteState, ServerNonInviteTransaction};
