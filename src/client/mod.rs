//! Client-side transaction state machines.

pub mod invite;
pub mod non_invite;

pub use invite::{ClientInviteEvent, ClientInviteState, ClientInviteTransaction};
pub use non_invite::{ClientNonInviteEvent, ClientNonInviteState, ClientNonInviteTransaction};
