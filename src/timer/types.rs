//! Timer identities, durations, and the policy record carried by every armed
//! timer.
//!
//! RFC 3261 section 17 defines the transaction timers:
//!
//! - Timer A/B/D: INVITE client retransmit, give-up, absorption wait
//! - Timer E/F/K: non-INVITE client retransmit, give-up, absorption wait
//! - Timer G/H/I: INVITE server retransmit, ACK wait, absorption wait
//! - Timer J: non-INVITE server absorption wait
//!
//! One extra timer exists outside that table: the cancel timer of RFC 3261
//! section 9.1, armed on an INVITE client transaction when the TU issues a
//! CANCEL for it.

use std::fmt;
use std::time::Duration;

use crate::transaction::{TransactionId, TransactionKey, TransactionRole};

/// The timers referenced by the four transaction state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    A,
    B,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    /// RFC 3261 section 9.1: give-up wait for the 487 after a CANCEL.
    Cancel,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimerKind::A => "A",
            TimerKind::B => "B",
            TimerKind::D => "D",
            TimerKind::E => "E",
            TimerKind::F => "F",
            TimerKind::G => "G",
            TimerKind::H => "H",
            TimerKind::I => "I",
            TimerKind::J => "J",
            TimerKind::K => "K",
            TimerKind::Cancel => "Cancel",
        };
        f.write_str(s)
    }
}

/// Base durations from RFC 3261 Table 4, from which every per-timer duration
/// is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    /// Round-trip time estimate. Default 500 ms.
    pub t1: Duration,
    /// Maximum retransmission interval. Default 4 s.
    pub t2: Duration,
    /// Maximum lifetime of a message in the network. Default 5 s.
    pub t4: Duration,
    /// Timer D wait in Completed for an INVITE client. Default 32 s.
    pub timer_d: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        TimerSettings {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            timer_d: Duration::from_secs(32),
        }
    }
}

impl TimerSettings {
    /// 64*T1: the overall give-up used by Timers B, F, H, J and the cancel
    /// timer.
    pub fn give_up(&self) -> Duration {
        self.t1.saturating_mul(64)
    }

    /// Absorption wait in Completed (Timer K) or Confirmed (Timer I): T4 on
    /// unreliable transports, zero on reliable ones.
    pub fn absorption(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.t4
        }
    }

    /// Timer D wait: 32 s on unreliable transports, zero on reliable ones.
    pub fn wait_d(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.timer_d
        }
    }

    /// Timer J wait: 64*T1 on unreliable transports, zero on reliable ones.
    pub fn wait_j(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.give_up()
        }
    }
}

/// The record carried by every armed timer instead of a capturing closure.
/// When the timer fires, this re-enters the stack through its single command
/// loop, which re-validates the owning transaction's identity and generation
/// before acting. A cancelled or superseded timer is structurally a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerPolicy {
    pub key: TransactionKey,
    pub role: TransactionRole,
    pub kind: TimerKind,
    pub transaction_id: TransactionId,
    /// Arming generation within the owning transaction; bumped on every arm,
    /// compared on fire.
    pub generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_durations_follow_table_4() {
        let settings = TimerSettings::default();
        assert_eq!(settings.give_up(), Duration::from_secs(32));
        assert_eq!(settings.absorption(false), Duration::from_secs(5));
        assert_eq!(settings.absorption(true), Duration::ZERO);
        assert_eq!(settings.wait_d(false), Duration::from_secs(32));
        assert_eq!(settings.wait_d(true), Duration::ZERO);
        assert_eq!(settings.wait_j(false), Duration::from_secs(32));
        assert_eq!(settings.wait_j(true), Duration::ZERO);
    }
}
