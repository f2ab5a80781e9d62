//! Stack configuration. Loading from files or the environment is the
//! embedding application's concern; this is the plain settings struct the
//! stack is constructed with.

use crate::timer::TimerSettings;

/// Settings for a [`crate::manager::TransactionStack`].
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Base timer durations (RFC 3261 Table 4).
    pub timers: TimerSettings,
    /// Answer forked duplicates of a pending request with 482 Loop Detected
    /// (RFC 3261 section 8.2.2.2). Applies to any request without a To tag.
    pub auto_482_on_merged_requests: bool,
    /// Capacity of the TU event channel.
    pub event_channel_capacity: usize,
    /// Capacity of the internal command channel (timer firings).
    pub command_channel_capacity: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            timers: TimerSettings::default(),
            auto_482_on_merged_requests: true,
            event_channel_capacity: 128,
            command_channel_capacity: 128,
        }
    }
}
