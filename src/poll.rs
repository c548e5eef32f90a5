// ─────────────────────────────────────────────────────────────────────────────
//  openshock-autoflasher :: poll  —  adaptive poll interval
//
//  Start fast; after `poll_threshold` quiet ticks grow the interval by
//  `poll_step` per tick up to `poll_max`.  Any detection snaps back to fast.
// ─────────────────────────────────────────────────────────────────────────────

use std::time::Duration;

use crate::constants::Timing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBackoff {
    pub interval:   Duration,
    pub idle_ticks: u32,
}

impl PollBackoff {
    pub fn start(timing: &Timing) -> Self {
        Self { interval: timing.poll_initial, idle_ticks: 0 }
    }

    /// State for the next tick given whether this tick found new devices.
    #[must_use]
    pub fn step(self, found_devices: bool, timing: &Timing) -> Self {
        if found_devices {
            return Self::start(timing);
        }

        let idle_ticks = self.idle_ticks.saturating_add(1);
        let interval = if idle_ticks > timing.poll_threshold {
            (self.interval + timing.poll_step).min(timing.poll_max)
        } else {
            self.interval
        };
        Self { interval, idle_ticks }
    }
}
