use std::time::{Duration, Instant};

/// Identifier handed out by `add_timer`; unique and strictly increasing
/// within one reactor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) u64);

impl TimerId {
    /// The raw id value, always at least 1.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Scheduling state of a timer source.
///
/// A deadline that has passed stays due until the fire is consumed, so a
/// reactor that was busy elsewhere never loses one.
pub(crate) struct TimerState {
    pub(crate) id: TimerId,
    pub(crate) interval: Duration,
    pub(crate) repeat: bool,
    pub(crate) deadline: Instant,
}

impl TimerState {
    pub(crate) fn new(id: TimerId, interval: Duration, repeat: bool) -> Self {
        Self {
            id,
            interval,
            repeat,
            deadline: Instant::now() + interval,
        }
    }

    /// Push the deadline one interval past now.
    pub(crate) fn rearm(&mut self) {
        self.deadline = Instant::now() + self.interval;
    }

    /// Replace interval and repeat flag in place, re-arming relative to
    /// now. The id is untouched.
    pub(crate) fn reschedule(&mut self, interval: Duration, repeat: bool) {
        self.interval = interval;
        self.repeat = repeat;
        self.rearm();
    }

    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.deadline <= now
    }
}
