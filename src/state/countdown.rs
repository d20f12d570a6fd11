use std::time::{Duration, SystemTime};

/// Fixed-length round timer anchored on the server-assigned start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    duration: Duration,
}

impl Countdown {
    /// Countdown of `duration` per round.
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Full length of the round.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Time left at `now`, clamped to `[0, duration]`. A start time ahead of the
    /// local clock counts as no time elapsed.
    pub fn remaining_at(&self, start: SystemTime, now: SystemTime) -> Duration {
        let elapsed = now.duration_since(start).unwrap_or_default();
        self.duration.saturating_sub(elapsed)
    }

    /// Whether nothing remains at `now`.
    pub fn is_expired(&self, start: SystemTime, now: SystemTime) -> bool {
        self.remaining_at(start, now).is_zero()
    }
}

/// Whole seconds shown to players, rounded to the nearest second.
pub fn display_seconds(remaining: Duration) -> u64 {
    (remaining.as_millis() as u64 + 500) / 1_000
}
