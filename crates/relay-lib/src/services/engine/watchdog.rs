// Stall Watchdog
//
// Tracks the last time the engine produced any output on stdout or stderr.
// The driver sleeps until `deadline()` and re-checks, so every touch simply
// pushes the deadline forward.

use std::time::Duration;
use tokio::time::Instant;

/// Stand-in for deadlines that do not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + after`, saturating to a far-future instant instead of overflowing
pub(crate) fn deadline_after(start: Instant, after: Duration) -> Instant {
    start
        .checked_add(after)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

#[derive(Debug, Clone)]
pub struct StallWatchdog {
    last_activity: Instant,
    window: Duration,
}

impl StallWatchdog {
    pub fn new(window: Duration) -> Self {
        Self {
            last_activity: Instant::now(),
            window,
        }
    }

    /// Record activity
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Instant at which the engine counts as stalled if nothing arrives
    pub fn deadline(&self) -> Instant {
        deadline_after(self.last_activity, self.window)
    }

    pub fn is_stalled(&self, now: Instant) -> bool {
        now >= self.deadline()
    }
}
