//! Clock Host (SPEC_FULL.md §4.J).

use crate::config::Config;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Wall-clock reading as `(seconds, nanoseconds)` since the Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WallTime {
    pub seconds: u64,
    pub nanoseconds: u32,
}

pub struct ClockHost {
    boot: Instant,
    poll_interval: Duration,
}

impl ClockHost {
    pub fn new(config: &Config) -> Self {
        ClockHost {
            boot: Instant::now(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    pub fn wall_now(&self) -> WallTime {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        WallTime {
            seconds: since_epoch.as_secs(),
            nanoseconds: since_epoch.subsec_nanos(),
        }
    }

    /// Process-boot-relative monotonic reading, in nanoseconds.
    pub fn monotonic_now(&self) -> u64 {
        self.boot.elapsed().as_nanos() as u64
    }

    /// Blocks the calling thread until `duration` has elapsed, re-checking
    /// in small slices so the wait stays cooperative in environments
    /// without real suspension (§4.J).
    pub fn subscribe_duration(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}
