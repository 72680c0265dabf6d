// Copyright 2024 Oxide Computer Company

use quanta::{Clock as QuantaClock, Instant};
use std::time::{SystemTime, UNIX_EPOCH};

/// Monotonic clock started at switch construction. Read-only thereafter;
/// every worker thread shares the same origin so that `enq_timestamp` /
/// `deq_timedelta` arithmetic is consistent across threads.
#[derive(Clone)]
pub struct SwitchClock {
    clock: QuantaClock,
    start: Instant,
}

impl SwitchClock {
    pub fn new() -> Self {
        let clock = QuantaClock::new();
        let start = clock.now();
        Self { clock, start }
    }

    /// Microseconds elapsed since this clock was constructed.
    pub fn elapsed_us(&self) -> u64 {
        self.clock.now().duration_since(self.start).as_micros() as u64
    }

    /// Wall-clock microseconds since the Unix epoch.
    pub fn since_epoch_us(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64
    }
}

impl Default for SwitchClock {
    fn default() -> Self {
        Self::new()
    }
}
