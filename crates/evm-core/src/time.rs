//! Where: block timestamps for mining and calls / What: wall clock plus a
//! user-set offset, a one-shot override and an optional fixed interval /
//! Why: time cheatcodes must move the chain without touching the host clock.

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_sec() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockClock {
    /// Seconds added to the wall clock; may be negative after `setTime`.
    offset: i128,
    next_timestamp: Option<u64>,
    interval: Option<u64>,
}

impl BlockClock {
    pub fn new(interval: Option<u64>) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    pub fn now(&self) -> u64 {
        shift(now_sec(), self.offset)
    }

    pub fn offset(&self) -> i128 {
        self.offset
    }

    pub fn interval(&self) -> Option<u64> {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Option<u64>) {
        self.interval = interval;
    }

    pub fn next_timestamp(&self) -> Option<u64> {
        self.next_timestamp
    }

    pub fn set_next_timestamp(&mut self, timestamp: u64) {
        self.next_timestamp = Some(timestamp);
    }

    /// Moves the clock so that `now()` returns `timestamp`.
    pub fn set_time(&mut self, timestamp: u64) {
        self.offset = i128::from(timestamp) - i128::from(now_sec());
    }

    pub fn increase_time(&mut self, seconds: u64) {
        self.offset = self.offset.saturating_add(i128::from(seconds));
    }

    /// Timestamp for a block on top of `parent_timestamp`, consuming any
    /// one-shot override. Always strictly after the parent.
    pub fn next_block_timestamp(&mut self, parent_timestamp: u64) -> u64 {
        let floor = parent_timestamp.saturating_add(1);
        if let Some(explicit) = self.next_timestamp.take() {
            // Later blocks continue from the chosen time.
            self.set_time(explicit);
            return explicit.max(floor);
        }
        match self.interval {
            Some(interval) => parent_timestamp.saturating_add(interval.max(1)),
            None => self.now().max(floor),
        }
    }
}

fn shift(base: u64, offset: i128) -> u64 {
    let shifted = i128::from(base).saturating_add(offset).max(0);
    u64::try_from(shifted).unwrap_or(u64::MAX)
}
