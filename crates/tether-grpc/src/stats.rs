// ABOUTME: Sliding-window byte counters for channel traffic.
// ABOUTME: RateCounter approximates bytes/second from 100ms buckets; ChannelStats pairs send and receive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Number of sub-window buckets in the ring.
pub const BUCKET_COUNT: usize = 10;

/// Width of a single bucket.
pub const BUCKET_WIDTH: Duration = Duration::from_millis(100);

/// Trailing window covered by the whole ring.
pub const WINDOW: Duration = Duration::from_millis(1000);

#[derive(Debug)]
struct Ring {
    buckets: [u64; BUCKET_COUNT],
    cursor: usize,
    last_touch: Option<Instant>,
}

impl Ring {
    const fn new() -> Self {
        Self {
            buckets: [0; BUCKET_COUNT],
            cursor: 0,
            last_touch: None,
        }
    }

    /// Evict buckets that fell out of the window, then accumulate into the cursor bucket.
    fn touch(&mut self, now: Instant, amount: u64) {
        match self.last_touch {
            None => self.last_touch = Some(now),
            Some(prev) => {
                let elapsed = now.saturating_duration_since(prev);
                if elapsed > WINDOW {
                    self.buckets = [0; BUCKET_COUNT];
                    self.cursor = 0;
                    self.last_touch = Some(now);
                } else if elapsed > BUCKET_WIDTH {
                    let steps = (elapsed.as_millis() / BUCKET_WIDTH.as_millis()) as usize;
                    for _ in 0..steps {
                        self.cursor = (self.cursor + 1) % BUCKET_COUNT;
                        self.buckets[self.cursor] = 0;
                    }
                    self.last_touch = Some(now);
                }
            }
        }

        self.buckets[self.cursor] = self.buckets[self.cursor].saturating_add(amount);
    }

    fn sum(&self) -> u64 {
        self.buckets.iter().sum()
    }
}

/// Fixed-window sliding counter.
///
/// Keeps ten 100ms buckets instead of per-event timestamps, so every update is O(1)
/// and memory is bounded. [`RateCounter::read`] returns the approximate amount added
/// during the trailing second.
#[derive(Debug)]
pub struct RateCounter {
    ring: Mutex<Ring>,
    total: AtomicU64,
}

impl Default for RateCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateCounter {
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(Ring::new()),
            total: AtomicU64::new(0),
        }
    }

    /// Record `amount` at the current instant.
    pub fn add_value(&self, amount: u64) {
        self.add_value_at(amount, Instant::now());
    }

    /// Record `amount` as if it happened at `now`.
    pub fn add_value_at(&self, amount: u64, now: Instant) {
        self.total.fetch_add(amount, Ordering::Relaxed);
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        ring.touch(now, amount);
    }

    /// Approximate amount recorded during the trailing window.
    pub fn read(&self) -> u64 {
        self.read_at(Instant::now())
    }

    /// Same as [`RateCounter::read`], evaluated at `now`.
    pub fn read_at(&self, now: Instant) -> u64 {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        ring.touch(now, 0);
        ring.sum()
    }

    /// Lifetime total of everything ever added.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of a channel's traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub sent_bytes: u64,
    pub received_bytes: u64,
    pub sent_bytes_per_second: u64,
    pub received_bytes_per_second: u64,
}

/// Send and receive counters for one channel.
#[derive(Debug, Default)]
pub struct ChannelStats {
    sent: RateCounter,
    received: RateCounter,
}

impl ChannelStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sent_bytes(&self, len: usize) {
        self.sent.add_value(len as u64);
    }

    pub fn add_received_bytes(&self, len: usize) {
        self.received.add_value(len as u64);
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sent.total()
    }

    pub fn received_bytes(&self) -> u64 {
        self.received.total()
    }

    pub fn sent_bytes_per_second(&self) -> u64 {
        self.sent.read()
    }

    pub fn received_bytes_per_second(&self) -> u64 {
        self.received.read()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent_bytes: self.sent_bytes(),
            received_bytes: self.received_bytes(),
            sent_bytes_per_second: self.sent_bytes_per_second(),
            received_bytes_per_second: self.received_bytes_per_second(),
        }
    }
}
