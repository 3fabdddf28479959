//! Timestamp sources for operation tracking
//!
//! All timestamps are nanoseconds since the UNIX epoch. Tests drive a
//! [`ManualClock`] so timing-based clustering can be exercised deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds per millisecond
pub const NANOS_PER_MS: u64 = 1_000_000;

/// Source of wall-clock timestamps
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in nanoseconds since UNIX epoch
    fn now_nanos(&self) -> u64;
}

/// Clock backed by `SystemTime`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

/// Manually advanced clock
///
/// # Example
/// ```
/// use racimo::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::new(0);
/// clock.advance_ms(20);
/// assert_eq!(clock.now_nanos(), 20_000_000);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_nanos: u64) -> Self {
        Self {
            now: AtomicU64::new(start_nanos),
        }
    }

    pub fn set_nanos(&self, nanos: u64) {
        self.now.store(nanos, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now.fetch_add(ms * NANOS_PER_MS, Ordering::SeqCst);
    }

    pub fn advance_nanos(&self, nanos: u64) {
        self.now.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Convert milliseconds (possibly fractional) to nanoseconds, saturating at zero
pub fn ms_to_nanos(ms: f64) -> u64 {
    if ms.is_nan() || ms <= 0.0 {
        return 0;
    }
    (ms * NANOS_PER_MS as f64) as u64
}
