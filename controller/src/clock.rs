//! Time source abstraction for the allocation controller
//!
//! The manager and monitor read time through the `Clock` trait so that tests
//! can drive backlog and idle timers deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond-resolution time source
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the unix epoch
    fn now_millis(&self) -> u64;
}

/// Wall-clock time source used in production
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Manually advanced time source for deterministic tests
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct ManualClock {
    now_millis: AtomicU64,
}

#[allow(dead_code)]
impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now_millis: AtomicU64::new(start_millis),
        }
    }

    /// Moves the clock forward by the given number of milliseconds
    pub fn advance(&self, millis: u64) {
        self.now_millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Jumps the clock to an absolute time
    pub fn set(&self, millis: u64) {
        self.now_millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now_millis.load(Ordering::SeqCst)
    }
}
