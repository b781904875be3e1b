use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic virtual-clock source, nanosecond resolution.
pub trait Clock {
    fn now_ns(&self) -> u64;

    fn now_us(&self) -> u64 {
        self.now_ns() / 1_000
    }
}

/// Clock that is always at zero. Useful for devices whose timed behavior is
/// not exercised.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullClock;

impl Clock for NullClock {
    fn now_ns(&self) -> u64 {
        0
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Cloning yields a handle onto the same underlying instant, so a test can
/// keep one handle and hand another to the device under test.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ns: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_ns(&self, delta: u64) {
        self.now_ns.set(self.now_ns.get() + delta);
    }

    pub fn advance_us(&self, delta: u64) {
        self.advance_ns(delta * 1_000);
    }

    pub fn set_ns(&self, now_ns: u64) {
        self.now_ns.set(now_ns);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now_ns.get()
    }
}

/// Host-backed clock counting from its construction instant.
#[derive(Debug, Clone)]
pub struct StdClock {
    origin: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_handles_share_time() {
        let clock = ManualClock::new();
        let handle = clock.clone();

        clock.advance_us(5);
        assert_eq!(handle.now_ns(), 5_000);
        assert_eq!(handle.now_us(), 5);

        handle.advance_ns(500);
        assert_eq!(clock.now_ns(), 5_500);
    }
}
