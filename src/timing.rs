use std::thread;
use std::time::{Duration, Instant};

use embedded_hal::delay::DelayNs;

/// Monotonic time source with microsecond resolution.
///
/// Only differences between two readings are meaningful.
pub trait Clock {
    /// Microseconds elapsed since an arbitrary fixed origin.
    fn now_us(&mut self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &mut C {
    fn now_us(&mut self) -> u64 {
        (**self).now_us()
    }
}

/// [`Clock`] backed by [`Instant`], immune to wall-clock adjustments.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Clock whose origin is the moment of creation.
    pub fn new() -> Self {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&mut self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Blocking [`DelayNs`] that puts the calling thread to sleep.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(ns.into()));
    }

    fn delay_us(&mut self, us: u32) {
        thread::sleep(Duration::from_micros(us.into()));
    }

    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(ms.into()));
    }
}
