//! Simulated time.
//!
//! The original simulator kept time as a floating point number of seconds.
//! We instead keep it as a fixed-point count of nanoseconds since the start
//! of the run, the same trick `EmulatedTime`/`SimulationTime` use in the
//! teacher codebase: it keeps the event queue's total order and the
//! byte-accounting arithmetic exact instead of accumulating float error
//! across a run with tens of thousands of events.

use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// An instant in simulated time, relative to the start of a run.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Hash, Default)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const MAX: SimTime = SimTime(u64::MAX);

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        assert!(secs >= 0.0, "simulated time cannot be negative: {secs}");
        Self((secs * 1_000_000_000.0).round() as u64)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Duration elapsed since `earlier`. Panics if `earlier` is later than `self`,
    /// matching the teacher's `duration_since` (time never moves backward in this
    /// simulator, so a negative delta is always a bug).
    pub fn duration_since(self, earlier: SimTime) -> Duration {
        Duration::from_nanos(self.0.checked_sub(earlier.0).expect("time moved backward"))
    }
}

impl fmt::Debug for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;
    fn add(self, rhs: Duration) -> SimTime {
        SimTime(
            self.0
                .checked_add(rhs.as_nanos() as u64)
                .expect("simulated time overflow"),
        )
    }
}

impl Sub<Duration> for SimTime {
    type Output = SimTime;
    fn sub(self, rhs: Duration) -> SimTime {
        SimTime(
            self.0
                .checked_sub(rhs.as_nanos() as u64)
                .expect("simulated time underflow"),
        )
    }
}

/// Bandwidth in bytes per second.
pub type Bandwidth = u64;

/// How long it takes to move `bytes` at `bw` bytes/second, rounded up.
///
/// Rounding up (rather than truncating) guarantees that by the computed
/// deadline at least `bytes` worth of data has actually accumulated under
/// the tick accounting in `connection`, so the "event closure" correction
/// there only ever needs to clamp an overshoot, never invent missing bytes.
pub fn duration_for_bytes(bytes: u64, bw: Bandwidth) -> Duration {
    assert!(bw > 0);
    let nanos = (bytes as u128 * 1_000_000_000u128 + bw as u128 - 1) / bw as u128;
    Duration::from_nanos(nanos.min(u128::from(u64::MAX)) as u64)
}

/// How many bytes move at `bw` bytes/second over `dur`, truncated (floor),
/// matching the original simulator's `int(availableBw * delta)`.
pub fn bytes_for_duration(bw: Bandwidth, dur: Duration) -> u64 {
    ((bw as u128 * dur.as_nanos()) / 1_000_000_000u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_seconds() {
        let t = SimTime::from_secs_f64(1.5);
        assert!((t.as_secs_f64() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn duration_for_bytes_rounds_up() {
        // 10 bytes at 3 B/s takes 3.33s; rounding up must reach 4s, not 3s.
        let d = duration_for_bytes(10, 3);
        assert_eq!(bytes_for_duration(3, d), 10);
        assert!(d > Duration::from_secs(3));
    }

    #[test]
    fn add_sub_duration() {
        let t0 = SimTime::ZERO;
        let t1 = t0 + Duration::from_millis(20);
        assert_eq!(t1.duration_since(t0), Duration::from_millis(20));
    }
}
