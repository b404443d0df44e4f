//! # Device Timing
//!
//! Device-clock timestamps for timed commands.
//!
//! SDR hardware keeps its own time base (typically derived from the master
//! clock and optionally disciplined by PPS). Timed commands and sensor
//! queries are expressed against that clock, not the host wall clock.
//!
//! A [`TimeSpec`] stores whole seconds and fractional seconds separately so
//! that timestamps far from zero keep sub-nanosecond precision in the
//! fractional part:
//!
//! ```text
//!   full_secs          frac_secs
//! ┌───────────┐  +  ┌──────────────┐
//! │    i64    │     │ f64 in [0,1) │
//! └───────────┘     └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use lotune_core::timing::TimeSpec;
//!
//! let now = TimeSpec::from_secs(1.25);
//! let hop = now + 0.010;
//! assert_eq!(hop.full_secs(), 1);
//! assert!((hop.frac_secs() - 0.26).abs() < 1e-12);
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// A timestamp on the device clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSpec {
    full_secs: i64,
    frac_secs: f64,
}

impl TimeSpec {
    /// Device time zero.
    pub const ZERO: TimeSpec = TimeSpec {
        full_secs: 0,
        frac_secs: 0.0,
    };

    /// Create a timestamp from whole and fractional seconds.
    ///
    /// The fractional part may be outside `[0, 1)`; it is normalized.
    pub fn new(full_secs: i64, frac_secs: f64) -> Self {
        let carry = frac_secs.floor();
        Self {
            full_secs: full_secs + carry as i64,
            frac_secs: frac_secs - carry,
        }
    }

    /// Create a timestamp from a real number of seconds.
    pub fn from_secs(secs: f64) -> Self {
        Self::new(0, secs)
    }

    /// Create a timestamp from a duration since device time zero.
    pub fn from_duration(duration: Duration) -> Self {
        Self::new(duration.as_secs() as i64, duration.subsec_nanos() as f64 * 1e-9)
    }

    /// Whole seconds part.
    pub fn full_secs(&self) -> i64 {
        self.full_secs
    }

    /// Fractional seconds part, in `[0, 1)`.
    pub fn frac_secs(&self) -> f64 {
        self.frac_secs
    }

    /// Timestamp as a real number of seconds.
    pub fn as_secs(&self) -> f64 {
        self.full_secs as f64 + self.frac_secs
    }

    /// Seconds elapsed from `earlier` to `self` (negative if `earlier` is later).
    pub fn seconds_since(&self, earlier: TimeSpec) -> f64 {
        (self.full_secs - earlier.full_secs) as f64 + (self.frac_secs - earlier.frac_secs)
    }
}

impl Default for TimeSpec {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialOrd for TimeSpec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.full_secs.cmp(&other.full_secs) {
            Ordering::Equal => self.frac_secs.partial_cmp(&other.frac_secs),
            ord => Some(ord),
        }
    }
}

impl Add<f64> for TimeSpec {
    type Output = TimeSpec;

    fn add(self, secs: f64) -> TimeSpec {
        let whole = secs.trunc();
        TimeSpec::new(self.full_secs + whole as i64, self.frac_secs + (secs - whole))
    }
}

impl Add<Duration> for TimeSpec {
    type Output = TimeSpec;

    fn add(self, duration: Duration) -> TimeSpec {
        TimeSpec::new(
            self.full_secs + duration.as_secs() as i64,
            self.frac_secs + duration.subsec_nanos() as f64 * 1e-9,
        )
    }
}

impl Sub for TimeSpec {
    type Output = f64;

    fn sub(self, rhs: TimeSpec) -> f64 {
        self.seconds_since(rhs)
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9} s", self.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalizes_fraction() {
        let t = TimeSpec::new(1, 1.5);
        assert_eq!(t.full_secs(), 2);
        assert_relative_eq!(t.frac_secs(), 0.5);

        let t = TimeSpec::new(3, -0.25);
        assert_eq!(t.full_secs(), 2);
        assert_relative_eq!(t.frac_secs(), 0.75);
    }

    #[test]
    fn test_add_seconds_carries() {
        let t = TimeSpec::from_secs(0.995) + 0.010;
        assert_eq!(t.full_secs(), 1);
        assert_relative_eq!(t.frac_secs(), 0.005, epsilon = 1e-12);

        let t = TimeSpec::from_secs(10.0) + 2.5;
        assert_relative_eq!(t.as_secs(), 12.5);
    }

    #[test]
    fn test_add_duration() {
        let t = TimeSpec::ZERO + Duration::from_millis(1500);
        assert_eq!(t.full_secs(), 1);
        assert_relative_eq!(t.frac_secs(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_ordering_and_difference() {
        let a = TimeSpec::from_secs(1.0005);
        let b = a + 0.0002;
        assert!(b > a);
        assert!(a < b);
        assert_relative_eq!(b - a, 0.0002, epsilon = 1e-12);
        assert_relative_eq!(a - b, -0.0002, epsilon = 1e-12);
    }

    #[test]
    fn test_display() {
        assert_eq!(TimeSpec::from_secs(0.25).to_string(), "0.250000000 s");
    }
}
