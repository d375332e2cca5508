//! Virtual time as integer ticks.
//!
//! One tick is one nanosecond. Arithmetic saturates at [`Time::MAX`], which
//! doubles as the "no pending event" sentinel when computing the smallest
//! next-event time across logical processes.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// A point in (or span of) virtual time, in nanosecond ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(i64);

impl Time {
    /// The origin of virtual time.
    pub const ZERO: Self = Time(0);

    /// Sentinel for "no event pending"; greater than every reachable time.
    pub const MAX: Self = Time(i64::MAX);

    /// Construct from raw ticks.
    pub const fn from_ticks(ticks: i64) -> Self {
        Time(ticks)
    }

    /// Construct from whole nanoseconds.
    pub const fn nanos(ns: i64) -> Self {
        Time(ns)
    }

    /// Construct from whole microseconds.
    pub const fn micros(us: i64) -> Self {
        Time(us * 1_000)
    }

    /// Construct from whole milliseconds.
    pub const fn millis(ms: i64) -> Self {
        Time(ms * 1_000_000)
    }

    /// Construct from whole seconds.
    pub const fn seconds(s: i64) -> Self {
        Time(s * 1_000_000_000)
    }

    /// Raw tick count.
    pub const fn ticks(self) -> i64 {
        self.0
    }

    /// True for the `MAX` sentinel.
    pub const fn is_max(self) -> bool {
        self.0 == i64::MAX
    }

    /// True for durations below zero (only constructible via `from_ticks`).
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Addition that pins at `MAX` instead of wrapping, so a horizon
    /// computed from the sentinel stays the sentinel.
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Time(self.0.saturating_add(rhs.0))
    }
}

impl Add for Time {
    type Output = Time;

    fn add(self, rhs: Time) -> Time {
        Time(self.0 + rhs.0)
    }
}

impl AddAssign for Time {
    fn add_assign(&mut self, rhs: Time) {
        self.0 += rhs.0;
    }
}

impl Sub for Time {
    type Output = Time;

    fn sub(self, rhs: Time) -> Time {
        Time(self.0 - rhs.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_max() {
            write!(f, "+inf")
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_constructors() {
        assert_eq!(Time::seconds(1), Time::millis(1_000));
        assert_eq!(Time::millis(1), Time::micros(1_000));
        assert_eq!(Time::micros(1), Time::nanos(1_000));
        assert_eq!(Time::seconds(5).ticks(), 5_000_000_000);
    }

    #[test]
    fn test_ordering() {
        assert!(Time::ZERO < Time::millis(1));
        assert!(Time::millis(1) < Time::MAX);
        assert_eq!(Time::millis(2).min(Time::millis(3)), Time::millis(2));
    }

    #[test]
    fn test_saturating_add_pins_sentinel() {
        let horizon = Time::MAX.saturating_add(Time::millis(5));
        assert!(horizon.is_max());
    }

    #[test]
    fn test_arithmetic() {
        let t = Time::millis(3) + Time::millis(2);
        assert_eq!(t, Time::millis(5));
        assert_eq!(t - Time::millis(5), Time::ZERO);
    }

    #[test]
    fn test_display() {
        assert_eq!(Time::nanos(12).to_string(), "12ns");
        assert_eq!(Time::MAX.to_string(), "+inf");
    }
}
