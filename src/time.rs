//! Logical time: a non-negative integer tick count shared by every simulator.
//!
//! Comparisons and arithmetic inside the core are always performed on `T`.
//! Seconds only exist for display and real-time pacing (`to_seconds`).

use std::fmt;
use std::ops::{Add, Sub};

/// Non-negative 64-bit logical tick count.
///
/// Subtraction saturates only when explicitly requested via
/// [`T::checked_sub`] / [`T::saturating_sub`] — the `Sub` operator panics on
/// underflow, since an underflowing subtraction of logical time is a bug in
/// the caller, not a value the scheduler should ever need to represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct T(u64);

impl T {
    /// `T(0)`.
    pub const ZERO: T = T(0);

    /// Creates a logical time from a raw tick count.
    pub const fn new(ticks: u64) -> Self {
        T(ticks)
    }

    /// `T(0)`.
    pub const fn zero() -> Self {
        T::ZERO
    }

    /// The raw tick count.
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// `self + k` without risk of overflow panics in practice (ticks are
    /// always far below `u64::MAX`), but checked anyway for defense.
    pub fn checked_add(self, k: u64) -> Option<T> {
        self.0.checked_add(k).map(T)
    }

    /// `self - k`, or `None` if that would underflow.
    pub fn checked_sub(self, k: u64) -> Option<T> {
        self.0.checked_sub(k).map(T)
    }

    /// `self - k`, clamped to zero. Used only where the spec explicitly asks
    /// for clamping (open question 3 in §9: negative `max_advance`).
    pub fn saturating_sub(self, k: u64) -> T {
        T(self.0.saturating_sub(k))
    }

    /// Converts to seconds using the scenario-global resolution. Used only
    /// for display and real-time pacing; never for scheduling comparisons.
    pub fn to_seconds(self, time_resolution: f64) -> f64 {
        self.0 as f64 * time_resolution
    }
}

impl Add<u64> for T {
    type Output = T;

    fn add(self, k: u64) -> T {
        self.checked_add(k)
            .unwrap_or_else(|| panic!("logical time overflow: {} + {k}", self.0))
    }
}

impl Sub<u64> for T {
    type Output = T;

    /// Panics on underflow: back-dating logical time is Invariant 1's
    /// business to reject before it ever reaches here, not something this
    /// type should silently clamp.
    fn sub(self, k: u64) -> T {
        self.checked_sub(k)
            .unwrap_or_else(|| panic!("logical time underflow: {} - {k}", self.0))
    }
}

impl fmt::Display for T {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={}", self.0)
    }
}

impl From<u64> for T {
    fn from(ticks: u64) -> Self {
        T(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_zero() {
        assert_eq!(T::zero().ticks(), 0);
    }

    #[test]
    fn add_advances() {
        assert_eq!(T::new(3) + 2, T::new(5));
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn sub_underflow_panics() {
        let _ = T::new(0) - 1;
    }

    #[test]
    fn checked_sub_is_none_on_underflow() {
        assert_eq!(T::new(0).checked_sub(1), None);
    }

    #[test]
    fn saturating_sub_clamps_to_zero() {
        assert_eq!(T::new(0).saturating_sub(5), T::zero());
    }

    #[test]
    fn ordering_is_ticks_ordering() {
        assert!(T::new(1) < T::new(2));
        assert!(T::new(2) <= T::new(2));
    }

    #[test]
    fn to_seconds_scales_by_resolution() {
        assert_eq!(T::new(10).to_seconds(0.5), 5.0);
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(T::new(7).to_string(), "t=7");
    }
}
