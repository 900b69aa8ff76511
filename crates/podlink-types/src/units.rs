//! Insulin quantities, quantized to pod pulses.
//!
//! The pod delivers insulin in discrete pulses of 0.05 U. Representing
//! quantities as whole pulse counts keeps dose arithmetic exact; floating
//! point only appears at the display boundary.

use std::fmt::Display;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::consts::UNITS_PER_PULSE;

/// An insulin quantity in whole pod pulses (1 pulse = 0.05 U).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Units(u32);

impl Units {
    pub const ZERO: Units = Units(0);

    /// Creates a quantity from a whole pulse count.
    pub const fn from_pulses(pulses: u32) -> Self {
        Self(pulses)
    }

    /// Creates a quantity from fractional units, rounding to the nearest
    /// pulse. Negative inputs clamp to zero.
    pub fn from_f64(units: f64) -> Self {
        if units <= 0.0 {
            return Self(0);
        }
        Self((units / UNITS_PER_PULSE).round() as u32)
    }

    pub const fn pulses(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) * UNITS_PER_PULSE
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Subtraction clamped at zero. Dose accounting must never go negative
    /// even if the pod reports more undelivered insulin than was programmed.
    pub fn saturating_sub(self, rhs: Units) -> Units {
        Units(self.0.saturating_sub(rhs.0))
    }
}

impl Add for Units {
    type Output = Units;

    fn add(self, rhs: Self) -> Self::Output {
        Units(self.0 + rhs.0)
    }
}

impl AddAssign for Units {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Display for Units {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2} U", self.as_f64())
    }
}

/// A delivery rate in pod pulses per hour (0.05 U/h resolution).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct UnitsPerHour(u32);

impl UnitsPerHour {
    pub const ZERO: UnitsPerHour = UnitsPerHour(0);

    pub const fn from_pulses_per_hour(pulses: u32) -> Self {
        Self(pulses)
    }

    /// Creates a rate from fractional units per hour, rounding to the
    /// nearest pulse per hour. Negative inputs clamp to zero.
    pub fn from_f64(units_per_hour: f64) -> Self {
        if units_per_hour <= 0.0 {
            return Self(0);
        }
        Self((units_per_hour / UNITS_PER_PULSE).round() as u32)
    }

    pub const fn pulses_per_hour(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) * UNITS_PER_PULSE
    }
}

impl Display for UnitsPerHour {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2} U/h", self.as_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_round_to_nearest_pulse() {
        assert_eq!(Units::from_f64(2.6).pulses(), 52);
        assert_eq!(Units::from_f64(0.5).pulses(), 10);
        assert_eq!(Units::from_f64(0.024).pulses(), 0);
        assert_eq!(Units::from_f64(0.026).pulses(), 1);
        assert_eq!(Units::from_f64(-1.0), Units::ZERO);
    }

    #[test]
    fn units_display() {
        assert_eq!(Units::from_pulses(52).to_string(), "2.60 U");
        assert_eq!(Units::ZERO.to_string(), "0.00 U");
    }

    #[test]
    fn saturating_sub_clamps_at_zero() {
        let one = Units::from_pulses(20);
        let two = Units::from_pulses(30);
        assert_eq!(two.saturating_sub(one).pulses(), 10);
        assert_eq!(one.saturating_sub(two), Units::ZERO);
    }

    #[test]
    fn rate_roundtrip() {
        let rate = UnitsPerHour::from_f64(1.55);
        assert_eq!(rate.pulses_per_hour(), 31);
        assert!((rate.as_f64() - 1.55).abs() < f64::EPSILON);
    }
}
