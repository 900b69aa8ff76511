//! Protocol and dosing constants.

use chrono::Duration;

use crate::units::Units;

/// Insulin delivered per pod pulse.
pub const UNITS_PER_PULSE: f64 = 0.05;

/// Seconds between pulses during a normal bolus.
pub const SECONDS_PER_BOLUS_PULSE: i64 = 2;

/// Seconds between pulses while priming or inserting the cannula.
pub const SECONDS_PER_PRIME_PULSE: i64 = 1;

/// Insulin used to charge the fluid path before the pod is attached.
pub const PRIME_UNITS: Units = Units::from_pulses(52); // 2.6 U

/// Insulin delivered by the automated cannula-insertion bolus.
pub const CANNULA_INSERTION_UNITS: Units = Units::from_pulses(10); // 0.5 U

/// Worst-case wall time for the prime sequence to finish.
///
/// Slightly above pulse count x pulse interval; the pod's mechanism start-up
/// is not instantaneous.
pub fn prime_finish_estimate() -> Duration {
    Duration::seconds(55)
}

/// Lifetime the pod is labeled for.
pub fn nominal_pod_life() -> Duration {
    Duration::hours(72)
}

/// Hard end of service; the pod refuses to deliver past this.
pub fn service_duration() -> Duration {
    Duration::hours(80)
}

/// How long before end of service the shutdown-imminent alarm fires.
pub fn end_of_service_imminent_window() -> Duration {
    Duration::hours(1)
}

/// How long before nominal expiry the advisory alert fires.
pub fn expiration_advisory_window() -> Duration {
    Duration::hours(2)
}

/// Offset applied to bolus start timestamps.
///
/// The pod begins pulsing before the command round-trip returns; stamping
/// the start 1.5 s early keeps the ledger closer to actual delivery.
pub fn comms_offset() -> Duration {
    Duration::milliseconds(-1500)
}

/// Wall time for a bolus of the given size at the normal pulse interval.
pub fn bolus_duration(units: Units) -> Duration {
    Duration::seconds(i64::from(units.pulses()) * SECONDS_PER_BOLUS_PULSE)
}

/// Wall time for a prime or cannula-insertion bolus of the given size.
pub fn prime_duration(units: Units) -> Duration {
    Duration::seconds(i64::from(units.pulses()) * SECONDS_PER_PRIME_PULSE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prime_quantities() {
        assert!((PRIME_UNITS.as_f64() - 2.6).abs() < f64::EPSILON);
        assert!((CANNULA_INSERTION_UNITS.as_f64() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn bolus_duration_uses_two_seconds_per_pulse() {
        assert_eq!(bolus_duration(Units::from_pulses(20)), Duration::seconds(40));
    }

    #[test]
    fn cannula_insertion_takes_ten_seconds() {
        assert_eq!(
            prime_duration(CANNULA_INSERTION_UNITS),
            Duration::seconds(10)
        );
    }
}
