//! Pod alert slots and alert configuration.
//!
//! The pod has eight alert slots. Each slot can be configured with a
//! trigger (insulin remaining or time since activation), an optional
//! duration, and a beep pattern. The status response reports which slots
//! are currently firing as a bitset.

use chrono::Duration;
use enumflags2::{BitFlags, bitflags};
use serde::{Deserialize, Serialize};

use crate::status::BeepType;
use crate::time_serde;
use crate::units::Units;

/// One of the pod's eight alert slots.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertSlot {
    Slot0 = 1 << 0,
    Slot1 = 1 << 1,
    Slot2 = 1 << 2,
    Slot3 = 1 << 3,
    Slot4 = 1 << 4,
    Slot5 = 1 << 5,
    Slot6 = 1 << 6,
    Slot7 = 1 << 7,
}

impl AlertSlot {
    /// Slot index 0-7.
    pub fn index(self) -> u8 {
        (self as u8).trailing_zeros() as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(AlertSlot::Slot0),
            1 => Some(AlertSlot::Slot1),
            2 => Some(AlertSlot::Slot2),
            3 => Some(AlertSlot::Slot3),
            4 => Some(AlertSlot::Slot4),
            5 => Some(AlertSlot::Slot5),
            6 => Some(AlertSlot::Slot6),
            7 => Some(AlertSlot::Slot7),
            _ => None,
        }
    }
}

/// The set of alert slots currently firing (or being addressed).
pub type AlertSet = BitFlags<AlertSlot>;

/// What causes a configured alert to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AlertTrigger {
    /// Fires when the reservoir drops to this level.
    UnitsRemaining { threshold: Units },
    /// Fires this long after pod activation.
    TimeAfterActivation {
        #[serde(with = "time_serde::duration_secs")]
        offset: Duration,
    },
}

/// Configuration for a single alert slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodAlert {
    pub slot: AlertSlot,
    pub trigger: AlertTrigger,
    /// How long the alert repeats before auto-clearing; `None` = until
    /// acknowledged.
    #[serde(with = "time_serde::opt_duration_secs")]
    pub duration: Option<Duration>,
    pub beep_type: BeepType,
    /// Minutes between beep repetitions while the alert is active.
    pub beep_repeat_minutes: u8,
}

impl PodAlert {
    /// Reminder that setup is unfinished, armed before priming.
    pub fn finish_setup_reminder() -> Self {
        Self {
            slot: AlertSlot::Slot7,
            trigger: AlertTrigger::TimeAfterActivation {
                offset: Duration::minutes(55),
            },
            duration: Some(Duration::minutes(55)),
            beep_type: BeepType::BipBeepBipBeepBipBeepBipBeep,
            beep_repeat_minutes: 5,
        }
    }

    /// Advisory that the pod is approaching nominal expiry.
    pub fn expiration_advisory(offset: Duration) -> Self {
        Self {
            slot: AlertSlot::Slot3,
            trigger: AlertTrigger::TimeAfterActivation { offset },
            duration: None,
            beep_type: BeepType::BeepBeepBeepBeep,
            beep_repeat_minutes: 60,
        }
    }

    /// Alarm that end of service is imminent and delivery will stop.
    pub fn shutdown_imminent(offset: Duration) -> Self {
        Self {
            slot: AlertSlot::Slot2,
            trigger: AlertTrigger::TimeAfterActivation { offset },
            duration: None,
            beep_type: BeepType::BipBipBipBeepBipBip,
            beep_repeat_minutes: 15,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_index_roundtrip() {
        for index in 0..8 {
            let slot = AlertSlot::from_index(index).unwrap();
            assert_eq!(slot.index(), index);
        }
        assert!(AlertSlot::from_index(8).is_none());
    }

    #[test]
    fn alert_set_bits() {
        let set = AlertSlot::Slot0 | AlertSlot::Slot3;
        assert_eq!(set.bits(), 0b0000_1001);
        assert!(set.contains(AlertSlot::Slot3));
        assert!(!set.contains(AlertSlot::Slot1));
    }

    #[test]
    fn standard_alerts_use_distinct_slots() {
        let setup = PodAlert::finish_setup_reminder();
        let advisory = PodAlert::expiration_advisory(Duration::hours(70));
        let shutdown = PodAlert::shutdown_imminent(Duration::hours(79));
        assert_ne!(setup.slot, advisory.slot);
        assert_ne!(advisory.slot, shutdown.slot);
    }

    #[test]
    fn alert_serde_roundtrip() {
        let alert = PodAlert::expiration_advisory(Duration::hours(70));
        let json = serde_json::to_string(&alert).unwrap();
        assert_eq!(serde_json::from_str::<PodAlert>(&json).unwrap(), alert);
    }
}
