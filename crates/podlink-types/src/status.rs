//! Lifecycle and status enums shared between the wire layer and the session.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use enumflags2::{BitFlags, bitflags};
use serde::{Deserialize, Serialize};

// ============================================================================
// Controller-side setup progress
// ============================================================================

/// Ordinal phase of the pod lifecycle as tracked by the controller.
///
/// Progress only moves forward (equal or higher ordinal), with the single
/// exception of the terminal [`SetupProgress::ActivationTimeout`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum SetupProgress {
    AddressAssigned,
    PodConfigured,
    StartingPrime,
    Priming,
    SettingInitialBasalSchedule,
    InitialBasalScheduleSet,
    StartingInsertCannula,
    CannulaInserting,
    Completed,
    ActivationTimeout,
}

impl SetupProgress {
    pub fn ordinal(self) -> u8 {
        match self {
            SetupProgress::AddressAssigned => 0,
            SetupProgress::PodConfigured => 1,
            SetupProgress::StartingPrime => 2,
            SetupProgress::Priming => 3,
            SetupProgress::SettingInitialBasalSchedule => 4,
            SetupProgress::InitialBasalScheduleSet => 5,
            SetupProgress::StartingInsertCannula => 6,
            SetupProgress::CannulaInserting => 7,
            SetupProgress::Completed => 8,
            SetupProgress::ActivationTimeout => 9,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(SetupProgress::AddressAssigned),
            1 => Some(SetupProgress::PodConfigured),
            2 => Some(SetupProgress::StartingPrime),
            3 => Some(SetupProgress::Priming),
            4 => Some(SetupProgress::SettingInitialBasalSchedule),
            5 => Some(SetupProgress::InitialBasalScheduleSet),
            6 => Some(SetupProgress::StartingInsertCannula),
            7 => Some(SetupProgress::CannulaInserting),
            8 => Some(SetupProgress::Completed),
            9 => Some(SetupProgress::ActivationTimeout),
            _ => None,
        }
    }

    /// Terminal failure state; no forward transition exists from here.
    pub fn is_terminal(self) -> bool {
        self == SetupProgress::ActivationTimeout
    }

    pub fn is_completed(self) -> bool {
        self == SetupProgress::Completed
    }
}

// ============================================================================
// Pod-side progress
// ============================================================================

/// The pod's own report of its lifecycle phase (status response nibble).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PodProgressStatus {
    InitialValue,
    MemoryInitialized,
    ReminderInitialized,
    PairingCompleted,
    Priming,
    PrimingCompleted,
    BasalInitialized,
    InsertingCannula,
    ReadyForDelivery,
    RunningBelowFiftyUnits,
    FaultEventOccurred,
    ActivationTimeExceeded,
    Inactive,
}

impl PodProgressStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(PodProgressStatus::InitialValue),
            1 => Some(PodProgressStatus::MemoryInitialized),
            2 => Some(PodProgressStatus::ReminderInitialized),
            3 => Some(PodProgressStatus::PairingCompleted),
            4 => Some(PodProgressStatus::Priming),
            5 => Some(PodProgressStatus::PrimingCompleted),
            6 => Some(PodProgressStatus::BasalInitialized),
            7 => Some(PodProgressStatus::InsertingCannula),
            8 => Some(PodProgressStatus::ReadyForDelivery),
            9 => Some(PodProgressStatus::RunningBelowFiftyUnits),
            13 => Some(PodProgressStatus::FaultEventOccurred),
            14 => Some(PodProgressStatus::ActivationTimeExceeded),
            15 => Some(PodProgressStatus::Inactive),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            PodProgressStatus::InitialValue => 0,
            PodProgressStatus::MemoryInitialized => 1,
            PodProgressStatus::ReminderInitialized => 2,
            PodProgressStatus::PairingCompleted => 3,
            PodProgressStatus::Priming => 4,
            PodProgressStatus::PrimingCompleted => 5,
            PodProgressStatus::BasalInitialized => 6,
            PodProgressStatus::InsertingCannula => 7,
            PodProgressStatus::ReadyForDelivery => 8,
            PodProgressStatus::RunningBelowFiftyUnits => 9,
            PodProgressStatus::FaultEventOccurred => 13,
            PodProgressStatus::ActivationTimeExceeded => 14,
            PodProgressStatus::Inactive => 15,
        }
    }

    /// The pod is delivering (or able to deliver) scheduled insulin.
    pub fn ready_for_delivery(self) -> bool {
        matches!(
            self,
            PodProgressStatus::ReadyForDelivery | PodProgressStatus::RunningBelowFiftyUnits
        )
    }

    pub fn is_faulted(self) -> bool {
        matches!(
            self,
            PodProgressStatus::FaultEventOccurred | PodProgressStatus::ActivationTimeExceeded
        )
    }
}

// ============================================================================
// Delivery status
// ============================================================================

/// What the pod reports it is currently delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryStatus {
    Suspended,
    ScheduledBasal,
    TempBasalRunning,
    Priming,
    BolusInProgress,
    BolusAndTempBasal,
}

impl DeliveryStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(DeliveryStatus::Suspended),
            1 => Some(DeliveryStatus::ScheduledBasal),
            2 => Some(DeliveryStatus::TempBasalRunning),
            4 => Some(DeliveryStatus::Priming),
            5 => Some(DeliveryStatus::BolusInProgress),
            6 => Some(DeliveryStatus::BolusAndTempBasal),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            DeliveryStatus::Suspended => 0,
            DeliveryStatus::ScheduledBasal => 1,
            DeliveryStatus::TempBasalRunning => 2,
            DeliveryStatus::Priming => 4,
            DeliveryStatus::BolusInProgress => 5,
            DeliveryStatus::BolusAndTempBasal => 6,
        }
    }

    pub fn bolusing(self) -> bool {
        matches!(
            self,
            DeliveryStatus::BolusInProgress | DeliveryStatus::BolusAndTempBasal
        )
    }

    pub fn temp_basal_running(self) -> bool {
        matches!(
            self,
            DeliveryStatus::TempBasalRunning | DeliveryStatus::BolusAndTempBasal
        )
    }

    pub fn suspended(self) -> bool {
        self == DeliveryStatus::Suspended
    }
}

// ============================================================================
// Suspend state
// ============================================================================

/// Whether scheduled delivery is suspended, with the transition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SuspendState {
    Suspended { at: DateTime<Utc> },
    Resumed { at: DateTime<Utc> },
}

impl SuspendState {
    pub fn is_suspended(self) -> bool {
        matches!(self, SuspendState::Suspended { .. })
    }

    pub fn transitioned_at(self) -> DateTime<Utc> {
        match self {
            SuspendState::Suspended { at } | SuspendState::Resumed { at } => at,
        }
    }
}

// ============================================================================
// Faults
// ============================================================================

/// Raw fault event code reported in a detailed status.
///
/// Codes are opaque to the controller except for a handful used in
/// decision-making; the rest are carried through for logging and export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaultEventCode(u8);

impl FaultEventCode {
    /// Idle timeout: no command within four minutes of an expect-follow-on.
    pub const COMMAND_IDLE: FaultEventCode = FaultEventCode(0x33);

    pub fn new(code: u8) -> Self {
        Self(code)
    }

    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// High nibble, grouping related fault causes ($6x etc).
    pub fn family(self) -> u8 {
        self.0 >> 4
    }
}

impl Display for FaultEventCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:02X}", self.0)
    }
}

// ============================================================================
// Beeps
// ============================================================================

/// Confirmation beep sequences the pod can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BeepType {
    NoBeep,
    BeepBeepBeepBeep,
    BipBeepBipBeepBipBeepBipBeep,
    BipBip,
    Beep,
    BeepBeepBeep,
    BeeeeBeep,
    BipBipBipBeepBipBip,
    BeeepBeeep,
}

impl BeepType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(BeepType::NoBeep),
            1 => Some(BeepType::BeepBeepBeepBeep),
            2 => Some(BeepType::BipBeepBipBeepBipBeepBipBeep),
            3 => Some(BeepType::BipBip),
            4 => Some(BeepType::Beep),
            5 => Some(BeepType::BeepBeepBeep),
            6 => Some(BeepType::BeeeeBeep),
            7 => Some(BeepType::BipBipBipBeepBipBip),
            8 => Some(BeepType::BeeepBeeep),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            BeepType::NoBeep => 0,
            BeepType::BeepBeepBeepBeep => 1,
            BeepType::BipBeepBipBeepBipBeepBipBeep => 2,
            BeepType::BipBip => 3,
            BeepType::Beep => 4,
            BeepType::BeepBeepBeep => 5,
            BeepType::BeeeeBeep => 6,
            BeepType::BipBipBipBeepBipBip => 7,
            BeepType::BeeepBeeep => 8,
        }
    }

    pub fn is_silent(self) -> bool {
        self == BeepType::NoBeep
    }
}

// ============================================================================
// Delivery kinds (cancel targets)
// ============================================================================

/// Kinds of delivery a cancel command can target, as a flag set.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryKind {
    Basal = 0b001,
    TempBasal = 0b010,
    Bolus = 0b100,
}

/// A set of delivery kinds; empty means "cancel nothing" (status probe).
pub type DeliveryKindSet = BitFlags<DeliveryKind>;

/// Every kind of delivery.
pub fn all_deliveries() -> DeliveryKindSet {
    DeliveryKind::Basal | DeliveryKind::TempBasal | DeliveryKind::Bolus
}

/// Everything except scheduled basal.
pub fn all_but_basal() -> DeliveryKindSet {
    DeliveryKind::TempBasal | DeliveryKind::Bolus
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn setup_progress_ordinals_roundtrip() {
        for ordinal in 0..=9 {
            let progress = SetupProgress::from_ordinal(ordinal).unwrap();
            assert_eq!(progress.ordinal(), ordinal);
        }
        assert!(SetupProgress::from_ordinal(10).is_none());
    }

    #[test]
    fn setup_progress_orders_by_ordinal() {
        assert!(SetupProgress::StartingPrime < SetupProgress::Priming);
        assert!(SetupProgress::Completed < SetupProgress::ActivationTimeout);
    }

    #[test_case(0, Some(DeliveryStatus::Suspended))]
    #[test_case(1, Some(DeliveryStatus::ScheduledBasal))]
    #[test_case(3, None)]
    #[test_case(6, Some(DeliveryStatus::BolusAndTempBasal))]
    fn delivery_status_from_byte(byte: u8, expected: Option<DeliveryStatus>) {
        assert_eq!(DeliveryStatus::from_byte(byte), expected);
    }

    #[test]
    fn delivery_status_helpers() {
        assert!(DeliveryStatus::BolusInProgress.bolusing());
        assert!(DeliveryStatus::BolusAndTempBasal.bolusing());
        assert!(DeliveryStatus::BolusAndTempBasal.temp_basal_running());
        assert!(!DeliveryStatus::ScheduledBasal.bolusing());
        assert!(DeliveryStatus::Suspended.suspended());
    }

    #[test]
    fn pod_progress_fault_states() {
        assert!(PodProgressStatus::FaultEventOccurred.is_faulted());
        assert!(PodProgressStatus::ActivationTimeExceeded.is_faulted());
        assert!(!PodProgressStatus::ReadyForDelivery.is_faulted());
        assert!(PodProgressStatus::RunningBelowFiftyUnits.ready_for_delivery());
    }

    #[test]
    fn fault_code_display_and_family() {
        let code = FaultEventCode::new(0x6A);
        assert_eq!(code.to_string(), "$6A");
        assert_eq!(code.family(), 0x6);
        assert_eq!(FaultEventCode::COMMAND_IDLE.as_byte(), 0x33);
    }

    #[test]
    fn delivery_kind_sets() {
        assert_eq!(all_deliveries().bits(), 0b111);
        assert_eq!(all_but_basal().bits(), 0b110);
        assert!(all_but_basal().contains(DeliveryKind::Bolus));
        assert!(!all_but_basal().contains(DeliveryKind::Basal));
    }

    #[test]
    fn suspend_state_serde_roundtrip() {
        let state = SuspendState::Suspended { at: Utc::now() };
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(serde_json::from_str::<SuspendState>(&json).unwrap(), state);
    }
}
