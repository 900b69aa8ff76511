//! # podlink
//!
//! Communication session core for a body-worn insulin infusion pod driven
//! over a short-range radio bridge: pairing state, nonce sequencing, fault
//! capture, the dosing lifecycle (prime, cannula insertion, basal, temp
//! basal, bolus, suspend/resume, deactivation), and a durable record of
//! delivered doses with explicit certainty.
//!
//! # Quick Start
//!
//! ```ignore
//! use podlink::{Session, PodState, Units};
//!
//! // The pairing path produced a PodState; the radio bridge is anything
//! // implementing MessageTransport.
//! let mut session = Session::new(pod_state, transport);
//!
//! // Setup: prime, program the schedule, insert the cannula.
//! let wait = session.prime()?;
//! session.program_initial_basal_schedule(&schedule, offset)?;
//! session.insert_cannula()?;
//!
//! // Therapy. Dosing results are three-valued: success, certain failure,
//! // or uncertain failure pending reconciliation.
//! match session.bolus(Units::from_f64(1.5), false, true, 60) {
//!     podlink::DeliveryCommandResult::Success(status) => { /* ... */ }
//!     podlink::DeliveryCommandResult::CertainFailure(err) => { /* safe to retry */ }
//!     podlink::DeliveryCommandResult::UncertainFailure(err) => { /* do NOT re-dose */ }
//! }
//! ```

// Session layer - the main API
pub use podlink_session::{
    BolusDose, CancelDeliveryResult, DeliveryCommandResult, DoseError, DoseLedger, DoseRecord,
    InsulinMeasurements, MessageTransport, MessageTransportState, PodCommsError, PodState,
    ResumeDose, ScheduledCertainty, Session, SessionConfig, SessionObserver, SuspendDose,
    TempBasalDose, TransportError,
};

// Re-export core domain types
pub use podlink_types::{
    AlertSet, AlertSlot, AlertTrigger, BasalSchedule, BasalScheduleEntry, BeepType, DeliveryKind,
    DeliveryKindSet, DeliveryStatus, FaultEventCode, Lot, PodAddress, PodAlert, PodProgressStatus,
    SetupProgress, SuspendState, Tid, Units, UnitsPerHour, all_but_basal, all_deliveries, consts,
};

// Re-export the wire layer for transport implementations
pub use podlink_wire::{
    BlockType, DetailedStatus, Message, MessageBlock, NonceGenerator, PodInfoResponse, PulseLog,
    StatusResponse, WireError, crc16,
};
