//! # podlink-session: the pod communication session core
//!
//! A replicated state machine over an unreliable radio link: the pod owns
//! the actual fluid delivery, this crate owns the intent record, and the
//! two are kept in agreement through nonce-sequenced commands, status
//! reconciliation, and a dose ledger with explicit certainty.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Session                              │
//! │  ┌─────────┐  ┌──────────┐  ┌──────────┐  ┌───────────────┐  │
//! │  │  Setup  │  │ Delivery │→ │ Exchange │→ │ Transport     │  │
//! │  │sequencer│  │   ops    │  │ (nonce,  │  │ (radio bridge)│  │
//! │  └─────────┘  └──────────┘  │  resync) │  └───────────────┘  │
//! │        ↓            ↓       └──────────┘                     │
//! │  ┌───────────────────────────────┐ ┌───────────────────────┐ │
//! │  │ PodState (mirror, invariants) │ │ DoseLedger (certainty)│ │
//! │  └───────────────────────────────┘ └───────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Ownership model
//!
//! One [`Session`] exclusively owns one pod's [`PodState`], transport, and
//! nonce state. Operations take `&mut self`; the serial session queue of
//! the host maps onto Rust's exclusive borrows. State/ledger logic is pure
//! over an injected `now`, so every safety property is deterministic under
//! test.

mod delivery;
mod dose;
mod error;
mod exchange;
mod fault;
mod pod_state;
mod session;
mod setup;
mod transport;

#[cfg(test)]
mod testutil;

pub use delivery::{CancelDeliveryResult, DeliveryCommandResult};
pub use dose::{
    BolusDose, DoseError, DoseLedger, DoseRecord, Reconciliation, ResumeDose, ScheduledCertainty,
    SuspendDose, TempBasalDose,
};
pub use error::PodCommsError;
pub use pod_state::{InsulinMeasurements, PodState};
pub use session::{Session, SessionConfig, SessionObserver};
pub use transport::{MessageTransport, MessageTransportState, TransportError};
