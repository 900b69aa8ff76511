//! The session error taxonomy.

use thiserror::Error;

use podlink_types::PodAddress;
use podlink_wire::{BlockType, DetailedStatus};

use crate::transport::TransportError;

/// Errors surfaced by session operations.
///
/// Delivery operations never return these directly; they classify them into
/// the three-valued [`DeliveryCommandResult`](crate::DeliveryCommandResult)
/// so the assume-delivered / assume-not-delivered decision is explicit at
/// the call site. Setup and status operations return them and are safe to
/// retry (the setup sequencer is idempotent).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PodCommsError {
    #[error("operation requires an active pod")]
    NoPodPaired,

    #[error("response contained no blocks")]
    EmptyResponse,

    #[error("unexpected response block {0}")]
    UnexpectedResponse(BlockType),

    #[error("response address {got} does not match pod address {expected}")]
    InvalidAddress { got: PodAddress, expected: PodAddress },

    #[error("a bolus is already in progress")]
    UnfinalizedBolus,

    #[error("a temp basal is already in progress")]
    UnfinalizedTempBasal,

    #[error("scheduled delivery is suspended")]
    PodSuspended,

    #[error("nonce resync failed after retry")]
    NonceResyncFailed,

    #[error("pod rejected the command (code {0:#04X})")]
    RejectedMessage(u8),

    #[error("pod fault {}", .0.fault_event_code)]
    PodFault(DetailedStatus),

    #[error("pod activation time exceeded")]
    ActivationTimeExceeded,

    /// Wraps every condition the transport itself surfaces: timeout with
    /// no reply, ack where a message was expected, undecodable or
    /// unexpected packets, RSSI bounds, a different pod answering.
    #[error("transport error: {0}")]
    CommsError(#[from] TransportError),
}

impl PodCommsError {
    /// Whether this failure's disposition is knowable without a status
    /// round-trip: the command certainly did not execute.
    ///
    /// Everything else is treated as uncertain — the command may have
    /// reached the pod even though the reply was lost.
    pub fn is_certain_failure(&self) -> bool {
        matches!(
            self,
            PodCommsError::NonceResyncFailed
                | PodCommsError::RejectedMessage(_)
                | PodCommsError::PodFault(_)
                | PodCommsError::ActivationTimeExceeded
        )
    }
}
