//! The radio transport seam.
//!
//! The session core is transport-agnostic: anything that can move a
//! [`Message`] to the pod and bring one back implements [`MessageTransport`].
//! Packet framing, radio encoding, and packet-level retry all live behind
//! this trait.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use podlink_wire::Message;

/// Errors a transport can surface.
///
/// A transport reports protocol-level rejection by returning a `Message`
/// whose first block is an error response (or that carries a fault); these
/// variants cover the cases where no usable message came back at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no response from pod")]
    NoResponse,

    #[error("pod acked where a message was expected")]
    AckInsteadOfResponse,

    #[error("unexpected packet type")]
    UnexpectedPacketType,

    #[error("undecodable message: {0}")]
    InvalidData(podlink_wire::WireError),

    #[error("received signal strength too low")]
    RssiTooLow,

    #[error("received signal strength too high")]
    RssiTooHigh,

    #[error("a different pod answered")]
    PodChange,
}

/// Packet and message counters the session persists so a restored session
/// continues the sequence instead of replaying numbers the pod has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTransportState {
    pub packet_number: u8,
    pub message_number: u8,
}

/// Blocking send/receive over the radio bridge.
///
/// The transport is single-reader/single-writer and owned by exactly one
/// session; `send_message` is the only suspension point in the core.
pub trait MessageTransport {
    /// Sends a message and blocks until the pod's reply (or a transport
    /// error). Handles packet-level retry internally.
    fn send_message(&mut self, message: &Message) -> Result<Message, TransportError>;

    /// The sequence number the next outgoing message will carry.
    fn message_number(&self) -> u8;

    /// Counters to persist after each exchange.
    fn transport_state(&self) -> MessageTransportState;

    /// Debug hook for transports that are affine to a host dispatch queue.
    fn assert_on_session_queue(&self) {}
}
