//! # podlink-wire: Wire layer for the pod command/response protocol
//!
//! Everything below the session and above the radio transport:
//!
//! - [`crc16`] — the CRC-16 used by message framing and nonce resync
//! - [`NonceGenerator`] — the deterministic rolling nonce table
//! - [`Message`] — the command/response envelope codec
//! - [`MessageBlock`] — typed command and response blocks
//! - [`StatusResponse`] / [`DetailedStatus`] — decoded pod self-reports
//!
//! The transport hands this layer complete, de-whitened message bytes;
//! packet framing and radio encoding live below the [`Message`] level.

pub mod crc16;
mod error;
mod message;
mod nonce;

mod block;
mod status;

pub use block::{
    AcknowledgeAlertCommand, BasalRateSegment, BasalScheduleExtraCommand, BeepConfigCommand,
    BlockType, BolusExtraCommand, CancelDeliveryCommand, ConfigureAlertsCommand,
    DeactivatePodCommand, ErrorResponse, FaultConfigCommand, GetStatusCommand, InsulinProgram,
    MessageBlock, PodInfoType, SetInsulinScheduleCommand, TempBasalExtraCommand, segments_for,
};
pub use error::WireError;
pub use message::Message;
pub use nonce::NonceGenerator;
pub use status::{DetailedStatus, PodInfoResponse, PulseLog, StatusResponse};
