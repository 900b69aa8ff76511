//! Decoded pod self-reports: the regular status response and the richer
//! pod-info responses (detailed status, pulse log).

use chrono::Duration;
use enumflags2::BitFlags;
use serde::{Deserialize, Serialize};

use podlink_types::{
    AlertSet, DeliveryStatus, FaultEventCode, PodProgressStatus, Units, time_serde,
};

use crate::block::{put_u16, read_u8, read_u16};
use crate::error::WireError;

/// Sentinel for "no value" in optional u16 wire fields.
const NONE_SENTINEL: u16 = 0xFFFF;

// ============================================================================
// Status response ($1D)
// ============================================================================

/// The pod's regular self-report, returned by most commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub delivery_status: DeliveryStatus,
    pub pod_progress: PodProgressStatus,
    /// Cumulative insulin delivered since activation.
    pub insulin_delivered: Units,
    /// Pulses left in the currently-running bolus, if any.
    pub bolus_not_delivered: Units,
    /// Reservoir level; `None` when above the pod's reading range.
    pub reservoir: Option<Units>,
    /// Time since activation, minute resolution.
    #[serde(with = "time_serde::duration_secs")]
    pub time_active: Duration,
    pub active_alerts: AlertSet,
}

impl StatusResponse {
    pub(crate) fn encode_body(&self, buf: &mut Vec<u8>) {
        buf.push(self.delivery_status.as_byte());
        buf.push(self.pod_progress.as_byte());
        put_u16(buf, self.insulin_delivered.pulses() as u16);
        put_u16(buf, self.bolus_not_delivered.pulses() as u16);
        put_u16(
            buf,
            self.reservoir.map_or(NONE_SENTINEL, |r| r.pulses() as u16),
        );
        put_u16(buf, self.time_active.num_minutes() as u16);
        buf.push(self.active_alerts.bits());
    }

    pub(crate) fn decode_body(body: &[u8]) -> Result<Self, WireError> {
        let delivery_byte = read_u8(body, 0)?;
        let delivery_status =
            DeliveryStatus::from_byte(delivery_byte).ok_or(WireError::InvalidValue {
                field: "delivery status",
                byte: delivery_byte,
            })?;
        let progress_byte = read_u8(body, 1)?;
        let pod_progress =
            PodProgressStatus::from_byte(progress_byte).ok_or(WireError::InvalidValue {
                field: "pod progress",
                byte: progress_byte,
            })?;
        let reservoir = match read_u16(body, 6)? {
            NONE_SENTINEL => None,
            pulses => Some(Units::from_pulses(u32::from(pulses))),
        };
        Ok(Self {
            delivery_status,
            pod_progress,
            insulin_delivered: Units::from_pulses(u32::from(read_u16(body, 2)?)),
            bolus_not_delivered: Units::from_pulses(u32::from(read_u16(body, 4)?)),
            reservoir,
            time_active: Duration::minutes(i64::from(read_u16(body, 8)?)),
            active_alerts: BitFlags::from_bits_truncate(read_u8(body, 10)?),
        })
    }
}

// ============================================================================
// Pod-info response ($02)
// ============================================================================

/// Decoded pod self-report with fault detail, returned by the detailed
/// status sub-type and delivered unsolicited when the pod faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedStatus {
    pub pod_progress: PodProgressStatus,
    pub delivery_status: DeliveryStatus,
    /// Insulin the interrupted bolus did not deliver.
    pub bolus_not_delivered: Units,
    /// `$00` when no fault has occurred.
    pub fault_event_code: FaultEventCode,
    /// Time since activation at which the fault occurred.
    #[serde(with = "time_serde::opt_duration_secs")]
    pub fault_event_time: Option<Duration>,
    pub reservoir: Option<Units>,
    #[serde(with = "time_serde::duration_secs")]
    pub time_active: Duration,
    pub insulin_delivered: Units,
    pub unacknowledged_alerts: AlertSet,
}

impl DetailedStatus {
    pub fn is_faulted(&self) -> bool {
        self.fault_event_code.as_byte() != 0 || self.pod_progress.is_faulted()
    }
}

/// Recent pulse events, readable for postmortem analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseLog {
    pub words: Vec<u32>,
}

/// A pod-info response, discriminated by its sub-type byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "info", rename_all = "camelCase")]
pub enum PodInfoResponse {
    DetailedStatus(DetailedStatus),
    PulseLog(PulseLog),
}

const SUBTYPE_DETAILED_STATUS: u8 = 0x02;
const SUBTYPE_PULSE_LOG: u8 = 0x50;

impl PodInfoResponse {
    pub fn detailed_status(&self) -> Option<&DetailedStatus> {
        match self {
            PodInfoResponse::DetailedStatus(status) => Some(status),
            PodInfoResponse::PulseLog(_) => None,
        }
    }

    pub fn pulse_log(&self) -> Option<&PulseLog> {
        match self {
            PodInfoResponse::PulseLog(log) => Some(log),
            PodInfoResponse::DetailedStatus(_) => None,
        }
    }

    pub(crate) fn encode_body(&self, buf: &mut Vec<u8>) {
        match self {
            PodInfoResponse::DetailedStatus(s) => {
                buf.push(SUBTYPE_DETAILED_STATUS);
                buf.push(s.pod_progress.as_byte());
                buf.push(s.delivery_status.as_byte());
                put_u16(buf, s.bolus_not_delivered.pulses() as u16);
                buf.push(s.fault_event_code.as_byte());
                put_u16(
                    buf,
                    s.fault_event_time
                        .map_or(NONE_SENTINEL, |t| t.num_minutes() as u16),
                );
                put_u16(
                    buf,
                    s.reservoir.map_or(NONE_SENTINEL, |r| r.pulses() as u16),
                );
                put_u16(buf, s.time_active.num_minutes() as u16);
                put_u16(buf, s.insulin_delivered.pulses() as u16);
                buf.push(s.unacknowledged_alerts.bits());
            }
            PodInfoResponse::PulseLog(log) => {
                buf.push(SUBTYPE_PULSE_LOG);
                for word in &log.words {
                    buf.extend_from_slice(&word.to_be_bytes());
                }
            }
        }
    }

    pub(crate) fn decode_body(body: &[u8]) -> Result<Self, WireError> {
        match read_u8(body, 0)? {
            SUBTYPE_DETAILED_STATUS => {
                let progress_byte = read_u8(body, 1)?;
                let pod_progress =
                    PodProgressStatus::from_byte(progress_byte).ok_or(WireError::InvalidValue {
                        field: "pod progress",
                        byte: progress_byte,
                    })?;
                let delivery_byte = read_u8(body, 2)?;
                let delivery_status =
                    DeliveryStatus::from_byte(delivery_byte).ok_or(WireError::InvalidValue {
                        field: "delivery status",
                        byte: delivery_byte,
                    })?;
                let fault_event_time = match read_u16(body, 6)? {
                    NONE_SENTINEL => None,
                    minutes => Some(Duration::minutes(i64::from(minutes))),
                };
                let reservoir = match read_u16(body, 8)? {
                    NONE_SENTINEL => None,
                    pulses => Some(Units::from_pulses(u32::from(pulses))),
                };
                Ok(PodInfoResponse::DetailedStatus(DetailedStatus {
                    pod_progress,
                    delivery_status,
                    bolus_not_delivered: Units::from_pulses(u32::from(read_u16(body, 3)?)),
                    fault_event_code: FaultEventCode::new(read_u8(body, 5)?),
                    fault_event_time,
                    reservoir,
                    time_active: Duration::minutes(i64::from(read_u16(body, 10)?)),
                    insulin_delivered: Units::from_pulses(u32::from(read_u16(body, 12)?)),
                    unacknowledged_alerts: BitFlags::from_bits_truncate(read_u8(body, 14)?),
                }))
            }
            SUBTYPE_PULSE_LOG => {
                let payload = &body[1..];
                if payload.len() % 4 != 0 {
                    return Err(WireError::UnexpectedEof);
                }
                let words = payload
                    .chunks_exact(4)
                    .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                    .collect();
                Ok(PodInfoResponse::PulseLog(PulseLog { words }))
            }
            byte => Err(WireError::InvalidValue {
                field: "pod info sub-type",
                byte,
            }),
        }
    }
}
