//! Typed message blocks.
//!
//! Every message is a sequence of blocks, each framed as
//! `type(u8) ‖ length(u8) ‖ body`. Nonce-bearing command blocks carry their
//! 4-byte nonce immediately after the header so the exchange layer can
//! rewrite it in place after a resync without re-deriving the body.

use enumflags2::BitFlags;
use serde::{Deserialize, Serialize};

use podlink_types::{
    AlertSet, AlertSlot, AlertTrigger, BasalSchedule, BeepType, DeliveryKindSet, FaultEventCode,
    PodAlert, PodProgressStatus, Units, UnitsPerHour,
};

use crate::error::WireError;
use crate::status::{PodInfoResponse, StatusResponse};

// ============================================================================
// Block framing
// ============================================================================

/// Wire identifiers for every block type the core speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockType {
    PodInfoResponse,
    ErrorResponse,
    FaultConfig,
    GetStatus,
    AcknowledgeAlert,
    BasalScheduleExtra,
    TempBasalExtra,
    BolusExtra,
    ConfigureAlerts,
    SetInsulinSchedule,
    DeactivatePod,
    StatusResponse,
    BeepConfig,
    CancelDelivery,
}

impl BlockType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x02 => Some(BlockType::PodInfoResponse),
            0x06 => Some(BlockType::ErrorResponse),
            0x08 => Some(BlockType::FaultConfig),
            0x0E => Some(BlockType::GetStatus),
            0x11 => Some(BlockType::AcknowledgeAlert),
            0x13 => Some(BlockType::BasalScheduleExtra),
            0x16 => Some(BlockType::TempBasalExtra),
            0x17 => Some(BlockType::BolusExtra),
            0x19 => Some(BlockType::ConfigureAlerts),
            0x1A => Some(BlockType::SetInsulinSchedule),
            0x1C => Some(BlockType::DeactivatePod),
            0x1D => Some(BlockType::StatusResponse),
            0x1E => Some(BlockType::BeepConfig),
            0x1F => Some(BlockType::CancelDelivery),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            BlockType::PodInfoResponse => 0x02,
            BlockType::ErrorResponse => 0x06,
            BlockType::FaultConfig => 0x08,
            BlockType::GetStatus => 0x0E,
            BlockType::AcknowledgeAlert => 0x11,
            BlockType::BasalScheduleExtra => 0x13,
            BlockType::TempBasalExtra => 0x16,
            BlockType::BolusExtra => 0x17,
            BlockType::ConfigureAlerts => 0x19,
            BlockType::SetInsulinSchedule => 0x1A,
            BlockType::DeactivatePod => 0x1C,
            BlockType::StatusResponse => 0x1D,
            BlockType::BeepConfig => 0x1E,
            BlockType::CancelDelivery => 0x1F,
        }
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?} ({:#04X})", self.as_byte())
    }
}

// ============================================================================
// Command bodies
// ============================================================================

/// Sub-type selector for the get-status command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PodInfoType {
    Normal,
    DetailedStatus,
    PulseLogRecent,
}

impl PodInfoType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(PodInfoType::Normal),
            0x02 => Some(PodInfoType::DetailedStatus),
            0x50 => Some(PodInfoType::PulseLogRecent),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            PodInfoType::Normal => 0x00,
            PodInfoType::DetailedStatus => 0x02,
            PodInfoType::PulseLogRecent => 0x50,
        }
    }
}

/// Status poll. `Normal` elicits a status response; the other sub-types a
/// pod-info response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStatusCommand {
    pub pod_info_type: PodInfoType,
}

/// One segment of the basal program as the pod consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasalRateSegment {
    pub duration_minutes: u16,
    pub rate: UnitsPerHour,
}

/// Converts a validated schedule into consecutive wire segments.
pub fn segments_for(schedule: &BasalSchedule) -> Vec<BasalRateSegment> {
    let entries = schedule.entries();
    let mut segments = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let end_minutes = entries
            .get(i + 1)
            .map_or(24 * 60, |next| next.start_offset.num_minutes());
        segments.push(BasalRateSegment {
            duration_minutes: (end_minutes - entry.start_offset.num_minutes()) as u16,
            rate: entry.rate,
        });
    }
    segments
}

/// The insulin program carried by a set-insulin-schedule command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "program", rename_all = "camelCase")]
pub enum InsulinProgram {
    BasalSchedule {
        /// Minutes past midnight at the moment the program starts.
        schedule_offset_minutes: u16,
        segments: Vec<BasalRateSegment>,
    },
    TempBasal {
        rate: UnitsPerHour,
        duration_minutes: u16,
    },
    Bolus {
        amount: Units,
        seconds_per_pulse: u8,
    },
}

/// Primary dosing command; always paired with the matching extra block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetInsulinScheduleCommand {
    pub nonce: u32,
    pub program: InsulinProgram,
}

/// Redundant bolus parameters the pod cross-checks against the schedule
/// command, plus confirmation beep flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BolusExtraCommand {
    pub amount: Units,
    pub seconds_per_pulse: u8,
    pub acknowledgement_beep: bool,
    pub completion_beep: bool,
    /// Minutes between periodic delivery-in-progress reminder beeps;
    /// zero disables them.
    pub reminder_interval_minutes: u8,
}

/// Redundant temp-basal parameters plus confirmation beep flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempBasalExtraCommand {
    pub rate: UnitsPerHour,
    pub duration_minutes: u16,
    pub acknowledgement_beep: bool,
    pub completion_beep: bool,
}

/// Redundant basal-schedule parameters plus confirmation beep flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasalScheduleExtraCommand {
    pub schedule_offset_minutes: u16,
    pub segments: Vec<BasalRateSegment>,
    pub acknowledgement_beep: bool,
    pub completion_beep: bool,
}

/// Cancels the selected delivery kinds, optionally beeping.
///
/// An empty kind set is a valid command: it delivers nothing but elicits a
/// status response and validates the nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelDeliveryCommand {
    pub nonce: u32,
    pub kinds: DeliveryKindSet,
    pub beep_type: BeepType,
}

/// Programs one or more alert slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureAlertsCommand {
    pub nonce: u32,
    pub alerts: Vec<PodAlert>,
}

/// Clears firing alerts in the given slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgeAlertCommand {
    pub nonce: u32,
    pub alerts: AlertSet,
}

/// Adjusts the pod's internal fault tables; used during pairing to disable
/// the $6x fault family until setup completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultConfigCommand {
    pub nonce: u32,
    pub tab5_sub16: u8,
    pub tab5_sub17: u8,
}

/// Sets confirmation beep preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeepConfigCommand {
    pub beep_type: BeepType,
    pub basal_completion_beep: bool,
    pub temp_basal_completion_beep: bool,
    pub bolus_completion_beep: bool,
}

/// Permanently shuts the pod down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivatePodCommand {
    pub nonce: u32,
}

/// Pod-side rejection of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ErrorResponse {
    /// The command's nonce did not match; `sync_word` keys the resync.
    BadNonce { sync_word: u16 },
    /// Any other rejection; retrying the same command will not help.
    NonRetryable {
        code: u8,
        fault_event_code: FaultEventCode,
        pod_progress: PodProgressStatus,
    },
}

/// Discriminator byte the pod uses for bad-nonce errors.
const BAD_NONCE_CODE: u8 = 0x14;

// ============================================================================
// The block enum
// ============================================================================

/// A single typed block within a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "block", rename_all = "camelCase")]
pub enum MessageBlock {
    GetStatus(GetStatusCommand),
    SetInsulinSchedule(SetInsulinScheduleCommand),
    BolusExtra(BolusExtraCommand),
    TempBasalExtra(TempBasalExtraCommand),
    BasalScheduleExtra(BasalScheduleExtraCommand),
    CancelDelivery(CancelDeliveryCommand),
    ConfigureAlerts(ConfigureAlertsCommand),
    AcknowledgeAlert(AcknowledgeAlertCommand),
    FaultConfig(FaultConfigCommand),
    BeepConfig(BeepConfigCommand),
    DeactivatePod(DeactivatePodCommand),
    StatusResponse(StatusResponse),
    PodInfoResponse(PodInfoResponse),
    ErrorResponse(ErrorResponse),
}

impl MessageBlock {
    pub fn block_type(&self) -> BlockType {
        match self {
            MessageBlock::GetStatus(_) => BlockType::GetStatus,
            MessageBlock::SetInsulinSchedule(_) => BlockType::SetInsulinSchedule,
            MessageBlock::BolusExtra(_) => BlockType::BolusExtra,
            MessageBlock::TempBasalExtra(_) => BlockType::TempBasalExtra,
            MessageBlock::BasalScheduleExtra(_) => BlockType::BasalScheduleExtra,
            MessageBlock::CancelDelivery(_) => BlockType::CancelDelivery,
            MessageBlock::ConfigureAlerts(_) => BlockType::ConfigureAlerts,
            MessageBlock::AcknowledgeAlert(_) => BlockType::AcknowledgeAlert,
            MessageBlock::FaultConfig(_) => BlockType::FaultConfig,
            MessageBlock::BeepConfig(_) => BlockType::BeepConfig,
            MessageBlock::DeactivatePod(_) => BlockType::DeactivatePod,
            MessageBlock::StatusResponse(_) => BlockType::StatusResponse,
            MessageBlock::PodInfoResponse(_) => BlockType::PodInfoResponse,
            MessageBlock::ErrorResponse(_) => BlockType::ErrorResponse,
        }
    }

    /// The nonce this block carries, if it is a nonce-bearing command.
    pub fn nonce(&self) -> Option<u32> {
        match self {
            MessageBlock::SetInsulinSchedule(c) => Some(c.nonce),
            MessageBlock::CancelDelivery(c) => Some(c.nonce),
            MessageBlock::ConfigureAlerts(c) => Some(c.nonce),
            MessageBlock::AcknowledgeAlert(c) => Some(c.nonce),
            MessageBlock::FaultConfig(c) => Some(c.nonce),
            MessageBlock::DeactivatePod(c) => Some(c.nonce),
            _ => None,
        }
    }

    /// Mutable access to the nonce field for in-place rewrite after resync.
    pub fn nonce_mut(&mut self) -> Option<&mut u32> {
        match self {
            MessageBlock::SetInsulinSchedule(c) => Some(&mut c.nonce),
            MessageBlock::CancelDelivery(c) => Some(&mut c.nonce),
            MessageBlock::ConfigureAlerts(c) => Some(&mut c.nonce),
            MessageBlock::AcknowledgeAlert(c) => Some(&mut c.nonce),
            MessageBlock::FaultConfig(c) => Some(&mut c.nonce),
            MessageBlock::DeactivatePod(c) => Some(&mut c.nonce),
            _ => None,
        }
    }

    /// Serializes this block (header and body) onto `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        let mut body = Vec::new();
        self.encode_body(&mut body);
        if body.len() > u8::MAX as usize {
            return Err(WireError::BlockTooLong { len: body.len() });
        }
        buf.push(self.block_type().as_byte());
        buf.push(body.len() as u8);
        buf.extend_from_slice(&body);
        Ok(())
    }

    fn encode_body(&self, buf: &mut Vec<u8>) {
        match self {
            MessageBlock::GetStatus(c) => {
                buf.push(c.pod_info_type.as_byte());
            }
            MessageBlock::SetInsulinSchedule(c) => {
                put_u32(buf, c.nonce);
                match &c.program {
                    InsulinProgram::BasalSchedule {
                        schedule_offset_minutes,
                        segments,
                    } => {
                        buf.push(0);
                        put_u16(buf, *schedule_offset_minutes);
                        buf.push(segments.len() as u8);
                        for segment in segments {
                            put_u16(buf, segment.duration_minutes);
                            put_u16(buf, segment.rate.pulses_per_hour() as u16);
                        }
                    }
                    InsulinProgram::TempBasal {
                        rate,
                        duration_minutes,
                    } => {
                        buf.push(1);
                        put_u16(buf, rate.pulses_per_hour() as u16);
                        put_u16(buf, *duration_minutes);
                    }
                    InsulinProgram::Bolus {
                        amount,
                        seconds_per_pulse,
                    } => {
                        buf.push(2);
                        put_u16(buf, amount.pulses() as u16);
                        buf.push(*seconds_per_pulse);
                    }
                }
            }
            MessageBlock::BolusExtra(c) => {
                put_u16(buf, c.amount.pulses() as u16);
                buf.push(c.seconds_per_pulse);
                buf.push(beep_flags(c.acknowledgement_beep, c.completion_beep));
                buf.push(c.reminder_interval_minutes);
            }
            MessageBlock::TempBasalExtra(c) => {
                put_u16(buf, c.rate.pulses_per_hour() as u16);
                put_u16(buf, c.duration_minutes);
                buf.push(beep_flags(c.acknowledgement_beep, c.completion_beep));
            }
            MessageBlock::BasalScheduleExtra(c) => {
                buf.push(beep_flags(c.acknowledgement_beep, c.completion_beep));
                put_u16(buf, c.schedule_offset_minutes);
                buf.push(c.segments.len() as u8);
                for segment in &c.segments {
                    put_u16(buf, segment.duration_minutes);
                    put_u16(buf, segment.rate.pulses_per_hour() as u16);
                }
            }
            MessageBlock::CancelDelivery(c) => {
                put_u32(buf, c.nonce);
                buf.push((c.beep_type.as_byte() << 4) | c.kinds.bits());
            }
            MessageBlock::ConfigureAlerts(c) => {
                put_u32(buf, c.nonce);
                for alert in &c.alerts {
                    buf.push(alert.slot.index());
                    match alert.trigger {
                        AlertTrigger::UnitsRemaining { threshold } => {
                            buf.push(0);
                            put_u16(buf, threshold.pulses() as u16);
                        }
                        AlertTrigger::TimeAfterActivation { offset } => {
                            buf.push(1);
                            put_u16(buf, offset.num_minutes() as u16);
                        }
                    }
                    put_u16(
                        buf,
                        alert.duration.map_or(0, |d| d.num_minutes() as u16),
                    );
                    buf.push(alert.beep_type.as_byte());
                    buf.push(alert.beep_repeat_minutes);
                }
            }
            MessageBlock::AcknowledgeAlert(c) => {
                put_u32(buf, c.nonce);
                buf.push(c.alerts.bits());
            }
            MessageBlock::FaultConfig(c) => {
                put_u32(buf, c.nonce);
                buf.push(c.tab5_sub16);
                buf.push(c.tab5_sub17);
            }
            MessageBlock::BeepConfig(c) => {
                buf.push(c.beep_type.as_byte());
                let mut flags = 0u8;
                if c.basal_completion_beep {
                    flags |= 0b001;
                }
                if c.temp_basal_completion_beep {
                    flags |= 0b010;
                }
                if c.bolus_completion_beep {
                    flags |= 0b100;
                }
                buf.push(flags);
            }
            MessageBlock::DeactivatePod(c) => {
                put_u32(buf, c.nonce);
            }
            MessageBlock::StatusResponse(r) => r.encode_body(buf),
            MessageBlock::PodInfoResponse(r) => r.encode_body(buf),
            MessageBlock::ErrorResponse(r) => match r {
                ErrorResponse::BadNonce { sync_word } => {
                    buf.push(BAD_NONCE_CODE);
                    put_u16(buf, *sync_word);
                }
                ErrorResponse::NonRetryable {
                    code,
                    fault_event_code,
                    pod_progress,
                } => {
                    buf.push(*code);
                    buf.push(fault_event_code.as_byte());
                    buf.push(pod_progress.as_byte());
                }
            },
        }
    }

    /// Parses one block from the front of `data`, returning it and the
    /// number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), WireError> {
        if data.len() < 2 {
            return Err(WireError::UnexpectedEof);
        }
        let block_type =
            BlockType::from_byte(data[0]).ok_or(WireError::UnknownBlockType { byte: data[0] })?;
        let len = data[1] as usize;
        let body = data.get(2..2 + len).ok_or(WireError::UnexpectedEof)?;
        let block = Self::decode_body(block_type, body)?;
        Ok((block, 2 + len))
    }

    fn decode_body(block_type: BlockType, body: &[u8]) -> Result<Self, WireError> {
        match block_type {
            BlockType::GetStatus => {
                let byte = read_u8(body, 0)?;
                let pod_info_type = PodInfoType::from_byte(byte).ok_or(WireError::InvalidValue {
                    field: "pod info type",
                    byte,
                })?;
                Ok(MessageBlock::GetStatus(GetStatusCommand { pod_info_type }))
            }
            BlockType::SetInsulinSchedule => {
                let nonce = read_u32(body, 0)?;
                let program = match read_u8(body, 4)? {
                    0 => {
                        let schedule_offset_minutes = read_u16(body, 5)?;
                        let count = read_u8(body, 7)? as usize;
                        let mut segments = Vec::with_capacity(count);
                        for i in 0..count {
                            segments.push(BasalRateSegment {
                                duration_minutes: read_u16(body, 8 + i * 4)?,
                                rate: UnitsPerHour::from_pulses_per_hour(u32::from(read_u16(
                                    body,
                                    10 + i * 4,
                                )?)),
                            });
                        }
                        InsulinProgram::BasalSchedule {
                            schedule_offset_minutes,
                            segments,
                        }
                    }
                    1 => InsulinProgram::TempBasal {
                        rate: UnitsPerHour::from_pulses_per_hour(u32::from(read_u16(body, 5)?)),
                        duration_minutes: read_u16(body, 7)?,
                    },
                    2 => InsulinProgram::Bolus {
                        amount: Units::from_pulses(u32::from(read_u16(body, 5)?)),
                        seconds_per_pulse: read_u8(body, 7)?,
                    },
                    byte => {
                        return Err(WireError::InvalidValue {
                            field: "insulin program type",
                            byte,
                        });
                    }
                };
                Ok(MessageBlock::SetInsulinSchedule(SetInsulinScheduleCommand {
                    nonce,
                    program,
                }))
            }
            BlockType::BolusExtra => {
                let flags = read_u8(body, 3)?;
                Ok(MessageBlock::BolusExtra(BolusExtraCommand {
                    amount: Units::from_pulses(u32::from(read_u16(body, 0)?)),
                    seconds_per_pulse: read_u8(body, 2)?,
                    acknowledgement_beep: flags & 0b01 != 0,
                    completion_beep: flags & 0b10 != 0,
                    reminder_interval_minutes: read_u8(body, 4)?,
                }))
            }
            BlockType::TempBasalExtra => {
                let flags = read_u8(body, 4)?;
                Ok(MessageBlock::TempBasalExtra(TempBasalExtraCommand {
                    rate: UnitsPerHour::from_pulses_per_hour(u32::from(read_u16(body, 0)?)),
                    duration_minutes: read_u16(body, 2)?,
                    acknowledgement_beep: flags & 0b01 != 0,
                    completion_beep: flags & 0b10 != 0,
                }))
            }
            BlockType::BasalScheduleExtra => {
                let flags = read_u8(body, 0)?;
                let schedule_offset_minutes = read_u16(body, 1)?;
                let count = read_u8(body, 3)? as usize;
                let mut segments = Vec::with_capacity(count);
                for i in 0..count {
                    segments.push(BasalRateSegment {
                        duration_minutes: read_u16(body, 4 + i * 4)?,
                        rate: UnitsPerHour::from_pulses_per_hour(u32::from(read_u16(
                            body,
                            6 + i * 4,
                        )?)),
                    });
                }
                Ok(MessageBlock::BasalScheduleExtra(BasalScheduleExtraCommand {
                    schedule_offset_minutes,
                    segments,
                    acknowledgement_beep: flags & 0b01 != 0,
                    completion_beep: flags & 0b10 != 0,
                }))
            }
            BlockType::CancelDelivery => {
                let nonce = read_u32(body, 0)?;
                let packed = read_u8(body, 4)?;
                let beep_type =
                    BeepType::from_byte(packed >> 4).ok_or(WireError::InvalidValue {
                        field: "beep type",
                        byte: packed >> 4,
                    })?;
                let kinds = BitFlags::from_bits(packed & 0x0F).map_err(|_| {
                    WireError::InvalidValue {
                        field: "delivery kinds",
                        byte: packed & 0x0F,
                    }
                })?;
                Ok(MessageBlock::CancelDelivery(CancelDeliveryCommand {
                    nonce,
                    kinds,
                    beep_type,
                }))
            }
            BlockType::ConfigureAlerts => {
                let nonce = read_u32(body, 0)?;
                let alert_bytes = &body[4..];
                if alert_bytes.len() % 8 != 0 {
                    return Err(WireError::UnexpectedEof);
                }
                let mut alerts = Vec::with_capacity(alert_bytes.len() / 8);
                for chunk in alert_bytes.chunks_exact(8) {
                    let slot = AlertSlot::from_index(chunk[0]).ok_or(WireError::InvalidValue {
                        field: "alert slot",
                        byte: chunk[0],
                    })?;
                    let value = u16::from_be_bytes([chunk[2], chunk[3]]);
                    let trigger = match chunk[1] {
                        0 => AlertTrigger::UnitsRemaining {
                            threshold: Units::from_pulses(u32::from(value)),
                        },
                        1 => AlertTrigger::TimeAfterActivation {
                            offset: chrono::Duration::minutes(i64::from(value)),
                        },
                        byte => {
                            return Err(WireError::InvalidValue {
                                field: "alert trigger",
                                byte,
                            });
                        }
                    };
                    let duration_minutes = u16::from_be_bytes([chunk[4], chunk[5]]);
                    let beep_type =
                        BeepType::from_byte(chunk[6]).ok_or(WireError::InvalidValue {
                            field: "beep type",
                            byte: chunk[6],
                        })?;
                    alerts.push(PodAlert {
                        slot,
                        trigger,
                        duration: (duration_minutes > 0)
                            .then(|| chrono::Duration::minutes(i64::from(duration_minutes))),
                        beep_type,
                        beep_repeat_minutes: chunk[7],
                    });
                }
                Ok(MessageBlock::ConfigureAlerts(ConfigureAlertsCommand {
                    nonce,
                    alerts,
                }))
            }
            BlockType::AcknowledgeAlert => Ok(MessageBlock::AcknowledgeAlert(
                AcknowledgeAlertCommand {
                    nonce: read_u32(body, 0)?,
                    alerts: BitFlags::from_bits_truncate(read_u8(body, 4)?),
                },
            )),
            BlockType::FaultConfig => Ok(MessageBlock::FaultConfig(FaultConfigCommand {
                nonce: read_u32(body, 0)?,
                tab5_sub16: read_u8(body, 4)?,
                tab5_sub17: read_u8(body, 5)?,
            })),
            BlockType::BeepConfig => {
                let byte = read_u8(body, 0)?;
                let beep_type = BeepType::from_byte(byte).ok_or(WireError::InvalidValue {
                    field: "beep type",
                    byte,
                })?;
                let flags = read_u8(body, 1)?;
                Ok(MessageBlock::BeepConfig(BeepConfigCommand {
                    beep_type,
                    basal_completion_beep: flags & 0b001 != 0,
                    temp_basal_completion_beep: flags & 0b010 != 0,
                    bolus_completion_beep: flags & 0b100 != 0,
                }))
            }
            BlockType::DeactivatePod => Ok(MessageBlock::DeactivatePod(DeactivatePodCommand {
                nonce: read_u32(body, 0)?,
            })),
            BlockType::StatusResponse => Ok(MessageBlock::StatusResponse(
                StatusResponse::decode_body(body)?,
            )),
            BlockType::PodInfoResponse => Ok(MessageBlock::PodInfoResponse(
                PodInfoResponse::decode_body(body)?,
            )),
            BlockType::ErrorResponse => {
                let code = read_u8(body, 0)?;
                if code == BAD_NONCE_CODE {
                    Ok(MessageBlock::ErrorResponse(ErrorResponse::BadNonce {
                        sync_word: read_u16(body, 1)?,
                    }))
                } else {
                    let fault_byte = read_u8(body, 1)?;
                    let progress_byte = read_u8(body, 2)?;
                    let pod_progress = PodProgressStatus::from_byte(progress_byte).ok_or(
                        WireError::InvalidValue {
                            field: "pod progress",
                            byte: progress_byte,
                        },
                    )?;
                    Ok(MessageBlock::ErrorResponse(ErrorResponse::NonRetryable {
                        code,
                        fault_event_code: FaultEventCode::new(fault_byte),
                        pod_progress,
                    }))
                }
            }
        }
    }
}

impl TryFrom<MessageBlock> for StatusResponse {
    type Error = BlockType;

    fn try_from(block: MessageBlock) -> Result<Self, BlockType> {
        match block {
            MessageBlock::StatusResponse(response) => Ok(response),
            other => Err(other.block_type()),
        }
    }
}

impl TryFrom<MessageBlock> for PodInfoResponse {
    type Error = BlockType;

    fn try_from(block: MessageBlock) -> Result<Self, BlockType> {
        match block {
            MessageBlock::PodInfoResponse(response) => Ok(response),
            other => Err(other.block_type()),
        }
    }
}

// ============================================================================
// Byte helpers
// ============================================================================

fn beep_flags(acknowledgement: bool, completion: bool) -> u8 {
    u8::from(acknowledgement) | (u8::from(completion) << 1)
}

pub(crate) fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn read_u8(body: &[u8], at: usize) -> Result<u8, WireError> {
    body.get(at).copied().ok_or(WireError::UnexpectedEof)
}

pub(crate) fn read_u16(body: &[u8], at: usize) -> Result<u16, WireError> {
    body.get(at..at + 2)
        .map(|s| u16::from_be_bytes([s[0], s[1]]))
        .ok_or(WireError::UnexpectedEof)
}

pub(crate) fn read_u32(body: &[u8], at: usize) -> Result<u32, WireError> {
    body.get(at..at + 4)
        .map(|s| u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
        .ok_or(WireError::UnexpectedEof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use podlink_types::{BasalScheduleEntry, all_deliveries};

    fn roundtrip(block: &MessageBlock) -> MessageBlock {
        let mut buf = Vec::new();
        block.encode(&mut buf).unwrap();
        let (decoded, consumed) = MessageBlock::decode(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        decoded
    }

    #[test]
    fn bolus_command_roundtrip() {
        let block = MessageBlock::SetInsulinSchedule(SetInsulinScheduleCommand {
            nonce: 0xD752_311C,
            program: InsulinProgram::Bolus {
                amount: Units::from_f64(1.0),
                seconds_per_pulse: 2,
            },
        });
        assert_eq!(roundtrip(&block), block);
        assert_eq!(block.nonce(), Some(0xD752_311C));
    }

    #[test]
    fn bolus_extra_roundtrip() {
        let block = MessageBlock::BolusExtra(BolusExtraCommand {
            amount: Units::from_f64(1.0),
            seconds_per_pulse: 2,
            acknowledgement_beep: false,
            completion_beep: true,
            reminder_interval_minutes: 60,
        });
        assert_eq!(roundtrip(&block), block);
        assert_eq!(block.nonce(), None);
    }

    #[test]
    fn bolus_command_layout() {
        let block = MessageBlock::SetInsulinSchedule(SetInsulinScheduleCommand {
            nonce: 0x0102_0304,
            program: InsulinProgram::Bolus {
                amount: Units::from_pulses(20),
                seconds_per_pulse: 2,
            },
        });
        let mut buf = Vec::new();
        block.encode(&mut buf).unwrap();
        assert_eq!(
            buf,
            vec![0x1A, 8, 0x01, 0x02, 0x03, 0x04, 2, 0x00, 0x14, 0x02]
        );
    }

    #[test]
    fn cancel_delivery_packs_beep_and_kinds() {
        let block = MessageBlock::CancelDelivery(CancelDeliveryCommand {
            nonce: 0,
            kinds: all_deliveries(),
            beep_type: BeepType::BipBip,
        });
        let mut buf = Vec::new();
        block.encode(&mut buf).unwrap();
        // nonce(4) + packed byte: beep 3 in high nibble, kinds 0b111 low
        assert_eq!(buf[6], (3 << 4) | 0b111);
        assert_eq!(roundtrip(&block), block);
    }

    #[test]
    fn cancel_delivery_empty_kind_set_is_valid() {
        let block = MessageBlock::CancelDelivery(CancelDeliveryCommand {
            nonce: 7,
            kinds: DeliveryKindSet::empty(),
            beep_type: BeepType::NoBeep,
        });
        assert_eq!(roundtrip(&block), block);
    }

    #[test]
    fn basal_schedule_roundtrip() {
        let schedule = BasalSchedule::new(vec![
            BasalScheduleEntry {
                start_offset: Duration::zero(),
                rate: UnitsPerHour::from_f64(0.8),
            },
            BasalScheduleEntry {
                start_offset: Duration::hours(8),
                rate: UnitsPerHour::from_f64(1.2),
            },
        ])
        .unwrap();
        let segments = segments_for(&schedule);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].duration_minutes, 480);
        assert_eq!(segments[1].duration_minutes, 960);

        let block = MessageBlock::SetInsulinSchedule(SetInsulinScheduleCommand {
            nonce: 1,
            program: InsulinProgram::BasalSchedule {
                schedule_offset_minutes: 123,
                segments: segments.clone(),
            },
        });
        assert_eq!(roundtrip(&block), block);

        let extra = MessageBlock::BasalScheduleExtra(BasalScheduleExtraCommand {
            schedule_offset_minutes: 123,
            segments,
            acknowledgement_beep: false,
            completion_beep: true,
        });
        assert_eq!(roundtrip(&extra), extra);
    }

    #[test]
    fn configure_alerts_roundtrip() {
        let block = MessageBlock::ConfigureAlerts(ConfigureAlertsCommand {
            nonce: 42,
            alerts: vec![
                PodAlert::finish_setup_reminder(),
                PodAlert::expiration_advisory(Duration::hours(70)),
            ],
        });
        assert_eq!(roundtrip(&block), block);
    }

    #[test]
    fn error_response_bad_nonce_layout() {
        let block = MessageBlock::ErrorResponse(ErrorResponse::BadNonce { sync_word: 0x3A5C });
        let mut buf = Vec::new();
        block.encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0x06, 3, 0x14, 0x3A, 0x5C]);
        assert_eq!(roundtrip(&block), block);
    }

    #[test]
    fn error_response_nonretryable_roundtrip() {
        let block = MessageBlock::ErrorResponse(ErrorResponse::NonRetryable {
            code: 0x07,
            fault_event_code: FaultEventCode::new(0),
            pod_progress: PodProgressStatus::ReadyForDelivery,
        });
        assert_eq!(roundtrip(&block), block);
    }

    #[test]
    fn nonce_rewrite_in_place() {
        let mut block = MessageBlock::DeactivatePod(DeactivatePodCommand { nonce: 1 });
        *block.nonce_mut().unwrap() = 99;
        assert_eq!(block.nonce(), Some(99));

        let mut status = MessageBlock::GetStatus(GetStatusCommand {
            pod_info_type: PodInfoType::Normal,
        });
        assert!(status.nonce_mut().is_none());
    }

    #[test]
    fn unknown_block_type_rejected() {
        assert_eq!(
            MessageBlock::decode(&[0xFF, 0]),
            Err(WireError::UnknownBlockType { byte: 0xFF })
        );
    }

    #[test]
    fn truncated_body_rejected() {
        // DeactivatePod claims 4 body bytes but supplies 2.
        assert_eq!(
            MessageBlock::decode(&[0x1C, 4, 0x00, 0x01]),
            Err(WireError::UnexpectedEof)
        );
    }

    #[test]
    fn beep_and_fault_config_roundtrip() {
        let beep = MessageBlock::BeepConfig(BeepConfigCommand {
            beep_type: BeepType::Beep,
            basal_completion_beep: true,
            temp_basal_completion_beep: false,
            bolus_completion_beep: true,
        });
        assert_eq!(roundtrip(&beep), beep);

        let fault = MessageBlock::FaultConfig(FaultConfigCommand {
            nonce: 3,
            tab5_sub16: 0,
            tab5_sub17: 0,
        });
        assert_eq!(roundtrip(&fault), fault);
        assert_eq!(fault.nonce(), Some(3));
    }

    #[test]
    fn acknowledge_alert_roundtrip() {
        let block = MessageBlock::AcknowledgeAlert(AcknowledgeAlertCommand {
            nonce: 11,
            alerts: AlertSlot::Slot2 | AlertSlot::Slot5,
        });
        assert_eq!(roundtrip(&block), block);
    }

    #[test]
    fn typed_extraction() {
        let block = MessageBlock::ErrorResponse(ErrorResponse::BadNonce { sync_word: 1 });
        let err = StatusResponse::try_from(block).unwrap_err();
        assert_eq!(err, BlockType::ErrorResponse);
    }
}
