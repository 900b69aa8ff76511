//! The command/response message envelope.
//!
//! # Wire Format
//!
//! ```text
//! [address:u32 BE][seqAndFlags:u8][length:u8][blocks...][crc16:u16 BE]
//!      4B               1B            1B       variable       2B
//! ```
//!
//! `seqAndFlags` packs the 6-bit sequence number into bits 7..2 and the
//! expect-follow-on flag into bit 0. The CRC covers everything before it.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use podlink_types::PodAddress;

use crate::block::MessageBlock;
use crate::crc16::crc16;
use crate::error::WireError;
use crate::status::DetailedStatus;

/// Bytes of framing around the block list: address + seq/flags + length + crc.
const ENVELOPE_OVERHEAD: usize = 8;

/// A complete protocol message; commands and responses share this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub address: PodAddress,
    /// 6-bit message sequence number.
    pub sequence_num: u8,
    /// Asks the pod to hold its 4-minute idle alarm for a follow-up command.
    pub expect_follow_on: bool,
    pub blocks: Vec<MessageBlock>,
}

impl Message {
    pub fn new(
        address: PodAddress,
        sequence_num: u8,
        blocks: Vec<MessageBlock>,
        expect_follow_on: bool,
    ) -> Self {
        Self {
            address,
            sequence_num: sequence_num & 0x3F,
            expect_follow_on,
            blocks,
        }
    }

    /// The fault report embedded in this message, if any block carries one.
    pub fn fault(&self) -> Option<&DetailedStatus> {
        self.blocks.iter().find_map(|block| match block {
            MessageBlock::PodInfoResponse(info) => {
                info.detailed_status().filter(|status| status.is_faulted())
            }
            _ => None,
        })
    }

    /// Serializes the message, including the CRC trailer.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut body = Vec::new();
        for block in &self.blocks {
            block.encode(&mut body)?;
        }
        if body.len() > u8::MAX as usize {
            return Err(WireError::MessageTooLong { len: body.len() });
        }

        let mut buf = BytesMut::with_capacity(ENVELOPE_OVERHEAD + body.len());
        buf.extend_from_slice(&self.address.as_u32().to_be_bytes());
        buf.extend_from_slice(&[
            ((self.sequence_num & 0x3F) << 2) | u8::from(self.expect_follow_on),
            body.len() as u8,
        ]);
        buf.extend_from_slice(&body);
        let crc = crc16(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        Ok(buf.freeze())
    }

    /// Parses a complete message, verifying length and CRC.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < ENVELOPE_OVERHEAD {
            return Err(WireError::UnexpectedEof);
        }
        let body_len = data[5] as usize;
        if data.len() != ENVELOPE_OVERHEAD + body_len {
            return Err(WireError::UnexpectedEof);
        }

        let crc_offset = data.len() - 2;
        let stored = u16::from_be_bytes([data[crc_offset], data[crc_offset + 1]]);
        let computed = crc16(&data[..crc_offset]);
        if stored != computed {
            return Err(WireError::CrcMismatch { stored, computed });
        }

        let address = PodAddress::new(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
        let seq_and_flags = data[4];

        let mut blocks = Vec::new();
        let mut offset = 6;
        while offset < crc_offset {
            let (block, consumed) = MessageBlock::decode(&data[offset..crc_offset])?;
            blocks.push(block);
            offset += consumed;
        }

        Ok(Self {
            address,
            sequence_num: seq_and_flags >> 2,
            expect_follow_on: seq_and_flags & 0x01 != 0,
            blocks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{GetStatusCommand, PodInfoType};
    use crate::status::StatusResponse;
    use chrono::Duration;
    use podlink_types::{AlertSet, DeliveryStatus, PodProgressStatus, Units};

    fn get_status() -> Message {
        Message::new(
            PodAddress::new(0x1F0E_C0DE),
            9,
            vec![MessageBlock::GetStatus(GetStatusCommand {
                pod_info_type: PodInfoType::Normal,
            })],
            false,
        )
    }

    #[test]
    fn envelope_layout() {
        let encoded = get_status().encode().unwrap();
        assert_eq!(&encoded[0..4], &[0x1F, 0x0E, 0xC0, 0xDE]);
        assert_eq!(encoded[4], 9 << 2);
        assert_eq!(encoded[5], 3); // one get-status block: type + len + body
        assert_eq!(&encoded[6..9], &[0x0E, 1, 0x00]);
        let crc = crc16(&encoded[..encoded.len() - 2]);
        assert_eq!(&encoded[9..], &crc.to_be_bytes());
    }

    #[test]
    fn expect_follow_on_sets_bit_zero() {
        let mut message = get_status();
        message.expect_follow_on = true;
        let encoded = message.encode().unwrap();
        assert_eq!(encoded[4], (9 << 2) | 1);
        let decoded = Message::decode(&encoded).unwrap();
        assert!(decoded.expect_follow_on);
    }

    #[test]
    fn roundtrip_multi_block() {
        let message = Message::new(
            PodAddress::new(0xAABB_CCDD),
            63,
            vec![
                MessageBlock::GetStatus(GetStatusCommand {
                    pod_info_type: PodInfoType::DetailedStatus,
                }),
                MessageBlock::StatusResponse(StatusResponse {
                    delivery_status: DeliveryStatus::BolusInProgress,
                    pod_progress: PodProgressStatus::ReadyForDelivery,
                    insulin_delivered: Units::from_f64(10.0),
                    bolus_not_delivered: Units::from_f64(1.2),
                    reservoir: None,
                    time_active: Duration::minutes(300),
                    active_alerts: AlertSet::empty(),
                }),
            ],
            true,
        );
        let decoded = Message::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn sequence_number_is_masked_to_six_bits() {
        let message = Message::new(PodAddress::new(1), 0x7F, vec![], false);
        assert_eq!(message.sequence_num, 0x3F);
    }

    #[test]
    fn corrupted_crc_rejected() {
        let mut encoded = get_status().encode().unwrap().to_vec();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(matches!(
            Message::decode(&encoded),
            Err(WireError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn corrupted_payload_rejected() {
        let mut encoded = get_status().encode().unwrap().to_vec();
        encoded[6] ^= 0x01;
        assert!(matches!(
            Message::decode(&encoded),
            Err(WireError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn truncated_message_rejected() {
        let encoded = get_status().encode().unwrap();
        assert_eq!(
            Message::decode(&encoded[..encoded.len() - 1]),
            Err(WireError::UnexpectedEof)
        );
        assert_eq!(Message::decode(&[]), Err(WireError::UnexpectedEof));
    }

    #[test]
    fn fault_lookup_finds_faulted_detail() {
        use crate::status::{DetailedStatus, PodInfoResponse};
        use podlink_types::FaultEventCode;

        let detail = DetailedStatus {
            pod_progress: PodProgressStatus::FaultEventOccurred,
            delivery_status: DeliveryStatus::Suspended,
            bolus_not_delivered: Units::ZERO,
            fault_event_code: FaultEventCode::new(0x31),
            fault_event_time: Some(Duration::minutes(10)),
            reservoir: None,
            time_active: Duration::minutes(11),
            insulin_delivered: Units::ZERO,
            unacknowledged_alerts: AlertSet::empty(),
        };
        let message = Message::new(
            PodAddress::new(2),
            0,
            vec![MessageBlock::PodInfoResponse(
                PodInfoResponse::DetailedStatus(detail),
            )],
            false,
        );
        assert_eq!(
            message.fault().map(|f| f.fault_event_code),
            Some(FaultEventCode::new(0x31))
        );
        assert!(get_status().fault().is_none());
    }
}
