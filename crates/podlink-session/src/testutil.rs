//! Shared test fixtures: a scripted transport and canned pod responses.

use std::collections::VecDeque;

use chrono::{Duration, Utc};

use podlink_types::{
    AlertSet, DeliveryStatus, FaultEventCode, Lot, PodAddress, PodProgressStatus, SetupProgress,
    Tid, Units,
};
use podlink_wire::{DetailedStatus, Message, MessageBlock, PodInfoResponse, StatusResponse};

use crate::pod_state::PodState;
use crate::session::Session;
use crate::transport::{MessageTransport, MessageTransportState, TransportError};

pub(crate) fn test_address() -> PodAddress {
    PodAddress::new(0x1F0E_C0DE)
}

/// A transport that replays a scripted list of responses and records every
/// message sent through it.
pub(crate) struct MockTransport {
    pub responses: VecDeque<Result<Message, TransportError>>,
    pub sent: Vec<Message>,
    pub message_number: u8,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            responses: VecDeque::new(),
            sent: Vec::new(),
            message_number: 0,
        }
    }

    pub fn queue_blocks(&mut self, blocks: Vec<MessageBlock>) {
        self.responses
            .push_back(Ok(Message::new(test_address(), 0, blocks, false)));
    }

    pub fn queue_message(&mut self, message: Message) {
        self.responses.push_back(Ok(message));
    }

    pub fn queue_error(&mut self, error: TransportError) {
        self.responses.push_back(Err(error));
    }
}

impl MessageTransport for MockTransport {
    fn send_message(&mut self, message: &Message) -> Result<Message, TransportError> {
        self.sent.push(message.clone());
        // One increment for our message, one for the pod's reply.
        self.message_number = (self.message_number + 2) & 0x3F;
        self.responses
            .pop_front()
            .unwrap_or(Err(TransportError::NoResponse))
    }

    fn message_number(&self) -> u8 {
        self.message_number
    }

    fn transport_state(&self) -> MessageTransportState {
        MessageTransportState {
            packet_number: self.message_number,
            message_number: self.message_number,
        }
    }
}

pub(crate) fn test_pod_state() -> PodState {
    PodState::new(
        test_address(),
        "2.7.0".to_string(),
        "2.7.0".to_string(),
        Lot::new(43620),
        Tid::new(560_313),
        Utc::now() - Duration::hours(1),
    )
}

pub(crate) fn ready_pod_state() -> PodState {
    let mut state = test_pod_state();
    state.advance_setup_progress(SetupProgress::Completed);
    state
}

pub(crate) fn ready_session() -> Session<MockTransport> {
    Session::new(ready_pod_state(), MockTransport::new())
}

pub(crate) fn status(delivery: DeliveryStatus) -> StatusResponse {
    StatusResponse {
        delivery_status: delivery,
        pod_progress: PodProgressStatus::ReadyForDelivery,
        insulin_delivered: Units::from_f64(20.0),
        bolus_not_delivered: Units::ZERO,
        reservoir: Some(Units::from_f64(120.0)),
        time_active: Duration::hours(1),
        active_alerts: AlertSet::empty(),
    }
}

pub(crate) fn status_with_progress(
    delivery: DeliveryStatus,
    progress: PodProgressStatus,
) -> StatusResponse {
    StatusResponse {
        pod_progress: progress,
        ..status(delivery)
    }
}

pub(crate) fn status_blocks(response: StatusResponse) -> Vec<MessageBlock> {
    vec![MessageBlock::StatusResponse(response)]
}

pub(crate) fn fault_detail(code: u8, bolus_not_delivered: Units) -> DetailedStatus {
    DetailedStatus {
        pod_progress: PodProgressStatus::FaultEventOccurred,
        delivery_status: DeliveryStatus::Suspended,
        bolus_not_delivered,
        fault_event_code: FaultEventCode::new(code),
        fault_event_time: Some(Duration::minutes(59)),
        reservoir: None,
        time_active: Duration::hours(1),
        insulin_delivered: Units::from_f64(20.0),
        unacknowledged_alerts: AlertSet::empty(),
    }
}

pub(crate) fn fault_blocks(code: u8, bolus_not_delivered: Units) -> Vec<MessageBlock> {
    vec![MessageBlock::PodInfoResponse(
        PodInfoResponse::DetailedStatus(fault_detail(code, bolus_not_delivered)),
    )]
}
