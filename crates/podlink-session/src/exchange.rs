//! Typed message exchange with nonce resync.
//!
//! [`Session::send`] is the sole entry point for pod I/O. It stamps the
//! pod address and sequence number, assigns the nonce to nonce-bearing
//! blocks, and runs a two-attempt loop: a bad-nonce error reseeds the
//! generator from the pod's sync word, rewrites the blocks' nonce fields in
//! place, and retries exactly once.

use chrono::Utc;

use podlink_wire::{BlockType, ErrorResponse, Message, MessageBlock, StatusResponse};

use crate::error::PodCommsError;
use crate::session::Session;
use crate::transport::MessageTransport;

impl<T: MessageTransport> Session<T> {
    /// Sends `blocks` as one message and returns the first response block,
    /// decoded as `R`.
    ///
    /// Response handling order matters: a first block of the expected type
    /// is returned even when later blocks carry fault detail, so callers
    /// that poll for fault state (detailed status) can report it without
    /// the exchange throwing first.
    pub(crate) fn send<R>(
        &mut self,
        mut blocks: Vec<MessageBlock>,
        expect_follow_on: bool,
    ) -> Result<R, PodCommsError>
    where
        R: TryFrom<MessageBlock, Error = BlockType>,
    {
        self.transport.assert_on_session_queue();

        // Nonce-bearing commands consume a nonce per message, assigned here
        // so individual operations never touch the generator.
        let nonce_bearing = blocks.iter().any(|block| block.nonce().is_some());
        if nonce_bearing {
            let nonce = self.mutate(|state| {
                state.nonce_state.advance_to_next_nonce();
                state.nonce_state.current_nonce()
            });
            rewrite_nonces(&mut blocks, nonce);
        }
        let mut sent_nonce = blocks.iter().find_map(MessageBlock::nonce);

        for attempt in 0..2 {
            let message = Message::new(
                self.state.address,
                self.transport.message_number(),
                blocks.clone(),
                expect_follow_on,
            );
            tracing::debug!(
                seq = message.sequence_num,
                blocks = message.blocks.len(),
                attempt,
                "sending message"
            );

            let response = self.transport.send_message(&message)?;

            // Address mismatch means crosstalk with another pod; nothing in
            // this response may touch our state.
            if response.address != self.state.address {
                return Err(PodCommsError::InvalidAddress {
                    got: response.address,
                    expected: self.state.address,
                });
            }

            let transport_state = self.transport.transport_state();
            self.mutate(|state| state.message_transport_state = transport_state);

            let Some(first) = response.blocks.first().cloned() else {
                return Err(PodCommsError::EmptyResponse);
            };

            if let Ok(typed) = R::try_from(first.clone()) {
                return Ok(typed);
            }

            if let Some(fault) = response.fault().copied() {
                return Err(self.throw_pod_fault(fault));
            }

            match first {
                MessageBlock::ErrorResponse(ErrorResponse::BadNonce { sync_word }) => {
                    let Some(sent) = sent_nonce else {
                        return Err(PodCommsError::UnexpectedResponse(BlockType::ErrorResponse));
                    };
                    let sequence_num = message.sequence_num;
                    let nonce = self.mutate(|state| {
                        state.nonce_state.resync(sync_word, sent, sequence_num);
                        let nonce = state.nonce_state.current_nonce();
                        state.nonce_state.advance_to_next_nonce();
                        nonce
                    });
                    tracing::warn!(sync_word, "bad nonce; reseeded, retrying once");
                    rewrite_nonces(&mut blocks, nonce);
                    sent_nonce = Some(nonce);
                }
                MessageBlock::ErrorResponse(ErrorResponse::NonRetryable { code, .. }) => {
                    return Err(PodCommsError::RejectedMessage(code));
                }
                other => {
                    return Err(PodCommsError::UnexpectedResponse(other.block_type()));
                }
            }
        }

        Err(PodCommsError::NonceResyncFailed)
    }

    /// Sends, expects a status response, and folds it into the pod state.
    pub(crate) fn send_status_update(
        &mut self,
        blocks: Vec<MessageBlock>,
        expect_follow_on: bool,
    ) -> Result<StatusResponse, PodCommsError> {
        let status: StatusResponse = self.send(blocks, expect_follow_on)?;
        let now = Utc::now();
        self.mutate(|state| state.update_from_status_response(&status, now));
        Ok(status)
    }
}

fn rewrite_nonces(blocks: &mut [MessageBlock], nonce: u32) {
    for block in blocks {
        if let Some(slot) = block.nonce_mut() {
            *slot = nonce;
        }
    }
}
