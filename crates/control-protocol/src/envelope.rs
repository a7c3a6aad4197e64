//! Data-channel packets.

use crate::codec::{decode_message, CodecError};
use crate::message::ControlMessage;
use bytes::Bytes;
use common::types::ParticipantIdentity;

/// A raw packet received on the room data channel.
#[derive(Debug, Clone)]
pub struct InboundPacket {
    /// Identity of the sending participant, if the transport knows it
    pub sender: Option<ParticipantIdentity>,
    /// Undecoded payload
    pub payload: Bytes,
}

impl InboundPacket {
    /// Create a packet from a known sender.
    #[must_use]
    pub fn new(sender: ParticipantIdentity, payload: Bytes) -> Self {
        Self {
            sender: Some(sender),
            payload,
        }
    }

    /// Decode the payload into a control message.
    ///
    /// # Errors
    ///
    /// Returns the codec error for malformed or unknown payloads
    pub fn decode(&self) -> Result<ControlMessage, CodecError> {
        decode_message(&self.payload)
    }
}
