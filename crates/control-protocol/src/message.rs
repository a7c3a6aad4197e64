//! Control message types.

use common::types::ParticipantIdentity;
use serde::{Deserialize, Serialize};

/// Maximum chat message length in characters.
pub const MAX_CHAT_CHARS: usize = 2000;

/// A control message exchanged between participants.
///
/// Wire format: a JSON object whose `type` field selects the variant, e.g.
/// `{"type":"HAND_RAISE","raised":true}`. Payload field names are camelCase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Sender raised or lowered their hand
    HandRaise { raised: bool },

    /// Chat line broadcast to everyone in the room
    ChatMessage {
        text: String,
        /// Sender wall clock, milliseconds since the Unix epoch
        timestamp: i64,
    },

    /// Screen-share announcement; newest announcement wins
    ScreenShare {
        sharing: bool,
        #[serde(rename = "sharerIdentity")]
        sharer_identity: ParticipantIdentity,
    },

    /// Mentor asks the target to mute their microphone
    MuteParticipant {
        #[serde(rename = "targetIdentity")]
        target_identity: ParticipantIdentity,
    },

    /// Mentor allows the target to unmute their microphone
    UnmuteParticipant {
        #[serde(rename = "targetIdentity")]
        target_identity: ParticipantIdentity,
    },

    /// Mentor removes the target from the room
    KickParticipant {
        #[serde(rename = "targetIdentity")]
        target_identity: ParticipantIdentity,
    },
}

/// Bounded message discriminant, used for logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    HandRaise,
    ChatMessage,
    ScreenShare,
    MuteParticipant,
    UnmuteParticipant,
    KickParticipant,
}

impl MessageKind {
    /// Wire name of the message type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageKind::HandRaise => "HAND_RAISE",
            MessageKind::ChatMessage => "CHAT_MESSAGE",
            MessageKind::ScreenShare => "SCREEN_SHARE",
            MessageKind::MuteParticipant => "MUTE_PARTICIPANT",
            MessageKind::UnmuteParticipant => "UNMUTE_PARTICIPANT",
            MessageKind::KickParticipant => "KICK_PARTICIPANT",
        }
    }

    /// Parse a wire type name. Unknown names yield `None`.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "HAND_RAISE" => Some(MessageKind::HandRaise),
            "CHAT_MESSAGE" => Some(MessageKind::ChatMessage),
            "SCREEN_SHARE" => Some(MessageKind::ScreenShare),
            "MUTE_PARTICIPANT" => Some(MessageKind::MuteParticipant),
            "UNMUTE_PARTICIPANT" => Some(MessageKind::UnmuteParticipant),
            "KICK_PARTICIPANT" => Some(MessageKind::KickParticipant),
            _ => None,
        }
    }
}

impl ControlMessage {
    /// The discriminant of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            ControlMessage::HandRaise { .. } => MessageKind::HandRaise,
            ControlMessage::ChatMessage { .. } => MessageKind::ChatMessage,
            ControlMessage::ScreenShare { .. } => MessageKind::ScreenShare,
            ControlMessage::MuteParticipant { .. } => MessageKind::MuteParticipant,
            ControlMessage::UnmuteParticipant { .. } => MessageKind::UnmuteParticipant,
            ControlMessage::KickParticipant { .. } => MessageKind::KickParticipant,
        }
    }

    /// Target of a moderation message, if this is one.
    #[must_use]
    pub fn moderation_target(&self) -> Option<&ParticipantIdentity> {
        match self {
            ControlMessage::MuteParticipant { target_identity }
            | ControlMessage::UnmuteParticipant { target_identity }
            | ControlMessage::KickParticipant { target_identity } => Some(target_identity),
            ControlMessage::HandRaise { .. }
            | ControlMessage::ChatMessage { .. }
            | ControlMessage::ScreenShare { .. } => None,
        }
    }

    /// Build a chat message, trimming the text.
    ///
    /// Returns `None` for text that is empty after trimming; over-long text is
    /// truncated to [`MAX_CHAT_CHARS`].
    #[must_use]
    pub fn chat(text: &str, timestamp: i64) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        let text: String = trimmed.chars().take(MAX_CHAT_CHARS).collect();
        Some(ControlMessage::ChatMessage { text, timestamp })
    }
}
