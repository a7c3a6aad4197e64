//! Events delivered by a room connection.

use crate::room::transport::RemoteTrackRef;
use common::types::{ParticipantIdentity, Role};
use control_protocol::InboundPacket;

/// Transport event. Ordered per participant, unordered across participants.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    ParticipantConnected {
        identity: ParticipantIdentity,
        role: Role,
    },
    ParticipantDisconnected {
        identity: ParticipantIdentity,
    },
    TrackSubscribed {
        identity: ParticipantIdentity,
        track: RemoteTrackRef,
    },
    TrackUnsubscribed {
        identity: ParticipantIdentity,
        sid: String,
    },
    TrackMuted {
        identity: ParticipantIdentity,
        sid: String,
        muted: bool,
    },
    DataReceived(InboundPacket),
    /// The server closed the connection or the link was lost
    Disconnected {
        reason: String,
    },
}

impl RoomEvent {
    /// Bounded event name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            RoomEvent::ParticipantConnected { .. } => "participant_connected",
            RoomEvent::ParticipantDisconnected { .. } => "participant_disconnected",
            RoomEvent::TrackSubscribed { .. } => "track_subscribed",
            RoomEvent::TrackUnsubscribed { .. } => "track_unsubscribed",
            RoomEvent::TrackMuted { .. } => "track_muted",
            RoomEvent::DataReceived(_) => "data_received",
            RoomEvent::Disconnected { .. } => "disconnected",
        }
    }
}
