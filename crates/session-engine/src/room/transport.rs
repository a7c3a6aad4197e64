//! Room transport seam.
//!
//! The SFU client library is out of scope; the room session talks to it only
//! through these traits.

use crate::errors::SessionError;
use crate::media::LocalTrack;
use crate::room::events::RoomEvent;
use async_trait::async_trait;
use bytes::Bytes;
use common::secret::JoinToken;
use common::types::ParticipantIdentity;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

/// Transport-assigned id of a published local track.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicationId(pub String);

impl fmt::Display for PublicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle of a render sink bound to a remote track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SinkId(pub u64);

/// What a remote track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteTrackKind {
    Audio,
    Camera,
    ScreenShare,
}

/// A subscribed remote track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RemoteTrackRef {
    /// Transport track sid
    pub sid: String,
    pub kind: RemoteTrackKind,
}

impl RemoteTrackRef {
    #[must_use]
    pub fn new(sid: impl Into<String>, kind: RemoteTrackKind) -> Self {
        Self {
            sid: sid.into(),
            kind,
        }
    }
}

/// Result of a successful handshake.
pub struct Connected {
    pub connection: Box<dyn RoomConnection>,
    /// Room events in transport order; closes when the connection is gone
    pub events: mpsc::Receiver<RoomEvent>,
}

impl fmt::Debug for Connected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connected")
            .field("identity", &self.connection.local_identity())
            .finish_non_exhaustive()
    }
}

/// Opens room connections.
#[async_trait]
pub trait RoomTransport: Send + Sync {
    /// Connect to the room the token grants access to.
    ///
    /// # Errors
    ///
    /// [`SessionError::ConnectFailed`] if the handshake fails.
    async fn connect(&self, url: &str, token: &JoinToken) -> Result<Connected, SessionError>;
}

/// A live room connection.
#[async_trait]
pub trait RoomConnection: Send + Sync {
    /// Identity the transport assigned to the local participant.
    fn local_identity(&self) -> ParticipantIdentity;

    /// # Errors
    ///
    /// [`SessionError::PublishFailed`] if the track cannot be published.
    async fn publish(&self, track: &LocalTrack) -> Result<PublicationId, SessionError>;

    /// # Errors
    ///
    /// Transport error if the publication is unknown or the connection is gone.
    async fn unpublish(&self, publication: &PublicationId) -> Result<(), SessionError>;

    /// Signal a muted/unmuted published track without unpublishing it.
    ///
    /// # Errors
    ///
    /// Transport error if the publication is unknown or the connection is gone.
    async fn set_track_muted(
        &self,
        publication: &PublicationId,
        muted: bool,
    ) -> Result<(), SessionError>;

    /// Bind a remote track to a new render sink.
    ///
    /// # Errors
    ///
    /// Transport error if the track is no longer subscribed.
    async fn attach(&self, track: &RemoteTrackRef) -> Result<SinkId, SessionError>;

    async fn detach(&self, sink: SinkId);

    /// Broadcast a control payload to every participant.
    ///
    /// # Errors
    ///
    /// Transport error if the data channel is closed.
    async fn send_data(&self, payload: Bytes) -> Result<(), SessionError>;

    async fn disconnect(&self);
}
