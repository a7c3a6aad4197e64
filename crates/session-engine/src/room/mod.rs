//! Room session: join/leave lifecycle, remote tiles, screen-share
//! arbitration and the in-band control channel.
//!
//! State machine `Idle -> Connecting -> Active -> Disconnected`. A failed
//! join returns to `Idle` with everything released; leaving, ending the
//! session, being removed and losing the transport all go through one
//! teardown routine.

pub mod collaborators;
pub mod events;
mod local;
pub mod messages;
pub mod roster;
pub mod screen_share;
pub mod session;
pub mod snapshot;
pub mod transport;

pub use collaborators::{
    spawn_room_status_poller, RoomStatus, RoomStatusProbe, SessionApi, SessionKind, SessionRecord,
};
pub use events::RoomEvent;
pub use messages::{JoinOutcome, JoinRequest, ModerationAction};
pub use roster::{AttachedTrack, ParticipantRoster, ParticipantTile, TileEvent};
pub use screen_share::ScreenShareState;
pub use session::{RoomDependencies, RoomSessionActor, RoomSessionHandle, RoomSettings};
pub use snapshot::{ChatEntry, LeaveReason, Notice, RoomSnapshot, RoomState};
pub use transport::{
    Connected, PublicationId, RemoteTrackKind, RemoteTrackRef, RoomConnection, RoomTransport,
    SinkId,
};
