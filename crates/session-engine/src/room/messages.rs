//! Message types for the room session actor.
//!
//! Requests use `tokio::sync::mpsc` with a `oneshot` reply. Work the actor
//! spawns reports back on a separate internal channel.

use crate::compositor::BackgroundMode;
use crate::errors::SessionError;
use crate::media::{LocalTrack, VideoQuality};
use crate::probe::DeviceSelection;
use crate::room::local::ConnectedRoom;
use crate::room::snapshot::RoomSnapshot;
use common::types::{ParticipantIdentity, Role};
use tokio::sync::oneshot;

/// Everything needed to join a room.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub room_name: String,
    /// Mentors join as room hosts
    pub role: Role,
    pub devices: DeviceSelection,
    pub background: BackgroundMode,
}

impl JoinRequest {
    #[must_use]
    pub fn new(room_name: impl Into<String>, role: Role) -> Self {
        Self {
            room_name: room_name.into(),
            role,
            devices: DeviceSelection::default(),
            background: BackgroundMode::None,
        }
    }

    #[must_use]
    pub fn with_devices(mut self, devices: DeviceSelection) -> Self {
        self.devices = devices;
        self
    }

    #[must_use]
    pub fn with_background(mut self, background: BackgroundMode) -> Self {
        self.background = background;
        self
    }
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub room_name: String,
    pub identity: ParticipantIdentity,
    /// Background actually applied; `None` if the effect fell back
    pub background: BackgroundMode,
}

/// Mentor moderation actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModerationAction {
    Mute,
    Unmute,
    Kick,
}

impl ModerationAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ModerationAction::Mute => "mute",
            ModerationAction::Unmute => "unmute",
            ModerationAction::Kick => "kick",
        }
    }
}

/// Messages sent to `RoomSessionActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Join a room. Supersedes any join still in flight.
    Join {
        request: JoinRequest,
        /// Answered when the connect attempt finishes or is superseded.
        respond_to: oneshot::Sender<Result<JoinOutcome, SessionError>>,
    },

    /// Leave the room (idempotent).
    Leave { respond_to: oneshot::Sender<()> },

    /// End the session for everyone (mentor only).
    EndSession {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    StartScreenShare {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    StopScreenShare { respond_to: oneshot::Sender<()> },

    /// Change the camera background effect.
    SetBackground {
        mode: BackgroundMode,
        /// Response channel for the mode actually applied.
        respond_to: oneshot::Sender<Result<BackgroundMode, SessionError>>,
    },

    SwitchCamera {
        device_id: String,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    SwitchMicrophone {
        device_id: String,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    SetVideoQuality {
        quality: VideoQuality,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Mute or unmute the local microphone without unpublishing.
    SetMicrophoneEnabled {
        enabled: bool,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Turn the local camera off or on without unpublishing.
    SetCameraEnabled {
        enabled: bool,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    RaiseHand {
        raised: bool,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    SendChat {
        text: String,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Mute, unmute or remove another participant (mentor only).
    Moderate {
        action: ModerationAction,
        target: ParticipantIdentity,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Current snapshot, after every earlier message has been handled.
    GetSnapshot {
        respond_to: oneshot::Sender<RoomSnapshot>,
    },
}

/// Reports from work the actor spawned.
pub(crate) enum InternalMessage {
    ConnectCompleted {
        attempt: u64,
        result: Result<ConnectedRoom, SessionError>,
    },
    /// A local capture ended underneath us
    CaptureEnded { track: LocalTrack },
}
