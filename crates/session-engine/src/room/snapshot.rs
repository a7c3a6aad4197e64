//! UI-facing projection of the room session.

use crate::compositor::BackgroundMode;
use crate::room::roster::ParticipantTile;
use crate::room::screen_share::ScreenShareState;
use common::types::{ParticipantIdentity, Role};
use serde::Serialize;
use std::collections::VecDeque;

/// Number of notices kept in the snapshot.
const MAX_NOTICES: usize = 20;

/// Lifecycle of the room session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    #[default]
    Idle,
    Connecting,
    Active,
    Disconnected,
}

impl RoomState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RoomState::Idle => "idle",
            RoomState::Connecting => "connecting",
            RoomState::Active => "active",
            RoomState::Disconnected => "disconnected",
        }
    }
}

/// Why the session entered `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    Voluntary,
    /// The mentor ended the session
    Ended,
    /// Kicked by a mentor
    Removed,
    TransportLost,
    Shutdown,
}

impl LeaveReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            LeaveReason::Voluntary => "voluntary",
            LeaveReason::Ended => "ended",
            LeaveReason::Removed => "removed",
            LeaveReason::TransportLost => "transport_lost",
            LeaveReason::Shutdown => "shutdown",
        }
    }
}

/// One chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatEntry {
    pub sender: ParticipantIdentity,
    pub display_name: String,
    pub text: String,
    /// Sender wall clock, epoch milliseconds
    pub timestamp: i64,
    pub is_local: bool,
}

/// Bounded chat history, oldest first. Cleared at teardown.
#[derive(Debug, Clone)]
pub struct ChatLog {
    entries: VecDeque<ChatEntry>,
    capacity: usize,
}

impl ChatLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: ChatEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<ChatEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Something the UI should tell the local user about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    /// The background effect could not start; the raw camera is published
    BackgroundUnavailable,
    /// A remote participant took over the screen-share slot
    ScreenSharePreempted,
    MutedByMentor,
    UnmuteAllowed,
    CameraLost,
    MicrophoneLost,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct NoticeLog {
    entries: VecDeque<Notice>,
}

impl NoticeLog {
    pub(crate) fn push(&mut self, notice: Notice) {
        if self.entries.len() >= MAX_NOTICES {
            self.entries.pop_front();
        }
        self.entries.push_back(notice);
    }

    pub(crate) fn to_vec(&self) -> Vec<Notice> {
        self.entries.iter().copied().collect()
    }
}

/// Everything the UI renders for the room.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoomSnapshot {
    pub state: RoomState,
    pub leave_reason: Option<LeaveReason>,
    pub room_name: Option<String>,
    pub local_identity: Option<ParticipantIdentity>,
    pub role: Role,
    pub tiles: Vec<ParticipantTile>,
    pub screen_share: ScreenShareState,
    pub hand_raised: bool,
    pub microphone_enabled: bool,
    pub camera_enabled: bool,
    pub background: BackgroundMode,
    pub chat: Vec<ChatEntry>,
    pub notices: Vec<Notice>,
}
