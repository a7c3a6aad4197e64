//! Screen-share arbitration.
//!
//! Last sharer wins: the newest announcement always takes the slot. There is
//! no tie-break for near-simultaneous starts; both sides may briefly believe
//! they are sharing until the next announcement arrives.

use common::types::ParticipantIdentity;
use serde::Serialize;

/// Who currently holds the screen-share slot, as seen locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScreenShareState {
    pub active: bool,
    pub sharer: Option<ParticipantIdentity>,
    pub is_local: bool,
}

/// What the session must do after a remote share is accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteShareOutcome {
    /// The local share lost the slot and must be stopped
    pub stop_local: bool,
    /// A different remote sharer whose display should be released
    pub replaced_remote: Option<ParticipantIdentity>,
}

impl ScreenShareState {
    /// Take the slot for the local participant.
    ///
    /// Returns the remote sharer that was displaced, if any. Calling this
    /// while already sharing locally is a no-op.
    pub fn start_local(&mut self, local: &ParticipantIdentity) -> Option<ParticipantIdentity> {
        if self.is_local {
            return None;
        }
        let displaced = self.sharer.take().filter(|s| s != local);
        self.active = true;
        self.sharer = Some(local.clone());
        self.is_local = true;
        displaced
    }

    /// Release the slot if the local participant holds it.
    ///
    /// Returns whether anything changed.
    pub fn stop_local(&mut self) -> bool {
        if !self.is_local {
            return false;
        }
        self.clear();
        true
    }

    /// Accept a remote participant's share announcement.
    pub fn remote_started(&mut self, sharer: &ParticipantIdentity) -> RemoteShareOutcome {
        let stop_local = self.is_local;
        let replaced_remote = if stop_local {
            None
        } else {
            self.sharer.take().filter(|s| s != sharer)
        };
        self.active = true;
        self.sharer = Some(sharer.clone());
        self.is_local = false;
        RemoteShareOutcome {
            stop_local,
            replaced_remote,
        }
    }

    /// A remote participant stopped sharing or left.
    ///
    /// Only clears the slot when `sharer` is the current holder, so a late
    /// stop from a pre-empted sharer cannot clear a newer share.
    pub fn remote_stopped(&mut self, sharer: &ParticipantIdentity) -> bool {
        if self.is_local || self.sharer.as_ref() != Some(sharer) {
            return false;
        }
        self.clear();
        true
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
