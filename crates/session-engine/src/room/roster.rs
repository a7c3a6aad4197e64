//! Remote participant tiles.
//!
//! [`ParticipantRoster::apply`] is a pure reducer: the session performs the
//! transport I/O (attach/detach) and feeds the outcome in as [`TileEvent`]s.
//! Sinks the reducer drops are returned so the caller can detach them.

use crate::room::transport::{RemoteTrackKind, RemoteTrackRef, SinkId};
use common::types::{ParticipantIdentity, Role};
use serde::Serialize;

/// A remote track bound to a render sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachedTrack {
    pub track: RemoteTrackRef,
    pub sink: SinkId,
    pub muted: bool,
}

/// Presentation state of one remote participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantTile {
    pub identity: ParticipantIdentity,
    pub display_name: String,
    pub role: Role,
    pub hand_raised: bool,
    pub camera: Option<AttachedTrack>,
    pub screen: Option<AttachedTrack>,
    pub audio: Vec<AttachedTrack>,
}

impl ParticipantTile {
    fn new(identity: ParticipantIdentity, role: Role) -> Self {
        Self {
            display_name: identity.display_name(),
            identity,
            role,
            hand_raised: false,
            camera: None,
            screen: None,
            audio: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_audio_enabled(&self) -> bool {
        self.audio.iter().any(|a| !a.muted)
    }

    #[must_use]
    pub fn is_video_enabled(&self) -> bool {
        self.camera.as_ref().is_some_and(|c| !c.muted)
    }

    #[must_use]
    pub fn is_sharing_screen(&self) -> bool {
        self.screen.is_some()
    }

    fn sinks(&self) -> Vec<SinkId> {
        self.camera
            .iter()
            .chain(self.screen.iter())
            .chain(self.audio.iter())
            .map(|t| t.sink)
            .collect()
    }

    fn track_mut(&mut self, sid: &str) -> Option<&mut AttachedTrack> {
        if let Some(camera) = self.camera.as_mut().filter(|c| c.track.sid == sid) {
            return Some(camera);
        }
        if let Some(screen) = self.screen.as_mut().filter(|s| s.track.sid == sid) {
            return Some(screen);
        }
        self.audio.iter_mut().find(|a| a.track.sid == sid)
    }

    fn remove_track(&mut self, sid: &str) -> Option<SinkId> {
        if self.camera.as_ref().is_some_and(|c| c.track.sid == sid) {
            return self.camera.take().map(|c| c.sink);
        }
        if self.screen.as_ref().is_some_and(|s| s.track.sid == sid) {
            return self.screen.take().map(|s| s.sink);
        }
        let position = self.audio.iter().position(|a| a.track.sid == sid)?;
        Some(self.audio.remove(position).sink)
    }
}

/// Input to the roster reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileEvent {
    /// Any traffic from a participant; creates the tile if missing.
    Seen {
        identity: ParticipantIdentity,
    },
    Joined {
        identity: ParticipantIdentity,
        role: Role,
    },
    TrackAttached {
        identity: ParticipantIdentity,
        track: RemoteTrackRef,
        sink: SinkId,
    },
    TrackDetached {
        identity: ParticipantIdentity,
        sid: String,
    },
    TrackMuted {
        identity: ParticipantIdentity,
        sid: String,
        muted: bool,
    },
    HandRaised {
        identity: ParticipantIdentity,
        raised: bool,
    },
    Left {
        identity: ParticipantIdentity,
    },
}

/// Remote participants in join order.
#[derive(Debug, Clone, Default)]
pub struct ParticipantRoster {
    tiles: Vec<ParticipantTile>,
}

impl ParticipantRoster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event and return the sinks it released.
    pub fn apply(&mut self, event: TileEvent) -> Vec<SinkId> {
        match event {
            TileEvent::Seen { identity } => {
                let _ = self.tile_mut(&identity, Role::Student);
                Vec::new()
            }
            TileEvent::Joined { identity, role } => {
                if let Some(tile) = self.tile_mut(&identity, role) {
                    tile.role = role;
                }
                Vec::new()
            }
            TileEvent::TrackAttached {
                identity,
                track,
                sink,
            } => {
                let Some(tile) = self.tile_mut(&identity, Role::Student) else {
                    return vec![sink];
                };
                let kind = track.kind;
                let attached = AttachedTrack {
                    track,
                    sink,
                    muted: false,
                };
                let replaced = match kind {
                    RemoteTrackKind::Camera => tile.camera.replace(attached),
                    RemoteTrackKind::ScreenShare => tile.screen.replace(attached),
                    RemoteTrackKind::Audio => {
                        let previous = tile
                            .audio
                            .iter()
                            .position(|a| a.track.sid == attached.track.sid)
                            .map(|i| tile.audio.remove(i));
                        tile.audio.push(attached);
                        previous
                    }
                };
                replaced
                    .map(|old| old.sink)
                    .filter(|old| *old != sink)
                    .into_iter()
                    .collect()
            }
            TileEvent::TrackDetached { identity, sid } => self
                .tiles
                .iter_mut()
                .find(|t| t.identity == identity)
                .and_then(|t| t.remove_track(&sid))
                .into_iter()
                .collect(),
            TileEvent::TrackMuted {
                identity,
                sid,
                muted,
            } => {
                if let Some(track) = self
                    .tiles
                    .iter_mut()
                    .find(|t| t.identity == identity)
                    .and_then(|t| t.track_mut(&sid))
                {
                    track.muted = muted;
                }
                Vec::new()
            }
            TileEvent::HandRaised { identity, raised } => {
                if let Some(tile) = self.tile_mut(&identity, Role::Student) {
                    tile.hand_raised = raised;
                }
                Vec::new()
            }
            TileEvent::Left { identity } => {
                match self.tiles.iter().position(|t| t.identity == identity) {
                    Some(index) => self.tiles.remove(index).sinks(),
                    None => Vec::new(),
                }
            }
        }
    }

    /// Drop every tile and return all sinks still bound.
    pub fn clear(&mut self) -> Vec<SinkId> {
        self.tiles.drain(..).flat_map(|t| t.sinks()).collect()
    }

    #[must_use]
    pub fn tiles(&self) -> &[ParticipantTile] {
        &self.tiles
    }

    #[must_use]
    pub fn get(&self, identity: &ParticipantIdentity) -> Option<&ParticipantTile> {
        self.tiles.iter().find(|t| &t.identity == identity)
    }

    /// Role of a known participant. Unknown senders have no role.
    #[must_use]
    pub fn role_of(&self, identity: &ParticipantIdentity) -> Option<Role> {
        self.get(identity).map(|t| t.role)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    // Tracks and messages can arrive before the presence event; the tile is
    // created on first sight and its role corrected by a later `Joined`.
    fn tile_mut(
        &mut self,
        identity: &ParticipantIdentity,
        role: Role,
    ) -> Option<&mut ParticipantTile> {
        match self.tiles.iter().position(|t| &t.identity == identity) {
            Some(index) => self.tiles.get_mut(index),
            None => {
                self.tiles.push(ParticipantTile::new(identity.clone(), role));
                self.tiles.last_mut()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ParticipantIdentity {
        ParticipantIdentity::new(raw)
    }

    fn attach(
        roster: &mut ParticipantRoster,
        who: &str,
        sid: &str,
        kind: RemoteTrackKind,
        sink: u64,
    ) -> Vec<SinkId> {
        roster.apply(TileEvent::TrackAttached {
            identity: id(who),
            track: RemoteTrackRef::new(sid, kind),
            sink: SinkId(sink),
        })
    }

    #[test]
    fn test_tiles_keep_join_order() {
        let mut roster = ParticipantRoster::new();
        roster.apply(TileEvent::Joined {
            identity: id("Ann|1"),
            role: Role::Mentor,
        });
        roster.apply(TileEvent::Joined {
            identity: id("Bob|2"),
            role: Role::Student,
        });

        let names: Vec<_> = roster
            .tiles()
            .iter()
            .map(|t| t.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["Ann", "Bob"]);
        assert_eq!(roster.role_of(&id("Ann|1")), Some(Role::Mentor));
        assert_eq!(roster.role_of(&id("Eve|9")), None);
    }

    #[test]
    fn test_track_before_presence_creates_tile() {
        let mut roster = ParticipantRoster::new();
        attach(&mut roster, "Ann|1", "TR_cam", RemoteTrackKind::Camera, 1);
        assert_eq!(roster.role_of(&id("Ann|1")), Some(Role::Student));

        roster.apply(TileEvent::Joined {
            identity: id("Ann|1"),
            role: Role::Mentor,
        });
        let tile = roster.get(&id("Ann|1")).unwrap();
        assert_eq!(tile.role, Role::Mentor);
        assert!(tile.is_video_enabled());
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_seen_creates_tile_once() {
        let mut roster = ParticipantRoster::new();
        roster.apply(TileEvent::Joined {
            identity: id("Ann|1"),
            role: Role::Mentor,
        });
        roster.apply(TileEvent::Seen {
            identity: id("Ann|1"),
        });
        roster.apply(TileEvent::Seen {
            identity: id("Bob|2"),
        });
        roster.apply(TileEvent::Seen {
            identity: id("Bob|2"),
        });

        assert_eq!(roster.len(), 2);
        assert_eq!(roster.role_of(&id("Ann|1")), Some(Role::Mentor));
        assert_eq!(roster.role_of(&id("Bob|2")), Some(Role::Student));
    }

    #[test]
    fn test_replacing_camera_releases_old_sink() {
        let mut roster = ParticipantRoster::new();
        attach(&mut roster, "Ann|1", "TR_a", RemoteTrackKind::Camera, 1);
        let released = attach(&mut roster, "Ann|1", "TR_b", RemoteTrackKind::Camera, 2);
        assert_eq!(released, vec![SinkId(1)]);
    }

    #[test]
    fn test_detach_releases_sink_and_updates_flags() {
        let mut roster = ParticipantRoster::new();
        attach(&mut roster, "Ann|1", "TR_mic", RemoteTrackKind::Audio, 1);
        attach(&mut roster, "Ann|1", "TR_cam", RemoteTrackKind::Camera, 2);

        let released = roster.apply(TileEvent::TrackDetached {
            identity: id("Ann|1"),
            sid: "TR_cam".to_string(),
        });
        assert_eq!(released, vec![SinkId(2)]);
        let tile = roster.get(&id("Ann|1")).unwrap();
        assert!(!tile.is_video_enabled());
        assert!(tile.is_audio_enabled());

        let released = roster.apply(TileEvent::TrackDetached {
            identity: id("Ann|1"),
            sid: "TR_unknown".to_string(),
        });
        assert!(released.is_empty());
    }

    #[test]
    fn test_mute_toggles_audio_flag() {
        let mut roster = ParticipantRoster::new();
        attach(&mut roster, "Ann|1", "TR_mic", RemoteTrackKind::Audio, 1);
        roster.apply(TileEvent::TrackMuted {
            identity: id("Ann|1"),
            sid: "TR_mic".to_string(),
            muted: true,
        });
        assert!(!roster.get(&id("Ann|1")).unwrap().is_audio_enabled());
    }

    #[test]
    fn test_leave_releases_every_sink() {
        let mut roster = ParticipantRoster::new();
        attach(&mut roster, "Ann|1", "TR_mic", RemoteTrackKind::Audio, 1);
        attach(&mut roster, "Ann|1", "TR_cam", RemoteTrackKind::Camera, 2);
        attach(&mut roster, "Ann|1", "TR_scr", RemoteTrackKind::ScreenShare, 3);
        attach(&mut roster, "Bob|2", "TR_cam", RemoteTrackKind::Camera, 4);

        let mut released = roster.apply(TileEvent::Left {
            identity: id("Ann|1"),
        });
        released.sort();
        assert_eq!(released, vec![SinkId(1), SinkId(2), SinkId(3)]);
        assert_eq!(roster.len(), 1);

        assert_eq!(roster.clear(), vec![SinkId(4)]);
        assert!(roster.is_empty());
    }

    #[test]
    fn test_hand_raise() {
        let mut roster = ParticipantRoster::new();
        roster.apply(TileEvent::HandRaised {
            identity: id("Bob|2"),
            raised: true,
        });
        assert!(roster.get(&id("Bob|2")).unwrap().hand_raised);
        roster.apply(TileEvent::HandRaised {
            identity: id("Bob|2"),
            raised: false,
        });
        assert!(!roster.get(&id("Bob|2")).unwrap().hand_raised);
    }
}
