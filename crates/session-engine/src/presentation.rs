//! State-to-UI contracts for the session timer banner and the pre-join lobby.
//!
//! Pure projections; rendering is out of scope.

use crate::clock::{ClockReading, SessionPhase, WarningLevel};
use crate::errors::SessionError;
use crate::media::DeviceInfo;
use crate::probe::ProbeStatus;
use crate::room::RoomStatus;
use common::types::Role;
use serde::Serialize;

/// Format seconds as `MM:SS`, or `H:MM:SS` from one hour up.
#[must_use]
pub fn format_countdown(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

/// Session timer banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BannerView {
    pub tone: WarningLevel,
    pub headline: String,
    pub countdown: String,
    pub show_end_button: bool,
}

impl BannerView {
    #[must_use]
    pub fn from_reading(reading: &ClockReading, role: Role) -> Self {
        let (headline, seconds) = match reading.phase {
            SessionPhase::NotStarted => ("Session has not started", reading.starts_in_seconds),
            SessionPhase::EarlyJoin => ("Session starts soon", reading.starts_in_seconds),
            SessionPhase::Active => ("Session in progress", reading.remaining_seconds),
            SessionPhase::EndingSoon => ("Session ending soon", reading.remaining_seconds),
            SessionPhase::GracePeriod => (
                "Session time is over, wrapping up",
                reading.grace_remaining_seconds,
            ),
            SessionPhase::Ended => ("Session has ended", 0),
        };

        let show_end_button = role.can_moderate()
            && matches!(
                reading.phase,
                SessionPhase::Active | SessionPhase::EndingSoon | SessionPhase::GracePeriod
            );

        Self {
            tone: reading.warning_level,
            headline: headline.to_string(),
            countdown: format_countdown(seconds),
            show_end_button,
        }
    }
}

/// Why the lobby's join button is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinBlockedReason {
    NotStarted,
    Ended,
    /// Students wait until the mentor is in the room
    WaitingForHost,
    DevicePermissionDenied,
}

impl JoinBlockedReason {
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            JoinBlockedReason::NotStarted => "The session is not open yet",
            JoinBlockedReason::Ended => "The session has ended",
            JoinBlockedReason::WaitingForHost => "Waiting for the mentor to join",
            JoinBlockedReason::DevicePermissionDenied => {
                "Allow camera and microphone access to join"
            }
        }
    }
}

/// Pre-join lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LobbyView {
    pub can_join: bool,
    pub join_blocked_reason: Option<JoinBlockedReason>,
    pub audio_level: u8,
    pub devices: Vec<DeviceInfo>,
}

impl LobbyView {
    #[must_use]
    pub fn new(
        reading: &ClockReading,
        role: Role,
        probe: &ProbeStatus,
        room: &RoomStatus,
    ) -> Self {
        let blocked = if reading.phase == SessionPhase::Ended {
            Some(JoinBlockedReason::Ended)
        } else if !reading.phase.allows_join() {
            Some(JoinBlockedReason::NotStarted)
        } else if matches!(probe.last_error, Some(SessionError::PermissionDenied(_))) {
            Some(JoinBlockedReason::DevicePermissionDenied)
        } else if !role.can_moderate() && !room.host_connected {
            Some(JoinBlockedReason::WaitingForHost)
        } else {
            None
        };

        Self {
            can_join: blocked.is_none(),
            join_blocked_reason: blocked,
            audio_level: probe.audio_level,
            devices: probe.devices.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn reading(phase: SessionPhase) -> ClockReading {
        ClockReading {
            phase,
            remaining_seconds: 3599,
            grace_remaining_seconds: 200,
            warning_level: phase.warning_level(),
            elapsed_seconds: 0,
            starts_in_seconds: 4000,
        }
    }

    fn probe() -> ProbeStatus {
        ProbeStatus {
            previewing: true,
            audio_level: 42,
            devices: Vec::new(),
            last_error: None,
        }
    }

    #[test]
    fn test_countdown_format() {
        assert_eq!(format_countdown(0), "00:00");
        assert_eq!(format_countdown(65), "01:05");
        assert_eq!(format_countdown(3599), "59:59");
        assert_eq!(format_countdown(3600), "1:00:00");
        assert_eq!(format_countdown(4000), "1:06:40");
    }

    #[test]
    fn test_banner_counts_down_the_phase_clock() {
        let banner = BannerView::from_reading(&reading(SessionPhase::EarlyJoin), Role::Student);
        assert_eq!(banner.countdown, "1:06:40");
        assert_eq!(banner.tone, WarningLevel::Info);

        let banner = BannerView::from_reading(&reading(SessionPhase::GracePeriod), Role::Student);
        assert_eq!(banner.countdown, "03:20");
        assert_eq!(banner.tone, WarningLevel::Danger);
    }

    #[test]
    fn test_end_button_only_for_mentors_in_session() {
        for phase in [
            SessionPhase::Active,
            SessionPhase::EndingSoon,
            SessionPhase::GracePeriod,
        ] {
            assert!(BannerView::from_reading(&reading(phase), Role::Mentor).show_end_button);
            assert!(!BannerView::from_reading(&reading(phase), Role::Student).show_end_button);
        }
        for phase in [
            SessionPhase::NotStarted,
            SessionPhase::EarlyJoin,
            SessionPhase::Ended,
        ] {
            assert!(!BannerView::from_reading(&reading(phase), Role::Mentor).show_end_button);
        }
    }

    #[test]
    fn test_students_wait_for_host() {
        let room = RoomStatus {
            is_active: true,
            host_connected: false,
            participant_count: 1,
        };
        let lobby = LobbyView::new(&reading(SessionPhase::Active), Role::Student, &probe(), &room);
        assert!(!lobby.can_join);
        assert_eq!(
            lobby.join_blocked_reason,
            Some(JoinBlockedReason::WaitingForHost)
        );
        assert_eq!(lobby.audio_level, 42);

        let lobby = LobbyView::new(&reading(SessionPhase::Active), Role::Mentor, &probe(), &room);
        assert!(lobby.can_join);
    }

    #[test]
    fn test_lobby_blocked_outside_join_window() {
        let room = RoomStatus {
            is_active: true,
            host_connected: true,
            participant_count: 2,
        };
        let lobby = LobbyView::new(
            &reading(SessionPhase::NotStarted),
            Role::Mentor,
            &probe(),
            &room,
        );
        assert_eq!(lobby.join_blocked_reason, Some(JoinBlockedReason::NotStarted));

        let lobby = LobbyView::new(&reading(SessionPhase::Ended), Role::Mentor, &probe(), &room);
        assert_eq!(lobby.join_blocked_reason, Some(JoinBlockedReason::Ended));
    }

    #[test]
    fn test_permission_denied_blocks_join() {
        let mut status = probe();
        status.last_error = Some(SessionError::PermissionDenied("camera".to_string()));
        let room = RoomStatus {
            is_active: true,
            host_connected: true,
            participant_count: 2,
        };
        let lobby = LobbyView::new(&reading(SessionPhase::Active), Role::Student, &status, &room);
        assert_eq!(
            lobby.join_blocked_reason,
            Some(JoinBlockedReason::DevicePermissionDenied)
        );
    }
}
