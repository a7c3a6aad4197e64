//! Integration tests for the room session actor.
//!
//! Drives `RoomSessionActor` end to end against in-memory transport,
//! devices and session API. Every test runs on a paused clock so connect
//! delays and capture watchers resolve deterministically.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use common::types::Role;
use control_protocol::{ControlMessage, InboundPacket};
use session_engine::compositor::BackgroundMode;
use session_engine::errors::SessionError;
use session_engine::media::{DeviceKind, TrackKind};
use session_engine::room::{
    LeaveReason, Notice, RemoteTrackKind, RoomEvent, RoomState, SessionKind,
};
use session_test_utils::*;

// ============================================================================
// Join / leave lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_join_publishes_microphone_and_camera() {
    let room = RoomHarness::spawn();

    let outcome = room.handle.join(mentor_join("course-42")).await.unwrap();
    assert_eq!(outcome.room_name, "course-42");
    assert_eq!(outcome.background, BackgroundMode::None);

    let connection = room.transport.last_connection().unwrap();
    assert_eq!(outcome.identity, connection.identity());
    assert_eq!(connection.live_of_kind(TrackKind::Audio).len(), 1);
    assert_eq!(connection.live_of_kind(TrackKind::Video).len(), 1);
    assert_eq!(room.transport.urls(), vec![TEST_TRANSPORT_URL.to_string()]);
    assert_eq!(room.transport.tokens(), vec!["token-course-42-host".to_string()]);

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert_eq!(snapshot.state, RoomState::Active);
    assert_eq!(snapshot.role, Role::Mentor);
    assert!(snapshot.microphone_enabled);
    assert!(snapshot.camera_enabled);
    assert_eq!(snapshot.local_identity, Some(connection.identity()));

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_student_requests_guest_credential() {
    let room = RoomHarness::spawn();

    room.handle.join(student_join("course-42")).await.unwrap();

    assert!(room.api.calls().contains(&ApiCall::JoinCredential {
        room_name: "course-42".to_string(),
        is_host: false,
    }));
    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_joins_keep_only_the_latest() {
    let transport = MockTransport::new()
        .with_connect(ConnectBehavior::Delay(Duration::from_secs(5)))
        .with_connect(ConnectBehavior::Succeed);
    let room = RoomHarness::builder().transport(transport).spawn();

    let first = tokio::spawn({
        let handle = room.handle.clone();
        async move { handle.join(mentor_join("room-a")).await }
    });
    settle().await;
    assert_eq!(room.transport.connect_calls(), 1);

    let second = room.handle.join(mentor_join("room-b")).await.unwrap();
    assert_eq!(first.await.unwrap().unwrap_err(), SessionError::Superseded);

    // The slow handshake was abandoned and never completes.
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(room.transport.connect_calls(), 2);
    let connections = room.transport.connections();
    assert_eq!(connections.len(), 1);
    let winner = connections.first().unwrap();
    assert_eq!(winner.identity(), second.identity);
    assert!(!winner.is_disconnected());
    assert_eq!(winner.live_publications().len(), 2);

    // The superseded attempt never captured anything.
    assert_eq!(room.devices.acquired().len(), 2);
    assert_eq!(room.devices.live_tracks().len(), 2);

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert_eq!(snapshot.state, RoomState::Active);
    assert_eq!(snapshot.room_name.as_deref(), Some("room-b"));
    assert_eq!(snapshot.local_identity, Some(second.identity));

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_leave_cancels_join_in_flight() {
    let transport =
        MockTransport::new().with_connect(ConnectBehavior::Delay(Duration::from_secs(5)));
    let room = RoomHarness::builder().transport(transport).spawn();

    let pending = tokio::spawn({
        let handle = room.handle.clone();
        async move { handle.join(student_join("course-42")).await }
    });
    settle().await;

    room.handle.leave().await.unwrap();
    assert_eq!(pending.await.unwrap().unwrap_err(), SessionError::Superseded);

    // Well past the handshake delay: nothing connects or captures after leave.
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(room.transport.last_connection().is_none());
    assert!(room.devices.acquired().is_empty());
    assert!(room.devices.live_tracks().is_empty());

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert_eq!(snapshot.state, RoomState::Idle);
    assert!(snapshot.local_identity.is_none());

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_leave_while_camera_pending_releases_microphone() {
    let devices = MockDevices::new().with_camera_delay(Duration::from_secs(5));
    let room = RoomHarness::builder().devices(devices).spawn();

    let pending = tokio::spawn({
        let handle = room.handle.clone();
        async move { handle.join(mentor_join("course-42")).await }
    });
    settle().await;

    // Connected with the microphone published, camera prompt still open.
    let connection = room.transport.last_connection().unwrap();
    assert_eq!(connection.live_of_kind(TrackKind::Audio).len(), 1);

    room.handle.leave().await.unwrap();
    assert_eq!(pending.await.unwrap().unwrap_err(), SessionError::Superseded);
    settle().await;

    assert!(connection.is_disconnected());
    assert!(connection.live_publications().is_empty());
    assert!(room.devices.live_tracks().is_empty());

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(room.devices.acquired().len(), 1);
    assert!(room.devices.camera_requests().is_empty());

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_leave_is_idempotent() {
    let room = RoomHarness::spawn();

    // Nothing to leave yet.
    room.handle.leave().await.unwrap();
    assert_eq!(room.handle.current_snapshot().await.unwrap().state, RoomState::Idle);

    let request = join_with_background("course-42", Role::Student, BackgroundMode::Blur);
    room.handle.join(request).await.unwrap();
    let connection = room.transport.last_connection().unwrap();

    room.handle.leave().await.unwrap();
    room.handle.leave().await.unwrap();

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert_eq!(snapshot.state, RoomState::Disconnected);
    assert_eq!(snapshot.leave_reason, Some(LeaveReason::Voluntary));
    assert!(snapshot.room_name.is_none());
    assert_eq!(snapshot.background, BackgroundMode::None);
    assert!(snapshot.tiles.is_empty());
    assert!(connection.is_disconnected());
    assert!(connection.live_publications().is_empty());
    assert!(room.devices.live_tracks().is_empty());

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_join_releases_everything() {
    let devices = MockDevices::new();
    devices.fail_camera(Some(SessionError::PermissionDenied("camera".to_string())));
    let room = RoomHarness::builder().devices(devices).spawn();

    let err = room.handle.join(student_join("course-42")).await.unwrap_err();
    assert!(matches!(err, SessionError::PermissionDenied(_)));

    let connection = room.transport.last_connection().unwrap();
    assert!(connection.is_disconnected());
    assert!(connection.live_publications().is_empty());
    assert!(room.devices.live_tracks().is_empty());
    assert_eq!(
        room.handle.current_snapshot().await.unwrap().state,
        RoomState::Idle
    );

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_leaves_session_idle() {
    let transport =
        MockTransport::new().with_connect(ConnectBehavior::Fail("sfu unreachable".to_string()));
    let room = RoomHarness::builder().transport(transport).spawn();

    let err = room.handle.join(student_join("course-42")).await.unwrap_err();
    assert!(matches!(err, SessionError::ConnectFailed(_)));
    assert!(err.is_retryable());
    assert!(room.devices.acquired().is_empty());

    // A retry goes through.
    room.handle.join(student_join("course-42")).await.unwrap();
    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transport_loss_tears_down() {
    let room = RoomHarness::spawn();
    room.handle.join(student_join("course-42")).await.unwrap();

    let connection = room.transport.last_connection().unwrap();
    connection
        .inject(RoomEvent::Disconnected {
            reason: "server shutdown".to_string(),
        })
        .await;

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert_eq!(snapshot.state, RoomState::Disconnected);
    assert_eq!(snapshot.leave_reason, Some(LeaveReason::TransportLost));
    assert!(room.devices.live_tracks().is_empty());

    room.shutdown().await;
}

// ============================================================================
// Session record API
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_activate_rejects_reentry() {
    let api = MockSessionApi::new().with_create_gate();
    let room = RoomHarness::builder().api(api).spawn();

    let first = tokio::spawn({
        let handle = room.handle.clone();
        async move { handle.activate(SessionKind::Class, "course-7").await }
    });
    settle().await;
    assert_eq!(room.api.create_calls(), 1);

    let err = room
        .handle
        .activate(SessionKind::Class, "course-7")
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::AlreadyInProgress);
    assert_eq!(room.api.create_calls(), 1);

    room.api.release_create();
    let record = first.await.unwrap().unwrap();
    assert_eq!(record.room_name, "class-course-7");

    // Once finished, activation is available again.
    room.api.release_create();
    room.handle
        .activate(SessionKind::Mentoring, "booking-3")
        .await
        .unwrap();
    assert_eq!(room.api.create_calls(), 2);

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_end_session_failure_keeps_participant_in_room() {
    let room = RoomHarness::spawn();
    room.handle.join(mentor_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();

    room.api.fail_end(true);
    let err = room.handle.end_session().await.unwrap_err();
    assert!(matches!(err, SessionError::Credential(_)));
    assert_eq!(
        room.handle.current_snapshot().await.unwrap().state,
        RoomState::Active
    );
    assert!(!connection.is_disconnected());

    room.api.fail_end(false);
    room.handle.end_session().await.unwrap();

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert_eq!(snapshot.state, RoomState::Disconnected);
    assert_eq!(snapshot.leave_reason, Some(LeaveReason::Ended));
    assert_eq!(room.api.end_calls(), 2);
    assert!(connection.is_disconnected());

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_students_cannot_end_or_moderate() {
    let room = RoomHarness::spawn();
    room.handle.join(student_join("course-42")).await.unwrap();

    let err = room.handle.end_session().await.unwrap_err();
    assert!(matches!(err, SessionError::Forbidden(_)));
    assert_eq!(room.api.end_calls(), 0);

    let err = room
        .handle
        .kick_participant(student("Ana"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::PermissionDenied(_)));

    let connection = room.transport.last_connection().unwrap();
    assert!(connection.sent_messages().is_empty());
    room.shutdown().await;
}

// ============================================================================
// Screen share
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_screen_share_is_idempotent() {
    let room = RoomHarness::spawn();
    room.handle.join(mentor_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();

    room.handle.start_screen_share().await.unwrap();
    room.handle.start_screen_share().await.unwrap();

    let screens: Vec<_> = connection
        .publication_history()
        .into_iter()
        .filter(|p| p.track.kind() == TrackKind::Screen)
        .collect();
    assert_eq!(screens.len(), 1);
    assert!(connection.sent_messages().contains(&ControlMessage::ScreenShare {
        sharing: true,
        sharer_identity: connection.identity(),
    }));

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert!(snapshot.screen_share.is_local);
    assert_eq!(snapshot.screen_share.sharer, Some(connection.identity()));

    room.handle.stop_screen_share().await.unwrap();
    room.handle.stop_screen_share().await.unwrap();
    assert!(connection.live_of_kind(TrackKind::Screen).is_empty());
    assert!(room.devices.live_of_kind(TrackKind::Screen).is_empty());
    assert!(!room.handle.current_snapshot().await.unwrap().screen_share.active);

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remote_share_preempts_local_share() {
    let room = RoomHarness::spawn();
    room.handle.join(student_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();
    room.handle.start_screen_share().await.unwrap();

    let mentor = mentor("Grace");
    connection.inject(participant_joined(&mentor, Role::Mentor)).await;
    connection
        .inject(track_subscribed(&mentor, "TR_screen", RemoteTrackKind::ScreenShare))
        .await;

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert!(!snapshot.screen_share.is_local);
    assert_eq!(snapshot.screen_share.sharer, Some(mentor.clone()));
    assert!(snapshot.notices.contains(&Notice::ScreenSharePreempted));
    assert!(snapshot.tiles.iter().any(|t| t.is_sharing_screen()));

    assert!(connection.live_of_kind(TrackKind::Screen).is_empty());
    assert!(room.devices.live_of_kind(TrackKind::Screen).is_empty());
    assert!(connection.sent_messages().contains(&ControlMessage::ScreenShare {
        sharing: false,
        sharer_identity: connection.identity(),
    }));

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_share_announcement_must_come_from_sharer() {
    let room = RoomHarness::spawn();
    room.handle.join(mentor_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();
    let ana = student("Ana");
    let bob = student("Bob");

    connection
        .inject(control_packet(
            &ana,
            &ControlMessage::ScreenShare {
                sharing: true,
                sharer_identity: bob.clone(),
            },
        ))
        .await;
    assert!(!room.handle.current_snapshot().await.unwrap().screen_share.active);

    connection
        .inject(control_packet(
            &bob,
            &ControlMessage::ScreenShare {
                sharing: true,
                sharer_identity: bob.clone(),
            },
        ))
        .await;
    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert_eq!(snapshot.screen_share.sharer, Some(bob.clone()));

    // Only the sharer can clear its own slot.
    connection
        .inject(control_packet(
            &ana,
            &ControlMessage::ScreenShare {
                sharing: false,
                sharer_identity: ana.clone(),
            },
        ))
        .await;
    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert_eq!(snapshot.screen_share.sharer, Some(bob));

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_local_share_displaces_remote_share_once() {
    let room = RoomHarness::spawn();
    room.handle.join(student_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();
    let grace = mentor("Grace");

    connection.inject(participant_joined(&grace, Role::Mentor)).await;
    connection
        .inject(track_subscribed(&grace, "TR_screen", RemoteTrackKind::ScreenShare))
        .await;
    let _ = room.handle.current_snapshot().await.unwrap();
    let remote_sink = *connection.attached_sinks().first().unwrap();

    room.handle.start_screen_share().await.unwrap();
    room.handle.start_screen_share().await.unwrap();

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert!(snapshot.screen_share.is_local);
    assert_eq!(snapshot.screen_share.sharer, Some(connection.identity()));
    let tile = snapshot
        .tiles
        .iter()
        .find(|t| t.identity == grace)
        .unwrap();
    assert!(tile.screen.is_none());

    assert!(connection.detached_sinks().contains(&remote_sink));
    assert!(connection.attached_sinks().is_empty());

    let screen_publications = connection
        .publication_history()
        .iter()
        .filter(|p| p.track.kind() == TrackKind::Screen)
        .count();
    assert_eq!(screen_publications, 1);
    let announcements = connection
        .sent_messages()
        .into_iter()
        .filter(|m| {
            *m == ControlMessage::ScreenShare {
                sharing: true,
                sharer_identity: connection.identity(),
            }
        })
        .count();
    assert_eq!(announcements, 1);

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_control_traffic_from_unseen_sender_creates_tile() {
    let room = RoomHarness::spawn();
    room.handle.join(mentor_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();
    let ana = student("Ana");
    let bob = student("Bob");

    connection
        .inject(control_packet(
            &ana,
            &ControlMessage::ChatMessage {
                text: "anyone here?".to_string(),
                timestamp: 1_700_000_000_000,
            },
        ))
        .await;
    connection
        .inject(control_packet(
            &bob,
            &ControlMessage::ScreenShare {
                sharing: true,
                sharer_identity: bob.clone(),
            },
        ))
        .await;

    let snapshot = room.handle.current_snapshot().await.unwrap();
    let names: Vec<_> = snapshot
        .tiles
        .iter()
        .map(|t| t.display_name.as_str())
        .collect();
    assert_eq!(names, vec!["Ana", "Bob"]);
    assert_eq!(snapshot.chat.len(), 1);
    assert_eq!(snapshot.screen_share.sharer, Some(bob.clone()));
    assert!(snapshot
        .tiles
        .iter()
        .all(|t| t.role == Role::Student));

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_platform_stop_ends_local_share() {
    let room = RoomHarness::spawn();
    room.handle.join(mentor_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();
    room.handle.start_screen_share().await.unwrap();

    assert!(room.devices.end_capture(TrackKind::Screen));
    settle().await;

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert!(!snapshot.screen_share.active);
    assert!(connection.live_of_kind(TrackKind::Screen).is_empty());

    room.shutdown().await;
}

// ============================================================================
// Background effects and devices
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_background_switches_keep_one_camera_published() {
    let room = RoomHarness::spawn();
    let request = join_with_background(
        "course-42",
        Role::Student,
        BackgroundMode::Image("file:///bg/library.png".to_string()),
    );
    let outcome = room.handle.join(request).await.unwrap();
    assert!(matches!(outcome.background, BackgroundMode::Image(_)));
    let connection = room.transport.last_connection().unwrap();

    let applied = room.handle.set_background(BackgroundMode::None).await.unwrap();
    assert_eq!(applied, BackgroundMode::None);
    let applied = room.handle.set_background(BackgroundMode::Blur).await.unwrap();
    assert_eq!(applied, BackgroundMode::Blur);

    assert_eq!(connection.max_live_video(), 1);
    let live = connection.live_of_kind(TrackKind::Video);
    assert_eq!(live.len(), 1);
    assert!(live.iter().all(|p| p.track.is_synthetic()));

    // The raw camera keeps running underneath; outbound tracks were swapped.
    assert_eq!(room.devices.live_of_kind(TrackKind::Video).len(), 1);
    assert_eq!(room.loader.loaded(), vec!["file:///bg/library.png".to_string()]);

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert_eq!(snapshot.background, BackgroundMode::Blur);

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_republish_reports_no_effect() {
    let room = RoomHarness::spawn();
    room.handle.join(mentor_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();
    connection.fail_publish(TrackKind::Video);

    let err = room
        .handle
        .set_background(BackgroundMode::Blur)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::PublishFailed(_)));

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert_eq!(snapshot.state, RoomState::Active);
    assert_eq!(snapshot.background, BackgroundMode::None);
    assert!(!snapshot.camera_enabled);
    assert!(connection.live_of_kind(TrackKind::Video).is_empty());
    assert!(room.devices.live_of_kind(TrackKind::Video).is_empty());

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_same_background_is_a_no_op() {
    let room = RoomHarness::spawn();
    room.handle
        .join(join_with_background("course-42", Role::Student, BackgroundMode::Blur))
        .await
        .unwrap();
    let connection = room.transport.last_connection().unwrap();
    let published = connection.publication_history().len();

    room.handle.set_background(BackgroundMode::Blur).await.unwrap();
    assert_eq!(connection.publication_history().len(), published);

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_segmentation_failure_falls_back_to_raw_camera() {
    let room = RoomHarness::builder()
        .segmentation(MockSegmentation::failing())
        .spawn();

    let outcome = room
        .handle
        .join(join_with_background("course-42", Role::Student, BackgroundMode::Blur))
        .await
        .unwrap();
    assert_eq!(outcome.background, BackgroundMode::None);

    let connection = room.transport.last_connection().unwrap();
    let live = connection.live_of_kind(TrackKind::Video);
    assert_eq!(live.len(), 1);
    assert!(!live.iter().any(|p| p.track.is_synthetic()));

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert!(snapshot.notices.contains(&Notice::BackgroundUnavailable));

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_switch_camera_preserves_disabled_state() {
    let devices =
        MockDevices::new().with_device(DeviceKind::Camera, "cam-2", "USB Camera");
    let room = RoomHarness::builder().devices(devices).spawn();
    room.handle.join(student_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();

    room.handle.set_camera_enabled(false).await.unwrap();
    room.handle.switch_camera("cam-2").await.unwrap();

    let live = connection.live_of_kind(TrackKind::Video);
    assert_eq!(live.len(), 1);
    assert_eq!(live.iter().map(|p| p.muted).collect::<Vec<_>>(), vec![true]);
    assert_eq!(room.devices.live_of_kind(TrackKind::Video).len(), 1);
    assert_eq!(
        room.devices.camera_requests().last().unwrap().0.as_deref(),
        Some("cam-2")
    );
    assert!(!room.handle.current_snapshot().await.unwrap().camera_enabled);

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unplugged_camera_is_reported() {
    let room = RoomHarness::spawn();
    room.handle.join(student_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();

    assert!(room.devices.end_capture(TrackKind::Video));
    settle().await;

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert!(!snapshot.camera_enabled);
    assert!(snapshot.notices.contains(&Notice::CameraLost));
    assert!(connection.live_of_kind(TrackKind::Video).is_empty());
    assert_eq!(snapshot.state, RoomState::Active);

    room.shutdown().await;
}

// ============================================================================
// Control channel
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_malformed_messages_leave_state_unchanged() {
    let room = RoomHarness::spawn();
    room.handle.join(mentor_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();
    let ana = student("Ana");
    connection.inject(participant_joined(&ana, Role::Student)).await;
    connection
        .inject(control_packet(&ana, &ControlMessage::HandRaise { raised: true }))
        .await;
    let before = room.handle.current_snapshot().await.unwrap();

    connection.inject(raw_packet(&ana, b"\xff\xfe not json")).await;
    connection
        .inject(raw_packet(&ana, br#"{"type":"DANCE_PARTY","moves":3}"#))
        .await;
    connection
        .inject(raw_packet(&ana, br#"{"type":"HAND_RAISE"}"#))
        .await;
    connection
        .inject(RoomEvent::DataReceived(InboundPacket {
            sender: None,
            payload: bytes::Bytes::from_static(br#"{"type":"HAND_RAISE","raised":false}"#),
        }))
        .await;

    let after = room.handle.current_snapshot().await.unwrap();
    assert_eq!(after.tiles, before.tiles);
    assert_eq!(after.screen_share, before.screen_share);
    assert_eq!(after.state, RoomState::Active);
    assert!(after.tiles.iter().all(|t| t.hand_raised));

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_kick_from_mentor_removes_participant() {
    let room = RoomHarness::spawn();
    room.handle.join(student_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();
    let grace = mentor("Grace");
    connection.inject(participant_joined(&grace, Role::Mentor)).await;

    connection
        .inject(control_packet(
            &grace,
            &ControlMessage::KickParticipant {
                target_identity: connection.identity(),
            },
        ))
        .await;

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert_eq!(snapshot.state, RoomState::Disconnected);
    assert_eq!(snapshot.leave_reason, Some(LeaveReason::Removed));
    assert!(connection.is_disconnected());
    assert!(room.devices.live_tracks().is_empty());

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_kick_from_student_is_ignored() {
    let room = RoomHarness::spawn();
    room.handle.join(student_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();
    let ana = student("Ana");
    connection.inject(participant_joined(&ana, Role::Student)).await;

    connection
        .inject(control_packet(
            &ana,
            &ControlMessage::KickParticipant {
                target_identity: connection.identity(),
            },
        ))
        .await;

    // Mentor kicking someone else does not touch us either.
    let grace = mentor("Grace");
    connection.inject(participant_joined(&grace, Role::Mentor)).await;
    connection
        .inject(control_packet(
            &grace,
            &ControlMessage::KickParticipant {
                target_identity: ana.clone(),
            },
        ))
        .await;

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert_eq!(snapshot.state, RoomState::Active);
    assert!(!connection.is_disconnected());

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_mentor_mute_and_unmute() {
    let room = RoomHarness::spawn();
    room.handle.join(student_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();
    let grace = mentor("Grace");
    connection.inject(participant_joined(&grace, Role::Mentor)).await;

    connection
        .inject(control_packet(
            &grace,
            &ControlMessage::MuteParticipant {
                target_identity: connection.identity(),
            },
        ))
        .await;

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert!(!snapshot.microphone_enabled);
    assert!(snapshot.notices.contains(&Notice::MutedByMentor));
    let microphone = connection.live_of_kind(TrackKind::Audio);
    assert_eq!(microphone.len(), 1);
    assert!(microphone.iter().all(|p| p.muted));

    connection
        .inject(control_packet(
            &grace,
            &ControlMessage::UnmuteParticipant {
                target_identity: connection.identity(),
            },
        ))
        .await;

    // Unmute only grants permission; the student decides.
    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert!(!snapshot.microphone_enabled);
    assert!(snapshot.notices.contains(&Notice::UnmuteAllowed));

    room.handle.set_microphone_enabled(true).await.unwrap();
    assert!(room.handle.current_snapshot().await.unwrap().microphone_enabled);

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_mentor_moderation_is_broadcast() {
    let room = RoomHarness::spawn();
    room.handle.join(mentor_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();
    let ana = student("Ana");

    room.handle.mute_participant(ana.clone()).await.unwrap();
    room.handle.unmute_participant(ana.clone()).await.unwrap();
    room.handle.kick_participant(ana.clone()).await.unwrap();

    assert_eq!(
        connection.sent_messages(),
        vec![
            ControlMessage::MuteParticipant {
                target_identity: ana.clone(),
            },
            ControlMessage::UnmuteParticipant {
                target_identity: ana.clone(),
            },
            ControlMessage::KickParticipant {
                target_identity: ana,
            },
        ]
    );
    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_chat_and_hand_raise() {
    let room = RoomHarness::spawn();
    room.handle.join(student_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();
    let ana = student("Ana");

    room.handle.send_chat("  hello there  ").await.unwrap();
    room.handle.send_chat("   ").await.unwrap();
    room.handle.raise_hand(true).await.unwrap();
    connection
        .inject(control_packet(
            &ana,
            &ControlMessage::ChatMessage {
                text: "hi!".to_string(),
                timestamp: 1_700_000_000_000,
            },
        ))
        .await;

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert!(snapshot.hand_raised);
    assert_eq!(snapshot.chat.len(), 2);
    let local = snapshot.chat.first().unwrap();
    assert!(local.is_local);
    assert_eq!(local.text, "hello there");
    let remote = snapshot.chat.last().unwrap();
    assert!(!remote.is_local);
    assert_eq!(remote.display_name, "Ana");

    let sent = connection.sent_messages();
    assert_eq!(sent.len(), 2);
    assert!(sent.contains(&ControlMessage::HandRaise { raised: true }));

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_newcomer_gets_raised_hand_reannounced() {
    let room = RoomHarness::spawn();
    room.handle.join(student_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();
    room.handle.raise_hand(true).await.unwrap();

    connection
        .inject(participant_joined(&mentor("Grace"), Role::Mentor))
        .await;
    let _ = room.handle.current_snapshot().await.unwrap();

    let announcements = connection
        .sent_messages()
        .into_iter()
        .filter(|m| *m == ControlMessage::HandRaise { raised: true })
        .count();
    assert_eq!(announcements, 2);

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remote_tracks_attach_and_detach() {
    let room = RoomHarness::spawn();
    room.handle.join(mentor_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();
    let ana = student("Ana");

    connection.inject(participant_joined(&ana, Role::Student)).await;
    connection
        .inject(track_subscribed(&ana, "TR_cam", RemoteTrackKind::Camera))
        .await;
    connection
        .inject(track_subscribed(&ana, "TR_mic", RemoteTrackKind::Audio))
        .await;

    let snapshot = room.handle.current_snapshot().await.unwrap();
    let tile = snapshot.tiles.first().unwrap();
    assert_eq!(tile.display_name, "Ana");
    assert!(tile.is_video_enabled());
    assert!(tile.is_audio_enabled());
    assert_eq!(connection.attached_sinks().len(), 2);

    connection.inject(track_unsubscribed(&ana, "TR_cam")).await;
    connection.inject(participant_left(&ana)).await;

    let snapshot = room.handle.current_snapshot().await.unwrap();
    assert!(snapshot.tiles.is_empty());
    assert!(connection.attached_sinks().is_empty());

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_in_room_operations_require_connection() {
    let room = RoomHarness::spawn();

    assert_eq!(
        room.handle.start_screen_share().await.unwrap_err(),
        SessionError::NotConnected
    );
    assert_eq!(
        room.handle
            .set_background(BackgroundMode::Blur)
            .await
            .unwrap_err(),
        SessionError::NotConnected
    );
    assert_eq!(
        room.handle.raise_hand(true).await.unwrap_err(),
        SessionError::NotConnected
    );
    assert_eq!(
        room.handle.send_chat("hello").await.unwrap_err(),
        SessionError::NotConnected
    );

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_media() {
    let room = RoomHarness::spawn();
    room.handle.join(student_join("course-42")).await.unwrap();
    let connection = room.transport.last_connection().unwrap();
    let devices = room.devices.clone();

    room.shutdown().await;

    assert!(connection.is_disconnected());
    assert!(devices.live_tracks().is_empty());
}
