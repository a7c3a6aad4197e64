//! Pre-configured test data for session engine testing.
//!
//! Provides builders and test data for:
//! - Participant identities with different roles
//! - Room events and inbound control packets
//! - Session windows anchored at a fixed instant
//! - A room session wired to fresh mocks

use crate::mock_devices::MockDevices;
use crate::mock_services::{MockImageLoader, MockSegmentation, MockSessionApi};
use crate::mock_transport::MockTransport;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use common::types::{ParticipantIdentity, Role};
use control_protocol::{encode_message, ControlMessage, InboundPacket};
use session_engine::clock::SessionWindow;
use session_engine::compositor::BackgroundMode;
use session_engine::room::{
    JoinRequest, RemoteTrackKind, RemoteTrackRef, RoomDependencies, RoomEvent, RoomSessionActor,
    RoomSessionHandle, RoomSettings,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Transport URL the harness connects to.
pub const TEST_TRANSPORT_URL: &str = "wss://sfu.test.local";

/// A remote mentor identity.
#[must_use]
pub fn mentor(name: &str) -> ParticipantIdentity {
    ParticipantIdentity::new(format!("{name}|mentor"))
}

/// A remote student identity.
#[must_use]
pub fn student(name: &str) -> ParticipantIdentity {
    ParticipantIdentity::new(format!("{name}|student"))
}

/// Join request for a mentor with default devices and no effect.
#[must_use]
pub fn mentor_join(room_name: &str) -> JoinRequest {
    JoinRequest::new(room_name, Role::Mentor)
}

/// Join request for a student with default devices and no effect.
#[must_use]
pub fn student_join(room_name: &str) -> JoinRequest {
    JoinRequest::new(room_name, Role::Student)
}

/// Join request with a background effect.
#[must_use]
pub fn join_with_background(room_name: &str, role: Role, mode: BackgroundMode) -> JoinRequest {
    JoinRequest::new(room_name, role).with_background(mode)
}

#[must_use]
pub fn participant_joined(identity: &ParticipantIdentity, role: Role) -> RoomEvent {
    RoomEvent::ParticipantConnected {
        identity: identity.clone(),
        role,
    }
}

#[must_use]
pub fn participant_left(identity: &ParticipantIdentity) -> RoomEvent {
    RoomEvent::ParticipantDisconnected {
        identity: identity.clone(),
    }
}

/// A remote track subscription.
#[must_use]
pub fn track_subscribed(
    identity: &ParticipantIdentity,
    sid: &str,
    kind: RemoteTrackKind,
) -> RoomEvent {
    RoomEvent::TrackSubscribed {
        identity: identity.clone(),
        track: RemoteTrackRef::new(sid, kind),
    }
}

#[must_use]
pub fn track_unsubscribed(identity: &ParticipantIdentity, sid: &str) -> RoomEvent {
    RoomEvent::TrackUnsubscribed {
        identity: identity.clone(),
        sid: sid.to_string(),
    }
}

/// An encoded control message received from `sender`.
#[must_use]
pub fn control_packet(sender: &ParticipantIdentity, message: &ControlMessage) -> RoomEvent {
    let payload = encode_message(message).expect("fixture messages always encode");
    RoomEvent::DataReceived(InboundPacket::new(sender.clone(), payload))
}

/// Arbitrary bytes received from `sender`.
#[must_use]
pub fn raw_packet(sender: &ParticipantIdentity, payload: &[u8]) -> RoomEvent {
    RoomEvent::DataReceived(InboundPacket::new(
        sender.clone(),
        Bytes::copy_from_slice(payload),
    ))
}

/// Let spawned tasks run until the runtime is idle.
///
/// Requires a paused clock: the sleep only completes once every ready task
/// has run and the runtime auto-advances time.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Fixed reference instant, 2026-03-02 14:00:00 UTC.
#[must_use]
pub fn anchor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0)
        .single()
        .expect("valid fixture timestamp")
}

/// A one hour session starting at [`anchor`] with a five minute grace period.
#[must_use]
pub fn hour_long_window() -> SessionWindow {
    let start = anchor();
    SessionWindow::new(
        start,
        start + chrono::Duration::hours(1),
        Duration::from_secs(300),
    )
    .expect("valid fixture window")
}

/// A room session actor wired to fresh mocks.
pub struct RoomHarness {
    pub handle: RoomSessionHandle,
    pub task: JoinHandle<()>,
    pub cancel: CancellationToken,
    pub transport: MockTransport,
    pub devices: MockDevices,
    pub api: MockSessionApi,
    pub segmentation: Arc<MockSegmentation>,
    pub loader: MockImageLoader,
}

impl RoomHarness {
    /// Spawn with default mocks.
    #[must_use]
    pub fn spawn() -> Self {
        RoomHarnessBuilder::default().spawn()
    }

    #[must_use]
    pub fn builder() -> RoomHarnessBuilder {
        RoomHarnessBuilder::default()
    }

    /// Cancel the actor and wait for it to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.task.await.expect("room actor panicked");
    }
}

/// Builder for [`RoomHarness`] with custom mocks.
#[derive(Default)]
pub struct RoomHarnessBuilder {
    transport: Option<MockTransport>,
    devices: Option<MockDevices>,
    api: Option<MockSessionApi>,
    segmentation: Option<Arc<MockSegmentation>>,
    loader: Option<MockImageLoader>,
}

impl RoomHarnessBuilder {
    #[must_use]
    pub fn transport(mut self, transport: MockTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn devices(mut self, devices: MockDevices) -> Self {
        self.devices = Some(devices);
        self
    }

    #[must_use]
    pub fn api(mut self, api: MockSessionApi) -> Self {
        self.api = Some(api);
        self
    }

    #[must_use]
    pub fn segmentation(mut self, segmentation: Arc<MockSegmentation>) -> Self {
        self.segmentation = Some(segmentation);
        self
    }

    #[must_use]
    pub fn loader(mut self, loader: MockImageLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Spawn the actor. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(self) -> RoomHarness {
        let transport = self.transport.unwrap_or_default();
        let devices = self.devices.unwrap_or_default();
        let api = self.api.unwrap_or_default();
        let segmentation = self.segmentation.unwrap_or_else(MockSegmentation::new);
        let loader = self.loader.unwrap_or_default();

        let dependencies = RoomDependencies {
            transport: Arc::new(transport.clone()),
            devices: Arc::new(devices.clone()),
            session_api: Arc::new(api.clone()),
            segmenter: segmentation.segmenter(),
            image_loader: Arc::new(loader.clone()),
        };
        let cancel = CancellationToken::new();
        let (handle, task) = RoomSessionActor::spawn(
            dependencies,
            RoomSettings::new(TEST_TRANSPORT_URL),
            cancel.clone(),
        );

        RoomHarness {
            handle,
            task,
            cancel,
            transport,
            devices,
            api,
            segmentation,
            loader,
        }
    }
}
