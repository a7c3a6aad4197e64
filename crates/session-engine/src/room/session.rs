//! `RoomSessionActor` - owns one participant's room lifecycle.
//!
//! The actor owns the connection, the local media and the remote tiles. The
//! UI talks to it only through [`RoomSessionHandle`] and reads state from the
//! [`RoomSnapshot`] watch channel.
//!
//! # Join attempts
//!
//! Each join bumps a monotonically increasing attempt counter. The connect
//! work runs in a spawned task and reports back tagged with its attempt; a
//! result for anything but the latest attempt is discarded, which releases
//! its tracks and closes its connection. A leave also bumps the counter, so
//! a handshake that completes after a leave never becomes active.
//!
//! Each attempt also gets a child of the actor's cancellation token. A leave,
//! a newer join or shutdown cancels it, and the connect task stops before
//! acquiring any further device.

use crate::compositor::{BackgroundMode, CompositorSettings, ImageLoader, Segmenter};
use crate::config::{DEFAULT_CHAT_CAPACITY, DEFAULT_ROOM_MAILBOX_CAPACITY};
use crate::errors::SessionError;
use crate::media::{LocalTrack, MediaDevices, VideoQuality};
use crate::observability::metrics::{
    record_control_message, record_control_message_ignored, record_join_attempt,
    record_screen_share_preempted, record_superseded_join, set_tiles_active,
};
use crate::probe::DeviceSelection;
use crate::room::collaborators::{SessionApi, SessionKind, SessionRecord};
use crate::room::events::RoomEvent;
use crate::room::local::{
    connect_and_publish, CameraPipeline, ConnectedRoom, Effects, JoinContext, LocalMedia,
    MicrophoneSlot, ScreenSlot,
};
use crate::room::messages::{
    InternalMessage, JoinOutcome, JoinRequest, ModerationAction, RoomMessage,
};
use crate::room::roster::{ParticipantRoster, TileEvent};
use crate::room::screen_share::ScreenShareState;
use crate::room::snapshot::{
    ChatEntry, ChatLog, LeaveReason, Notice, NoticeLog, RoomSnapshot, RoomState,
};
use crate::room::transport::{RemoteTrackKind, RoomConnection, RoomTransport, SinkId};
use common::types::{ParticipantIdentity, Role};
use control_protocol::{encode_message, ControlMessage, InboundPacket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Collaborators the room session drives.
#[derive(Clone)]
pub struct RoomDependencies {
    pub transport: Arc<dyn RoomTransport>,
    pub devices: Arc<dyn MediaDevices>,
    pub session_api: Arc<dyn SessionApi>,
    pub segmenter: Arc<Segmenter>,
    pub image_loader: Arc<dyn ImageLoader>,
}

/// Tunables for one room session.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub transport_url: String,
    pub chat_capacity: usize,
    pub mailbox_capacity: usize,
    pub compositor: CompositorSettings,
}

impl RoomSettings {
    #[must_use]
    pub fn new(transport_url: impl Into<String>) -> Self {
        Self {
            transport_url: transport_url.into(),
            chat_capacity: DEFAULT_CHAT_CAPACITY,
            mailbox_capacity: DEFAULT_ROOM_MAILBOX_CAPACITY,
            compositor: CompositorSettings::default(),
        }
    }
}

/// Handle to a `RoomSessionActor`.
#[derive(Clone)]
pub struct RoomSessionHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    snapshot: watch::Receiver<RoomSnapshot>,
    session_api: Arc<dyn SessionApi>,
    activating: Arc<AtomicBool>,
}

/// Clears the activation flag however `activate` exits.
struct ActivationGuard<'a>(&'a AtomicBool);

impl Drop for ActivationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RoomSessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))
    }

    /// Create the session record for a course or booking (mentor).
    ///
    /// Returns the room name to join. A call made while another activation
    /// is in flight is rejected rather than queued.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyInProgress`] if an activation is in flight
    /// - [`SessionError::Credential`] if the session API fails
    pub async fn activate(
        &self,
        kind: SessionKind,
        resource_id: &str,
    ) -> Result<SessionRecord, SessionError> {
        if self.activating.swap(true, Ordering::AcqRel) {
            return Err(SessionError::AlreadyInProgress);
        }
        let _guard = ActivationGuard(&self.activating);

        info!(
            target: "engine.room",
            kind = kind.as_str(),
            resource_id = %resource_id,
            "Activating session"
        );
        self.session_api.create_session(kind, resource_id).await
    }

    /// Join a room.
    ///
    /// Resolves when this attempt is connected with microphone and camera
    /// published, fails, or is superseded by a newer join or a leave.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Superseded`] if a newer join or a leave replaced it
    /// - [`SessionError::Credential`] if no join credential could be obtained
    /// - [`SessionError::ConnectFailed`] / [`SessionError::PublishFailed`]
    /// - [`SessionError::PermissionDenied`] / [`SessionError::DeviceUnavailable`]
    pub async fn join(&self, request: JoinRequest) -> Result<JoinOutcome, SessionError> {
        self.request(|respond_to| RoomMessage::Join {
            request,
            respond_to,
        })
        .await?
    }

    /// Leave the room. Idempotent; cancels a join in flight.
    ///
    /// # Errors
    ///
    /// [`SessionError::Internal`] if the actor is gone.
    pub async fn leave(&self) -> Result<(), SessionError> {
        self.request(|respond_to| RoomMessage::Leave { respond_to })
            .await
    }

    /// End the session for everyone and leave (mentor).
    ///
    /// If the session API fails the participant stays in the room.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Forbidden`] for students
    /// - [`SessionError::NotConnected`] when not in a room
    /// - [`SessionError::Credential`] if the session API fails
    pub async fn end_session(&self) -> Result<(), SessionError> {
        self.request(|respond_to| RoomMessage::EndSession { respond_to })
            .await?
    }

    /// Share the screen. Idempotent while already sharing.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`], or the capture/publish error.
    pub async fn start_screen_share(&self) -> Result<(), SessionError> {
        self.request(|respond_to| RoomMessage::StartScreenShare { respond_to })
            .await?
    }

    /// Stop sharing the screen. Idempotent.
    ///
    /// # Errors
    ///
    /// [`SessionError::Internal`] if the actor is gone.
    pub async fn stop_screen_share(&self) -> Result<(), SessionError> {
        self.request(|respond_to| RoomMessage::StopScreenShare { respond_to })
            .await
    }

    /// Change the background effect; returns the mode actually applied.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`], or the camera error if the camera
    /// could not be republished.
    pub async fn set_background(
        &self,
        mode: BackgroundMode,
    ) -> Result<BackgroundMode, SessionError> {
        self.request(|respond_to| RoomMessage::SetBackground { mode, respond_to })
            .await?
    }

    /// # Errors
    ///
    /// [`SessionError::NotConnected`], or the device/publish error.
    pub async fn switch_camera(&self, device_id: impl Into<String>) -> Result<(), SessionError> {
        let device_id = device_id.into();
        self.request(|respond_to| RoomMessage::SwitchCamera {
            device_id,
            respond_to,
        })
        .await?
    }

    /// # Errors
    ///
    /// [`SessionError::NotConnected`], or the device/publish error.
    pub async fn switch_microphone(
        &self,
        device_id: impl Into<String>,
    ) -> Result<(), SessionError> {
        let device_id = device_id.into();
        self.request(|respond_to| RoomMessage::SwitchMicrophone {
            device_id,
            respond_to,
        })
        .await?
    }

    /// # Errors
    ///
    /// [`SessionError::NotConnected`], or the device/publish error.
    pub async fn set_video_quality(&self, quality: VideoQuality) -> Result<(), SessionError> {
        self.request(|respond_to| RoomMessage::SetVideoQuality {
            quality,
            respond_to,
        })
        .await?
    }

    /// # Errors
    ///
    /// [`SessionError::NotConnected`] or the transport error.
    pub async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.request(|respond_to| RoomMessage::SetMicrophoneEnabled {
            enabled,
            respond_to,
        })
        .await?
    }

    /// # Errors
    ///
    /// [`SessionError::NotConnected`] or the transport error.
    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.request(|respond_to| RoomMessage::SetCameraEnabled {
            enabled,
            respond_to,
        })
        .await?
    }

    /// # Errors
    ///
    /// [`SessionError::NotConnected`] or the transport error.
    pub async fn raise_hand(&self, raised: bool) -> Result<(), SessionError> {
        self.request(|respond_to| RoomMessage::RaiseHand { raised, respond_to })
            .await?
    }

    /// Send a chat line. Blank text is dropped without error.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`] or the transport error.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        self.request(|respond_to| RoomMessage::SendChat { text, respond_to })
            .await?
    }

    /// # Errors
    ///
    /// [`SessionError::PermissionDenied`] for students.
    pub async fn mute_participant(&self, target: ParticipantIdentity) -> Result<(), SessionError> {
        self.moderate(ModerationAction::Mute, target).await
    }

    /// # Errors
    ///
    /// [`SessionError::PermissionDenied`] for students.
    pub async fn unmute_participant(
        &self,
        target: ParticipantIdentity,
    ) -> Result<(), SessionError> {
        self.moderate(ModerationAction::Unmute, target).await
    }

    /// # Errors
    ///
    /// [`SessionError::PermissionDenied`] for students.
    pub async fn kick_participant(&self, target: ParticipantIdentity) -> Result<(), SessionError> {
        self.moderate(ModerationAction::Kick, target).await
    }

    async fn moderate(
        &self,
        action: ModerationAction,
        target: ParticipantIdentity,
    ) -> Result<(), SessionError> {
        self.request(|respond_to| RoomMessage::Moderate {
            action,
            target,
            respond_to,
        })
        .await?
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Snapshot taken by the actor after all earlier requests were handled.
    ///
    /// # Errors
    ///
    /// [`SessionError::Internal`] if the actor is gone.
    pub async fn current_snapshot(&self) -> Result<RoomSnapshot, SessionError> {
        self.request(|respond_to| RoomMessage::GetSnapshot { respond_to })
            .await
    }

    /// Subscribe to snapshot updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshot.clone()
    }

    /// Cancel the actor; it leaves the room and exits.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// A join waiting for its connect task.
struct PendingJoin {
    attempt: u64,
    /// Child of the actor token; stops the connect task.
    cancel: CancellationToken,
    request: JoinRequest,
    respond_to: oneshot::Sender<Result<JoinOutcome, SessionError>>,
}

/// The connected room.
struct ActiveRoom {
    connection: Box<dyn RoomConnection>,
    identity: ParticipantIdentity,
    media: LocalMedia,
}

/// The `RoomSessionActor` implementation.
pub struct RoomSessionActor {
    receiver: mpsc::Receiver<RoomMessage>,
    internal_tx: mpsc::UnboundedSender<InternalMessage>,
    internal_rx: mpsc::UnboundedReceiver<InternalMessage>,
    cancel_token: CancellationToken,
    snapshot_tx: watch::Sender<RoomSnapshot>,
    context: JoinContext,
    session_api: Arc<dyn SessionApi>,
    devices: Arc<dyn MediaDevices>,

    state: RoomState,
    leave_reason: Option<LeaveReason>,
    /// Latest join attempt; bumped by every join and leave.
    attempt: u64,
    pending: Option<PendingJoin>,
    active: Option<ActiveRoom>,
    events: Option<mpsc::Receiver<RoomEvent>>,
    role: Role,
    room_name: Option<String>,
    selection: DeviceSelection,
    background: BackgroundMode,
    roster: ParticipantRoster,
    screen_share: ScreenShareState,
    hand_raised: bool,
    microphone_enabled: bool,
    camera_enabled: bool,
    chat: ChatLog,
    notices: NoticeLog,
}

/// Resolve the next transport event, or never if not connected.
async fn next_event(events: &mut Option<mpsc::Receiver<RoomEvent>>) -> Option<RoomEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_control(
    connection: &dyn RoomConnection,
    message: &ControlMessage,
) -> Result<(), SessionError> {
    let payload = encode_message(message)
        .map_err(|e| SessionError::Internal(format!("control message encode failed: {e}")))?;
    connection.send_data(payload).await?;
    debug!(
        target: "engine.protocol",
        message_type = message.kind().as_str(),
        "Control message sent"
    );
    Ok(())
}

/// Report back when `track` ends, whoever stopped it.
fn watch_capture(internal_tx: &mpsc::UnboundedSender<InternalMessage>, track: &LocalTrack) {
    let ended = track.ended_token();
    let track = track.clone();
    let tx = internal_tx.clone();
    tokio::spawn(async move {
        ended.cancelled().await;
        let _ = tx.send(InternalMessage::CaptureEnded { track });
    });
}

impl RoomSessionActor {
    /// Spawn a room session actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        dependencies: RoomDependencies,
        settings: RoomSettings,
        cancel_token: CancellationToken,
    ) -> (RoomSessionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(settings.mailbox_capacity.max(1));
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(RoomSnapshot::default());

        let context = JoinContext {
            transport: dependencies.transport,
            session_api: Arc::clone(&dependencies.session_api),
            devices: Arc::clone(&dependencies.devices),
            effects: Effects {
                segmenter: dependencies.segmenter,
                loader: dependencies.image_loader,
                settings: settings.compositor,
            },
            transport_url: settings.transport_url,
        };

        let actor = Self {
            receiver,
            internal_tx,
            internal_rx,
            cancel_token: cancel_token.clone(),
            snapshot_tx,
            context,
            session_api: Arc::clone(&dependencies.session_api),
            devices: dependencies.devices,
            state: RoomState::Idle,
            leave_reason: None,
            attempt: 0,
            pending: None,
            active: None,
            events: None,
            role: Role::Student,
            room_name: None,
            selection: DeviceSelection::default(),
            background: BackgroundMode::None,
            roster: ParticipantRoster::new(),
            screen_share: ScreenShareState::default(),
            hand_raised: false,
            microphone_enabled: false,
            camera_enabled: false,
            chat: ChatLog::new(settings.chat_capacity),
            notices: NoticeLog::default(),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomSessionHandle {
            sender,
            cancel_token,
            snapshot: snapshot_rx,
            session_api: dependencies.session_api,
            activating: Arc::new(AtomicBool::new(false)),
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "engine.room.actor")]
    async fn run(mut self) {
        info!(target: "engine.room", "RoomSessionActor started");

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(target: "engine.room", "RoomSessionActor received cancellation signal");
                    self.shutdown().await;
                    self.publish_snapshot();
                    break;
                }

                Some(internal) = self.internal_rx.recv() => {
                    self.handle_internal(internal).await;
                }

                event = next_event(&mut self.events) => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            warn!(target: "engine.room", "Room event stream closed");
                            self.teardown(LeaveReason::TransportLost).await;
                        }
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(target: "engine.room", "RoomSessionActor channel closed, exiting");
                            self.shutdown().await;
                            break;
                        }
                    }
                }
            }

            self.publish_snapshot();
        }

        info!(
            target: "engine.room",
            attempts = self.attempt,
            "RoomSessionActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                request,
                respond_to,
            } => {
                self.handle_join(request, respond_to).await;
            }
            RoomMessage::Leave { respond_to } => {
                self.handle_leave().await;
                let _ = respond_to.send(());
            }
            RoomMessage::EndSession { respond_to } => {
                let result = self.handle_end_session().await;
                let _ = respond_to.send(result);
            }
            RoomMessage::StartScreenShare { respond_to } => {
                let result = self.start_screen_share().await;
                let _ = respond_to.send(result);
            }
            RoomMessage::StopScreenShare { respond_to } => {
                self.stop_local_share().await;
                let _ = respond_to.send(());
            }
            RoomMessage::SetBackground { mode, respond_to } => {
                let result = self.set_background(mode).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::SwitchCamera {
                device_id,
                respond_to,
            } => {
                let quality = self.selection.quality;
                let result = self.restart_camera(Some(device_id), quality).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::SwitchMicrophone {
                device_id,
                respond_to,
            } => {
                let result = self.switch_microphone(device_id).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::SetVideoQuality {
                quality,
                respond_to,
            } => {
                let device_id = self.selection.video_device_id.clone();
                let result = self.restart_camera(device_id, quality).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::SetMicrophoneEnabled {
                enabled,
                respond_to,
            } => {
                let result = self.set_microphone_enabled(enabled).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::SetCameraEnabled {
                enabled,
                respond_to,
            } => {
                let result = self.set_camera_enabled(enabled).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::RaiseHand { raised, respond_to } => {
                let result = self.raise_hand(raised).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::SendChat { text, respond_to } => {
                let result = self.send_chat(&text).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::Moderate {
                action,
                target,
                respond_to,
            } => {
                let result = self.moderate(action, target).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.build_snapshot());
            }
        }
    }

    async fn handle_internal(&mut self, message: InternalMessage) {
        match message {
            InternalMessage::ConnectCompleted { attempt, result } => {
                self.handle_connect_completed(attempt, result).await;
            }
            InternalMessage::CaptureEnded { track } => {
                self.handle_capture_ended(&track).await;
            }
        }
    }

    // --- Join / leave -----------------------------------------------------

    async fn handle_join(
        &mut self,
        request: JoinRequest,
        respond_to: oneshot::Sender<Result<JoinOutcome, SessionError>>,
    ) {
        self.attempt += 1;
        let attempt = self.attempt;

        if let Some(previous) = self.pending.take() {
            info!(
                target: "engine.room",
                attempt = previous.attempt,
                superseded_by = attempt,
                "Join superseded by a newer attempt"
            );
            previous.cancel.cancel();
            record_superseded_join();
            record_join_attempt("superseded");
            let _ = previous.respond_to.send(Err(SessionError::Superseded));
        }
        if self.active.is_some() {
            self.teardown(LeaveReason::Voluntary).await;
        }

        info!(
            target: "engine.room",
            attempt,
            room = %request.room_name,
            role = ?request.role,
            "Joining room"
        );

        self.state = RoomState::Connecting;
        self.leave_reason = None;
        self.role = request.role;
        self.room_name = Some(request.room_name.clone());
        self.selection = request.devices.clone();

        let cancel = self.cancel_token.child_token();
        let connect = connect_and_publish(self.context.clone(), request.clone(), cancel.clone());
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = connect.await;
            let _ = tx.send(InternalMessage::ConnectCompleted { attempt, result });
        });

        self.pending = Some(PendingJoin {
            attempt,
            cancel,
            request,
            respond_to,
        });
    }

    async fn handle_connect_completed(
        &mut self,
        attempt: u64,
        result: Result<ConnectedRoom, SessionError>,
    ) {
        let pending = match self.pending.take() {
            Some(pending) if pending.attempt == attempt => pending,
            other => {
                self.pending = other;
                match result {
                    Ok(room) => {
                        info!(
                            target: "engine.room",
                            attempt,
                            latest = self.attempt,
                            "Discarding stale connection"
                        );
                        room.discard().await;
                    }
                    Err(e) => {
                        debug!(target: "engine.room", attempt, error = %e, "Stale join failed");
                    }
                }
                return;
            }
        };

        match result {
            Ok(room) => self.enter_room(pending, room).await,
            Err(e) => {
                warn!(
                    target: "engine.room",
                    attempt,
                    error = %e,
                    "Join failed"
                );
                record_join_attempt(e.label());
                self.state = RoomState::Idle;
                self.room_name = None;
                let _ = pending.respond_to.send(Err(e));
            }
        }
    }

    async fn enter_room(&mut self, pending: PendingJoin, room: ConnectedRoom) {
        let ConnectedRoom {
            connection,
            events,
            media,
            notices,
        } = room;
        let identity = connection.local_identity();

        for track in media.tracks() {
            watch_capture(&self.internal_tx, &track);
        }
        self.microphone_enabled = media.microphone.is_some();
        self.camera_enabled = media.camera.is_some();
        self.background = media
            .camera
            .as_ref()
            .map_or(BackgroundMode::None, CameraPipeline::mode);
        for notice in notices {
            self.notices.push(notice);
        }

        self.events = Some(events);
        self.active = Some(ActiveRoom {
            connection,
            identity: identity.clone(),
            media,
        });
        self.state = RoomState::Active;
        record_join_attempt("success");

        info!(
            target: "engine.room",
            attempt = pending.attempt,
            identity = %identity,
            room = %pending.request.room_name,
            background = self.background.as_str(),
            "Joined room"
        );

        self.resync().await;

        let _ = pending.respond_to.send(Ok(JoinOutcome {
            room_name: pending.request.room_name,
            identity,
            background: self.background.clone(),
        }));
    }

    async fn handle_leave(&mut self) {
        self.attempt += 1;

        if let Some(pending) = self.pending.take() {
            info!(target: "engine.room", attempt = pending.attempt, "Join cancelled by leave");
            pending.cancel.cancel();
            record_join_attempt("cancelled");
            let _ = pending.respond_to.send(Err(SessionError::Superseded));
            self.state = RoomState::Idle;
            self.room_name = None;
        }
        self.teardown(LeaveReason::Voluntary).await;
    }

    async fn handle_end_session(&mut self) -> Result<(), SessionError> {
        if !self.role.can_moderate() {
            return Err(SessionError::Forbidden(
                "only mentors can end the session".to_string(),
            ));
        }
        let Some(room_name) = self.room_name.clone().filter(|_| self.active.is_some()) else {
            return Err(SessionError::NotConnected);
        };

        if let Err(e) = self.session_api.end_session(&room_name).await {
            warn!(target: "engine.room", room = %room_name, error = %e, "End session failed");
            return Err(e);
        }
        info!(target: "engine.room", room = %room_name, "Session ended by mentor");
        self.teardown(LeaveReason::Ended).await;
        Ok(())
    }

    /// Release everything and enter `Disconnected`. Idempotent.
    ///
    /// Stops local tracks (compositor output included), detaches every remote
    /// sink, clears tiles and closes the connection. The room name and the
    /// applied background are cleared with it.
    async fn teardown(&mut self, reason: LeaveReason) {
        let Some(mut room) = self.active.take() else {
            return;
        };
        self.events = None;
        let connection = room.connection.as_ref();

        if self.screen_share.is_local {
            let message = ControlMessage::ScreenShare {
                sharing: false,
                sharer_identity: room.identity.clone(),
            };
            if let Err(e) = send_control(connection, &message).await {
                debug!(target: "engine.room", error = %e, "Share stop announcement failed");
            }
        }

        room.media.release(connection).await;
        for sink in self.roster.clear() {
            connection.detach(sink).await;
        }
        connection.disconnect().await;

        self.screen_share.clear();
        self.hand_raised = false;
        self.microphone_enabled = false;
        self.camera_enabled = false;
        self.background = BackgroundMode::None;
        self.room_name = None;
        self.chat.clear();
        self.state = RoomState::Disconnected;
        self.leave_reason = Some(reason);
        set_tiles_active(0);

        info!(
            target: "engine.room",
            identity = %room.identity,
            reason = reason.as_str(),
            "Left room"
        );
    }

    async fn shutdown(&mut self) {
        self.attempt += 1;
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
            let _ = pending.respond_to.send(Err(SessionError::Internal(
                "room session shutting down".to_string(),
            )));
            self.state = RoomState::Idle;
        }
        self.teardown(LeaveReason::Shutdown).await;
    }

    /// Re-announce local state so newcomers and reconnects converge.
    async fn resync(&self) {
        let Some(room) = self.active.as_ref() else {
            return;
        };
        let connection = room.connection.as_ref();

        if self.hand_raised {
            let message = ControlMessage::HandRaise { raised: true };
            if let Err(e) = send_control(connection, &message).await {
                debug!(target: "engine.protocol", error = %e, "Hand re-announce failed");
            }
        }
        if self.screen_share.is_local {
            let message = ControlMessage::ScreenShare {
                sharing: true,
                sharer_identity: room.identity.clone(),
            };
            if let Err(e) = send_control(connection, &message).await {
                debug!(target: "engine.protocol", error = %e, "Share re-announce failed");
            }
        }
    }

    // --- Local media ------------------------------------------------------

    async fn start_screen_share(&mut self) -> Result<(), SessionError> {
        let Some(room) = self.active.as_mut() else {
            return Err(SessionError::NotConnected);
        };
        if room.media.screen.is_some() {
            return Ok(());
        }
        let connection = room.connection.as_ref();

        let track = self.devices.capture_screen().await?;
        let publication = match connection.publish(&track).await {
            Ok(publication) => publication,
            Err(e) => {
                track.stop();
                return Err(e);
            }
        };
        watch_capture(&self.internal_tx, &track);
        room.media.screen = Some(ScreenSlot { track, publication });

        let identity = room.identity.clone();
        let message = ControlMessage::ScreenShare {
            sharing: true,
            sharer_identity: identity.clone(),
        };
        if let Err(e) = send_control(connection, &message).await {
            warn!(target: "engine.room", error = %e, "Share announcement failed");
        }

        if let Some(displaced) = self.screen_share.start_local(&identity) {
            info!(target: "engine.room", displaced = %displaced, "Local share replaces remote share");
            self.release_remote_screen(&displaced).await;
        }
        info!(target: "engine.room", "Screen share started");
        Ok(())
    }

    /// Stop the local share and announce it. No-op when not sharing.
    async fn stop_local_share(&mut self) {
        let Some(room) = self.active.as_mut() else {
            return;
        };
        let Some(screen) = room.media.screen.take() else {
            return;
        };
        let connection = room.connection.as_ref();
        screen.release(connection).await;
        self.screen_share.stop_local();

        let message = ControlMessage::ScreenShare {
            sharing: false,
            sharer_identity: room.identity.clone(),
        };
        if let Err(e) = send_control(connection, &message).await {
            warn!(target: "engine.room", error = %e, "Share stop announcement failed");
        }
        info!(target: "engine.room", "Screen share stopped");
    }

    async fn set_background(&mut self, mode: BackgroundMode) -> Result<BackgroundMode, SessionError> {
        let Some(room) = self.active.as_mut() else {
            return Err(SessionError::NotConnected);
        };
        let connection = room.connection.as_ref();

        let Some(pipeline) = room.media.camera.take() else {
            // Applied when the camera comes back.
            self.background = mode.clone();
            return Ok(mode);
        };
        if pipeline.mode() == mode {
            room.media.camera = Some(pipeline);
            return Ok(mode);
        }

        info!(
            target: "engine.compositor",
            from = self.background.as_str(),
            to = mode.as_str(),
            "Switching background"
        );

        // The old outbound is unpublished before the new one is published,
        // so at most one camera track is ever live in the room.
        let raw = pipeline.stop_outbound(connection).await;
        match CameraPipeline::start(raw, &mode, &self.context.effects, connection).await {
            Ok((pipeline, notice)) => {
                pipeline.set_enabled(self.camera_enabled);
                if !self.camera_enabled {
                    let _ = connection.set_track_muted(pipeline.publication(), true).await;
                }
                self.background = pipeline.mode();
                if let Some(notice) = notice {
                    self.notices.push(notice);
                }
                room.media.camera = Some(pipeline);
                Ok(self.background.clone())
            }
            Err(e) => {
                warn!(target: "engine.room", error = %e, "Camera republish failed");
                self.camera_enabled = false;
                self.background = BackgroundMode::None;
                Err(e)
            }
        }
    }

    /// Restart the camera capture, re-applying the background effect.
    async fn restart_camera(
        &mut self,
        device_id: Option<String>,
        quality: VideoQuality,
    ) -> Result<(), SessionError> {
        let Some(room) = self.active.as_mut() else {
            return Err(SessionError::NotConnected);
        };
        let connection = room.connection.as_ref();
        let was_enabled = self.camera_enabled || room.media.camera.is_none();

        if let Some(previous) = room.media.camera.take() {
            previous.release(connection).await;
        }
        self.camera_enabled = false;

        let raw = self
            .devices
            .acquire_camera(device_id.as_deref(), quality.constraints())
            .await?;
        let (pipeline, notice) =
            CameraPipeline::start(raw, &self.background, &self.context.effects, connection).await?;
        if !was_enabled {
            pipeline.set_enabled(false);
            let _ = connection.set_track_muted(pipeline.publication(), true).await;
        }
        watch_capture(&self.internal_tx, &pipeline.raw);

        info!(
            target: "engine.devices",
            device_id = ?device_id,
            quality = ?quality,
            "Camera restarted"
        );

        self.background = pipeline.mode();
        if let Some(notice) = notice {
            self.notices.push(notice);
        }
        room.media.camera = Some(pipeline);
        self.camera_enabled = was_enabled;
        self.selection.video_device_id = device_id;
        self.selection.quality = quality;
        Ok(())
    }

    async fn switch_microphone(&mut self, device_id: String) -> Result<(), SessionError> {
        let Some(room) = self.active.as_mut() else {
            return Err(SessionError::NotConnected);
        };
        let connection = room.connection.as_ref();
        let was_enabled = self.microphone_enabled || room.media.microphone.is_none();

        if let Some(previous) = room.media.microphone.take() {
            previous.release(connection).await;
        }
        self.microphone_enabled = false;

        let track = self.devices.acquire_microphone(Some(&device_id)).await?;
        let slot = MicrophoneSlot::publish(track, connection).await?;
        if !was_enabled {
            slot.track.set_enabled(false);
            let _ = connection.set_track_muted(&slot.publication, true).await;
        }
        watch_capture(&self.internal_tx, &slot.track);

        info!(target: "engine.devices", device_id = %device_id, "Microphone switched");
        room.media.microphone = Some(slot);
        self.microphone_enabled = was_enabled;
        self.selection.audio_device_id = Some(device_id);
        Ok(())
    }

    async fn set_microphone_enabled(&mut self, enabled: bool) -> Result<(), SessionError> {
        let Some(room) = self.active.as_ref() else {
            return Err(SessionError::NotConnected);
        };
        let Some(microphone) = room.media.microphone.as_ref() else {
            return Err(SessionError::DeviceUnavailable(
                "no microphone published".to_string(),
            ));
        };
        room.connection
            .set_track_muted(&microphone.publication, !enabled)
            .await?;
        microphone.track.set_enabled(enabled);
        self.microphone_enabled = enabled;
        Ok(())
    }

    async fn set_camera_enabled(&mut self, enabled: bool) -> Result<(), SessionError> {
        let Some(room) = self.active.as_ref() else {
            return Err(SessionError::NotConnected);
        };
        let Some(camera) = room.media.camera.as_ref() else {
            return Err(SessionError::DeviceUnavailable(
                "no camera published".to_string(),
            ));
        };
        room.connection
            .set_track_muted(camera.publication(), !enabled)
            .await?;
        camera.set_enabled(enabled);
        self.camera_enabled = enabled;
        Ok(())
    }

    async fn handle_capture_ended(&mut self, track: &LocalTrack) {
        let Some(room) = self.active.as_mut() else {
            return;
        };
        let id = track.id();

        if room.media.screen.as_ref().is_some_and(|s| s.track.id() == id) {
            info!(target: "engine.room", "Screen capture ended by the platform");
            self.stop_local_share().await;
            return;
        }

        let connection = room.connection.as_ref();
        if room.media.camera.as_ref().is_some_and(|c| c.raw.id() == id) {
            if let Some(camera) = room.media.camera.take() {
                camera.release(connection).await;
            }
            warn!(target: "engine.devices", track = %id, "Camera capture ended");
            self.camera_enabled = false;
            self.notices.push(Notice::CameraLost);
        } else if room.media.microphone.as_ref().is_some_and(|m| m.track.id() == id) {
            if let Some(microphone) = room.media.microphone.take() {
                microphone.release(connection).await;
            }
            warn!(target: "engine.devices", track = %id, "Microphone capture ended");
            self.microphone_enabled = false;
            self.notices.push(Notice::MicrophoneLost);
        }
    }

    // --- Control channel --------------------------------------------------

    async fn raise_hand(&mut self, raised: bool) -> Result<(), SessionError> {
        let Some(room) = self.active.as_ref() else {
            return Err(SessionError::NotConnected);
        };
        send_control(room.connection.as_ref(), &ControlMessage::HandRaise { raised }).await?;
        self.hand_raised = raised;
        Ok(())
    }

    async fn send_chat(&mut self, text: &str) -> Result<(), SessionError> {
        let Some(room) = self.active.as_ref() else {
            return Err(SessionError::NotConnected);
        };
        let timestamp = chrono::Utc::now().timestamp_millis();
        let Some(message) = ControlMessage::chat(text, timestamp) else {
            return Ok(());
        };
        send_control(room.connection.as_ref(), &message).await?;

        if let ControlMessage::ChatMessage { text, timestamp } = message {
            self.chat.push(ChatEntry {
                display_name: room.identity.display_name(),
                sender: room.identity.clone(),
                text,
                timestamp,
                is_local: true,
            });
        }
        Ok(())
    }

    async fn moderate(
        &mut self,
        action: ModerationAction,
        target: ParticipantIdentity,
    ) -> Result<(), SessionError> {
        if !self.role.can_moderate() {
            return Err(SessionError::PermissionDenied(format!(
                "only mentors can {} participants",
                action.as_str()
            )));
        }
        let Some(room) = self.active.as_ref() else {
            return Err(SessionError::NotConnected);
        };

        info!(
            target: "engine.room",
            action = action.as_str(),
            target_identity = %target,
            "Moderating participant"
        );
        let message = match action {
            ModerationAction::Mute => ControlMessage::MuteParticipant {
                target_identity: target,
            },
            ModerationAction::Unmute => ControlMessage::UnmuteParticipant {
                target_identity: target,
            },
            ModerationAction::Kick => ControlMessage::KickParticipant {
                target_identity: target,
            },
        };
        send_control(room.connection.as_ref(), &message).await
    }

    // --- Room events ------------------------------------------------------

    async fn handle_event(&mut self, event: RoomEvent) {
        debug!(target: "engine.room", event = event.name(), "Room event");

        match event {
            RoomEvent::ParticipantConnected { identity, role } => {
                info!(target: "engine.room", identity = %identity, role = ?role, "Participant joined");
                self.roster.apply(TileEvent::Joined { identity, role });
                self.resync().await;
            }
            RoomEvent::ParticipantDisconnected { identity } => {
                info!(target: "engine.room", identity = %identity, "Participant left");
                let released = self.roster.apply(TileEvent::Left {
                    identity: identity.clone(),
                });
                self.detach_sinks(released).await;
                self.screen_share.remote_stopped(&identity);
            }
            RoomEvent::TrackSubscribed { identity, track } => {
                if track.kind == RemoteTrackKind::ScreenShare {
                    self.accept_remote_share(&identity).await;
                }
                let Some(room) = self.active.as_ref() else {
                    return;
                };
                let sink = match room.connection.attach(&track).await {
                    Ok(sink) => sink,
                    Err(e) => {
                        warn!(
                            target: "engine.room",
                            identity = %identity,
                            sid = %track.sid,
                            error = %e,
                            "Attach failed"
                        );
                        return;
                    }
                };
                let released = self.roster.apply(TileEvent::TrackAttached {
                    identity,
                    track,
                    sink,
                });
                self.detach_sinks(released).await;
            }
            RoomEvent::TrackUnsubscribed { identity, sid } => {
                let was_screen = self
                    .roster
                    .get(&identity)
                    .and_then(|t| t.screen.as_ref())
                    .is_some_and(|s| s.track.sid == sid);
                let released = self.roster.apply(TileEvent::TrackDetached {
                    identity: identity.clone(),
                    sid,
                });
                self.detach_sinks(released).await;
                if was_screen {
                    self.screen_share.remote_stopped(&identity);
                }
            }
            RoomEvent::TrackMuted {
                identity,
                sid,
                muted,
            } => {
                self.roster.apply(TileEvent::TrackMuted {
                    identity,
                    sid,
                    muted,
                });
            }
            RoomEvent::DataReceived(packet) => self.handle_packet(packet).await,
            RoomEvent::Disconnected { reason } => {
                warn!(target: "engine.room", reason = %reason, "Transport disconnected");
                self.teardown(LeaveReason::TransportLost).await;
            }
        }

        set_tiles_active(self.roster.len());
    }

    async fn detach_sinks(&self, sinks: Vec<SinkId>) {
        let Some(room) = self.active.as_ref() else {
            return;
        };
        for sink in sinks {
            room.connection.detach(sink).await;
        }
    }

    /// Stop displaying a remote participant's screen.
    async fn release_remote_screen(&mut self, identity: &ParticipantIdentity) {
        let Some(sid) = self
            .roster
            .get(identity)
            .and_then(|t| t.screen.as_ref())
            .map(|s| s.track.sid.clone())
        else {
            return;
        };
        let released = self.roster.apply(TileEvent::TrackDetached {
            identity: identity.clone(),
            sid,
        });
        self.detach_sinks(released).await;
    }

    /// A remote participant announced or published a screen share.
    async fn accept_remote_share(&mut self, sharer: &ParticipantIdentity) {
        if self.screen_share.is_local {
            info!(target: "engine.room", sharer = %sharer, "Local screen share pre-empted");
            self.stop_local_share().await;
            self.notices.push(Notice::ScreenSharePreempted);
            record_screen_share_preempted();
        }
        let outcome = self.screen_share.remote_started(sharer);
        if let Some(previous) = outcome.replaced_remote {
            self.release_remote_screen(&previous).await;
        }
    }

    /// Single dispatch point for inbound control messages.
    async fn handle_packet(&mut self, packet: InboundPacket) {
        let Some(sender) = packet.sender.clone() else {
            debug!(target: "engine.protocol", "Ignoring control message without sender");
            record_control_message_ignored("unknown_sender");
            return;
        };
        let message = match packet.decode() {
            Ok(message) => message,
            Err(e) => {
                debug!(
                    target: "engine.protocol",
                    sender = %sender,
                    reason = e.label(),
                    "Ignoring malformed control message"
                );
                record_control_message_ignored(e.label());
                return;
            }
        };
        record_control_message(message.kind().as_str());
        self.roster.apply(TileEvent::Seen {
            identity: sender.clone(),
        });

        match message {
            ControlMessage::HandRaise { raised } => {
                self.roster.apply(TileEvent::HandRaised {
                    identity: sender,
                    raised,
                });
            }
            ControlMessage::ChatMessage { text, timestamp } => {
                self.chat.push(ChatEntry {
                    display_name: sender.display_name(),
                    sender,
                    text,
                    timestamp,
                    is_local: false,
                });
            }
            ControlMessage::ScreenShare {
                sharing,
                sharer_identity,
            } => {
                if sharer_identity != sender {
                    debug!(
                        target: "engine.protocol",
                        sender = %sender,
                        sharer = %sharer_identity,
                        "Ignoring share announcement for another participant"
                    );
                    record_control_message_ignored("sharer_mismatch");
                    return;
                }
                if sharing {
                    self.accept_remote_share(&sender).await;
                } else {
                    self.screen_share.remote_stopped(&sender);
                }
            }
            ControlMessage::MuteParticipant { .. }
            | ControlMessage::UnmuteParticipant { .. }
            | ControlMessage::KickParticipant { .. } => {
                self.handle_moderation(&sender, &message).await;
            }
        }
    }

    async fn handle_moderation(&mut self, sender: &ParticipantIdentity, message: &ControlMessage) {
        let Some(target) = message.moderation_target() else {
            return;
        };
        let Some(local) = self.active.as_ref().map(|r| r.identity.clone()) else {
            return;
        };
        if *target != local {
            return;
        }
        if self.roster.role_of(sender) != Some(Role::Mentor) {
            warn!(
                target: "engine.protocol",
                sender = %sender,
                message_type = message.kind().as_str(),
                "Ignoring moderation from non-mentor"
            );
            record_control_message_ignored("unauthorized");
            return;
        }

        info!(
            target: "engine.room",
            mentor = %sender,
            message_type = message.kind().as_str(),
            "Moderated by mentor"
        );
        match message {
            ControlMessage::MuteParticipant { .. } => {
                if let Err(e) = self.set_microphone_enabled(false).await {
                    warn!(target: "engine.room", error = %e, "Mute by mentor failed");
                }
                self.notices.push(Notice::MutedByMentor);
            }
            ControlMessage::UnmuteParticipant { .. } => {
                self.notices.push(Notice::UnmuteAllowed);
            }
            ControlMessage::KickParticipant { .. } => {
                self.teardown(LeaveReason::Removed).await;
            }
            _ => {}
        }
    }

    // --- Snapshot ---------------------------------------------------------

    fn build_snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            state: self.state,
            leave_reason: self.leave_reason,
            room_name: self.room_name.clone(),
            local_identity: self.active.as_ref().map(|r| r.identity.clone()),
            role: self.role,
            tiles: self.roster.tiles().to_vec(),
            screen_share: self.screen_share.clone(),
            hand_raised: self.hand_raised,
            microphone_enabled: self.microphone_enabled,
            camera_enabled: self.camera_enabled,
            background: self.background.clone(),
            chat: self.chat.to_vec(),
            notices: self.notices.to_vec(),
        }
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(self.build_snapshot());
    }
}
