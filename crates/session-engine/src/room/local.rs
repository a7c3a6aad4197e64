//! Local media published into a room.
//!
//! Every failure path and every normal disconnect releases media through
//! [`LocalMedia::release`], so no error can leave a captured or published
//! track behind.

use crate::compositor::{BackgroundMode, Compositor, CompositorSettings, ImageLoader, Segmenter};
use crate::errors::SessionError;
use crate::media::{LocalTrack, MediaDevices};
use crate::observability::metrics::record_segmentation_fallback;
use crate::room::collaborators::SessionApi;
use crate::room::events::RoomEvent;
use crate::room::messages::JoinRequest;
use crate::room::snapshot::Notice;
use crate::room::transport::{Connected, PublicationId, RoomConnection, RoomTransport};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the compositor needs to start an effect.
#[derive(Clone)]
pub(crate) struct Effects {
    pub segmenter: Arc<Segmenter>,
    pub loader: Arc<dyn ImageLoader>,
    pub settings: CompositorSettings,
}

async fn unpublish_logged(connection: &dyn RoomConnection, publication: &PublicationId) {
    if let Err(e) = connection.unpublish(publication).await {
        warn!(target: "engine.room", publication = %publication, error = %e, "Unpublish failed");
    }
}

/// Published microphone.
pub(crate) struct MicrophoneSlot {
    pub track: LocalTrack,
    pub publication: PublicationId,
}

impl MicrophoneSlot {
    /// Publish `track`. On failure the track is stopped.
    pub(crate) async fn publish(
        track: LocalTrack,
        connection: &dyn RoomConnection,
    ) -> Result<Self, SessionError> {
        match connection.publish(&track).await {
            Ok(publication) => Ok(Self { track, publication }),
            Err(e) => {
                track.stop();
                Err(e)
            }
        }
    }

    pub(crate) async fn release(self, connection: &dyn RoomConnection) {
        unpublish_logged(connection, &self.publication).await;
        self.track.stop();
    }
}

/// Published screen capture.
pub(crate) struct ScreenSlot {
    pub track: LocalTrack,
    pub publication: PublicationId,
}

impl ScreenSlot {
    pub(crate) async fn release(self, connection: &dyn RoomConnection) {
        unpublish_logged(connection, &self.publication).await;
        self.track.stop();
    }
}

/// The track published for the camera.
pub(crate) enum Outbound {
    Raw(PublicationId),
    Composited {
        compositor: Compositor,
        publication: PublicationId,
    },
}

/// Raw camera plus whatever is published for it.
pub(crate) struct CameraPipeline {
    pub raw: LocalTrack,
    pub outbound: Outbound,
}

impl CameraPipeline {
    /// Publish `raw`, through a compositor when `mode` is an effect.
    ///
    /// An effect that cannot start degrades to publishing the raw camera and
    /// yields [`Notice::BackgroundUnavailable`]. On error `raw` is stopped.
    pub(crate) async fn start(
        raw: LocalTrack,
        mode: &BackgroundMode,
        effects: &Effects,
        connection: &dyn RoomConnection,
    ) -> Result<(Self, Option<Notice>), SessionError> {
        let mut notice = None;
        let compositor = if mode.is_effect() {
            match Compositor::start(
                mode.clone(),
                &raw,
                &effects.segmenter,
                effects.loader.as_ref(),
                effects.settings,
            )
            .await
            {
                Ok(compositor) => Some(compositor),
                Err(e) => {
                    warn!(
                        target: "engine.compositor",
                        mode = mode.as_str(),
                        error = %e,
                        "Background effect unavailable, publishing raw camera"
                    );
                    record_segmentation_fallback(e.label());
                    notice = Some(Notice::BackgroundUnavailable);
                    None
                }
            }
        } else {
            None
        };

        let published = match &compositor {
            Some(c) => connection.publish(c.output()).await,
            None => connection.publish(&raw).await,
        };
        let publication = match published {
            Ok(publication) => publication,
            Err(e) => {
                if let Some(c) = compositor {
                    c.stop().await;
                }
                raw.stop();
                return Err(e);
            }
        };

        let outbound = match compositor {
            Some(compositor) => Outbound::Composited {
                compositor,
                publication,
            },
            None => Outbound::Raw(publication),
        };
        Ok((Self { raw, outbound }, notice))
    }

    /// Background actually applied.
    pub(crate) fn mode(&self) -> BackgroundMode {
        match &self.outbound {
            Outbound::Raw(_) => BackgroundMode::None,
            Outbound::Composited { compositor, .. } => compositor.mode().clone(),
        }
    }

    pub(crate) fn publication(&self) -> &PublicationId {
        match &self.outbound {
            Outbound::Raw(publication) | Outbound::Composited { publication, .. } => publication,
        }
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.raw.set_enabled(enabled);
        if let Outbound::Composited { compositor, .. } = &self.outbound {
            compositor.output().set_enabled(enabled);
        }
    }

    /// Unpublish and stop any compositor, keeping the raw capture running.
    pub(crate) async fn stop_outbound(self, connection: &dyn RoomConnection) -> LocalTrack {
        match self.outbound {
            Outbound::Raw(publication) => unpublish_logged(connection, &publication).await,
            Outbound::Composited {
                compositor,
                publication,
            } => {
                unpublish_logged(connection, &publication).await;
                compositor.stop().await;
            }
        }
        self.raw
    }

    pub(crate) async fn release(self, connection: &dyn RoomConnection) {
        let raw = self.stop_outbound(connection).await;
        raw.stop();
    }
}

/// Everything the local participant has captured and published.
#[derive(Default)]
pub(crate) struct LocalMedia {
    pub microphone: Option<MicrophoneSlot>,
    pub camera: Option<CameraPipeline>,
    pub screen: Option<ScreenSlot>,
}

impl LocalMedia {
    /// Unpublish and stop everything. Idempotent.
    pub(crate) async fn release(&mut self, connection: &dyn RoomConnection) {
        if let Some(screen) = self.screen.take() {
            screen.release(connection).await;
        }
        if let Some(camera) = self.camera.take() {
            camera.release(connection).await;
        }
        if let Some(microphone) = self.microphone.take() {
            microphone.release(connection).await;
        }
    }

    /// Live local tracks, for capture-end watching.
    pub(crate) fn tracks(&self) -> Vec<LocalTrack> {
        self.microphone
            .iter()
            .map(|m| m.track.clone())
            .chain(self.camera.iter().map(|c| c.raw.clone()))
            .chain(self.screen.iter().map(|s| s.track.clone()))
            .collect()
    }
}

/// A connection with the local media already published on it.
pub(crate) struct ConnectedRoom {
    pub connection: Box<dyn RoomConnection>,
    pub events: mpsc::Receiver<RoomEvent>,
    pub media: LocalMedia,
    pub notices: Vec<Notice>,
}

impl ConnectedRoom {
    /// Release the media and close the connection.
    pub(crate) async fn discard(mut self) {
        self.media.release(self.connection.as_ref()).await;
        self.connection.disconnect().await;
    }
}

/// Collaborators a join attempt needs, cloned into the connect task.
#[derive(Clone)]
pub(crate) struct JoinContext {
    pub transport: Arc<dyn RoomTransport>,
    pub session_api: Arc<dyn SessionApi>,
    pub devices: Arc<dyn MediaDevices>,
    pub effects: Effects,
    pub transport_url: String,
}

/// Run one join step unless the attempt is cancelled first.
///
/// The step is dropped on cancellation, so it must not hold anything that
/// needs releasing across its own await points.
async fn unless_cancelled<T>(
    cancel: &CancellationToken,
    step: impl Future<Output = Result<T, SessionError>>,
) -> Result<T, SessionError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SessionError::Superseded),
        result = step => result,
    }
}

/// Fetch a credential, connect and publish microphone and camera.
///
/// Runs outside the actor. On error everything acquired so far has been
/// released and the connection closed. Once `cancel` fires no further device
/// is acquired and the attempt fails with [`SessionError::Superseded`].
pub(crate) async fn connect_and_publish(
    context: JoinContext,
    request: JoinRequest,
    cancel: CancellationToken,
) -> Result<ConnectedRoom, SessionError> {
    let token = unless_cancelled(
        &cancel,
        context
            .session_api
            .get_join_credential(&request.room_name, request.role.can_moderate()),
    )
    .await?;

    let Connected { connection, events } = unless_cancelled(
        &cancel,
        context.transport.connect(&context.transport_url, &token),
    )
    .await?;
    debug!(
        target: "engine.room",
        identity = %connection.local_identity(),
        "Transport connected"
    );

    let mut room = ConnectedRoom {
        connection,
        events,
        media: LocalMedia::default(),
        notices: Vec::new(),
    };

    if let Err(e) = publish_local_media(&mut room, &context, &request, &cancel).await {
        info!(target: "engine.room", error = %e, "Publishing local media failed, releasing");
        room.discard().await;
        return Err(e);
    }
    Ok(room)
}

async fn publish_local_media(
    room: &mut ConnectedRoom,
    context: &JoinContext,
    request: &JoinRequest,
    cancel: &CancellationToken,
) -> Result<(), SessionError> {
    let selection = &request.devices;
    let connection = room.connection.as_ref();

    let microphone = unless_cancelled(
        cancel,
        context
            .devices
            .acquire_microphone(selection.audio_device_id.as_deref()),
    )
    .await?;
    let held = microphone.clone();
    match unless_cancelled(cancel, MicrophoneSlot::publish(microphone, connection)).await {
        Ok(slot) => room.media.microphone = Some(slot),
        Err(e) => {
            held.stop();
            return Err(e);
        }
    }

    let camera = unless_cancelled(
        cancel,
        context.devices.acquire_camera(
            selection.video_device_id.as_deref(),
            selection.quality.constraints(),
        ),
    )
    .await?;
    let held = camera.clone();
    let started = unless_cancelled(
        cancel,
        CameraPipeline::start(camera, &request.background, &context.effects, connection),
    )
    .await;
    match started {
        Ok((pipeline, notice)) => {
            room.media.camera = Some(pipeline);
            room.notices.extend(notice);
            Ok(())
        }
        Err(e) => {
            held.stop();
            Err(e)
        }
    }
}
