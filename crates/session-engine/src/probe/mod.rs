//! Pre-join device probe.
//!
//! The probe holds the camera and microphone while the user is in the lobby:
//! it shows a preview, lists alternate devices and meters the microphone.
//! Switching devices is always a full stop and restart. When the user joins,
//! [`DeviceProbe::handoff`] consumes the probe so the room session can
//! acquire the same devices without both holding them.

mod meter;

pub use meter::AudioLevelMeter;

use crate::config::DEFAULT_METER_WINDOW;
use crate::errors::SessionError;
use crate::media::{DeviceInfo, LocalTrack, MediaDevices, VideoConstraints, VideoQuality};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tracks currently shown in the lobby preview.
#[derive(Debug, Clone)]
pub struct PreviewStream {
    pub audio: LocalTrack,
    pub video: LocalTrack,
}

/// Device choice carried from the lobby into the room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSelection {
    pub audio_device_id: Option<String>,
    pub video_device_id: Option<String>,
    pub quality: VideoQuality,
}

/// Lobby-facing summary of the probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeStatus {
    pub previewing: bool,
    pub audio_level: u8,
    pub devices: Vec<DeviceInfo>,
    pub last_error: Option<SessionError>,
}

struct ActivePreview {
    stream: PreviewStream,
    meter_cancel: CancellationToken,
    meter_task: JoinHandle<()>,
}

impl ActivePreview {
    fn release(self) {
        self.meter_cancel.cancel();
        self.meter_task.abort();
        self.stream.audio.stop();
        self.stream.video.stop();
    }
}

/// Device probe.
pub struct DeviceProbe {
    devices: Arc<dyn MediaDevices>,
    meter_window: usize,
    selection: DeviceSelection,
    enumerated: Vec<DeviceInfo>,
    preview: Option<ActivePreview>,
    last_error: Option<SessionError>,
    level_tx: Arc<watch::Sender<u8>>,
}

impl DeviceProbe {
    #[must_use]
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self::with_meter_window(devices, DEFAULT_METER_WINDOW)
    }

    #[must_use]
    pub fn with_meter_window(devices: Arc<dyn MediaDevices>, meter_window: usize) -> Self {
        let (level_tx, _) = watch::channel(0);
        Self {
            devices,
            meter_window,
            selection: DeviceSelection::default(),
            enumerated: Vec::new(),
            preview: None,
            last_error: None,
            level_tx: Arc::new(level_tx),
        }
    }

    /// Start (or restart) the preview on the given devices.
    ///
    /// Any running preview is fully stopped first. Acquisition is all or
    /// nothing: if the camera fails after the microphone succeeded, the
    /// microphone is released before the error is returned.
    ///
    /// # Errors
    ///
    /// [`SessionError::PermissionDenied`] or [`SessionError::DeviceUnavailable`]
    /// from the platform.
    pub async fn start_preview(
        &mut self,
        audio_device_id: Option<&str>,
        video_device_id: Option<&str>,
    ) -> Result<PreviewStream, SessionError> {
        self.stop_preview();

        let constraints = self.selection.quality.constraints();
        let acquired = self.acquire(audio_device_id, video_device_id, constraints).await;
        let stream = match acquired {
            Ok(stream) => stream,
            Err(e) => {
                warn!(target: "engine.devices", error = %e, "Preview failed");
                self.last_error = Some(e.clone());
                return Err(e);
            }
        };
        self.last_error = None;

        self.selection.audio_device_id = stream
            .audio
            .device_id()
            .map(str::to_string)
            .or_else(|| audio_device_id.map(str::to_string));
        self.selection.video_device_id = stream
            .video
            .device_id()
            .map(str::to_string)
            .or_else(|| video_device_id.map(str::to_string));

        // Labels only populate after access was granted.
        match self.devices.enumerate().await {
            Ok(list) => self.enumerated = list,
            Err(e) => warn!(target: "engine.devices", error = %e, "Device enumeration failed"),
        }

        let meter_cancel = CancellationToken::new();
        let meter_task = tokio::spawn(run_meter(
            stream.audio.clone(),
            self.meter_window,
            Arc::clone(&self.level_tx),
            meter_cancel.clone(),
        ));

        info!(
            target: "engine.devices",
            audio = stream.audio.label(),
            video = stream.video.label(),
            devices = self.enumerated.len(),
            "Preview started"
        );

        self.preview = Some(ActivePreview {
            stream: stream.clone(),
            meter_cancel,
            meter_task,
        });
        Ok(stream)
    }

    async fn acquire(
        &self,
        audio_device_id: Option<&str>,
        video_device_id: Option<&str>,
        constraints: VideoConstraints,
    ) -> Result<PreviewStream, SessionError> {
        let audio = self.devices.acquire_microphone(audio_device_id).await?;
        match self.devices.acquire_camera(video_device_id, constraints).await {
            Ok(video) => Ok(PreviewStream { audio, video }),
            Err(e) => {
                audio.stop();
                Err(e)
            }
        }
    }

    /// Switch the microphone, keeping the current camera.
    ///
    /// # Errors
    ///
    /// See [`start_preview`](Self::start_preview).
    pub async fn select_microphone(
        &mut self,
        device_id: &str,
    ) -> Result<PreviewStream, SessionError> {
        let video = self.selection.video_device_id.clone();
        self.start_preview(Some(device_id), video.as_deref()).await
    }

    /// Switch the camera, keeping the current microphone.
    ///
    /// # Errors
    ///
    /// See [`start_preview`](Self::start_preview).
    pub async fn select_camera(&mut self, device_id: &str) -> Result<PreviewStream, SessionError> {
        let audio = self.selection.audio_device_id.clone();
        self.start_preview(audio.as_deref(), Some(device_id)).await
    }

    /// Capture quality used by the next preview and carried into the room.
    pub fn set_video_quality(&mut self, quality: VideoQuality) {
        self.selection.quality = quality;
    }

    /// Release every track and the meter. Idempotent.
    pub fn stop_preview(&mut self) {
        if let Some(preview) = self.preview.take() {
            preview.release();
            debug!(target: "engine.devices", "Preview stopped");
        }
        self.level_tx.send_replace(0);
    }

    #[must_use]
    pub fn is_previewing(&self) -> bool {
        self.preview.is_some()
    }

    /// Current microphone level in `0..=100`.
    #[must_use]
    pub fn audio_level(&self) -> u8 {
        *self.level_tx.borrow()
    }

    #[must_use]
    pub fn subscribe_audio_level(&self) -> watch::Receiver<u8> {
        self.level_tx.subscribe()
    }

    /// Devices from the last successful enumeration.
    #[must_use]
    pub fn devices(&self) -> &[DeviceInfo] {
        &self.enumerated
    }

    #[must_use]
    pub fn selection(&self) -> &DeviceSelection {
        &self.selection
    }

    #[must_use]
    pub fn status(&self) -> ProbeStatus {
        ProbeStatus {
            previewing: self.is_previewing(),
            audio_level: self.audio_level(),
            devices: self.enumerated.clone(),
            last_error: self.last_error.clone(),
        }
    }

    /// Release every device and hand the selection to the room session.
    #[must_use]
    pub fn handoff(mut self) -> DeviceSelection {
        self.stop_preview();
        std::mem::take(&mut self.selection)
    }
}

impl Drop for DeviceProbe {
    fn drop(&mut self) {
        if let Some(preview) = self.preview.take() {
            preview.release();
        }
    }
}

async fn run_meter(
    track: LocalTrack,
    window: usize,
    level_tx: Arc<watch::Sender<u8>>,
    cancel: CancellationToken,
) {
    let Some(mut samples) = track.audio_samples() else {
        return;
    };
    let ended = track.ended_token();
    let mut meter = AudioLevelMeter::new(window);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,
            () = ended.cancelled() => break,

            changed = samples.changed() => {
                if changed.is_err() {
                    break;
                }
                let chunk = samples.borrow_and_update().clone();
                if let Some(chunk) = chunk {
                    level_tx.send_replace(meter.level(&chunk.samples));
                }
            }
        }
    }

    if !cancel.is_cancelled() {
        level_tx.send_replace(0);
    }
}
