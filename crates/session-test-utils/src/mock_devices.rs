//! Capture devices backed by watch channels.
//!
//! Every acquired track is recorded, so tests can assert that the engine
//! released what it captured. Senders stay alive for the lifetime of the
//! mock; frames and samples can be pushed into the latest track of a kind.

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use session_engine::errors::SessionError;
use session_engine::media::{
    AudioChunk, DeviceInfo, DeviceKind, LocalTrack, MediaDevices, TrackKind, VideoConstraints,
    VideoFrame,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Mock capture devices.
#[derive(Debug, Clone)]
pub struct MockDevices {
    inner: Arc<Mutex<DevicesInner>>,
}

#[derive(Debug)]
struct DevicesInner {
    devices: Vec<DeviceInfo>,
    microphone_error: Option<SessionError>,
    camera_error: Option<SessionError>,
    screen_error: Option<SessionError>,
    camera_delay: Option<Duration>,
    acquired: Vec<LocalTrack>,
    camera_requests: Vec<(Option<String>, VideoConstraints)>,
    audio_feeds: Vec<watch::Sender<Option<AudioChunk>>>,
    video_feeds: Vec<(TrackKind, watch::Sender<Option<VideoFrame>>)>,
}

impl Default for MockDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevices {
    /// One microphone and one camera, both granted.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DevicesInner {
                devices: vec![
                    DeviceInfo {
                        device_id: "mic-1".to_string(),
                        kind: DeviceKind::Microphone,
                        label: "Built-in Microphone".to_string(),
                    },
                    DeviceInfo {
                        device_id: "cam-1".to_string(),
                        kind: DeviceKind::Camera,
                        label: "FaceTime HD Camera".to_string(),
                    },
                ],
                microphone_error: None,
                camera_error: None,
                screen_error: None,
                camera_delay: None,
                acquired: Vec::new(),
                camera_requests: Vec::new(),
                audio_feeds: Vec::new(),
                video_feeds: Vec::new(),
            })),
        }
    }

    /// Hold every camera request for `delay`, like a pending permission prompt.
    #[must_use]
    pub fn with_camera_delay(self, delay: Duration) -> Self {
        self.inner.lock().unwrap().camera_delay = Some(delay);
        self
    }

    /// Add an enumerated device.
    #[must_use]
    pub fn with_device(self, kind: DeviceKind, device_id: &str, label: &str) -> Self {
        self.inner.lock().unwrap().devices.push(DeviceInfo {
            device_id: device_id.to_string(),
            kind,
            label: label.to_string(),
        });
        self
    }

    /// Fail microphone acquisition until cleared.
    pub fn fail_microphone(&self, error: Option<SessionError>) {
        self.inner.lock().unwrap().microphone_error = error;
    }

    /// Fail camera acquisition until cleared.
    pub fn fail_camera(&self, error: Option<SessionError>) {
        self.inner.lock().unwrap().camera_error = error;
    }

    /// Fail screen capture until cleared.
    pub fn fail_screen(&self, error: Option<SessionError>) {
        self.inner.lock().unwrap().screen_error = error;
    }

    /// Every track handed out, in order.
    pub fn acquired(&self) -> Vec<LocalTrack> {
        self.inner.lock().unwrap().acquired.clone()
    }

    /// Acquired tracks that are still running.
    pub fn live_tracks(&self) -> Vec<LocalTrack> {
        self.acquired().into_iter().filter(LocalTrack::is_live).collect()
    }

    /// Live tracks of one kind.
    pub fn live_of_kind(&self, kind: TrackKind) -> Vec<LocalTrack> {
        self.live_tracks()
            .into_iter()
            .filter(|t| t.kind() == kind)
            .collect()
    }

    /// Device ids and constraints requested for the camera.
    pub fn camera_requests(&self) -> Vec<(Option<String>, VideoConstraints)> {
        self.inner.lock().unwrap().camera_requests.clone()
    }

    /// End the newest live track of `kind`, as unplugging the device or the
    /// platform "stop sharing" button would.
    pub fn end_capture(&self, kind: TrackKind) -> bool {
        match self.live_of_kind(kind).last() {
            Some(track) => {
                track.stop();
                true
            }
            None => false,
        }
    }

    /// Push samples into every microphone feed.
    pub fn push_audio(&self, samples: Vec<f32>, sample_rate: u32) {
        let chunk = AudioChunk::new(samples, sample_rate);
        let inner = self.inner.lock().unwrap();
        for feed in &inner.audio_feeds {
            feed.send_replace(Some(chunk.clone()));
        }
    }

    /// Push a solid frame into every camera feed.
    pub fn push_camera_frame(&self, width: u32, height: u32, timestamp_us: u64) {
        let frame = VideoFrame::new(
            RgbaImage::from_pixel(width, height, Rgba([200, 120, 80, 255])),
            timestamp_us,
        );
        let inner = self.inner.lock().unwrap();
        for (kind, feed) in &inner.video_feeds {
            if *kind == TrackKind::Video {
                feed.send_replace(Some(frame.clone()));
            }
        }
    }

    fn record(&self, track: &LocalTrack) {
        self.inner.lock().unwrap().acquired.push(track.clone());
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, SessionError> {
        Ok(self.inner.lock().unwrap().devices.clone())
    }

    async fn acquire_microphone(
        &self,
        device_id: Option<&str>,
    ) -> Result<LocalTrack, SessionError> {
        let track = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(e) = inner.microphone_error.clone() {
                return Err(e);
            }
            let (tx, rx) = watch::channel(None);
            inner.audio_feeds.push(tx);
            let id = device_id.unwrap_or("mic-1").to_string();
            LocalTrack::audio(format!("Microphone {id}"), Some(id), rx)
        };
        self.record(&track);
        Ok(track)
    }

    async fn acquire_camera(
        &self,
        device_id: Option<&str>,
        constraints: VideoConstraints,
    ) -> Result<LocalTrack, SessionError> {
        let delay = self.inner.lock().unwrap().camera_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let track = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .camera_requests
                .push((device_id.map(str::to_string), constraints));
            if let Some(e) = inner.camera_error.clone() {
                return Err(e);
            }
            let (tx, rx) = watch::channel(None);
            inner.video_feeds.push((TrackKind::Video, tx));
            let id = device_id.unwrap_or("cam-1").to_string();
            LocalTrack::video(TrackKind::Video, format!("Camera {id}"), Some(id), rx)
        };
        self.record(&track);
        Ok(track)
    }

    async fn capture_screen(&self) -> Result<LocalTrack, SessionError> {
        let track = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(e) = inner.screen_error.clone() {
                return Err(e);
            }
            let (tx, rx) = watch::channel(None);
            inner.video_feeds.push((TrackKind::Screen, tx));
            LocalTrack::video(TrackKind::Screen, "Entire Screen", None, rx)
        };
        self.record(&track);
        Ok(track)
    }
}
