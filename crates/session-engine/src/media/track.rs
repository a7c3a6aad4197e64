//! Local media track handles.
//!
//! A [`LocalTrack`] is a cheap clonable handle over shared state. Whoever
//! captured the track owns it and is the only one expected to call
//! [`LocalTrack::stop`]; clones exist so transports and pipelines can read
//! frames and observe the end of the track.

use common::types::TrackId;
use image::RgbaImage;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// What a track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
    Screen,
}

impl TrackKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
            TrackKind::Screen => "screen",
        }
    }
}

/// One decoded video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: Arc<RgbaImage>,
    /// Capture time in microseconds, monotonic per track.
    pub timestamp_us: u64,
}

impl VideoFrame {
    #[must_use]
    pub fn new(image: RgbaImage, timestamp_us: u64) -> Self {
        Self {
            image: Arc::new(image),
            timestamp_us,
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// A block of mono PCM samples in `-1.0..=1.0`.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

impl AudioChunk {
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }
}

#[derive(Debug)]
struct TrackState {
    live: AtomicBool,
    enabled: AtomicBool,
    ended: CancellationToken,
}

#[derive(Clone)]
enum TrackFeed {
    Audio(watch::Receiver<Option<AudioChunk>>),
    Video(watch::Receiver<Option<VideoFrame>>),
}

/// Handle to a captured or synthetic local track.
#[derive(Clone)]
pub struct LocalTrack {
    id: TrackId,
    kind: TrackKind,
    label: String,
    device_id: Option<String>,
    synthetic: bool,
    state: Arc<TrackState>,
    feed: TrackFeed,
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("device_id", &self.device_id)
            .field("synthetic", &self.synthetic)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

impl LocalTrack {
    fn with_feed(
        kind: TrackKind,
        label: String,
        device_id: Option<String>,
        synthetic: bool,
        feed: TrackFeed,
    ) -> Self {
        Self {
            id: TrackId::new(),
            kind,
            label,
            device_id,
            synthetic,
            state: Arc::new(TrackState {
                live: AtomicBool::new(true),
                enabled: AtomicBool::new(true),
                ended: CancellationToken::new(),
            }),
            feed,
        }
    }

    /// Wrap a microphone feed.
    #[must_use]
    pub fn audio(
        label: impl Into<String>,
        device_id: Option<String>,
        samples: watch::Receiver<Option<AudioChunk>>,
    ) -> Self {
        Self::with_feed(
            TrackKind::Audio,
            label.into(),
            device_id,
            false,
            TrackFeed::Audio(samples),
        )
    }

    /// Wrap a camera or screen feed. `kind` must not be [`TrackKind::Audio`].
    #[must_use]
    pub fn video(
        kind: TrackKind,
        label: impl Into<String>,
        device_id: Option<String>,
        frames: watch::Receiver<Option<VideoFrame>>,
    ) -> Self {
        let kind = if kind == TrackKind::Audio {
            TrackKind::Video
        } else {
            kind
        };
        Self::with_feed(kind, label.into(), device_id, false, TrackFeed::Video(frames))
    }

    /// Create a synthetic video track and the sender that feeds it.
    #[must_use]
    pub fn synthetic_video(label: impl Into<String>) -> (Self, watch::Sender<Option<VideoFrame>>) {
        let (tx, rx) = watch::channel(None);
        let track = Self::with_feed(
            TrackKind::Video,
            label.into(),
            None,
            true,
            TrackFeed::Video(rx),
        );
        (track, tx)
    }

    #[must_use]
    pub fn id(&self) -> TrackId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Whether this track is produced by the engine rather than a device.
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state.live.load(Ordering::Acquire)
    }

    /// Mute state as seen by the transport. Disabled tracks stay live.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.enabled.store(enabled, Ordering::Release);
    }

    /// Stop the track and release the device. Idempotent.
    pub fn stop(&self) {
        if self.state.live.swap(false, Ordering::AcqRel) {
            self.state.ended.cancel();
        }
    }

    /// Fires once the track has ended, by [`stop`](Self::stop) or by the platform.
    #[must_use]
    pub fn ended_token(&self) -> CancellationToken {
        self.state.ended.clone()
    }

    /// Video frames, if this is a video or screen track.
    #[must_use]
    pub fn video_frames(&self) -> Option<watch::Receiver<Option<VideoFrame>>> {
        match &self.feed {
            TrackFeed::Video(rx) => Some(rx.clone()),
            TrackFeed::Audio(_) => None,
        }
    }

    /// Audio samples, if this is an audio track.
    #[must_use]
    pub fn audio_samples(&self) -> Option<watch::Receiver<Option<AudioChunk>>> {
        match &self.feed {
            TrackFeed::Audio(rx) => Some(rx.clone()),
            TrackFeed::Video(_) => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_idempotent_and_shared_across_clones() {
        let (_tx, rx) = watch::channel(None);
        let track = LocalTrack::audio("Built-in Mic", Some("mic-1".to_string()), rx);
        let clone = track.clone();
        let ended = track.ended_token();

        assert!(clone.is_live());
        track.stop();
        track.stop();
        assert!(!clone.is_live());
        assert!(ended.is_cancelled());
    }

    #[test]
    fn test_enabled_does_not_affect_liveness() {
        let (track, _tx) = LocalTrack::synthetic_video("background");
        track.set_enabled(false);
        assert!(track.is_live());
        assert!(!track.is_enabled());
        assert!(track.is_synthetic());
    }

    #[test]
    fn test_feeds_match_kind() {
        let (_tx, rx) = watch::channel(None);
        let camera = LocalTrack::video(TrackKind::Video, "Cam", None, rx);
        assert!(camera.video_frames().is_some());
        assert!(camera.audio_samples().is_none());

        let (_tx, rx) = watch::channel(None);
        let mic = LocalTrack::audio("Mic", None, rx);
        assert!(mic.audio_samples().is_some());
        assert!(mic.video_frames().is_none());
        assert_eq!(mic.kind().as_str(), "audio");
    }

    #[test]
    fn test_synthetic_track_receives_frames() {
        let (track, tx) = LocalTrack::synthetic_video("blur");
        let rx = track.video_frames().unwrap();
        tx.send_replace(Some(VideoFrame::new(RgbaImage::new(4, 2), 7)));
        let frame = rx.borrow().clone().unwrap();
        assert_eq!(frame.dimensions(), (4, 2));
        assert_eq!(frame.timestamp_us, 7);
    }
}
