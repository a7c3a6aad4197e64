//! Background compositor.
//!
//! Turns a raw camera track into a synthetic track with the background
//! blurred or replaced. Each running compositor owns one render loop and one
//! output track; a mode switch is `stop()` on the old compositor followed by
//! `start()` of a new one, never an in-place change.
//!
//! The render loop never waits for inference. At most one segmentation
//! request is in flight; frames are composited with the latest finished mask
//! and pass through untouched until the first mask arrives.

mod background;
mod render;
mod segmentation;

pub use background::{FileImageLoader, ImageLoader};
pub use render::{blur_background, composite, fit_cover};
pub use segmentation::{SegmentationService, Segmenter};

use crate::config::{DEFAULT_BLUR_SIGMA, DEFAULT_COMPOSITOR_FPS};
use crate::errors::SessionError;
use crate::media::{LocalTrack, VideoFrame};
use crate::observability::metrics::record_compositor_frame;
use image::{GrayImage, RgbaImage};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Background effect applied to the outgoing camera.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "mode", content = "url", rename_all = "lowercase")]
pub enum BackgroundMode {
    #[default]
    None,
    Blur,
    Image(String),
}

impl BackgroundMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            BackgroundMode::None => "none",
            BackgroundMode::Blur => "blur",
            BackgroundMode::Image(_) => "image",
        }
    }

    /// Whether this mode needs a compositor.
    #[must_use]
    pub const fn is_effect(&self) -> bool {
        !matches!(self, BackgroundMode::None)
    }
}

/// Render settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositorSettings {
    pub fps: u32,
    pub blur_sigma: f32,
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self {
            fps: DEFAULT_COMPOSITOR_FPS,
            blur_sigma: DEFAULT_BLUR_SIGMA,
        }
    }
}

/// Frame counters for one compositor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositorCounters {
    pub composited: u64,
    pub passthrough: u64,
    pub inferences: u64,
}

#[derive(Debug, Default)]
struct Stats {
    composited: AtomicU64,
    passthrough: AtomicU64,
    inferences: AtomicU64,
}

enum Layer {
    Blur { sigma: f32 },
    Image(Arc<RgbaImage>),
}

/// A running background compositor.
pub struct Compositor {
    mode: BackgroundMode,
    output: LocalTrack,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    stats: Arc<Stats>,
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("mode", &self.mode)
            .field("output", &self.output.id())
            .field("running", &self.task.is_some())
            .finish_non_exhaustive()
    }
}

impl Compositor {
    /// Start compositing `raw` with the given effect.
    ///
    /// Loads the segmentation model on first use and the background image
    /// for [`BackgroundMode::Image`]. On error nothing is left running.
    ///
    /// # Errors
    ///
    /// - [`SessionError::SegmentationInitFailed`] if the model cannot load
    /// - [`SessionError::BackgroundLoadFailed`] if the image cannot load
    /// - [`SessionError::Internal`] for `BackgroundMode::None` or a non-video input
    pub async fn start(
        mode: BackgroundMode,
        raw: &LocalTrack,
        segmenter: &Arc<Segmenter>,
        loader: &dyn ImageLoader,
        settings: CompositorSettings,
    ) -> Result<Self, SessionError> {
        let Some(frames) = raw.video_frames() else {
            return Err(SessionError::Internal(
                "compositor input is not a video track".to_string(),
            ));
        };

        if !mode.is_effect() {
            return Err(SessionError::Internal(
                "compositor started without an effect".to_string(),
            ));
        }
        segmenter.ensure_loaded().await?;

        let layer = match &mode {
            BackgroundMode::Image(url) => Layer::Image(Arc::new(loader.load(url).await?)),
            BackgroundMode::Blur | BackgroundMode::None => Layer::Blur {
                sigma: settings.blur_sigma,
            },
        };

        let (output, out_tx) =
            LocalTrack::synthetic_video(format!("{} ({})", raw.label(), mode.as_str()));
        let cancel = CancellationToken::new();
        let stats = Arc::new(Stats::default());

        let render = RenderLoop {
            frames,
            raw_ended: raw.ended_token(),
            layer,
            segmenter: Arc::clone(segmenter),
            out_tx,
            cancel: cancel.clone(),
            frame_interval: Duration::from_secs(1) / settings.fps.max(1),
            stats: Arc::clone(&stats),
        };
        let task = tokio::spawn(render.run(mode.as_str()));

        info!(
            target: "engine.compositor",
            mode = mode.as_str(),
            output = %output.id(),
            fps = settings.fps,
            "Compositor started"
        );

        Ok(Self {
            mode,
            output,
            cancel,
            task: Some(task),
            stats,
        })
    }

    #[must_use]
    pub fn mode(&self) -> &BackgroundMode {
        &self.mode
    }

    /// The synthetic track to publish in place of the raw camera.
    #[must_use]
    pub fn output(&self) -> &LocalTrack {
        &self.output
    }

    #[must_use]
    pub fn counters(&self) -> CompositorCounters {
        CompositorCounters {
            composited: self.stats.composited.load(Ordering::Relaxed),
            passthrough: self.stats.passthrough.load(Ordering::Relaxed),
            inferences: self.stats.inferences.load(Ordering::Relaxed),
        }
    }

    /// Stop the render loop and release the output track.
    ///
    /// Returns once the loop has exited, so no frame is emitted afterwards.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!(target: "engine.compositor", "Render loop panicked");
                }
            }
        }
        self.output.stop();
        debug!(target: "engine.compositor", mode = self.mode.as_str(), "Compositor stopped");
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.output.stop();
    }
}

struct RenderLoop {
    frames: watch::Receiver<Option<VideoFrame>>,
    raw_ended: CancellationToken,
    layer: Layer,
    segmenter: Arc<Segmenter>,
    out_tx: watch::Sender<Option<VideoFrame>>,
    cancel: CancellationToken,
    frame_interval: Duration,
    stats: Arc<Stats>,
}

type Inference = JoinHandle<Result<GrayImage, SessionError>>;

impl RenderLoop {
    #[instrument(skip_all, name = "engine.compositor.render", fields(mode = mode))]
    async fn run(self, mode: &'static str) {
        let RenderLoop {
            frames,
            raw_ended,
            layer,
            segmenter,
            out_tx,
            cancel,
            frame_interval,
            stats,
        } = self;

        let layer = Arc::new(layer);
        let mut interval = tokio::time::interval(frame_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut inference: Option<Inference> = None;
        let mut latest_mask: Option<Arc<GrayImage>> = None;
        let mut last_submitted: Option<u64> = None;
        let mut fitted: Option<Arc<RgbaImage>> = None;

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                () = raw_ended.cancelled() => {
                    debug!(target: "engine.compositor", "Input track ended");
                    break;
                }
                _ = interval.tick() => {}
            }

            let Some(frame) = frames.borrow().clone() else {
                continue;
            };

            // Collect a finished inference without waiting on a pending one.
            if inference.as_ref().is_some_and(JoinHandle::is_finished) {
                if let Some(done) = inference.take() {
                    match done.await {
                        Ok(Ok(mask)) => latest_mask = Some(Arc::new(mask)),
                        Ok(Err(e)) => debug!(target: "engine.compositor", error = %e, "Inference failed"),
                        Err(e) => warn!(target: "engine.compositor", error = %e, "Inference task failed"),
                    }
                }
            }

            if inference.is_none() && last_submitted != Some(frame.timestamp_us) {
                let segmenter = Arc::clone(&segmenter);
                let input = frame.clone();
                last_submitted = Some(frame.timestamp_us);
                stats.inferences.fetch_add(1, Ordering::Relaxed);
                inference = Some(tokio::spawn(async move { segmenter.infer(&input).await }));
            }

            let Some(mask) = latest_mask.clone() else {
                out_tx.send_replace(Some(frame));
                stats.passthrough.fetch_add(1, Ordering::Relaxed);
                record_compositor_frame(true);
                continue;
            };

            let (width, height) = frame.dimensions();
            let background = match layer.as_ref() {
                Layer::Blur { .. } => None,
                Layer::Image(source) => {
                    let stale = fitted
                        .as_ref()
                        .map_or(true, |bg| bg.dimensions() != (width, height));
                    if stale {
                        let source = Arc::clone(source);
                        match tokio::task::spawn_blocking(move || fit_cover(&source, width, height)).await {
                            Ok(bg) => fitted = Some(Arc::new(bg)),
                            Err(e) => {
                                warn!(target: "engine.compositor", error = %e, "Background fit failed");
                                continue;
                            }
                        }
                    }
                    fitted.clone()
                }
            };

            let layer_ref = Arc::clone(&layer);
            let raw = Arc::clone(&frame.image);
            let rendered = tokio::task::spawn_blocking(move || match (layer_ref.as_ref(), background) {
                (Layer::Blur { sigma }, _) => composite(&raw, &blur_background(&raw, *sigma), &mask),
                (Layer::Image(_), Some(bg)) => composite(&raw, &bg, &mask),
                (Layer::Image(_), None) => raw.as_ref().clone(),
            })
            .await;

            if cancel.is_cancelled() {
                break;
            }
            match rendered {
                Ok(image) => {
                    out_tx.send_replace(Some(VideoFrame::new(image, frame.timestamp_us)));
                    stats.composited.fetch_add(1, Ordering::Relaxed);
                    record_compositor_frame(false);
                }
                Err(e) => warn!(target: "engine.compositor", error = %e, "Composite task failed"),
            }
        }

        if let Some(pending) = inference.take() {
            pending.abort();
        }
        debug!(target: "engine.compositor", "Render loop exited");
    }
}
