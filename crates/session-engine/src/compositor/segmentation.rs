//! Person segmentation seam.

use crate::errors::SessionError;
use crate::media::VideoFrame;
use async_trait::async_trait;
use image::GrayImage;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// A segmentation model.
///
/// `infer` returns per-pixel foreground confidence in `0..=255`. The mask may
/// be smaller than the frame; the compositor resamples it.
#[async_trait]
pub trait SegmentationService: Send + Sync {
    async fn load_model(&self) -> Result<(), SessionError>;

    async fn infer(&self, frame: &VideoFrame) -> Result<GrayImage, SessionError>;
}

/// Lazily initialised segmentation model shared across compositor restarts.
///
/// The model loads on the first background switch and is reused afterwards.
/// A failed load leaves the cell empty so a later switch tries again.
pub struct Segmenter {
    service: Arc<dyn SegmentationService>,
    loaded: OnceCell<()>,
}

impl Segmenter {
    #[must_use]
    pub fn new(service: Arc<dyn SegmentationService>) -> Self {
        Self {
            service,
            loaded: OnceCell::new(),
        }
    }

    /// Load the model unless already loaded.
    ///
    /// # Errors
    ///
    /// [`SessionError::SegmentationInitFailed`] if the model cannot be loaded.
    pub async fn ensure_loaded(&self) -> Result<(), SessionError> {
        self.loaded
            .get_or_try_init(|| async {
                match self.service.load_model().await {
                    Ok(()) => {
                        info!(target: "engine.compositor", "Segmentation model loaded");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(target: "engine.compositor", error = %e, "Segmentation model failed to load");
                        Err(match e {
                            SessionError::SegmentationInitFailed(_) => e,
                            other => SessionError::SegmentationInitFailed(other.to_string()),
                        })
                    }
                }
            })
            .await
            .map(|_| ())
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }

    /// Run one inference.
    ///
    /// # Errors
    ///
    /// Propagates the service error.
    pub async fn infer(&self, frame: &VideoFrame) -> Result<GrayImage, SessionError> {
        self.service.infer(frame).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingService {
        loads: AtomicU32,
        fail_first: bool,
    }

    #[async_trait]
    impl SegmentationService for CountingService {
        async fn load_model(&self) -> Result<(), SessionError> {
            let attempt = self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && attempt == 0 {
                return Err(SessionError::Internal("wasm backend missing".to_string()));
            }
            Ok(())
        }

        async fn infer(&self, frame: &VideoFrame) -> Result<GrayImage, SessionError> {
            let (w, h) = frame.dimensions();
            Ok(GrayImage::new(w, h))
        }
    }

    #[tokio::test]
    async fn test_model_loads_once() {
        let service = Arc::new(CountingService {
            loads: AtomicU32::new(0),
            fail_first: false,
        });
        let segmenter = Segmenter::new(service.clone());

        segmenter.ensure_loaded().await.unwrap();
        segmenter.ensure_loaded().await.unwrap();
        assert!(segmenter.is_loaded());
        assert_eq!(service.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_retried_later() {
        let service = Arc::new(CountingService {
            loads: AtomicU32::new(0),
            fail_first: true,
        });
        let segmenter = Segmenter::new(service.clone());

        let err = segmenter.ensure_loaded().await.unwrap_err();
        assert!(matches!(err, SessionError::SegmentationInitFailed(_)));
        assert!(!segmenter.is_loaded());

        segmenter.ensure_loaded().await.unwrap();
        assert_eq!(service.loads.load(Ordering::SeqCst), 2);
    }
}
