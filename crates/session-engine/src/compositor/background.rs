//! Background image loading.

use crate::errors::SessionError;
use async_trait::async_trait;
use image::RgbaImage;
use std::path::PathBuf;
use tracing::debug;

/// Loads a background image by URL.
#[async_trait]
pub trait ImageLoader: Send + Sync {
    /// # Errors
    ///
    /// [`SessionError::BackgroundLoadFailed`] if the image cannot be read or decoded.
    async fn load(&self, url: &str) -> Result<RgbaImage, SessionError>;
}

/// Reads local paths and `file://` URLs with the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileImageLoader;

fn local_path(url: &str) -> Result<PathBuf, SessionError> {
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if url.contains("://") {
        return Err(SessionError::BackgroundLoadFailed(format!(
            "unsupported URL scheme: {url}"
        )));
    }
    Ok(PathBuf::from(url))
}

#[async_trait]
impl ImageLoader for FileImageLoader {
    async fn load(&self, url: &str) -> Result<RgbaImage, SessionError> {
        let path = local_path(url)?;
        debug!(target: "engine.compositor", path = %path.display(), "Loading background image");

        tokio::task::spawn_blocking(move || image::open(&path).map(|img| img.to_rgba8()))
            .await
            .map_err(|e| SessionError::Internal(format!("image decode task failed: {e}")))?
            .map_err(|e| SessionError::BackgroundLoadFailed(e.to_string()))
    }
}
