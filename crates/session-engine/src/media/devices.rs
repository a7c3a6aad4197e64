//! Platform media device layer.

use super::track::LocalTrack;
use crate::errors::SessionError;
use async_trait::async_trait;
use serde::Serialize;
use std::str::FromStr;

/// Kind of capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Microphone,
    Camera,
}

/// An enumerated capture device.
///
/// Labels are empty until the platform has granted access at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub kind: DeviceKind,
    pub label: String,
}

/// Camera capture constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Camera quality presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    Low,
    #[default]
    Standard,
    High,
}

impl VideoQuality {
    #[must_use]
    pub const fn constraints(self) -> VideoConstraints {
        match self {
            VideoQuality::Low => VideoConstraints {
                width: 320,
                height: 240,
                frame_rate: 15,
            },
            VideoQuality::Standard => VideoConstraints {
                width: 640,
                height: 480,
                frame_rate: 30,
            },
            VideoQuality::High => VideoConstraints {
                width: 1280,
                height: 720,
                frame_rate: 30,
            },
        }
    }
}

impl FromStr for VideoQuality {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(VideoQuality::Low),
            "standard" => Ok(VideoQuality::Standard),
            "high" => Ok(VideoQuality::High),
            _ => Err(()),
        }
    }
}

/// Capture device access.
///
/// Implementations map platform failures onto
/// [`SessionError::PermissionDenied`] and [`SessionError::DeviceUnavailable`].
/// A `None` device id selects the platform default. Acquisition futures
/// may be dropped before completing and must not leave a capture running.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// List capture devices.
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, SessionError>;

    async fn acquire_microphone(&self, device_id: Option<&str>)
        -> Result<LocalTrack, SessionError>;

    async fn acquire_camera(
        &self,
        device_id: Option<&str>,
        constraints: VideoConstraints,
    ) -> Result<LocalTrack, SessionError>;

    /// Ask the platform for a screen capture. The returned track ends when the
    /// user stops sharing from the platform UI.
    async fn capture_screen(&self) -> Result<LocalTrack, SessionError>;
}
