//! Session engine error types.
//!
//! Every error is recoverable: the worst outcome is "not joined", and the
//! caller may retry. Transport and device details are logged but never shown
//! to the user; [`SessionError::user_message`] is the presentable form.

use thiserror::Error;

/// Session engine error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The user or platform refused access to a capture device.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The requested device is missing, busy or failed to start.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The transport handshake failed.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Publishing a local track failed.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// The segmentation model could not be loaded.
    #[error("Segmentation init failed: {0}")]
    SegmentationInitFailed(String),

    /// The background image could not be loaded or decoded.
    #[error("Background image unavailable: {0}")]
    BackgroundLoadFailed(String),

    /// A capture ended underneath us (device unplugged, sharing stopped).
    #[error("Capture ended: {0}")]
    CaptureEnded(String),

    /// The session record API failed (create/end session, join credential).
    #[error("Session API error: {0}")]
    Credential(String),

    /// An activation is already in flight; re-entrant calls are rejected.
    #[error("Operation already in progress")]
    AlreadyInProgress,

    /// A newer join attempt or a leave invalidated this join.
    #[error("Join superseded by a newer request")]
    Superseded,

    /// The operation requires an active room connection.
    #[error("Not connected to a room")]
    NotConnected,

    /// The local participant's role does not allow this action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Internal failure (actor mailbox closed, task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Whether retrying the same operation can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::PermissionDenied(_)
            | SessionError::DeviceUnavailable(_)
            | SessionError::ConnectFailed(_)
            | SessionError::PublishFailed(_)
            | SessionError::SegmentationInitFailed(_)
            | SessionError::BackgroundLoadFailed(_)
            | SessionError::CaptureEnded(_)
            | SessionError::Credential(_)
            | SessionError::AlreadyInProgress
            | SessionError::Superseded
            | SessionError::NotConnected
            | SessionError::Internal(_) => true,
            SessionError::Forbidden(_) => false,
        }
    }

    /// Bounded label for metrics and structured logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            SessionError::PermissionDenied(_) => "permission_denied",
            SessionError::DeviceUnavailable(_) => "device_unavailable",
            SessionError::ConnectFailed(_) => "connect_failed",
            SessionError::PublishFailed(_) => "publish_failed",
            SessionError::SegmentationInitFailed(_) => "segmentation_init_failed",
            SessionError::BackgroundLoadFailed(_) => "background_load_failed",
            SessionError::CaptureEnded(_) => "capture_ended",
            SessionError::Credential(_) => "credential",
            SessionError::AlreadyInProgress => "already_in_progress",
            SessionError::Superseded => "superseded",
            SessionError::NotConnected => "not_connected",
            SessionError::Forbidden(_) => "forbidden",
            SessionError::Internal(_) => "internal",
        }
    }

    /// Returns a user-facing message (no internal details).
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            SessionError::PermissionDenied(_) => {
                "Camera or microphone access was blocked. Allow access and try again.".to_string()
            }
            SessionError::DeviceUnavailable(_) => {
                "The selected device is not available. Pick another device or retry.".to_string()
            }
            SessionError::ConnectFailed(_) | SessionError::Credential(_) => {
                "Could not connect to the classroom. Please try again.".to_string()
            }
            SessionError::PublishFailed(_) => {
                "Your audio or video could not be shared. Please rejoin.".to_string()
            }
            SessionError::SegmentationInitFailed(_) | SessionError::BackgroundLoadFailed(_) => {
                "Background effects are unavailable right now.".to_string()
            }
            SessionError::CaptureEnded(_) => "Capture stopped.".to_string(),
            SessionError::AlreadyInProgress => "Please wait, already starting.".to_string(),
            SessionError::Superseded => "A newer join request replaced this one.".to_string(),
            SessionError::NotConnected => "You are not in the classroom.".to_string(),
            SessionError::Forbidden(msg) => msg.clone(),
            SessionError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

/// Session window validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WindowError {
    /// `start_at` is not strictly before `end_at`.
    #[error("Session must end after it starts (start {start_at}, end {end_at})")]
    EndNotAfterStart { start_at: String, end_at: String },
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_everything_but_forbidden_is_retryable() {
        assert!(SessionError::PermissionDenied("x".to_string()).is_retryable());
        assert!(SessionError::ConnectFailed("x".to_string()).is_retryable());
        assert!(SessionError::Superseded.is_retryable());
        assert!(!SessionError::Forbidden("students cannot kick".to_string()).is_retryable());
    }

    #[test]
    fn test_user_messages_hide_internal_details() {
        let err = SessionError::ConnectFailed("tls handshake to 10.0.0.7:7880 failed".to_string());
        assert!(!err.user_message().contains("10.0.0.7"));

        let err = SessionError::Internal("mailbox closed".to_string());
        assert_eq!(err.user_message(), "An internal error occurred");

        let err = SessionError::DeviceUnavailable("/dev/video0 busy".to_string());
        assert!(!err.user_message().contains("/dev/video0"));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", SessionError::PublishFailed("timeout".to_string())),
            "Publish failed: timeout"
        );
        assert_eq!(
            format!("{}", SessionError::Superseded),
            "Join superseded by a newer request"
        );
        assert_eq!(
            format!(
                "{}",
                WindowError::EndNotAfterStart {
                    start_at: "10:00".to_string(),
                    end_at: "09:00".to_string()
                }
            ),
            "Session must end after it starts (start 10:00, end 09:00)"
        );
        assert_eq!(
            format!("{}", ConfigError::MissingEnvVar("X".to_string())),
            "Missing required environment variable: X"
        );
    }

    #[test]
    fn test_labels() {
        assert_eq!(SessionError::NotConnected.label(), "not_connected");
        assert_eq!(
            SessionError::SegmentationInitFailed("x".to_string()).label(),
            "segmentation_init_failed"
        );
    }
}
