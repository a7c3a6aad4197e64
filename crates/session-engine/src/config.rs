//! Session engine configuration.
//!
//! Configuration is loaded from `CLASSROOM_*` environment variables. The
//! transport URL may carry credentials in its query string, so `Debug`
//! output redacts it.

use crate::clock::ClockSettings;
use crate::compositor::CompositorSettings;
use crate::errors::ConfigError;
use crate::media::VideoQuality;
use crate::room::RoomSettings;
use common::config::{ObservabilityConfig, DEFAULT_LOG_FILTER};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default lead time before the start at which joining opens (15 minutes).
pub const DEFAULT_EARLY_JOIN_LEAD_SECONDS: u64 = 900;

/// Default remaining time at which the session is "ending soon" (5 minutes).
pub const DEFAULT_ENDING_SOON_SECONDS: u64 = 300;

/// Default grace period after the scheduled end (5 minutes).
pub const DEFAULT_GRACE_PERIOD_SECONDS: u64 = 300;

/// Default clock driver tick.
pub const DEFAULT_CLOCK_TICK_MS: u64 = 1000;

/// Default compositor output frame rate.
pub const DEFAULT_COMPOSITOR_FPS: u32 = 30;

/// Default Gaussian blur sigma for the blur background.
pub const DEFAULT_BLUR_SIGMA: f32 = 12.0;

/// Default audio meter FFT window, in samples.
pub const DEFAULT_METER_WINDOW: usize = 256;

/// Default number of chat entries kept for the live session.
pub const DEFAULT_CHAT_CAPACITY: usize = 500;

/// Default room session mailbox depth.
pub const DEFAULT_ROOM_MAILBOX_CAPACITY: usize = 256;

/// Default room-status poll interval.
pub const DEFAULT_ROOM_STATUS_POLL_SECONDS: u64 = 10;

/// Session engine configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Clone)]
pub struct EngineConfig {
    /// Room transport URL (required, `CLASSROOM_TRANSPORT_URL`).
    pub transport_url: String,

    /// Lead time before `start_at` when joining opens.
    pub early_join_lead: Duration,

    /// Threshold below which an active session is "ending soon".
    pub ending_soon: Duration,

    /// Grace period used when a session record does not carry one.
    pub default_grace_period: Duration,

    /// Clock driver tick.
    pub clock_tick: Duration,

    /// Compositor output frame rate.
    pub compositor_fps: u32,

    /// Blur background sigma.
    pub blur_sigma: f32,

    /// Audio meter FFT window (samples).
    pub meter_window: usize,

    /// Chat ring capacity.
    pub chat_capacity: usize,

    /// Room session mailbox depth.
    pub room_mailbox_capacity: usize,

    /// Room-status poll interval.
    pub room_status_poll_interval: Duration,

    /// Default capture quality for the camera.
    pub video_quality: VideoQuality,

    /// Logging configuration.
    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts the transport URL query.
impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("transport_url", &redact_query(&self.transport_url))
            .field("early_join_lead", &self.early_join_lead)
            .field("ending_soon", &self.ending_soon)
            .field("default_grace_period", &self.default_grace_period)
            .field("clock_tick", &self.clock_tick)
            .field("compositor_fps", &self.compositor_fps)
            .field("blur_sigma", &self.blur_sigma)
            .field("meter_window", &self.meter_window)
            .field("chat_capacity", &self.chat_capacity)
            .field("room_mailbox_capacity", &self.room_mailbox_capacity)
            .field("room_status_poll_interval", &self.room_status_poll_interval)
            .field("video_quality", &self.video_quality)
            .field("observability", &self.observability)
            .finish()
    }
}

fn redact_query(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?[REDACTED]"),
        None => url.to_string(),
    }
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
    }
}

fn parse_positive<T: FromStr + PartialEq + Default>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    let value = parse_var(vars, name, default)?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue(format!("{name} must be non-zero")));
    }
    Ok(value)
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let transport_url = vars
            .get("CLASSROOM_TRANSPORT_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("CLASSROOM_TRANSPORT_URL".to_string()))?
            .clone();

        let early_join_lead = Duration::from_secs(parse_var(
            vars,
            "CLASSROOM_EARLY_JOIN_LEAD_SECONDS",
            DEFAULT_EARLY_JOIN_LEAD_SECONDS,
        )?);
        let ending_soon = Duration::from_secs(parse_var(
            vars,
            "CLASSROOM_ENDING_SOON_SECONDS",
            DEFAULT_ENDING_SOON_SECONDS,
        )?);
        let default_grace_period = Duration::from_secs(parse_var(
            vars,
            "CLASSROOM_GRACE_PERIOD_SECONDS",
            DEFAULT_GRACE_PERIOD_SECONDS,
        )?);

        let clock_tick = Duration::from_millis(parse_positive(
            vars,
            "CLASSROOM_CLOCK_TICK_MS",
            DEFAULT_CLOCK_TICK_MS,
        )?);
        let compositor_fps = parse_positive(vars, "CLASSROOM_COMPOSITOR_FPS", DEFAULT_COMPOSITOR_FPS)?;

        let blur_sigma: f32 = parse_var(vars, "CLASSROOM_BLUR_SIGMA", DEFAULT_BLUR_SIGMA)?;
        if !blur_sigma.is_finite() || blur_sigma <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "CLASSROOM_BLUR_SIGMA must be a positive number".to_string(),
            ));
        }

        let meter_window = parse_positive(vars, "CLASSROOM_METER_WINDOW", DEFAULT_METER_WINDOW)?;
        let chat_capacity = parse_positive(vars, "CLASSROOM_CHAT_CAPACITY", DEFAULT_CHAT_CAPACITY)?;
        let room_mailbox_capacity = parse_positive(
            vars,
            "CLASSROOM_ROOM_MAILBOX_CAPACITY",
            DEFAULT_ROOM_MAILBOX_CAPACITY,
        )?;
        let room_status_poll_interval = Duration::from_secs(parse_positive(
            vars,
            "CLASSROOM_ROOM_STATUS_POLL_SECONDS",
            DEFAULT_ROOM_STATUS_POLL_SECONDS,
        )?);

        let video_quality = match vars.get("CLASSROOM_VIDEO_QUALITY") {
            None => VideoQuality::default(),
            Some(raw) => VideoQuality::from_str(raw)
                .map_err(|()| ConfigError::InvalidValue(format!("CLASSROOM_VIDEO_QUALITY={raw}")))?,
        };

        let json_logs = parse_var(vars, "CLASSROOM_JSON_LOGS", false)?;
        let log_filter = vars
            .get("CLASSROOM_LOG_FILTER")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(EngineConfig {
            transport_url,
            early_join_lead,
            ending_soon,
            default_grace_period,
            clock_tick,
            compositor_fps,
            blur_sigma,
            meter_window,
            chat_capacity,
            room_mailbox_capacity,
            room_status_poll_interval,
            video_quality,
            observability: ObservabilityConfig {
                log_filter,
                json_logs,
            },
        })
    }

    /// Phase thresholds for the session clock.
    #[must_use]
    pub fn clock_settings(&self) -> ClockSettings {
        ClockSettings {
            early_join_lead: self.early_join_lead,
            ending_soon: self.ending_soon,
        }
    }

    /// Render settings for the background compositor.
    #[must_use]
    pub fn compositor_settings(&self) -> CompositorSettings {
        CompositorSettings {
            fps: self.compositor_fps,
            blur_sigma: self.blur_sigma,
        }
    }

    #[must_use]
    pub fn room_settings(&self) -> RoomSettings {
        RoomSettings {
            transport_url: self.transport_url.clone(),
            chat_capacity: self.chat_capacity,
            mailbox_capacity: self.room_mailbox_capacity,
            compositor: self.compositor_settings(),
        }
    }
}
