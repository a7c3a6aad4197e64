//! Observability for the session engine.
//!
//! # Privacy by Default
//!
//! Actor entry points use `#[instrument(skip_all)]` and list safe fields
//! explicitly. Participant identities are logged; chat text and join tokens
//! never are. Metric labels are bounded enums, never identities.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `classroom_join_attempts_total` | Counter | `outcome` | Join results |
//! | `classroom_joins_superseded_total` | Counter | none | Stale connect results discarded |
//! | `classroom_screen_share_preempted_total` | Counter | none | Local shares stopped by a remote sharer |
//! | `classroom_compositor_frames_total` | Counter | `output` | Frames emitted by the compositor |
//! | `classroom_segmentation_fallbacks_total` | Counter | `reason` | Background effects degraded to none |
//! | `classroom_control_messages_total` | Counter | `message_type` | Decoded control messages |
//! | `classroom_control_messages_ignored_total` | Counter | `reason` | Malformed or unauthorised control messages |
//! | `classroom_tiles_active` | Gauge | none | Remote participant tiles |
//!
//! The library never installs a recorder; the host application picks one.

pub mod metrics;

use common::config::ObservabilityConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use metrics::{
    record_compositor_frame, record_control_message, record_control_message_ignored,
    record_join_attempt, record_screen_share_preempted, record_segmentation_fallback,
    record_superseded_join, set_tiles_active,
};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. Returns an error
/// if a global subscriber is already installed.
///
/// # Errors
///
/// Returns the subscriber initialisation error as a string.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| format!("Invalid log filter: {e}"))?;

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| format!("Failed to install tracing subscriber: {e}"))
    } else {
        registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| format!("Failed to install tracing subscriber: {e}"))
    }
}
