//! Metrics definitions for the session engine.
//!
//! All metrics use the `classroom_` prefix and the `_total` suffix for
//! counters. Labels are bounded by code (outcome labels come from
//! [`crate::errors::SessionError::label`], message types from
//! [`control_protocol::MessageKind::as_str`]).

use metrics::{counter, gauge};

/// Record the outcome of a join attempt.
///
/// Metric: `classroom_join_attempts_total`
/// Labels: `outcome` (`success` or a `SessionError` label)
pub fn record_join_attempt(outcome: &'static str) {
    counter!("classroom_join_attempts_total", "outcome" => outcome).increment(1);
}

/// Record a connect result discarded because a newer attempt superseded it.
///
/// Metric: `classroom_joins_superseded_total`
pub fn record_superseded_join() {
    counter!("classroom_joins_superseded_total").increment(1);
}

/// Record a local screen share stopped because a remote participant started one.
///
/// Metric: `classroom_screen_share_preempted_total`
pub fn record_screen_share_preempted() {
    counter!("classroom_screen_share_preempted_total").increment(1);
}

/// Record one compositor output frame.
///
/// Metric: `classroom_compositor_frames_total`
/// Labels: `output` (`composited`, `passthrough`)
pub fn record_compositor_frame(passthrough: bool) {
    let output = if passthrough {
        "passthrough"
    } else {
        "composited"
    };
    counter!("classroom_compositor_frames_total", "output" => output).increment(1);
}

/// Record a background effect degraded to `None`.
///
/// Metric: `classroom_segmentation_fallbacks_total`
/// Labels: `reason` (`segmentation_init_failed`, `background_load_failed`, ...)
pub fn record_segmentation_fallback(reason: &'static str) {
    counter!("classroom_segmentation_fallbacks_total", "reason" => reason).increment(1);
}

/// Record a decoded control message.
///
/// Metric: `classroom_control_messages_total`
/// Labels: `message_type` (6 wire types)
pub fn record_control_message(message_type: &'static str) {
    counter!("classroom_control_messages_total", "message_type" => message_type).increment(1);
}

/// Record a control message that was dropped.
///
/// Metric: `classroom_control_messages_ignored_total`
/// Labels: `reason` (codec error label, `unauthorized`, `unknown_sender`, `sharer_mismatch`)
pub fn record_control_message_ignored(reason: &'static str) {
    counter!("classroom_control_messages_ignored_total", "reason" => reason).increment(1);
}

/// Set the number of remote participant tiles.
///
/// Metric: `classroom_tiles_active`
pub fn set_tiles_active(count: usize) {
    // usize to f64 conversion is safe for realistic room sizes
    #[allow(clippy::cast_precision_loss)]
    gauge!("classroom_tiles_active").set(count as f64);
}
