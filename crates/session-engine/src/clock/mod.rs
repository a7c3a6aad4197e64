//! Session clock.
//!
//! The phase of a session is a pure function of wall-clock time and the
//! session window. Nothing here keeps state between evaluations, so a reading
//! stays formula-consistent even if the host clock jumps backwards; the
//! [`driver`] only decides *when* to evaluate.

mod driver;

pub use driver::{spawn_clock_driver, spawn_clock_driver_with};

use crate::config::{DEFAULT_EARLY_JOIN_LEAD_SECONDS, DEFAULT_ENDING_SOON_SECONDS};
use crate::errors::WindowError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Scheduled bounds of a session. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    grace_period: Duration,
}

impl SessionWindow {
    /// Build a window.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::EndNotAfterStart`] unless `start_at < end_at`.
    pub fn new(
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        grace_period: Duration,
    ) -> Result<Self, WindowError> {
        if start_at >= end_at {
            return Err(WindowError::EndNotAfterStart {
                start_at: start_at.to_rfc3339(),
                end_at: end_at.to_rfc3339(),
            });
        }
        Ok(Self {
            start_at,
            end_at,
            grace_period,
        })
    }

    #[must_use]
    pub fn start_at(&self) -> DateTime<Utc> {
        self.start_at
    }

    #[must_use]
    pub fn end_at(&self) -> DateTime<Utc> {
        self.end_at
    }

    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }
}

/// Discrete phase of a session. Ordered by time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    NotStarted,
    EarlyJoin,
    Active,
    EndingSoon,
    GracePeriod,
    Ended,
}

impl SessionPhase {
    /// Whether participants may enter the room in this phase.
    #[must_use]
    pub const fn allows_join(self) -> bool {
        matches!(
            self,
            SessionPhase::EarlyJoin
                | SessionPhase::Active
                | SessionPhase::EndingSoon
                | SessionPhase::GracePeriod
        )
    }

    #[must_use]
    pub const fn warning_level(self) -> WarningLevel {
        match self {
            SessionPhase::EarlyJoin => WarningLevel::Info,
            SessionPhase::EndingSoon => WarningLevel::Warning,
            SessionPhase::GracePeriod | SessionPhase::Ended => WarningLevel::Danger,
            SessionPhase::NotStarted | SessionPhase::Active => WarningLevel::None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionPhase::NotStarted => "not_started",
            SessionPhase::EarlyJoin => "early_join",
            SessionPhase::Active => "active",
            SessionPhase::EndingSoon => "ending_soon",
            SessionPhase::GracePeriod => "grace_period",
            SessionPhase::Ended => "ended",
        }
    }
}

/// Severity shown alongside a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningLevel {
    None,
    Info,
    Warning,
    Danger,
}

/// Phase thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSettings {
    /// How long before `start_at` joining opens.
    pub early_join_lead: Duration,
    /// Remaining time at or below which the session is ending soon.
    pub ending_soon: Duration,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            early_join_lead: Duration::from_secs(DEFAULT_EARLY_JOIN_LEAD_SECONDS),
            ending_soon: Duration::from_secs(DEFAULT_ENDING_SOON_SECONDS),
        }
    }
}

/// One evaluation of the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClockReading {
    pub phase: SessionPhase,
    /// Seconds until `end_at`, floored at zero.
    pub remaining_seconds: u64,
    /// Seconds left in the grace period; the full grace before `end_at`.
    pub grace_remaining_seconds: u64,
    pub warning_level: WarningLevel,
    /// Seconds since `start_at`, floored at zero.
    pub elapsed_seconds: u64,
    /// Seconds until `start_at`, floored at zero.
    pub starts_in_seconds: u64,
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Whole seconds in a non-negative millisecond span; negative spans are zero.
fn floor_seconds(millis: i64) -> u64 {
    u64::try_from(millis.max(0) / 1000).unwrap_or(0)
}

/// Evaluate the clock with default thresholds.
#[must_use]
pub fn evaluate(now: DateTime<Utc>, window: &SessionWindow) -> ClockReading {
    evaluate_with(now, window, &ClockSettings::default())
}

/// Evaluate the clock.
#[must_use]
pub fn evaluate_with(
    now: DateTime<Utc>,
    window: &SessionWindow,
    settings: &ClockSettings,
) -> ClockReading {
    let now_ms = now.timestamp_millis();
    let start_ms = window.start_at.timestamp_millis();
    let end_ms = window.end_at.timestamp_millis();
    let grace_ms = duration_millis(window.grace_period);
    let lead_ms = duration_millis(settings.early_join_lead);
    let ending_soon_ms = duration_millis(settings.ending_soon);

    let until_end = end_ms.saturating_sub(now_ms);
    let grace_end = end_ms.saturating_add(grace_ms);

    let phase = if now_ms < start_ms.saturating_sub(lead_ms) {
        SessionPhase::NotStarted
    } else if now_ms < start_ms {
        SessionPhase::EarlyJoin
    } else if until_end > ending_soon_ms {
        SessionPhase::Active
    } else if until_end > 0 {
        SessionPhase::EndingSoon
    } else if now_ms < grace_end {
        SessionPhase::GracePeriod
    } else {
        SessionPhase::Ended
    };

    let grace_remaining_seconds = match phase {
        SessionPhase::GracePeriod => floor_seconds(grace_end.saturating_sub(now_ms)),
        SessionPhase::Ended => 0,
        _ => window.grace_period.as_secs(),
    };

    ClockReading {
        phase,
        remaining_seconds: floor_seconds(until_end),
        grace_remaining_seconds,
        warning_level: phase.warning_level(),
        elapsed_seconds: floor_seconds(now_ms.saturating_sub(start_ms)),
        starts_in_seconds: floor_seconds(start_ms.saturating_sub(now_ms)),
    }
}
