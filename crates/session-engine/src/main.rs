//! Session Clock
//!
//! Drives the session clock for one scheduled window and logs the banner on
//! every phase change until the session ends or the process is interrupted.
//! Useful for checking phase thresholds against a real schedule.
//!
//! # Environment
//!
//! - `CLASSROOM_SESSION_START`, `CLASSROOM_SESSION_END` - RFC 3339 timestamps
//! - `CLASSROOM_GRACE_SECONDS` - optional grace period, defaults to
//!   `CLASSROOM_GRACE_PERIOD_SECONDS`
//! - every other `CLASSROOM_*` engine variable (see `EngineConfig`)

#![warn(clippy::pedantic)]

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::types::Role;
use session_engine::clock::{spawn_clock_driver, SessionPhase, SessionWindow};
use session_engine::config::EngineConfig;
use session_engine::observability::init_tracing;
use session_engine::presentation::BannerView;
use std::env;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::from_env().context("Failed to load configuration")?;
    init_tracing(&config.observability).map_err(anyhow::Error::msg)?;

    info!("Starting session clock");

    let window = window_from_env(&config).map_err(|e| {
        error!(error = %e, "Invalid session window");
        e
    })?;

    info!(
        start_at = %window.start_at(),
        end_at = %window.end_at(),
        grace_seconds = window.grace_period().as_secs(),
        tick_ms = config.clock_tick.as_millis(),
        "Session window loaded"
    );

    let cancel_token = CancellationToken::new();
    let (mut readings, driver) = spawn_clock_driver(
        window,
        config.clock_settings(),
        config.clock_tick,
        cancel_token.clone(),
    );

    let mut last_phase = None;
    loop {
        let reading = *readings.borrow_and_update();
        if last_phase != Some(reading.phase) {
            let banner = BannerView::from_reading(&reading, Role::Mentor);
            info!(
                phase = reading.phase.as_str(),
                headline = %banner.headline,
                countdown = %banner.countdown,
                "Phase changed"
            );
            last_phase = Some(reading.phase);
        }
        if reading.phase == SessionPhase::Ended {
            break;
        }

        tokio::select! {
            changed = readings.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    cancel_token.cancel();
    driver.await.context("Clock driver task failed")?;

    info!("Session clock stopped");
    Ok(())
}

fn required_timestamp(name: &str) -> Result<DateTime<Utc>> {
    let raw = env::var(name).with_context(|| format!("Missing environment variable: {name}"))?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("{name} must be an RFC 3339 timestamp, got {raw}"))
}

fn window_from_env(config: &EngineConfig) -> Result<SessionWindow> {
    let start_at = required_timestamp("CLASSROOM_SESSION_START")?;
    let end_at = required_timestamp("CLASSROOM_SESSION_END")?;
    let grace_period = match env::var("CLASSROOM_GRACE_SECONDS") {
        Ok(raw) => Duration::from_secs(
            raw.parse()
                .with_context(|| format!("CLASSROOM_GRACE_SECONDS must be whole seconds, got {raw}"))?,
        ),
        Err(_) => config.default_grace_period,
    };
    SessionWindow::new(start_at, end_at, grace_period).context("Invalid session window")
}
