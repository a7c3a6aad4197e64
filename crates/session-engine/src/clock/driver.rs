//! Periodic clock evaluation.

use super::{evaluate_with, ClockReading, ClockSettings, SessionPhase, SessionWindow};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Spawn a task that re-evaluates the clock against `Utc::now()` every `tick`.
///
/// The receiver holds the latest reading. The task exits when `cancel` fires
/// or right after publishing an `Ended` reading.
pub fn spawn_clock_driver(
    window: SessionWindow,
    settings: ClockSettings,
    tick: Duration,
    cancel: CancellationToken,
) -> (watch::Receiver<ClockReading>, JoinHandle<()>) {
    spawn_clock_driver_with(window, settings, tick, cancel, Utc::now)
}

/// Like [`spawn_clock_driver`] with an injectable time source.
pub fn spawn_clock_driver_with<F>(
    window: SessionWindow,
    settings: ClockSettings,
    tick: Duration,
    cancel: CancellationToken,
    now: F,
) -> (watch::Receiver<ClockReading>, JoinHandle<()>)
where
    F: Fn() -> DateTime<Utc> + Send + 'static,
{
    let initial = evaluate_with(now(), &window, &settings);
    let (tx, rx) = watch::channel(initial);
    let handle = tokio::spawn(run(window, settings, tick, cancel, now, tx));
    (rx, handle)
}

#[instrument(skip_all, name = "engine.clock.driver", fields(start_at = %window.start_at()))]
async fn run<F>(
    window: SessionWindow,
    settings: ClockSettings,
    tick: Duration,
    cancel: CancellationToken,
    now: F,
    tx: watch::Sender<ClockReading>,
) where
    F: Fn() -> DateTime<Utc> + Send + 'static,
{
    let mut last_phase = tx.borrow().phase;
    info!(target: "engine.clock", phase = last_phase.as_str(), "Clock driver started");

    if last_phase == SessionPhase::Ended {
        return;
    }

    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; the initial reading is already published.
    interval.tick().await;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(target: "engine.clock", "Clock driver cancelled");
                break;
            }

            _ = interval.tick() => {
                let reading = evaluate_with(now(), &window, &settings);
                if reading.phase != last_phase {
                    info!(
                        target: "engine.clock",
                        from = last_phase.as_str(),
                        to = reading.phase.as_str(),
                        remaining_seconds = reading.remaining_seconds,
                        "Session phase changed"
                    );
                    last_phase = reading.phase;
                }
                tx.send_replace(reading);

                if reading.phase == SessionPhase::Ended {
                    info!(target: "engine.clock", "Session ended, clock driver stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn window() -> SessionWindow {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap();
        SessionWindow::new(
            start,
            start + chrono::Duration::seconds(600),
            Duration::from_secs(60),
        )
        .unwrap()
    }

    fn fake_now(offset: &Arc<AtomicI64>) -> impl Fn() -> DateTime<Utc> + Send + 'static {
        let offset = Arc::clone(offset);
        let start = window().start_at();
        move || start + chrono::Duration::seconds(offset.load(Ordering::SeqCst))
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_publishes_transitions_and_stops_after_ended() {
        let offset = Arc::new(AtomicI64::new(-30));
        let cancel = CancellationToken::new();
        let (mut rx, handle) = spawn_clock_driver_with(
            window(),
            ClockSettings::default(),
            Duration::from_secs(1),
            cancel.clone(),
            fake_now(&offset),
        );
        assert_eq!(rx.borrow().phase, SessionPhase::EarlyJoin);

        offset.store(100, Ordering::SeqCst);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().phase, SessionPhase::Active);
        assert_eq!(rx.borrow().elapsed_seconds, 100);

        offset.store(700, Ordering::SeqCst);
        handle.await.unwrap();
        assert_eq!(rx.borrow().phase, SessionPhase::Ended);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_honours_cancellation() {
        let offset = Arc::new(AtomicI64::new(10));
        let cancel = CancellationToken::new();
        let (rx, handle) = spawn_clock_driver_with(
            window(),
            ClockSettings::default(),
            Duration::from_secs(1),
            cancel.clone(),
            fake_now(&offset),
        );

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(rx.borrow().phase, SessionPhase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_survives_backward_clock_jump() {
        let offset = Arc::new(AtomicI64::new(550));
        let cancel = CancellationToken::new();
        let (mut rx, _handle) = spawn_clock_driver_with(
            window(),
            ClockSettings::default(),
            Duration::from_secs(1),
            cancel.clone(),
            fake_now(&offset),
        );
        assert_eq!(rx.borrow().phase, SessionPhase::EndingSoon);

        // Host clock stepped back: the reading follows the formula, not history.
        offset.store(200, Ordering::SeqCst);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().phase, SessionPhase::Active);
        assert_eq!(rx.borrow().remaining_seconds, 400);

        cancel.cancel();
    }
}
