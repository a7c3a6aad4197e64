//! External services the room session consumes but does not implement.

use crate::errors::SessionError;
use async_trait::async_trait;
use common::secret::JoinToken;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a session is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Scheduled group class for a course
    Class,
    /// One-on-one mentoring booking
    Mentoring,
}

impl SessionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionKind::Class => "class",
            SessionKind::Mentoring => "mentoring",
        }
    }
}

/// A created session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub room_name: String,
}

/// Session record REST API.
///
/// Failures are fatal to the join that needed them and surface as
/// [`SessionError::Credential`].
#[async_trait]
pub trait SessionApi: Send + Sync {
    async fn create_session(
        &self,
        kind: SessionKind,
        resource_id: &str,
    ) -> Result<SessionRecord, SessionError>;

    async fn end_session(&self, room_name: &str) -> Result<(), SessionError>;

    async fn get_join_credential(
        &self,
        room_name: &str,
        is_host: bool,
    ) -> Result<JoinToken, SessionError>;
}

/// Activity of a session's room, as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoomStatus {
    pub is_active: bool,
    pub host_connected: bool,
    pub participant_count: u32,
}

#[async_trait]
pub trait RoomStatusProbe: Send + Sync {
    async fn get_room_status(&self, resource_id: &str) -> Result<RoomStatus, SessionError>;
}

/// Poll the room status every `interval` until `cancel` fires.
///
/// The first poll runs immediately. A failed poll is logged and the previous
/// value is kept.
pub fn spawn_room_status_poller(
    probe: Arc<dyn RoomStatusProbe>,
    resource_id: String,
    interval: Duration,
    cancel: CancellationToken,
) -> (watch::Receiver<RoomStatus>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(RoomStatus::default());
    let task = tokio::spawn(run_poller(probe, resource_id, interval, cancel, tx));
    (rx, task)
}

async fn run_poller(
    probe: Arc<dyn RoomStatusProbe>,
    resource_id: String,
    interval: Duration,
    cancel: CancellationToken,
    tx: watch::Sender<RoomStatus>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(
        target: "engine.room",
        resource_id = %resource_id,
        interval_ms = interval.as_millis(),
        "Room status poller started"
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match probe.get_room_status(&resource_id).await {
                    Ok(status) => {
                        debug!(
                            target: "engine.room",
                            is_active = status.is_active,
                            host_connected = status.host_connected,
                            participants = status.participant_count,
                            "Room status polled"
                        );
                        tx.send_if_modified(|current| {
                            let changed = *current != status;
                            *current = status;
                            changed
                        });
                    }
                    Err(e) => {
                        warn!(target: "engine.room", error = %e, "Room status poll failed");
                    }
                }
            }
        }
    }

    info!(target: "engine.room", "Room status poller stopped");
}
