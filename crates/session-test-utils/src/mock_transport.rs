//! In-memory room transport.
//!
//! Every connection keeps a full record of what the engine did with it:
//! publications (current and historic), mute signals, render sinks and the
//! control payloads it broadcast. Room events are pushed in with
//! [`MockConnection::inject`].
//!
//! # Example
//!
//! ```rust,ignore
//! use session_test_utils::{ConnectBehavior, MockTransport};
//!
//! let transport = MockTransport::new()
//!     .with_connect(ConnectBehavior::Fail("sfu unreachable".into()));
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use common::secret::{ExposeSecret, JoinToken};
use common::types::ParticipantIdentity;
use control_protocol::{decode_message, ControlMessage};
use session_engine::errors::SessionError;
use session_engine::media::{LocalTrack, TrackKind};
use session_engine::room::{
    Connected, PublicationId, RemoteTrackRef, RoomConnection, RoomEvent, RoomTransport, SinkId,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Room event buffer per connection.
const EVENT_BUFFER: usize = 64;

/// How the next `connect` call behaves.
#[derive(Debug, Clone)]
pub enum ConnectBehavior {
    Succeed,
    /// Succeed after sleeping on the tokio clock
    Delay(Duration),
    Fail(String),
}

/// Mock transport for room session tests.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<TransportInner>>,
}

#[derive(Debug, Default)]
struct TransportInner {
    script: VecDeque<ConnectBehavior>,
    connections: Vec<MockConnection>,
    tokens: Vec<String>,
    urls: Vec<String>,
    identity_prefix: Option<String>,
}

impl MockTransport {
    /// Create a transport whose connects all succeed immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the behavior of a future `connect` call.
    #[must_use]
    pub fn with_connect(self, behavior: ConnectBehavior) -> Self {
        self.script_connect(behavior);
        self
    }

    /// Display name used for local identities, `"Tester"` by default.
    #[must_use]
    pub fn with_identity_name(self, name: &str) -> Self {
        self.inner.lock().unwrap().identity_prefix = Some(name.to_string());
        self
    }

    /// Queue the behavior of a future `connect` call.
    pub fn script_connect(&self, behavior: ConnectBehavior) {
        self.inner.lock().unwrap().script.push_back(behavior);
    }

    /// Number of `connect` calls so far.
    pub fn connect_calls(&self) -> usize {
        self.inner.lock().unwrap().tokens.len()
    }

    /// Raw join tokens presented, in call order.
    pub fn tokens(&self) -> Vec<String> {
        self.inner.lock().unwrap().tokens.clone()
    }

    /// Transport URLs used, in call order.
    pub fn urls(&self) -> Vec<String> {
        self.inner.lock().unwrap().urls.clone()
    }

    /// Connections handed out, in completion order.
    pub fn connections(&self) -> Vec<MockConnection> {
        self.inner.lock().unwrap().connections.clone()
    }

    /// Most recently completed connection.
    pub fn last_connection(&self) -> Option<MockConnection> {
        self.inner.lock().unwrap().connections.last().cloned()
    }
}

#[async_trait]
impl RoomTransport for MockTransport {
    async fn connect(&self, url: &str, token: &JoinToken) -> Result<Connected, SessionError> {
        let (behavior, name, index) = {
            let mut inner = self.inner.lock().unwrap();
            inner.tokens.push(token.expose_secret().to_string());
            inner.urls.push(url.to_string());
            let behavior = inner.script.pop_front().unwrap_or(ConnectBehavior::Succeed);
            let name = inner
                .identity_prefix
                .clone()
                .unwrap_or_else(|| "Tester".to_string());
            (behavior, name, inner.tokens.len())
        };

        match behavior {
            ConnectBehavior::Succeed => {}
            ConnectBehavior::Delay(delay) => tokio::time::sleep(delay).await,
            ConnectBehavior::Fail(reason) => return Err(SessionError::ConnectFailed(reason)),
        }

        let identity = ParticipantIdentity::new(format!("{name}|conn{index}"));
        let (connection, events) = MockConnection::open(identity);
        self.inner
            .lock()
            .unwrap()
            .connections
            .push(connection.clone());

        Ok(Connected {
            connection: Box::new(connection),
            events,
        })
    }
}

/// A published local track as seen by the transport.
#[derive(Debug, Clone)]
pub struct Publication {
    pub id: PublicationId,
    pub track: LocalTrack,
    pub muted: bool,
}

/// One side of an in-memory room connection.
#[derive(Debug, Clone)]
pub struct MockConnection {
    inner: Arc<Mutex<ConnectionInner>>,
}

#[derive(Debug)]
struct ConnectionInner {
    identity: ParticipantIdentity,
    events_tx: Option<mpsc::Sender<RoomEvent>>,
    live: Vec<Publication>,
    history: Vec<Publication>,
    unpublished: Vec<PublicationId>,
    mute_signals: HashMap<PublicationId, Vec<bool>>,
    max_live_video: usize,
    next_id: u64,
    attached: Vec<(SinkId, RemoteTrackRef)>,
    detached: Vec<SinkId>,
    sent: Vec<Bytes>,
    fail_publish: Option<TrackKind>,
    disconnected: bool,
}

impl MockConnection {
    fn open(identity: ParticipantIdentity) -> (Self, mpsc::Receiver<RoomEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let connection = Self {
            inner: Arc::new(Mutex::new(ConnectionInner {
                identity,
                events_tx: Some(tx),
                live: Vec::new(),
                history: Vec::new(),
                unpublished: Vec::new(),
                mute_signals: HashMap::new(),
                max_live_video: 0,
                next_id: 1,
                attached: Vec::new(),
                detached: Vec::new(),
                sent: Vec::new(),
                fail_publish: None,
                disconnected: false,
            })),
        };
        (connection, rx)
    }

    pub fn identity(&self) -> ParticipantIdentity {
        self.inner.lock().unwrap().identity.clone()
    }

    /// Deliver a room event to the engine.
    ///
    /// Returns `false` if the engine already dropped the event stream.
    pub async fn inject(&self, event: RoomEvent) -> bool {
        let tx = self.inner.lock().unwrap().events_tx.clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Close the event stream as a dropped transport would.
    pub fn close_events(&self) {
        self.inner.lock().unwrap().events_tx = None;
    }

    /// Make publishing tracks of `kind` fail from now on.
    pub fn fail_publish(&self, kind: TrackKind) {
        self.inner.lock().unwrap().fail_publish = Some(kind);
    }

    /// Publications still live on the connection.
    pub fn live_publications(&self) -> Vec<Publication> {
        self.inner.lock().unwrap().live.clone()
    }

    /// Every publication ever made, in order.
    pub fn publication_history(&self) -> Vec<Publication> {
        self.inner.lock().unwrap().history.clone()
    }

    /// Live publications of the given kind.
    pub fn live_of_kind(&self, kind: TrackKind) -> Vec<Publication> {
        self.live_publications()
            .into_iter()
            .filter(|p| p.track.kind() == kind)
            .collect()
    }

    /// Highest number of camera tracks that were live at the same time.
    pub fn max_live_video(&self) -> usize {
        self.inner.lock().unwrap().max_live_video
    }

    pub fn unpublished(&self) -> Vec<PublicationId> {
        self.inner.lock().unwrap().unpublished.clone()
    }

    /// Mute flags signalled for a publication, in order.
    pub fn mute_signals(&self, publication: &PublicationId) -> Vec<bool> {
        self.inner
            .lock()
            .unwrap()
            .mute_signals
            .get(publication)
            .cloned()
            .unwrap_or_default()
    }

    /// Sinks bound and not yet detached.
    pub fn attached_sinks(&self) -> Vec<SinkId> {
        let inner = self.inner.lock().unwrap();
        inner
            .attached
            .iter()
            .map(|(sink, _)| *sink)
            .filter(|sink| !inner.detached.contains(sink))
            .collect()
    }

    pub fn detached_sinks(&self) -> Vec<SinkId> {
        self.inner.lock().unwrap().detached.clone()
    }

    /// Raw payloads broadcast on the data channel.
    pub fn sent_payloads(&self) -> Vec<Bytes> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Broadcast payloads decoded as control messages.
    pub fn sent_messages(&self) -> Vec<ControlMessage> {
        self.sent_payloads()
            .iter()
            .filter_map(|payload| decode_message(payload).ok())
            .collect()
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.lock().unwrap().disconnected
    }
}

fn live_video(live: &[Publication]) -> usize {
    live.iter()
        .filter(|p| p.track.kind() == TrackKind::Video)
        .count()
}

#[async_trait]
impl RoomConnection for MockConnection {
    fn local_identity(&self) -> ParticipantIdentity {
        self.identity()
    }

    async fn publish(&self, track: &LocalTrack) -> Result<PublicationId, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.disconnected {
            return Err(SessionError::PublishFailed("connection closed".to_string()));
        }
        if inner.fail_publish == Some(track.kind()) {
            return Err(SessionError::PublishFailed(format!(
                "{} publish rejected",
                track.kind().as_str()
            )));
        }

        let id = PublicationId(format!("TR_{}", inner.next_id));
        inner.next_id += 1;
        let publication = Publication {
            id: id.clone(),
            track: track.clone(),
            muted: false,
        };
        inner.history.push(publication.clone());
        inner.live.push(publication);
        inner.max_live_video = inner.max_live_video.max(live_video(&inner.live));
        Ok(id)
    }

    async fn unpublish(&self, publication: &PublicationId) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.live.len();
        inner.live.retain(|p| &p.id != publication);
        if inner.live.len() == before {
            return Err(SessionError::PublishFailed(format!(
                "unknown publication {publication}"
            )));
        }
        inner.unpublished.push(publication.clone());
        Ok(())
    }

    async fn set_track_muted(
        &self,
        publication: &PublicationId,
        muted: bool,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(live) = inner.live.iter_mut().find(|p| &p.id == publication) else {
            return Err(SessionError::PublishFailed(format!(
                "unknown publication {publication}"
            )));
        };
        live.muted = muted;
        inner
            .mute_signals
            .entry(publication.clone())
            .or_default()
            .push(muted);
        Ok(())
    }

    async fn attach(&self, track: &RemoteTrackRef) -> Result<SinkId, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        let sink = SinkId(inner.next_id);
        inner.next_id += 1;
        inner.attached.push((sink, track.clone()));
        Ok(sink)
    }

    async fn detach(&self, sink: SinkId) {
        self.inner.lock().unwrap().detached.push(sink);
    }

    async fn send_data(&self, payload: Bytes) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.disconnected {
            return Err(SessionError::Internal("data channel closed".to_string()));
        }
        inner.sent.push(payload);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.disconnected = true;
        inner.events_tx = None;
    }
}
