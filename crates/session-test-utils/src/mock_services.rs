//! Mock backend services: session record API, room status probe,
//! segmentation model and background image loader.

use async_trait::async_trait;
use common::secret::JoinToken;
use image::{GrayImage, Luma, Rgba, RgbaImage};
use session_engine::compositor::{ImageLoader, SegmentationService, Segmenter};
use session_engine::errors::SessionError;
use session_engine::media::VideoFrame;
use session_engine::room::{RoomStatus, RoomStatusProbe, SessionApi, SessionKind, SessionRecord};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// A call made against [`MockSessionApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    CreateSession {
        kind: SessionKind,
        resource_id: String,
    },
    EndSession {
        room_name: String,
    },
    JoinCredential {
        room_name: String,
        is_host: bool,
    },
}

/// Mock session record API.
#[derive(Debug, Clone, Default)]
pub struct MockSessionApi {
    inner: Arc<Mutex<ApiInner>>,
    create_gate: Option<Arc<Notify>>,
}

#[derive(Debug, Default)]
struct ApiInner {
    calls: Vec<ApiCall>,
    fail_create: bool,
    fail_end: bool,
    fail_credential: bool,
}

impl MockSessionApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every `create_session` call until [`release_create`](Self::release_create).
    #[must_use]
    pub fn with_create_gate(mut self) -> Self {
        self.create_gate = Some(Arc::new(Notify::new()));
        self
    }

    /// Let one gated `create_session` call through.
    pub fn release_create(&self) {
        if let Some(gate) = &self.create_gate {
            gate.notify_one();
        }
    }

    pub fn fail_create(&self, fail: bool) {
        self.inner.lock().unwrap().fail_create = fail;
    }

    pub fn fail_end(&self, fail: bool) {
        self.inner.lock().unwrap().fail_end = fail;
    }

    pub fn fail_credential(&self, fail: bool) {
        self.inner.lock().unwrap().fail_credential = fail;
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ApiCall::CreateSession { .. }))
            .count()
    }

    pub fn end_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ApiCall::EndSession { .. }))
            .count()
    }
}

#[async_trait]
impl SessionApi for MockSessionApi {
    async fn create_session(
        &self,
        kind: SessionKind,
        resource_id: &str,
    ) -> Result<SessionRecord, SessionError> {
        let fail = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(ApiCall::CreateSession {
                kind,
                resource_id: resource_id.to_string(),
            });
            inner.fail_create
        };
        if let Some(gate) = &self.create_gate {
            gate.notified().await;
        }
        if fail {
            return Err(SessionError::Credential("create session rejected".to_string()));
        }
        Ok(SessionRecord {
            room_name: format!("{}-{resource_id}", kind.as_str()),
        })
    }

    async fn end_session(&self, room_name: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ApiCall::EndSession {
            room_name: room_name.to_string(),
        });
        if inner.fail_end {
            return Err(SessionError::Credential("end session rejected".to_string()));
        }
        Ok(())
    }

    async fn get_join_credential(
        &self,
        room_name: &str,
        is_host: bool,
    ) -> Result<JoinToken, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(ApiCall::JoinCredential {
            room_name: room_name.to_string(),
            is_host,
        });
        if inner.fail_credential {
            return Err(SessionError::Credential("credential denied".to_string()));
        }
        let role = if is_host { "host" } else { "guest" };
        Ok(JoinToken::from(format!("token-{room_name}-{role}")))
    }
}

/// Room status probe replaying a script; the last entry repeats.
#[derive(Debug, Clone, Default)]
pub struct MockRoomStatusProbe {
    inner: Arc<Mutex<ProbeInner>>,
}

#[derive(Debug, Default)]
struct ProbeInner {
    script: VecDeque<Result<RoomStatus, SessionError>>,
    last: RoomStatus,
    polls: usize,
}

impl MockRoomStatusProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next poll result.
    #[must_use]
    pub fn then(self, result: Result<RoomStatus, SessionError>) -> Self {
        self.inner.lock().unwrap().script.push_back(result);
        self
    }

    pub fn polls(&self) -> usize {
        self.inner.lock().unwrap().polls
    }
}

#[async_trait]
impl RoomStatusProbe for MockRoomStatusProbe {
    async fn get_room_status(&self, _resource_id: &str) -> Result<RoomStatus, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        inner.polls += 1;
        match inner.script.pop_front() {
            Some(Ok(status)) => {
                inner.last = status;
                Ok(status)
            }
            Some(Err(e)) => Err(e),
            None => Ok(inner.last),
        }
    }
}

/// Segmentation model that marks every pixel as person.
#[derive(Debug, Default)]
pub struct MockSegmentation {
    inner: Mutex<SegmentationInner>,
}

#[derive(Debug, Default)]
struct SegmentationInner {
    fail_load: bool,
    loads: usize,
    inferences: usize,
}

impl MockSegmentation {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A model whose load always fails.
    #[must_use]
    pub fn failing() -> Arc<Self> {
        let model = Self::default();
        model.inner.lock().unwrap().fail_load = true;
        Arc::new(model)
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.inner.lock().unwrap().fail_load = fail;
    }

    pub fn loads(&self) -> usize {
        self.inner.lock().unwrap().loads
    }

    pub fn inferences(&self) -> usize {
        self.inner.lock().unwrap().inferences
    }

    /// Wrap this model in a fresh [`Segmenter`].
    pub fn segmenter(self: &Arc<Self>) -> Arc<Segmenter> {
        Arc::new(Segmenter::new(Arc::clone(self) as Arc<dyn SegmentationService>))
    }
}

#[async_trait]
impl SegmentationService for MockSegmentation {
    async fn load_model(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().unwrap();
        inner.loads += 1;
        if inner.fail_load {
            return Err(SessionError::SegmentationInitFailed(
                "model asset missing".to_string(),
            ));
        }
        Ok(())
    }

    async fn infer(&self, frame: &VideoFrame) -> Result<GrayImage, SessionError> {
        self.inner.lock().unwrap().inferences += 1;
        let (width, height) = frame.dimensions();
        Ok(GrayImage::from_pixel(width, height, Luma([255])))
    }
}

/// Background loader returning a solid image, or failing for listed URLs.
#[derive(Debug, Clone, Default)]
pub struct MockImageLoader {
    inner: Arc<Mutex<LoaderInner>>,
}

#[derive(Debug, Default)]
struct LoaderInner {
    broken: Vec<String>,
    loaded: Vec<String>,
}

impl MockImageLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make loading `url` fail.
    #[must_use]
    pub fn with_broken(self, url: &str) -> Self {
        self.inner.lock().unwrap().broken.push(url.to_string());
        self
    }

    /// URLs requested, in order.
    pub fn loaded(&self) -> Vec<String> {
        self.inner.lock().unwrap().loaded.clone()
    }
}

#[async_trait]
impl ImageLoader for MockImageLoader {
    async fn load(&self, url: &str) -> Result<RgbaImage, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        inner.loaded.push(url.to_string());
        if inner.broken.iter().any(|b| b == url) {
            return Err(SessionError::BackgroundLoadFailed(format!("404 {url}")));
        }
        Ok(RgbaImage::from_pixel(16, 9, Rgba([20, 90, 160, 255])))
    }
}
