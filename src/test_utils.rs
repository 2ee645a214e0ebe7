//! Scripted collaborators for tests: an engine, an HTTP client and a TURN
//! credential service that record what they were asked to do.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use webrtckit_core::engine::{
    CameraFacing, EngineError, EngineEvent, IceServerConfig, PeerConnectionEngine,
    PeerConnectionState,
};
use webrtckit_core::net::{HttpClient, HttpRequest, HttpResponse};
use webrtckit_core::signaling::{IceCandidate, SessionDescription};
use webrtckit_core::stats::RawStatsEntry;
use webrtckit_core::turn::TurnCredential;

use crate::turn::{TurnCredentialError, TurnCredentialService};

pub const MOCK_OFFER_SDP: &str =
    "v=0\r\no=mock 1 1 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";
pub const MOCK_ANSWER_SDP: &str =
    "v=0\r\no=mock 2 1 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";

#[derive(Default)]
struct EngineRecord {
    calls: Vec<String>,
    failures: HashSet<String>,
    next_failures: HashSet<String>,
    events: Option<mpsc::Sender<EngineEvent>>,
    ice_servers: Vec<IceServerConfig>,
    added_candidates: Vec<IceCandidate>,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    camera_enabled: bool,
    microphone_enabled: bool,
    capturing: bool,
    facing: CameraFacing,
    stats: Vec<RawStatsEntry>,
    state: PeerConnectionState,
}

/// An engine without media.
///
/// With [`with_auto_connect`](Self::with_auto_connect), setting the local
/// description emits one local candidate and having both descriptions emits
/// `Connecting` then `Connected`, which lets two view models complete a call.
#[derive(Default)]
pub struct MockPeerConnectionEngine {
    record: Mutex<EngineRecord>,
    auto_connect: bool,
    candidate_counter: AtomicUsize,
}

impl MockPeerConnectionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_connect(mut self) -> Self {
        self.auto_connect = true;
        self
    }

    fn record(&self) -> std::sync::MutexGuard<'_, EngineRecord> {
        self.record.lock().expect("mock engine lock poisoned")
    }

    /// Makes every later call of `op` fail with [`EngineError::Internal`].
    pub fn fail_on(&self, op: &str) {
        self.record().failures.insert(op.to_string());
    }

    /// Makes only the next call of `op` fail.
    pub fn fail_once(&self, op: &str) {
        self.record().next_failures.insert(op.to_string());
    }

    pub fn clear_failures(&self) {
        let mut record = self.record();
        record.failures.clear();
        record.next_failures.clear();
    }

    /// Emits `event` as if the engine had produced it.
    pub async fn emit(&self, event: EngineEvent) {
        if let EngineEvent::ConnectionState(state) = &event {
            self.record().state = *state;
        }
        let sender = self.record().events.clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    pub fn set_stats(&self, entries: Vec<RawStatsEntry>) {
        self.record().stats = entries;
    }

    pub fn calls(&self) -> Vec<String> {
        self.record().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.record().calls.iter().filter(|c| c.as_str() == op).count()
    }

    pub fn ice_servers(&self) -> Vec<IceServerConfig> {
        self.record().ice_servers.clone()
    }

    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        self.record().added_candidates.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.record().local_description.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.record().remote_description.clone()
    }

    pub fn camera_enabled(&self) -> bool {
        self.record().camera_enabled
    }

    pub fn microphone_enabled(&self) -> bool {
        self.record().microphone_enabled
    }

    pub fn is_capturing(&self) -> bool {
        self.record().capturing
    }

    fn enter(&self, call: &str, op: &str) -> Result<(), EngineError> {
        let mut record = self.record();
        record.calls.push(call.to_string());
        if record.next_failures.remove(op) || record.failures.contains(op) {
            return Err(EngineError::Internal(format!("{op} failed")));
        }
        Ok(())
    }

    fn require_initialized(&self) -> Result<(), EngineError> {
        if self.record().events.is_none() {
            return Err(EngineError::NotInitialized);
        }
        Ok(())
    }

    async fn connect_if_negotiated(&self) {
        let negotiated = {
            let record = self.record();
            record.local_description.is_some() && record.remote_description.is_some()
        };
        if self.auto_connect && negotiated {
            self.emit(EngineEvent::ConnectionState(PeerConnectionState::Connecting))
                .await;
            self.emit(EngineEvent::ConnectionState(PeerConnectionState::Connected))
                .await;
        }
    }
}

#[async_trait]
impl PeerConnectionEngine for MockPeerConnectionEngine {
    async fn initialize(
        &self,
        _session_id: &str,
        ice_servers: Vec<IceServerConfig>,
    ) -> Result<mpsc::Receiver<EngineEvent>, EngineError> {
        self.enter("initialize", "initialize")?;
        let (tx, rx) = mpsc::channel(100);
        let mut record = self.record();
        record.events = Some(tx);
        record.ice_servers = ice_servers;
        record.local_description = None;
        record.remote_description = None;
        record.added_candidates.clear();
        record.camera_enabled = true;
        record.microphone_enabled = true;
        record.state = PeerConnectionState::New;
        Ok(rx)
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, EngineError> {
        let call = if ice_restart {
            "create_offer(ice_restart)"
        } else {
            "create_offer"
        };
        self.enter(call, "create_offer")?;
        self.require_initialized()?;
        Ok(SessionDescription::offer(MOCK_OFFER_SDP))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        self.enter("create_answer", "create_answer")?;
        self.require_initialized()?;
        if self.record().remote_description.is_none() {
            return Err(EngineError::Sdp("no remote offer".to_string()));
        }
        Ok(SessionDescription::answer(MOCK_ANSWER_SDP))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        self.enter("set_local_description", "set_local_description")?;
        self.require_initialized()?;
        self.record().local_description = Some(description);
        if self.auto_connect {
            let n = self.candidate_counter.fetch_add(1, Ordering::Relaxed);
            let candidate = IceCandidate::new(format!(
                "candidate:{n} 1 UDP 2130706431 127.0.0.1 {} typ host",
                50_000 + n
            ))
            .with_sdp_mid("0")
            .with_sdp_m_line_index(0);
            self.emit(EngineEvent::LocalCandidate(candidate)).await;
        }
        self.connect_if_negotiated().await;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        self.enter("set_remote_description", "set_remote_description")?;
        self.require_initialized()?;
        self.record().remote_description = Some(description);
        self.connect_if_negotiated().await;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.enter("add_ice_candidate", "add_ice_candidate")?;
        self.require_initialized()?;
        self.record().added_candidates.push(candidate);
        Ok(())
    }

    async fn start_local_capture(&self) -> Result<(), EngineError> {
        self.enter("start_local_capture", "start_local_capture")?;
        self.record().capturing = true;
        Ok(())
    }

    async fn stop_local_capture(&self) -> Result<(), EngineError> {
        self.enter("stop_local_capture", "stop_local_capture")?;
        self.record().capturing = false;
        Ok(())
    }

    async fn set_camera_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        self.enter("set_camera_enabled", "set_camera_enabled")?;
        self.record().camera_enabled = enabled;
        Ok(())
    }

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        self.enter("set_microphone_enabled", "set_microphone_enabled")?;
        self.record().microphone_enabled = enabled;
        Ok(())
    }

    async fn switch_camera(&self) -> Result<CameraFacing, EngineError> {
        self.enter("switch_camera", "switch_camera")?;
        let mut record = self.record();
        record.facing = record.facing.flipped();
        Ok(record.facing)
    }

    async fn collect_stats(&self) -> Result<Vec<RawStatsEntry>, EngineError> {
        self.enter("collect_stats", "collect_stats")?;
        Ok(self.record().stats.clone())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.enter("close", "close")?;
        let mut record = self.record();
        record.events = None;
        record.capturing = false;
        record.state = PeerConnectionState::Closed;
        Ok(())
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.record().state
    }
}

/// Replays queued responses in order; answers `200` with an empty body once
/// the queue is empty.
#[derive(Debug, Default)]
pub struct MockHttpClient {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Option<Duration>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every response, to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_response(&self, response: HttpResponse) {
        self.responses
            .lock()
            .expect("mock http lock poisoned")
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("mock http lock poisoned").clone()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        self.requests
            .lock()
            .expect("mock http lock poisoned")
            .push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = self
            .responses
            .lock()
            .expect("mock http lock poisoned")
            .pop_front();
        Ok(response.unwrap_or_else(|| HttpResponse::empty(200)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FailingMockHttpClient;

#[async_trait]
impl HttpClient for FailingMockHttpClient {
    async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        Err(anyhow::anyhow!("connection refused"))
    }
}

/// Issues a fixed relay credential per session and counts lookups.
#[derive(Debug)]
pub struct MockTurnCredentialService {
    calls: AtomicUsize,
    ttl: i64,
    delay: Option<Duration>,
    failure: Option<TurnCredentialError>,
}

impl Default for MockTurnCredentialService {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            ttl: 3600,
            delay: None,
            failure: None,
        }
    }
}

impl MockTurnCredentialService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_with(mut self, error: TurnCredentialError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TurnCredentialService for MockTurnCredentialService {
    async fn get_credentials(
        &self,
        session_id: &str,
    ) -> Result<TurnCredential, TurnCredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(TurnCredential {
            username: format!("1700000000:{session_id}"),
            password: "mock-password".to_string(),
            ttl: self.ttl,
            urls: vec!["turn:turn.example.org:3478?transport=udp".to_string()],
        })
    }
}
