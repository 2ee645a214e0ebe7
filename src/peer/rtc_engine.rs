//! [`PeerConnectionEngine`] backed by webrtc-rs.
//!
//! Capture is owned by the host: it renders frames from the camera the
//! [`WebRtcEngine::camera_facing`] channel names, encodes them, and hands the
//! encoded samples to [`WebRtcEngine::write_video_sample`] and
//! [`WebRtcEngine::write_audio_sample`]. Disabled devices drop their samples.

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;
use webrtckit_core::engine::{
    CameraFacing, EngineError, EngineEvent, IceServerConfig, MediaKind, PeerConnectionEngine,
    PeerConnectionState,
};
use webrtckit_core::signaling::{IceCandidate, SdpType, SessionDescription};
use webrtckit_core::stats::RawStatsEntry;

const EVENT_CHANNEL_CAPACITY: usize = 100;
const STREAM_ID: &str = "webrtckit";
const RTCP_BUFFER_SIZE: usize = 1500;

struct LocalTrack {
    track: Arc<TrackLocalStaticSample>,
    sender: Arc<RTCRtpSender>,
}

struct Session {
    peer_connection: Arc<RTCPeerConnection>,
    audio: Option<LocalTrack>,
    video: Option<LocalTrack>,
}

pub struct WebRtcEngine {
    session: Mutex<Option<Session>>,
    state: Arc<watch::Sender<PeerConnectionState>>,
    facing: watch::Sender<CameraFacing>,
    camera_enabled: AtomicBool,
    microphone_enabled: AtomicBool,
}

impl Default for WebRtcEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WebRtcEngine {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            state: Arc::new(watch::channel(PeerConnectionState::New).0),
            facing: watch::channel(CameraFacing::Front).0,
            camera_enabled: AtomicBool::new(true),
            microphone_enabled: AtomicBool::new(true),
        }
    }

    /// The camera the host should capture from.
    pub fn camera_facing(&self) -> watch::Receiver<CameraFacing> {
        self.facing.subscribe()
    }

    pub async fn write_video_sample(
        &self,
        data: Bytes,
        duration: Duration,
    ) -> Result<(), EngineError> {
        if !self.camera_enabled.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.write_sample(MediaKind::Video, data, duration).await
    }

    pub async fn write_audio_sample(
        &self,
        data: Bytes,
        duration: Duration,
    ) -> Result<(), EngineError> {
        if !self.microphone_enabled.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.write_sample(MediaKind::Audio, data, duration).await
    }

    async fn write_sample(
        &self,
        kind: MediaKind,
        data: Bytes,
        duration: Duration,
    ) -> Result<(), EngineError> {
        let track = {
            let session = self.session.lock().await;
            let session = session.as_ref().ok_or(EngineError::NotInitialized)?;
            let local = match kind {
                MediaKind::Audio => session.audio.as_ref(),
                MediaKind::Video => session.video.as_ref(),
            };
            match local {
                Some(local) => Arc::clone(&local.track),
                None => return Ok(()),
            }
        };
        track
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
            .map_err(|e| EngineError::Media(e.to_string()))
    }

    async fn peer_connection(&self) -> Result<Arc<RTCPeerConnection>, EngineError> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| Arc::clone(&s.peer_connection))
            .ok_or(EngineError::NotInitialized)
    }

    fn create_api() -> Result<webrtc::api::API, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(internal)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(internal)?;

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }

    fn register_callbacks(&self, pc: &RTCPeerConnection, events: mpsc::Sender<EngineEvent>) {
        let candidate_tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                let event = match candidate.map(|c| c.to_json()) {
                    Some(Ok(init)) => EngineEvent::LocalCandidate(from_candidate_init(init)),
                    Some(Err(e)) => {
                        warn!("Failed to serialize local ICE candidate: {e}");
                        return;
                    }
                    None => EngineEvent::IceGatheringComplete,
                };
                let _ = tx.send(event).await;
            })
        }));

        let state_tx = events.clone();
        let state = Arc::clone(&self.state);
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            let state = Arc::clone(&state);
            Box::pin(async move {
                let mapped = map_connection_state(s);
                state.send_replace(mapped);
                let _ = tx.send(EngineEvent::ConnectionState(mapped)).await;
            })
        }));

        let track_tx = events;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let tx = track_tx.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => MediaKind::Audio,
                        RTPCodecType::Video => MediaKind::Video,
                        other => {
                            debug!("Ignoring remote track of kind {other:?}");
                            return;
                        }
                    };
                    info!("Remote {kind:?} track received");
                    let _ = tx.send(EngineEvent::RemoteTrack(kind)).await;
                })
            },
        ));
    }

    async fn add_local_track(
        pc: &RTCPeerConnection,
        mime_type: &str,
        track_id: &str,
    ) -> Result<LocalTrack, EngineError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_string(),
                ..Default::default()
            },
            track_id.to_string(),
            STREAM_ID.to_string(),
        ));
        let sender = pc
            .add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| EngineError::Media(e.to_string()))?;

        // RTCP must be drained for the interceptors to run.
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; RTCP_BUFFER_SIZE];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        Ok(LocalTrack { track, sender })
    }
}

#[async_trait]
impl PeerConnectionEngine for WebRtcEngine {
    async fn initialize(
        &self,
        session_id: &str,
        ice_servers: Vec<IceServerConfig>,
    ) -> Result<mpsc::Receiver<EngineEvent>, EngineError> {
        if let Some(previous) = self.session.lock().await.take() {
            if let Err(e) = previous.peer_connection.close().await {
                debug!("Closing previous peer connection failed: {e}");
            }
        }

        let api = Self::create_api()?;
        let config = RTCConfiguration {
            ice_servers: ice_servers.into_iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        };
        let pc = api.new_peer_connection(config).await.map_err(internal)?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.register_callbacks(&pc, tx);
        self.state.send_replace(PeerConnectionState::New);

        *self.session.lock().await = Some(Session {
            peer_connection: Arc::new(pc),
            audio: None,
            video: None,
        });
        info!("Created peer connection for session {session_id}");
        Ok(rx)
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, EngineError> {
        let pc = self.peer_connection().await?;
        let options = RTCOfferOptions {
            ice_restart,
            ..Default::default()
        };
        let offer = pc
            .create_offer(Some(options))
            .await
            .map_err(|e| EngineError::Sdp(e.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let pc = self.peer_connection().await?;
        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| EngineError::Sdp(e.to_string()))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        let pc = self.peer_connection().await?;
        pc.set_local_description(to_rtc_description(description)?)
            .await
            .map_err(|e| EngineError::Sdp(e.to_string()))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        let pc = self.peer_connection().await?;
        pc.set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(|e| EngineError::Sdp(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        let pc = self.peer_connection().await?;
        pc.add_ice_candidate(RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        })
        .await
        .map_err(|e| EngineError::Ice(e.to_string()))
    }

    async fn start_local_capture(&self) -> Result<(), EngineError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(EngineError::NotInitialized)?;
        if session.audio.is_none() {
            session.audio =
                Some(Self::add_local_track(&session.peer_connection, "audio/opus", "audio").await?);
        }
        if session.video.is_none() {
            session.video =
                Some(Self::add_local_track(&session.peer_connection, "video/VP8", "video").await?);
        }
        debug!("Local audio and video tracks attached");
        Ok(())
    }

    async fn stop_local_capture(&self) -> Result<(), EngineError> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return Ok(());
        };
        for local in [session.audio.take(), session.video.take()].into_iter().flatten() {
            if let Err(e) = session.peer_connection.remove_track(&local.sender).await {
                debug!("Removing local track failed: {e}");
            }
        }
        Ok(())
    }

    async fn set_camera_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        self.camera_enabled.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        self.microphone_enabled.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    async fn switch_camera(&self) -> Result<CameraFacing, EngineError> {
        let mut facing = CameraFacing::Front;
        self.facing.send_modify(|current| {
            *current = current.flipped();
            facing = *current;
        });
        Ok(facing)
    }

    async fn collect_stats(&self) -> Result<Vec<RawStatsEntry>, EngineError> {
        let pc = self.peer_connection().await?;
        let report = pc.get_stats().await;
        let value = serde_json::to_value(&report).map_err(internal)?;
        let mut entries = Vec::new();
        flatten_stats(&value, &mut entries);
        Ok(entries)
    }

    async fn close(&self) -> Result<(), EngineError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        self.state.send_replace(PeerConnectionState::Closed);
        session.peer_connection.close().await.map_err(internal)
    }

    fn connection_state(&self) -> PeerConnectionState {
        *self.state.borrow()
    }
}

fn internal(e: impl std::fmt::Display) -> EngineError {
    EngineError::Internal(e.to_string())
}

fn to_rtc_ice_server(server: IceServerConfig) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls,
        username: server.username,
        credential: server.credential,
        ..Default::default()
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let converted = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
    };
    converted.map_err(|e| EngineError::Sdp(e.to_string()))
}

fn from_candidate_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn map_connection_state(state: RTCPeerConnectionState) -> PeerConnectionState {
    match state {
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        _ => PeerConnectionState::New,
    }
}

/// Collects every object carrying a `"type"` member as one stats entry.
///
/// Reports come as a map of id to entry, where an entry may be wrapped in a
/// single-key enum object; both shapes are walked.
fn flatten_stats(value: &Value, out: &mut Vec<RawStatsEntry>) {
    match value {
        Value::Object(map) => {
            if let Some(kind) = map.get("type").and_then(Value::as_str) {
                let id = map.get("id").and_then(Value::as_str).unwrap_or_default();
                let mut entry = RawStatsEntry::new(id, kind);
                for (key, member) in map {
                    if let Some(number) = member.as_f64() {
                        entry.values.insert(camel_case(key), number);
                    }
                }
                out.push(entry);
            } else {
                map.values().for_each(|v| flatten_stats(v, out));
            }
        }
        Value::Array(items) => items.iter().for_each(|v| flatten_stats(v, out)),
        _ => {}
    }
}

fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
