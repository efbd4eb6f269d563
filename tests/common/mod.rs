//! Shared test fixtures: a recording delegate and a scripted media factory.

#![allow(dead_code)]

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use webrtc_call_engine::{
    AppEvent, AudioSource, AudioTrack, CallDelegate, CallId, CallManager, CameraCapturer,
    ConnectionEnvelope, ConnectionEvent, ConnectionEventSender, ConnectionParameters, DeviceId,
    EngineConfig, EventToken, IceCandidate, MediaFactory, MediaResult, MediaStream, PeerConnection,
    RemoteHandle, RemotePeer, SignalingMessage, VideoSource, VideoTrack,
};

// ===== Remote parties =====

#[derive(Debug)]
pub struct TestRemote {
    pub name: String,
}

impl RemotePeer for TestRemote {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn remote(name: &str) -> RemoteHandle {
    Arc::new(TestRemote {
        name: name.to_string(),
    })
}

pub fn remote_name(handle: &RemoteHandle) -> String {
    handle
        .as_any()
        .downcast_ref::<TestRemote>()
        .map(|peer| peer.name.clone())
        .unwrap_or_default()
}

// ===== Recording delegate =====

/// Everything the engine told the application, in delivery order.
#[derive(Debug, Clone)]
pub enum Recorded {
    StartCall {
        call_id: CallId,
        remote: String,
        outbound: bool,
    },
    Event {
        remote: String,
        event: AppEvent,
    },
    Send {
        call_id: CallId,
        remote: String,
        dest_device: Option<DeviceId>,
        message: SignalingMessage,
    },
    LocalVideoSession {
        remote: String,
        enabled: bool,
    },
    RemoteVideoTrack {
        remote: String,
    },
    Concluded {
        remote: String,
    },
}

pub struct RecordingDelegate {
    tx: mpsc::UnboundedSender<Recorded>,
}

impl RecordingDelegate {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Recorded>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn record(&self, recorded: Recorded) {
        let _ = self.tx.send(recorded);
    }
}

#[async_trait]
impl CallDelegate for RecordingDelegate {
    async fn should_start_call(&self, call_id: CallId, remote: RemoteHandle, outbound: bool) {
        self.record(Recorded::StartCall {
            call_id,
            remote: remote_name(&remote),
            outbound,
        });
    }

    async fn on_event(&self, remote: RemoteHandle, event: AppEvent) {
        self.record(Recorded::Event {
            remote: remote_name(&remote),
            event,
        });
    }

    async fn should_send(
        &self,
        call_id: CallId,
        remote: RemoteHandle,
        dest_device: Option<DeviceId>,
        message: SignalingMessage,
    ) {
        self.record(Recorded::Send {
            call_id,
            remote: remote_name(&remote),
            dest_device,
            message,
        });
    }

    fn should_compare_calls(
        &self,
        _token: &EventToken,
        remote1: &RemoteHandle,
        remote2: &RemoteHandle,
    ) -> bool {
        remote_name(remote1) == remote_name(remote2)
    }

    async fn on_update_local_video_session(
        &self,
        remote: RemoteHandle,
        session: Option<Arc<dyn VideoSource>>,
    ) {
        self.record(Recorded::LocalVideoSession {
            remote: remote_name(&remote),
            enabled: session.is_some(),
        });
    }

    async fn on_add_remote_video_track(&self, remote: RemoteHandle, _track: Arc<dyn VideoTrack>) {
        self.record(Recorded::RemoteVideoTrack {
            remote: remote_name(&remote),
        });
    }

    async fn on_call_concluded(&self, remote: RemoteHandle) {
        self.record(Recorded::Concluded {
            remote: remote_name(&remote),
        });
    }
}

// ===== Scripted media factory =====

#[derive(Debug, Default)]
pub struct MockAudioSource;
impl AudioSource for MockAudioSource {}

#[derive(Debug, Default)]
pub struct MockVideoSource;
impl VideoSource for MockVideoSource {}

#[derive(Debug, Default)]
pub struct MockAudioTrack {
    pub enabled: AtomicBool,
}

impl AudioTrack for MockAudioTrack {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct MockVideoTrack {
    pub enabled: AtomicBool,
}

impl VideoTrack for MockVideoTrack {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct MockCapturer {
    pub front_facing: AtomicBool,
}

impl CameraCapturer for MockCapturer {
    fn set_front_facing(&self, front: bool) {
        self.front_facing.store(front, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MockStream {
    tracks: Vec<Arc<dyn VideoTrack>>,
}

impl MockStream {
    pub fn audio_only() -> Arc<Self> {
        Arc::new(Self { tracks: Vec::new() })
    }

    pub fn with_video() -> Arc<Self> {
        Arc::new(Self {
            tracks: vec![Arc::new(MockVideoTrack::default()) as Arc<dyn VideoTrack>],
        })
    }
}

impl MediaStream for MockStream {
    fn video_tracks(&self) -> Vec<Arc<dyn VideoTrack>> {
        self.tracks.clone()
    }
}

#[derive(Debug, Default)]
pub struct MockConnection {
    pub local_description: Mutex<Option<String>>,
    pub remote_description: Mutex<Option<String>>,
    pub remote_candidates: Mutex<Vec<IceCandidate>>,
    pub closed: AtomicBool,
}

impl PeerConnection for MockConnection {
    fn create_offer(&self) -> MediaResult<String> {
        Ok("v=0 mock-offer".to_string())
    }

    fn create_answer(&self) -> MediaResult<String> {
        Ok("v=0 mock-answer".to_string())
    }

    fn set_local_description(&self, sdp: &str) -> MediaResult<()> {
        *self.local_description.lock().unwrap() = Some(sdp.to_string());
        Ok(())
    }

    fn set_remote_description(&self, sdp: &str) -> MediaResult<()> {
        *self.remote_description.lock().unwrap() = Some(sdp.to_string());
        Ok(())
    }

    fn add_ice_candidate(&self, candidate: &IceCandidate) -> MediaResult<()> {
        self.remote_candidates.lock().unwrap().push(candidate.clone());
        Ok(())
    }

    fn add_audio_sender(&self, _track: Arc<dyn AudioTrack>) -> MediaResult<()> {
        Ok(())
    }

    fn add_video_sender(&self, _track: Arc<dyn VideoTrack>) -> MediaResult<()> {
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct MockConnectionHandle {
    pub parameters: ConnectionParameters,
    pub connection: Arc<MockConnection>,
    events: ConnectionEventSender,
}

/// Factory that records every created object and lets the test script the
/// peer connection's progress.
#[derive(Debug, Default)]
pub struct MockFactory {
    connections: Mutex<HashMap<CallId, MockConnectionHandle>>,
    pub audio_track: Mutex<Option<Arc<MockAudioTrack>>>,
    pub video_track: Mutex<Option<Arc<MockVideoTrack>>>,
    pub capturer: Mutex<Option<Arc<MockCapturer>>>,
}

impl std::fmt::Debug for MockConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnectionHandle")
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection(&self, call_id: CallId) -> MockConnectionHandle {
        self.connections
            .lock()
            .unwrap()
            .get(&call_id)
            .cloned()
            .unwrap_or_else(|| panic!("no connection created for {}", call_id))
    }

    pub fn has_connection(&self, call_id: CallId) -> bool {
        self.connections.lock().unwrap().contains_key(&call_id)
    }

    /// Script a connection event, as the WebRTC callbacks would.
    pub async fn drive(&self, call_id: CallId, event: ConnectionEvent) {
        let handle = self.connection(call_id);
        handle
            .events
            .send(ConnectionEnvelope {
                call_id,
                device_id: handle.parameters.remote_device,
                event,
            })
            .await
            .expect("engine is listening for connection events");
    }
}

impl MediaFactory for MockFactory {
    fn create_audio_source(&self) -> MediaResult<Arc<dyn AudioSource>> {
        Ok(Arc::new(MockAudioSource))
    }

    fn create_audio_track(&self, _source: &Arc<dyn AudioSource>) -> MediaResult<Arc<dyn AudioTrack>> {
        let track = Arc::new(MockAudioTrack::default());
        *self.audio_track.lock().unwrap() = Some(track.clone());
        Ok(track)
    }

    fn create_video_source(&self) -> MediaResult<Arc<dyn VideoSource>> {
        Ok(Arc::new(MockVideoSource))
    }

    fn create_video_track(&self, _source: &Arc<dyn VideoSource>) -> MediaResult<Arc<dyn VideoTrack>> {
        let track = Arc::new(MockVideoTrack::default());
        *self.video_track.lock().unwrap() = Some(track.clone());
        Ok(track)
    }

    fn create_camera_capturer(
        &self,
        _source: &Arc<dyn VideoSource>,
    ) -> MediaResult<Arc<dyn CameraCapturer>> {
        let capturer = Arc::new(MockCapturer::default());
        *self.capturer.lock().unwrap() = Some(capturer.clone());
        Ok(capturer)
    }

    fn create_peer_connection(
        &self,
        parameters: ConnectionParameters,
        events: ConnectionEventSender,
    ) -> MediaResult<Arc<dyn PeerConnection>> {
        let connection = Arc::new(MockConnection::default());
        let handle = MockConnectionHandle {
            parameters: parameters.clone(),
            connection: connection.clone(),
            events,
        };
        self.connections
            .lock()
            .unwrap()
            .insert(parameters.call_id, handle);
        Ok(connection)
    }
}

// ===== Harness =====

pub struct TestEnv {
    pub manager: CallManager,
    pub factory: Arc<MockFactory>,
    pub events: mpsc::UnboundedReceiver<Recorded>,
}

pub fn setup(config: EngineConfig) -> TestEnv {
    let (delegate, events) = RecordingDelegate::new();
    let factory = MockFactory::new();
    let manager = CallManager::new(delegate, factory.clone(), config);
    TestEnv {
        manager,
        factory,
        events,
    }
}

pub fn setup_default() -> TestEnv {
    setup(EngineConfig::default())
}

/// Receive the next recorded callback, failing the test after a second of
/// silence.
pub async fn next(events: &mut mpsc::UnboundedReceiver<Recorded>) -> Recorded {
    tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("timed out waiting for a delegate callback")
        .expect("delegate channel closed")
}

/// Assert that no further callbacks arrive within a short window.
pub async fn assert_quiet(events: &mut mpsc::UnboundedReceiver<Recorded>) {
    match tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
        Err(_) => {}
        Ok(recorded) => panic!("unexpected delegate callback: {:?}", recorded),
    }
}

/// Drive an outbound call to `Connected`, answered by device 1 of the
/// `[1, 2]` fan-out.
pub async fn connect_outbound(env: &mut TestEnv, name: &str) -> CallId {
    let call_id = env.manager.place(remote(name)).await.unwrap();
    match next(&mut env.events).await {
        Recorded::StartCall {
            call_id: id,
            outbound: true,
            ..
        } => assert_eq!(id, call_id),
        other => panic!("expected start-call, got {:?}", other),
    }

    env.manager
        .proceed(
            call_id,
            vec!["stun:stun.example.org".to_string()],
            false,
            vec![1, 2],
        )
        .await
        .unwrap();
    match next(&mut env.events).await {
        Recorded::Send {
            call_id: id,
            dest_device: None,
            message: SignalingMessage::Offer { .. },
            ..
        } => assert_eq!(id, call_id),
        other => panic!("expected broadcast offer, got {:?}", other),
    }
    env.manager.message_sent(call_id).await.unwrap();

    env.manager
        .receive_answer(call_id, 1, "v=0 remote-answer".to_string())
        .await
        .unwrap();

    env.factory.drive(call_id, ConnectionEvent::IceConnected).await;
    expect_event(&mut env.events, AppEvent::RingingRemote).await;

    env.factory
        .drive(
            call_id,
            ConnectionEvent::RemoteMediaConnected(MockStream::audio_only()),
        )
        .await;
    expect_event(&mut env.events, AppEvent::ConnectedRemote).await;
    expect_event(&mut env.events, AppEvent::ConnectedLocal).await;

    call_id
}

pub async fn expect_event(events: &mut mpsc::UnboundedReceiver<Recorded>, expected: AppEvent) {
    match next(events).await {
        Recorded::Event { event, .. } if event == expected => {}
        other => panic!("expected event {:?}, got {:?}", expected, other),
    }
}

pub async fn expect_concluded(events: &mut mpsc::UnboundedReceiver<Recorded>, name: &str) {
    match next(events).await {
        Recorded::Concluded { remote } if remote == name => {}
        other => panic!("expected conclusion of {}, got {:?}", name, other),
    }
}
