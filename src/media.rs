//! Media-plane collaborator contract.
//!
//! The engine never talks to WebRTC directly. The embedder injects a
//! [`MediaFactory`] able to mint audio/video sources and tracks, a camera
//! capturer, and peer connections; the engine drives those handles and the
//! peer connection reports its progress back through a [`ConnectionEvent`]
//! channel that is marshalled onto the event task.
//!
//! All methods here are synchronous and may block the caller briefly.
//! Implementations must not call back into the engine façade from them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{CallId, DeviceId, IceCandidate};

/// Result type for media-plane calls.
pub type MediaResult<T> = std::result::Result<T, MediaError>;

/// Failure reported by the media factory or a peer connection.
#[derive(Error, Debug, Clone)]
#[error("media failure: {reason}")]
pub struct MediaError {
    pub reason: String,
}

impl MediaError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// ICE transport policy, derived from the call's IP-hiding flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IceTransportPolicy {
    All,
    Relay,
}

/// Media bundling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundlePolicy {
    Balanced,
    MaxBundle,
}

/// RTCP multiplexing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RtcpMuxPolicy {
    Negotiate,
    Require,
}

/// Everything needed to construct a peer connection for a call.
///
/// `remote_device` is known up front for inbound calls; for outbound calls
/// it stays `None` until the answer selects a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParameters {
    pub call_id: CallId,
    pub remote_device: Option<DeviceId>,
    pub ice_servers: Vec<String>,
    pub ice_transport_policy: IceTransportPolicy,
    pub bundle_policy: BundlePolicy,
    pub rtcp_mux_policy: RtcpMuxPolicy,
    pub dtls_srtp_key_agreement: bool,
}

/// Progress reported by a peer connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The connection gathered a local ICE candidate.
    LocalIceCandidate(IceCandidate),
    /// ICE and DTLS completed.
    IceConnected,
    /// ICE connectivity was lost.
    IceDisconnected,
    /// ICE failed and will not recover.
    IceFailed,
    /// The remote media stream arrived.
    RemoteMediaConnected(Arc<dyn MediaStream>),
}

impl ConnectionEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            ConnectionEvent::LocalIceCandidate(_) => "LocalIceCandidate",
            ConnectionEvent::IceConnected => "IceConnected",
            ConnectionEvent::IceDisconnected => "IceDisconnected",
            ConnectionEvent::IceFailed => "IceFailed",
            ConnectionEvent::RemoteMediaConnected(_) => "RemoteMediaConnected",
        }
    }
}

/// Addressed connection event, as delivered to the event task.
#[derive(Debug, Clone)]
pub struct ConnectionEnvelope {
    pub call_id: CallId,
    pub device_id: Option<DeviceId>,
    pub event: ConnectionEvent,
}

/// Sender half handed to every peer connection at creation.
pub type ConnectionEventSender = mpsc::Sender<ConnectionEnvelope>;

/// Opaque local audio source.
pub trait AudioSource: fmt::Debug + Send + Sync {}

/// Local audio track bound to a sender.
pub trait AudioTrack: fmt::Debug + Send + Sync {
    fn set_enabled(&self, enabled: bool);
}

/// Opaque local video source; also the "local video session" surfaced to
/// the application when video is enabled.
pub trait VideoSource: fmt::Debug + Send + Sync {}

/// Video track, local or remote.
pub trait VideoTrack: fmt::Debug + Send + Sync {
    fn set_enabled(&self, enabled: bool);
}

/// Camera capture pipeline for the local video source.
pub trait CameraCapturer: fmt::Debug + Send + Sync {
    fn set_front_facing(&self, front: bool);
}

/// Remote media stream delivered by the peer connection.
pub trait MediaStream: fmt::Debug + Send + Sync {
    fn video_tracks(&self) -> Vec<Arc<dyn VideoTrack>>;
}

/// One WebRTC peer connection.
pub trait PeerConnection: fmt::Debug + Send + Sync {
    fn create_offer(&self) -> MediaResult<String>;
    fn create_answer(&self) -> MediaResult<String>;
    fn set_local_description(&self, sdp: &str) -> MediaResult<()>;
    fn set_remote_description(&self, sdp: &str) -> MediaResult<()>;
    fn add_ice_candidate(&self, candidate: &IceCandidate) -> MediaResult<()>;
    fn add_audio_sender(&self, track: Arc<dyn AudioTrack>) -> MediaResult<()>;
    fn add_video_sender(&self, track: Arc<dyn VideoTrack>) -> MediaResult<()>;
    fn close(&self);
}

/// Injected collaborator minting media objects and peer connections.
///
/// `create_peer_connection` is the synchronous connection slot of the
/// callback contract: it must return a live handle before call setup
/// continues, and scripted implementations drive the returned connection's
/// progress through the provided event sender.
pub trait MediaFactory: fmt::Debug + Send + Sync {
    fn create_audio_source(&self) -> MediaResult<Arc<dyn AudioSource>>;
    fn create_audio_track(&self, source: &Arc<dyn AudioSource>) -> MediaResult<Arc<dyn AudioTrack>>;
    fn create_video_source(&self) -> MediaResult<Arc<dyn VideoSource>>;
    fn create_video_track(&self, source: &Arc<dyn VideoSource>) -> MediaResult<Arc<dyn VideoTrack>>;
    fn create_camera_capturer(
        &self,
        source: &Arc<dyn VideoSource>,
    ) -> MediaResult<Arc<dyn CameraCapturer>>;
    fn create_peer_connection(
        &self,
        parameters: ConnectionParameters,
        events: ConnectionEventSender,
    ) -> MediaResult<Arc<dyn PeerConnection>>;
}
