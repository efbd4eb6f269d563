//! Per-call record and media context.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::media::{
    AudioSource, AudioTrack, CameraCapturer, MediaStream, PeerConnection, VideoSource, VideoTrack,
};
use crate::types::{CallDirection, CallId, CallInfo, CallState, DeviceId, IceCandidate, RemoteHandle};

/// Media handles and negotiated policy for one call.
///
/// Built at `proceed` from the injected media factory; owned by the call
/// record and destroyed with it.
#[derive(Debug)]
pub struct CallContext {
    pub ice_servers: Vec<String>,
    pub hide_ip: bool,
    pub audio_source: Arc<dyn AudioSource>,
    pub audio_track: Arc<dyn AudioTrack>,
    pub video_source: Arc<dyn VideoSource>,
    pub video_track: Arc<dyn VideoTrack>,
    pub capturer: Arc<dyn CameraCapturer>,
}

/// One live call.
#[derive(Debug)]
pub struct CallRecord {
    pub id: CallId,
    pub remote: RemoteHandle,
    pub direction: CallDirection,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    entered_state_at: Instant,

    /// Inbound only: when the remote composed the offer; drives expiry.
    pub offer_sent_at: Option<DateTime<Utc>>,
    /// Inbound only: the remote offer SDP, applied at `proceed`.
    pub offer_sdp: Option<String>,

    pub context: Option<CallContext>,
    pub connection: Option<Arc<dyn PeerConnection>>,

    /// Devices the offer fan-out addressed (outbound) or the offering
    /// device (inbound).
    pub contacted_devices: Vec<DeviceId>,
    /// Latched by the first valid answer (outbound) or set from the offer
    /// source (inbound).
    pub selected_device: Option<DeviceId>,

    /// Candidates received before the peer connection existed, in arrival
    /// order.
    pub pending_ice_in: Vec<IceCandidate>,
    /// Locally gathered candidates awaiting a send opportunity.
    pub pending_ice_out: Vec<IceCandidate>,

    /// Remote stream parked until the call may surface it.
    pub remote_stream: Option<Arc<dyn MediaStream>>,
    pub media_connected: bool,

    pub setup_deadline: Option<Instant>,
    pub reconnect_deadline: Option<Instant>,

    pub start_call_notified: bool,
}

impl CallRecord {
    pub fn new(
        id: CallId,
        remote: RemoteHandle,
        direction: CallDirection,
        setup_deadline: Instant,
    ) -> Self {
        Self {
            id,
            remote,
            direction,
            state: CallState::Idle,
            created_at: Utc::now(),
            connected_at: None,
            entered_state_at: Instant::now(),
            offer_sent_at: None,
            offer_sdp: None,
            context: None,
            connection: None,
            contacted_devices: Vec::new(),
            selected_device: None,
            pending_ice_in: Vec::new(),
            pending_ice_out: Vec::new(),
            remote_stream: None,
            media_connected: false,
            setup_deadline: Some(setup_deadline),
            reconnect_deadline: None,
            start_call_notified: false,
        }
    }

    /// Move to a new state.
    pub fn transition_to(&mut self, new_state: CallState) {
        debug!(
            call_id = %self.id,
            from = %self.state,
            to = %new_state,
            "call state transition"
        );
        self.state = new_state;
        self.entered_state_at = Instant::now();
    }

    pub fn time_in_state(&self) -> std::time::Duration {
        Instant::now() - self.entered_state_at
    }

    /// Destination for directives: the selected device once latched,
    /// broadcast before that.
    pub fn directive_dest(&self) -> Option<DeviceId> {
        self.selected_device
    }

    /// Snapshot for the façade-side mirror.
    pub fn info(&self) -> CallInfo {
        CallInfo {
            call_id: self.id,
            direction: self.direction,
            state: self.state,
            created_at: self.created_at,
            connected_at: self.connected_at,
            selected_device: self.selected_device,
        }
    }

    /// Close the peer connection and drop the media context.
    pub fn release_media(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        if let Some(context) = self.context.take() {
            context.audio_track.set_enabled(false);
            context.video_track.set_enabled(false);
        }
        self.pending_ice_in.clear();
        self.pending_ice_out.clear();
        self.remote_stream = None;
    }
}
