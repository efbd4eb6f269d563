//! Peer-connection coordination.
//!
//! Builds the media context at `proceed`, derives the connection
//! configuration from the call's policy, and creates peer connections
//! through the injected factory with their event channel wired to the
//! event task.

use std::sync::Arc;

use tracing::{debug, info};

use crate::call::CallContext;
use crate::media::{
    BundlePolicy, ConnectionEventSender, ConnectionParameters, IceTransportPolicy, MediaFactory,
    MediaResult, PeerConnection, RtcpMuxPolicy,
};
use crate::types::{CallId, DeviceId};

pub(crate) struct ConnectionCoordinator {
    factory: Arc<dyn MediaFactory>,
    events: ConnectionEventSender,
}

impl ConnectionCoordinator {
    pub(crate) fn new(factory: Arc<dyn MediaFactory>, events: ConnectionEventSender) -> Self {
        Self { factory, events }
    }

    /// Mint the per-call media bundle. Tracks start disabled; media only
    /// flows once the application enables it (or the call is accepted).
    pub(crate) fn build_context(
        &self,
        ice_servers: Vec<String>,
        hide_ip: bool,
    ) -> MediaResult<CallContext> {
        let audio_source = self.factory.create_audio_source()?;
        let audio_track = self.factory.create_audio_track(&audio_source)?;
        let video_source = self.factory.create_video_source()?;
        let video_track = self.factory.create_video_track(&video_source)?;
        let capturer = self.factory.create_camera_capturer(&video_source)?;

        audio_track.set_enabled(false);
        video_track.set_enabled(false);

        Ok(CallContext {
            ice_servers,
            hide_ip,
            audio_source,
            audio_track,
            video_source,
            video_track,
            capturer,
        })
    }

    /// Create a peer connection for the call and bind the context's tracks
    /// as senders.
    pub(crate) fn create_connection(
        &self,
        call_id: CallId,
        remote_device: Option<DeviceId>,
        context: &CallContext,
    ) -> MediaResult<Arc<dyn PeerConnection>> {
        let ice_transport_policy = if context.hide_ip {
            IceTransportPolicy::Relay
        } else {
            IceTransportPolicy::All
        };
        let parameters = ConnectionParameters {
            call_id,
            remote_device,
            ice_servers: context.ice_servers.clone(),
            ice_transport_policy,
            bundle_policy: BundlePolicy::MaxBundle,
            rtcp_mux_policy: RtcpMuxPolicy::Require,
            dtls_srtp_key_agreement: true,
        };
        debug!(
            call_id = %call_id,
            ?remote_device,
            policy = ?parameters.ice_transport_policy,
            "creating peer connection"
        );

        let connection = self
            .factory
            .create_peer_connection(parameters, self.events.clone())?;
        connection.add_audio_sender(context.audio_track.clone())?;
        connection.add_video_sender(context.video_track.clone())?;

        info!(call_id = %call_id, "peer connection created");
        Ok(connection)
    }
}
