//! The application-facing callback contract.
//!
//! The delegate is a capability bundle installed once at engine creation.
//! All callbacks are invoked from the engine's logical event thread and are
//! strictly ordered per call; the one synchronous slot
//! (`should_compare_calls`) may block the event thread briefly and must not
//! call back into the façade.

use std::sync::Arc;

use async_trait::async_trait;

use crate::media::{VideoSource, VideoTrack};
use crate::types::{AppEvent, CallId, DeviceId, RemoteHandle, SignalingMessage};

/// Proof that the holder is running on the engine's event thread.
///
/// Constructed only by the engine and lent to the synchronous callbacks;
/// there is no way to forge one off-thread.
#[derive(Debug)]
pub struct EventToken(pub(crate) ());

/// Callback bundle implemented by the embedding application.
#[async_trait]
pub trait CallDelegate: Send + Sync {
    /// A call has entered the system. Always the first callback for a
    /// `CallId`; the application answers by calling `proceed` (or
    /// `drop_call` for an inbound call it chooses not to surface).
    async fn should_start_call(&self, call_id: CallId, remote: RemoteHandle, outbound: bool);

    /// Ordered per-call domain events.
    async fn on_event(&self, remote: RemoteHandle, event: AppEvent);

    /// Transport directive: deliver `message` for `call_id`.
    ///
    /// `dest_device == None` broadcasts to every contacted device of the
    /// remote party. Completion must be reported back through
    /// `message_sent` / `message_send_failure`; the engine withholds the
    /// next directive for the call until then.
    async fn should_send(
        &self,
        call_id: CallId,
        remote: RemoteHandle,
        dest_device: Option<DeviceId>,
        message: SignalingMessage,
    );

    /// Synchronous identity oracle: do the two handles denote the same
    /// remote party?
    fn should_compare_calls(
        &self,
        token: &EventToken,
        remote1: &RemoteHandle,
        remote2: &RemoteHandle,
    ) -> bool;

    /// The local video session changed: `Some` when local video was
    /// enabled, `None` when disabled.
    async fn on_update_local_video_session(
        &self,
        remote: RemoteHandle,
        session: Option<Arc<dyn VideoSource>>,
    );

    /// The first video track of the remote stream became available.
    async fn on_add_remote_video_track(&self, remote: RemoteHandle, track: Arc<dyn VideoTrack>);

    /// The engine released its grip on `remote`; no further callbacks will
    /// reference this call. Fired exactly once per registered call.
    async fn on_call_concluded(&self, remote: RemoteHandle);
}
