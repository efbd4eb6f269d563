//! Ordered delegate-callback pump.
//!
//! Every asynchronous application callback is funneled through a single
//! FIFO drained by one task, which yields the strict per-call ordering of
//! the callback contract. Running the callbacks off the state-machine task
//! also lets a callback re-enter the façade (e.g. `proceed` from inside
//! `should_start_call`) without deadlocking the engine.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use crate::delegate::CallDelegate;
use crate::media::{VideoSource, VideoTrack};
use crate::types::{AppEvent, CallId, DeviceId, RemoteHandle, SignalingMessage};

#[derive(Debug)]
enum EmitJob {
    StartCall {
        call_id: CallId,
        remote: RemoteHandle,
        outbound: bool,
    },
    Event {
        remote: RemoteHandle,
        event: AppEvent,
    },
    Send {
        call_id: CallId,
        remote: RemoteHandle,
        dest_device: Option<DeviceId>,
        message: SignalingMessage,
    },
    LocalVideoSession {
        remote: RemoteHandle,
        session: Option<Arc<dyn VideoSource>>,
    },
    RemoteVideoTrack {
        remote: RemoteHandle,
        track: Arc<dyn VideoTrack>,
    },
    Concluded {
        remote: RemoteHandle,
    },
}

/// Enqueues delegate callbacks for in-order delivery.
pub(crate) struct EventEmitter {
    jobs: mpsc::UnboundedSender<EmitJob>,
}

impl EventEmitter {
    /// Spawn the pump task. The pump stops when the emitter (and thus the
    /// engine) is dropped.
    pub(crate) fn spawn(delegate: Arc<dyn CallDelegate>) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                trace!(?job, "delivering delegate callback");
                match job {
                    EmitJob::StartCall {
                        call_id,
                        remote,
                        outbound,
                    } => delegate.should_start_call(call_id, remote, outbound).await,
                    EmitJob::Event { remote, event } => delegate.on_event(remote, event).await,
                    EmitJob::Send {
                        call_id,
                        remote,
                        dest_device,
                        message,
                    } => {
                        delegate
                            .should_send(call_id, remote, dest_device, message)
                            .await
                    }
                    EmitJob::LocalVideoSession { remote, session } => {
                        delegate.on_update_local_video_session(remote, session).await
                    }
                    EmitJob::RemoteVideoTrack { remote, track } => {
                        delegate.on_add_remote_video_track(remote, track).await
                    }
                    EmitJob::Concluded { remote } => delegate.on_call_concluded(remote).await,
                }
            }
        });
        Self { jobs }
    }

    fn post(&self, job: EmitJob) {
        // A closed pump only happens at shutdown; dropping the callback
        // is the intended behavior then.
        let _ = self.jobs.send(job);
    }

    pub(crate) fn start_call(&self, call_id: CallId, remote: RemoteHandle, outbound: bool) {
        self.post(EmitJob::StartCall {
            call_id,
            remote,
            outbound,
        });
    }

    pub(crate) fn event(&self, remote: RemoteHandle, event: AppEvent) {
        self.post(EmitJob::Event { remote, event });
    }

    pub(crate) fn send(
        &self,
        call_id: CallId,
        remote: RemoteHandle,
        dest_device: Option<DeviceId>,
        message: SignalingMessage,
    ) {
        self.post(EmitJob::Send {
            call_id,
            remote,
            dest_device,
            message,
        });
    }

    pub(crate) fn local_video_session(
        &self,
        remote: RemoteHandle,
        session: Option<Arc<dyn VideoSource>>,
    ) {
        self.post(EmitJob::LocalVideoSession { remote, session });
    }

    pub(crate) fn remote_video_track(&self, remote: RemoteHandle, track: Arc<dyn VideoTrack>) {
        self.post(EmitJob::RemoteVideoTrack { remote, track });
    }

    pub(crate) fn concluded(&self, remote: RemoteHandle) {
        self.post(EmitJob::Concluded { remote });
    }
}
