//! The call-manager façade.
//!
//! `CallManager` is the application's handle to the engine: cheap to clone,
//! callable from any thread. Every operation hops onto the engine's event
//! task over a command channel and returns the two-valued `Ok` /
//! API-failure outcome; transport and media failures flow through the
//! delegate event stream instead.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::config::EngineConfig;
use crate::delegate::CallDelegate;
use crate::engine::{Command, Engine};
use crate::errors::{CallError, Result};
use crate::media::MediaFactory;
use crate::registry::CallStats;
use crate::types::{CallId, CallInfo, CallState, DeviceId, IceCandidate, RemoteHandle};

/// Application-facing call manager.
#[derive(Clone)]
pub struct CallManager {
    commands: mpsc::Sender<Command>,
    info: Arc<DashMap<CallId, CallInfo>>,
}

impl CallManager {
    /// Create the engine and spawn its event task.
    ///
    /// The delegate and the media factory are installed once and live for
    /// the lifetime of the engine.
    pub fn new(
        delegate: Arc<dyn CallDelegate>,
        factory: Arc<dyn MediaFactory>,
        config: EngineConfig,
    ) -> Self {
        let info = Arc::new(DashMap::new());
        let (engine, commands) = Engine::new(config, delegate, factory, info.clone());
        tokio::spawn(engine.run());
        info!("call engine started");
        Self { commands, info }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .await
            .map_err(|_| CallError::EngineStopped)?;
        reply_rx.await.map_err(|_| CallError::EngineStopped)?
    }

    /// Place an outbound call to `remote`. The engine assigns and returns
    /// a fresh `CallId` and will ask the application to proceed via
    /// `should_start_call`.
    pub async fn place(&self, remote: RemoteHandle) -> Result<CallId> {
        self.request(|reply| Command::Place { remote, reply }).await
    }

    /// Supply the configuration the engine needs to build media for a
    /// call: ICE servers, the IP-hiding flag, and (for outbound calls) the
    /// remote device fan-out list.
    pub async fn proceed(
        &self,
        call_id: CallId,
        ice_servers: Vec<String>,
        hide_ip: bool,
        devices: Vec<DeviceId>,
    ) -> Result<()> {
        self.request(|reply| Command::Proceed {
            call_id,
            ice_servers,
            hide_ip,
            devices,
            reply,
        })
        .await
    }

    /// Accept a ringing inbound call.
    pub async fn accept(&self, call_id: CallId) -> Result<()> {
        self.request(|reply| Command::Accept { call_id, reply }).await
    }

    /// End the currently active call.
    pub async fn hangup(&self) -> Result<()> {
        self.request(|reply| Command::Hangup { reply }).await
    }

    /// Silently tear down an inbound call the application chose not to
    /// surface. No user-visible event is emitted.
    pub async fn drop_call(&self, call_id: CallId) -> Result<()> {
        self.request(|reply| Command::DropCall { call_id, reply }).await
    }

    /// Report that the last directive for `call_id` was delivered.
    pub async fn message_sent(&self, call_id: CallId) -> Result<()> {
        self.request(|reply| Command::MessageSent { call_id, reply })
            .await
    }

    /// Report that the last directive for `call_id` could not be
    /// delivered. Essential-message failures terminate the call.
    pub async fn message_send_failure(&self, call_id: CallId) -> Result<()> {
        self.request(|reply| Command::MessageSendFailure { call_id, reply })
            .await
    }

    /// Hard teardown of every call. The escape hatch after an application
    /// error the UI cannot diagnose; emits no events.
    pub async fn reset(&self) -> Result<()> {
        self.request(|reply| Command::Reset { reply }).await
    }

    /// Toggle the active call's outgoing audio.
    pub async fn set_local_audio_enabled(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetAudioEnabled { enabled, reply })
            .await
    }

    /// Toggle a call's outgoing video. Enabling also surfaces the local
    /// video session through `on_update_local_video_session`.
    pub async fn set_local_video_enabled(&self, call_id: CallId, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetVideoEnabled {
            call_id,
            enabled,
            reply,
        })
        .await
    }

    /// Select the camera feeding the active call's video source.
    pub async fn set_camera_source(&self, front_facing: bool) -> Result<()> {
        self.request(|reply| Command::SetCameraSource {
            front_facing,
            reply,
        })
        .await
    }

    /// Inbound offer from the signaling transport.
    ///
    /// `sent_at` is the remote's composition timestamp; offers older than
    /// the configured budget are refused as expired.
    pub async fn receive_offer(
        &self,
        call_id: CallId,
        remote: RemoteHandle,
        src_device: DeviceId,
        sdp: String,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        self.request(|reply| Command::ReceiveOffer {
            call_id,
            remote,
            src_device,
            sdp,
            sent_at,
            reply,
        })
        .await
    }

    /// Inbound answer for an outbound call. The first valid answer
    /// selects the remote device; later answers are ignored.
    pub async fn receive_answer(
        &self,
        call_id: CallId,
        src_device: DeviceId,
        sdp: String,
    ) -> Result<()> {
        self.request(|reply| Command::ReceiveAnswer {
            call_id,
            src_device,
            sdp,
            reply,
        })
        .await
    }

    /// Inbound ICE candidates. Candidates arriving before the peer
    /// connection exists are buffered and replayed in arrival order.
    pub async fn receive_ice_candidates(
        &self,
        call_id: CallId,
        src_device: DeviceId,
        candidates: Vec<IceCandidate>,
    ) -> Result<()> {
        self.request(|reply| Command::ReceiveIceCandidates {
            call_id,
            src_device,
            candidates,
            reply,
        })
        .await
    }

    /// Inbound hangup; ends the addressed call.
    pub async fn receive_hangup(&self, call_id: CallId) -> Result<()> {
        self.request(|reply| Command::ReceiveHangup { call_id, reply })
            .await
    }

    /// Inbound busy; ends the addressed call as remote-busy.
    pub async fn receive_busy(&self, call_id: CallId) -> Result<()> {
        self.request(|reply| Command::ReceiveBusy { call_id, reply })
            .await
    }

    /// Stop the event task. Outstanding calls are torn down silently.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    // ===== Lock-free queries =====

    /// Snapshot of a call, including concluded ones.
    pub fn call_info(&self, call_id: CallId) -> Option<CallInfo> {
        self.info.get(&call_id).map(|entry| entry.value().clone())
    }

    /// The call currently occupying the active slot, if any.
    pub fn active_call_id(&self) -> Option<CallId> {
        self.info
            .iter()
            .find(|entry| entry.value().state.is_active())
            .map(|entry| *entry.key())
    }

    /// Per-state counts over every known call.
    pub fn stats(&self) -> CallStats {
        let mut stats = CallStats::default();
        for entry in self.info.iter() {
            stats.total += 1;
            match entry.value().state {
                CallState::Idle => {}
                CallState::Starting => stats.starting += 1,
                CallState::Pending => stats.pending += 1,
                CallState::Proceeding => stats.proceeding += 1,
                CallState::Ringing => stats.ringing += 1,
                CallState::Accepting => stats.accepting += 1,
                CallState::Connected => stats.connected += 1,
                CallState::Reconnecting => stats.reconnecting += 1,
                CallState::Terminated(_) => stats.terminated += 1,
            }
        }
        stats
    }
}
