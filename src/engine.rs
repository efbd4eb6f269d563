//! The event task.
//!
//! One task owns every call record and serializes all state transitions:
//! façade commands, inbound signaling, peer-connection events, and timer
//! sweeps all land here. Exclusive ownership of the registry by this task
//! is the single-writer invariant; nothing else can touch a record.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::arbiter::{self, OfferDisposition};
use crate::call::CallRecord;
use crate::config::EngineConfig;
use crate::coordinator::ConnectionCoordinator;
use crate::delegate::{CallDelegate, EventToken};
use crate::dispatcher::{Directive, SignalingDispatcher};
use crate::emitter::EventEmitter;
use crate::errors::{CallError, Result};
use crate::media::{
    ConnectionEnvelope, ConnectionEvent, MediaError, MediaFactory, MediaResult, MediaStream,
};
use crate::registry::CallRegistry;
use crate::types::{
    AppEvent, CallDirection, CallId, CallInfo, CallState, DeviceId, EndReason, IceCandidate,
    RemoteHandle, SignalingMessage,
};

/// Commands hopped onto the event task by the façade.
pub(crate) enum Command {
    Place {
        remote: RemoteHandle,
        reply: oneshot::Sender<Result<CallId>>,
    },
    Proceed {
        call_id: CallId,
        ice_servers: Vec<String>,
        hide_ip: bool,
        devices: Vec<DeviceId>,
        reply: oneshot::Sender<Result<()>>,
    },
    Accept {
        call_id: CallId,
        reply: oneshot::Sender<Result<()>>,
    },
    Hangup {
        reply: oneshot::Sender<Result<()>>,
    },
    DropCall {
        call_id: CallId,
        reply: oneshot::Sender<Result<()>>,
    },
    MessageSent {
        call_id: CallId,
        reply: oneshot::Sender<Result<()>>,
    },
    MessageSendFailure {
        call_id: CallId,
        reply: oneshot::Sender<Result<()>>,
    },
    Reset {
        reply: oneshot::Sender<Result<()>>,
    },
    SetAudioEnabled {
        enabled: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    SetVideoEnabled {
        call_id: CallId,
        enabled: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    SetCameraSource {
        front_facing: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    ReceiveOffer {
        call_id: CallId,
        remote: RemoteHandle,
        src_device: DeviceId,
        sdp: String,
        sent_at: DateTime<Utc>,
        reply: oneshot::Sender<Result<()>>,
    },
    ReceiveAnswer {
        call_id: CallId,
        src_device: DeviceId,
        sdp: String,
        reply: oneshot::Sender<Result<()>>,
    },
    ReceiveIceCandidates {
        call_id: CallId,
        src_device: DeviceId,
        candidates: Vec<IceCandidate>,
        reply: oneshot::Sender<Result<()>>,
    },
    ReceiveHangup {
        call_id: CallId,
        reply: oneshot::Sender<Result<()>>,
    },
    ReceiveBusy {
        call_id: CallId,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<()>>,
    },
}

pub(crate) struct Engine {
    config: EngineConfig,
    delegate: Arc<dyn CallDelegate>,
    emitter: EventEmitter,
    coordinator: ConnectionCoordinator,
    registry: CallRegistry,
    dispatcher: SignalingDispatcher,
    info: Arc<DashMap<CallId, CallInfo>>,
    commands: mpsc::Receiver<Command>,
    connection_events: mpsc::Receiver<ConnectionEnvelope>,
}

impl Engine {
    pub(crate) fn new(
        config: EngineConfig,
        delegate: Arc<dyn CallDelegate>,
        factory: Arc<dyn MediaFactory>,
        info: Arc<DashMap<CallId, CallInfo>>,
    ) -> (Self, mpsc::Sender<Command>) {
        let (command_tx, command_rx) = mpsc::channel(config.channel_capacity);
        let (connection_tx, connection_rx) = mpsc::channel(config.channel_capacity);
        let emitter = EventEmitter::spawn(delegate.clone());
        let coordinator = ConnectionCoordinator::new(factory, connection_tx);
        let engine = Self {
            config,
            delegate,
            emitter,
            coordinator,
            registry: CallRegistry::new(),
            dispatcher: SignalingDispatcher::new(),
            info,
            commands: command_rx,
            connection_events: connection_rx,
        };
        (engine, command_tx)
    }

    /// Drive the event task until shutdown or until the last façade handle
    /// is dropped.
    pub(crate) async fn run(mut self) {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(envelope) = self.connection_events.recv() => {
                    self.handle_connection_event(envelope);
                }
                _ = tick.tick() => self.sweep_deadlines(),
            }
        }
        self.teardown_all();
        info!("call engine stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Place { remote, reply } => {
                let _ = reply.send(self.op_place(remote));
            }
            Command::Proceed {
                call_id,
                ice_servers,
                hide_ip,
                devices,
                reply,
            } => {
                let _ = reply.send(self.op_proceed(call_id, ice_servers, hide_ip, devices));
            }
            Command::Accept { call_id, reply } => {
                let _ = reply.send(self.op_accept(call_id));
            }
            Command::Hangup { reply } => {
                let _ = reply.send(self.op_hangup());
            }
            Command::DropCall { call_id, reply } => {
                let _ = reply.send(self.op_drop_call(call_id));
            }
            Command::MessageSent { call_id, reply } => {
                let _ = reply.send(self.op_message_sent(call_id));
            }
            Command::MessageSendFailure { call_id, reply } => {
                let _ = reply.send(self.op_message_send_failure(call_id));
            }
            Command::Reset { reply } => {
                let _ = reply.send(self.op_reset());
            }
            Command::SetAudioEnabled { enabled, reply } => {
                let _ = reply.send(self.op_set_audio_enabled(enabled));
            }
            Command::SetVideoEnabled {
                call_id,
                enabled,
                reply,
            } => {
                let _ = reply.send(self.op_set_video_enabled(call_id, enabled));
            }
            Command::SetCameraSource {
                front_facing,
                reply,
            } => {
                let _ = reply.send(self.op_set_camera_source(front_facing));
            }
            Command::ReceiveOffer {
                call_id,
                remote,
                src_device,
                sdp,
                sent_at,
                reply,
            } => {
                let _ = reply.send(self.op_receive_offer(call_id, remote, src_device, sdp, sent_at));
            }
            Command::ReceiveAnswer {
                call_id,
                src_device,
                sdp,
                reply,
            } => {
                let _ = reply.send(self.op_receive_answer(call_id, src_device, sdp));
            }
            Command::ReceiveIceCandidates {
                call_id,
                src_device,
                candidates,
                reply,
            } => {
                let _ = reply.send(self.op_receive_ice(call_id, src_device, candidates));
            }
            Command::ReceiveHangup { call_id, reply } => {
                let _ = reply.send(self.op_receive_hangup(call_id));
            }
            Command::ReceiveBusy { call_id, reply } => {
                let _ = reply.send(self.op_receive_busy(call_id));
            }
            Command::Shutdown { reply } => {
                // Unreachable: run() intercepts Shutdown. Kept total anyway.
                let _ = reply.send(Ok(()));
            }
        }
    }

    // ===== Façade operations =====

    fn op_place(&mut self, remote: RemoteHandle) -> Result<CallId> {
        if let Some(active) = self.registry.active_call_id() {
            return Err(CallError::invalid_state(
                "place",
                format!("call {} is already active", active),
            ));
        }
        let call_id = CallId::random();
        let mut record = CallRecord::new(
            call_id,
            remote.clone(),
            CallDirection::Outbound,
            Instant::now() + self.config.setup_timeout,
        );
        record.transition_to(CallState::Starting);
        record.start_call_notified = true;
        self.info.insert(call_id, record.info());
        self.registry.insert(record)?;
        info!(call_id = %call_id, "placing outbound call");
        self.emitter.start_call(call_id, remote, true);
        Ok(call_id)
    }

    fn op_proceed(
        &mut self,
        call_id: CallId,
        ice_servers: Vec<String>,
        hide_ip: bool,
        devices: Vec<DeviceId>,
    ) -> Result<()> {
        let (direction, state, offer_sent_at) = {
            let record = self
                .registry
                .get(call_id)
                .ok_or(CallError::CallNotFound { call_id })?;
            (record.direction, record.state, record.offer_sent_at)
        };
        match (direction, state) {
            (CallDirection::Outbound, CallState::Starting)
            | (CallDirection::Inbound, CallState::Pending) => {}
            _ => {
                return Err(CallError::invalid_state(
                    "proceed",
                    format!("call is {}", state),
                ))
            }
        }

        // The offer may have aged past the budget while the application
        // decided; refuse it rather than ring a dead call.
        if direction == CallDirection::Inbound {
            if let Some(sent_at) = offer_sent_at {
                if self.offer_expired(sent_at) {
                    info!(call_id = %call_id, "offer expired before proceed");
                    self.terminate_call(call_id, EndReason::ReceivedOfferExpired, true);
                    return Ok(());
                }
            }
        }

        if let Err(err) = self.setup_media(call_id, ice_servers, hide_ip, devices, direction) {
            warn!(call_id = %call_id, error = %err, "media setup failed");
            self.terminate_call(call_id, EndReason::InternalFailure, true);
        }
        Ok(())
    }

    fn setup_media(
        &mut self,
        call_id: CallId,
        ice_servers: Vec<String>,
        hide_ip: bool,
        devices: Vec<DeviceId>,
        direction: CallDirection,
    ) -> MediaResult<()> {
        let context = self.coordinator.build_context(ice_servers, hide_ip)?;
        let remote_device = match direction {
            CallDirection::Inbound => self
                .registry
                .get(call_id)
                .and_then(|record| record.selected_device),
            CallDirection::Outbound => None,
        };
        let connection = self
            .coordinator
            .create_connection(call_id, remote_device, &context)?;

        let record = self
            .registry
            .get_mut(call_id)
            .ok_or_else(|| MediaError::new("call record vanished during setup"))?;

        let (dest_device, message) = match direction {
            CallDirection::Outbound => {
                let sdp = connection.create_offer()?;
                connection.set_local_description(&sdp)?;
                record.contacted_devices = devices;
                (None, SignalingMessage::Offer { sdp })
            }
            CallDirection::Inbound => {
                let offer_sdp = record
                    .offer_sdp
                    .clone()
                    .ok_or_else(|| MediaError::new("inbound call without an offer"))?;
                connection.set_remote_description(&offer_sdp)?;
                let sdp = connection.create_answer()?;
                connection.set_local_description(&sdp)?;
                (record.selected_device, SignalingMessage::Answer { sdp })
            }
        };

        // Replay candidates that arrived before the connection existed,
        // in arrival order.
        for candidate in record.pending_ice_in.drain(..) {
            connection.add_ice_candidate(&candidate)?;
        }

        record.context = Some(context);
        record.connection = Some(connection);
        record.transition_to(CallState::Proceeding);
        let remote = record.remote.clone();
        let snapshot = record.info();
        self.info.insert(call_id, snapshot);

        self.enqueue_directive(call_id, remote, dest_device, message, true);
        Ok(())
    }

    fn op_accept(&mut self, call_id: CallId) -> Result<()> {
        let media_ready = {
            let record = self
                .registry
                .get_mut(call_id)
                .ok_or(CallError::CallNotFound { call_id })?;
            if record.direction != CallDirection::Inbound {
                return Err(CallError::invalid_state("accept", "not an inbound call"));
            }
            if record.state != CallState::Ringing {
                return Err(CallError::invalid_state(
                    "accept",
                    format!("call is {}", record.state),
                ));
            }
            record.transition_to(CallState::Accepting);
            if let Some(context) = &record.context {
                context.audio_track.set_enabled(true);
            }
            let snapshot = record.info();
            let ready = record.media_connected;
            self.info.insert(call_id, snapshot);
            ready
        };
        info!(call_id = %call_id, "call accepted");
        if media_ready {
            self.finish_connect(call_id);
        }
        Ok(())
    }

    fn op_hangup(&mut self) -> Result<()> {
        let call_id = self.registry.active_call_id().ok_or(CallError::NoActiveCall)?;
        let (remote, dest_device, essential) = {
            let record = self
                .registry
                .get(call_id)
                .ok_or(CallError::CallNotFound { call_id })?;
            (
                record.remote.clone(),
                record.directive_dest(),
                record.state == CallState::Accepting,
            )
        };
        info!(call_id = %call_id, "local hangup");
        self.enqueue_directive(call_id, remote, dest_device, SignalingMessage::Hangup, essential);
        self.terminate_call(call_id, EndReason::LocalHangup, true);
        Ok(())
    }

    fn op_drop_call(&mut self, call_id: CallId) -> Result<()> {
        let record = self
            .registry
            .get(call_id)
            .ok_or(CallError::CallNotFound { call_id })?;
        if record.direction != CallDirection::Inbound {
            return Err(CallError::invalid_state("drop_call", "not an inbound call"));
        }
        info!(call_id = %call_id, "dropping call without surfacing");
        self.terminate_call(call_id, EndReason::Dropped, false);
        Ok(())
    }

    fn op_message_sent(&mut self, call_id: CallId) -> Result<()> {
        let next = self.dispatcher.message_sent(call_id)?;
        match next {
            Some(directive) => self.emit_directive(directive),
            None => self.flush_pending_ice(call_id),
        }
        self.maybe_conclude(call_id);
        Ok(())
    }

    fn op_message_send_failure(&mut self, call_id: CallId) -> Result<()> {
        let failure = self.dispatcher.message_send_failure(call_id)?;
        if failure.essential {
            warn!(call_id = %call_id, "essential message send failed");
            self.terminate_call(call_id, EndReason::SignalingFailure, true);
        } else if let Some(directive) = failure.next {
            self.emit_directive(directive);
        }
        self.maybe_conclude(call_id);
        Ok(())
    }

    fn op_reset(&mut self) -> Result<()> {
        warn!(calls = self.registry.len(), "resetting call engine");
        self.teardown_all();
        Ok(())
    }

    fn op_set_audio_enabled(&mut self, enabled: bool) -> Result<()> {
        let record = self.active_record()?;
        let context = record.context.as_ref().ok_or_else(|| {
            CallError::invalid_state("set_local_audio_enabled", "no media context")
        })?;
        context.audio_track.set_enabled(enabled);
        debug!(call_id = %record.id, enabled, "local audio toggled");
        Ok(())
    }

    fn op_set_video_enabled(&mut self, call_id: CallId, enabled: bool) -> Result<()> {
        let record = self
            .registry
            .get(call_id)
            .ok_or(CallError::CallNotFound { call_id })?;
        let context = record.context.as_ref().ok_or_else(|| {
            CallError::invalid_state("set_local_video_enabled", "no media context")
        })?;
        context.video_track.set_enabled(enabled);
        let session = if enabled {
            Some(context.video_source.clone())
        } else {
            None
        };
        debug!(call_id = %call_id, enabled, "local video toggled");
        self.emitter.local_video_session(record.remote.clone(), session);
        Ok(())
    }

    fn op_set_camera_source(&mut self, front_facing: bool) -> Result<()> {
        let record = self.active_record()?;
        let context = record
            .context
            .as_ref()
            .ok_or_else(|| CallError::invalid_state("set_camera_source", "no media context"))?;
        context.capturer.set_front_facing(front_facing);
        Ok(())
    }

    // ===== Inbound signaling =====

    fn op_receive_offer(
        &mut self,
        call_id: CallId,
        remote: RemoteHandle,
        src_device: DeviceId,
        sdp: String,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        if self.offer_expired(sent_at) {
            info!(call_id = %call_id, "refusing expired offer");
            self.emitter.event(remote, AppEvent::EndedReceivedOfferExpired);
            return Ok(());
        }

        let token = EventToken(());
        let delegate = self.delegate.clone();
        let disposition = arbiter::classify_offer(&self.registry, call_id, &remote, |a, b| {
            delegate.should_compare_calls(&token, a, b)
        });
        debug!(call_id = %call_id, ?disposition, "classified inbound offer");

        match disposition {
            OfferDisposition::Duplicate => Ok(()),
            OfferDisposition::RefuseBusy => {
                self.refuse_offer(
                    call_id,
                    remote,
                    src_device,
                    SignalingMessage::Busy,
                    EndReason::ReceivedOfferWhileActive,
                )
            }
            OfferDisposition::GlareLocalWins => self.refuse_offer(
                call_id,
                remote,
                src_device,
                SignalingMessage::Hangup,
                EndReason::RemoteGlare,
            ),
            OfferDisposition::GlareIncomingWins { local } => {
                info!(call_id = %call_id, loser = %local, "glare: incoming offer wins");
                let loser = self
                    .registry
                    .get(local)
                    .map(|record| (record.remote.clone(), record.directive_dest()));
                if let Some((loser_remote, dest)) = loser {
                    self.enqueue_directive(
                        local,
                        loser_remote,
                        dest,
                        SignalingMessage::Hangup,
                        false,
                    );
                }
                self.terminate_call(local, EndReason::RemoteGlare, true);
                self.surface_offer(call_id, remote, src_device, sdp, sent_at)
            }
            OfferDisposition::ReplacesPending { older } => {
                info!(call_id = %call_id, replaced = %older, "newer offer replaces pending call");
                // The older call only gets a terminal event if the UI was
                // told about it in the first place.
                let notified = self
                    .registry
                    .get(older)
                    .map(|record| record.start_call_notified)
                    .unwrap_or(false);
                self.terminate_call(older, EndReason::Dropped, notified);
                self.surface_offer(call_id, remote, src_device, sdp, sent_at)
            }
            OfferDisposition::Surface => {
                self.surface_offer(call_id, remote, src_device, sdp, sent_at)
            }
        }
    }

    /// Register a short-lived record for an offer that is refused on
    /// arrival, so the refusal message and terminal event flow through the
    /// ordinary per-call machinery.
    fn refuse_offer(
        &mut self,
        call_id: CallId,
        remote: RemoteHandle,
        src_device: DeviceId,
        message: SignalingMessage,
        reason: EndReason,
    ) -> Result<()> {
        let mut record = CallRecord::new(
            call_id,
            remote.clone(),
            CallDirection::Inbound,
            Instant::now() + self.config.setup_timeout,
        );
        record.selected_device = Some(src_device);
        record.transition_to(CallState::Pending);
        self.info.insert(call_id, record.info());
        self.registry.insert(record)?;
        self.enqueue_directive(call_id, remote, Some(src_device), message, false);
        self.terminate_call(call_id, reason, true);
        Ok(())
    }

    fn surface_offer(
        &mut self,
        call_id: CallId,
        remote: RemoteHandle,
        src_device: DeviceId,
        sdp: String,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut record = CallRecord::new(
            call_id,
            remote.clone(),
            CallDirection::Inbound,
            Instant::now() + self.config.setup_timeout,
        );
        record.offer_sent_at = Some(sent_at);
        record.offer_sdp = Some(sdp);
        record.selected_device = Some(src_device);
        record.contacted_devices = vec![src_device];
        record.transition_to(CallState::Pending);
        record.start_call_notified = true;
        self.info.insert(call_id, record.info());
        self.registry.insert(record)?;
        info!(call_id = %call_id, src_device, "surfacing inbound call");
        self.emitter.start_call(call_id, remote, false);
        Ok(())
    }

    fn op_receive_answer(&mut self, call_id: CallId, src_device: DeviceId, sdp: String) -> Result<()> {
        let Some(record) = self.registry.get_mut(call_id) else {
            warn!(call_id = %call_id, "answer for unknown call");
            return Ok(());
        };
        if record.direction != CallDirection::Outbound
            || !matches!(record.state, CallState::Proceeding | CallState::Ringing)
        {
            warn!(call_id = %call_id, state = %record.state, "ignoring answer");
            return Ok(());
        }
        if record.selected_device.is_some() {
            debug!(call_id = %call_id, src_device, "ignoring answer after device selection");
            return Ok(());
        }
        if !record.contacted_devices.contains(&src_device) {
            warn!(call_id = %call_id, src_device, "answer from a device outside the fan-out");
            return Ok(());
        }

        record.selected_device = Some(src_device);
        info!(call_id = %call_id, src_device, "answer latched");
        let applied = record
            .connection
            .clone()
            .map(|connection| connection.set_remote_description(&sdp));
        let snapshot = record.info();
        self.info.insert(call_id, snapshot);

        if let Some(Err(err)) = applied {
            warn!(call_id = %call_id, error = %err, "failed to apply answer");
            self.terminate_call(call_id, EndReason::InternalFailure, true);
            return Ok(());
        }
        // Candidates gathered before the answer were broadcast; anything
        // still buffered goes to the selected device.
        self.flush_pending_ice(call_id);
        Ok(())
    }

    fn op_receive_ice(
        &mut self,
        call_id: CallId,
        src_device: DeviceId,
        candidates: Vec<IceCandidate>,
    ) -> Result<()> {
        let Some(record) = self.registry.get_mut(call_id) else {
            warn!(call_id = %call_id, "candidates for unknown call");
            return Ok(());
        };
        if record.state.is_terminated() {
            return Ok(());
        }
        if let Some(selected) = record.selected_device {
            if selected != src_device {
                debug!(call_id = %call_id, src_device, "dropping candidates from unselected device");
                return Ok(());
            }
        }
        match record.connection.clone() {
            Some(connection) => {
                for candidate in &candidates {
                    if let Err(err) = connection.add_ice_candidate(candidate) {
                        warn!(call_id = %call_id, error = %err, "failed to add remote candidate");
                    }
                }
            }
            None => {
                record.pending_ice_in.extend(candidates);
            }
        }
        Ok(())
    }

    fn op_receive_hangup(&mut self, call_id: CallId) -> Result<()> {
        if !self.registry.contains(call_id) {
            warn!(call_id = %call_id, "hangup for unknown call");
            return Ok(());
        }
        self.terminate_call(call_id, EndReason::RemoteHangup, true);
        Ok(())
    }

    fn op_receive_busy(&mut self, call_id: CallId) -> Result<()> {
        if !self.registry.contains(call_id) {
            warn!(call_id = %call_id, "busy for unknown call");
            return Ok(());
        }
        self.terminate_call(call_id, EndReason::RemoteBusy, true);
        Ok(())
    }

    // ===== Peer-connection events =====

    fn handle_connection_event(&mut self, envelope: ConnectionEnvelope) {
        let ConnectionEnvelope {
            call_id,
            device_id,
            event,
        } = envelope;
        let live = self
            .registry
            .get(call_id)
            .map(|record| !record.state.is_terminated())
            .unwrap_or(false);
        if !live {
            // Cancellation is observed at the event-task hop; stale
            // connection callbacks are discarded here.
            debug!(call_id = %call_id, event = event.tag(), "discarding stale connection event");
            return;
        }
        debug!(call_id = %call_id, ?device_id, event = event.tag(), "connection event");
        match event {
            ConnectionEvent::LocalIceCandidate(candidate) => {
                if let Some(record) = self.registry.get_mut(call_id) {
                    record.pending_ice_out.push(candidate);
                }
                self.flush_pending_ice(call_id);
            }
            ConnectionEvent::IceConnected => self.on_ice_connected(call_id),
            ConnectionEvent::IceDisconnected => self.on_ice_disconnected(call_id),
            ConnectionEvent::IceFailed => {
                let target = self
                    .registry
                    .get(call_id)
                    .map(|record| (record.remote.clone(), record.directive_dest()));
                if let Some((remote, dest)) = target {
                    self.enqueue_directive(call_id, remote, dest, SignalingMessage::Hangup, false);
                }
                self.terminate_call(call_id, EndReason::ConnectionFailure, true);
            }
            ConnectionEvent::RemoteMediaConnected(stream) => {
                self.on_media_connected(call_id, stream);
            }
        }
    }

    fn on_ice_connected(&mut self, call_id: CallId) {
        let Some(record) = self.registry.get_mut(call_id) else {
            return;
        };
        match record.state {
            CallState::Proceeding => {
                record.transition_to(CallState::Ringing);
                let remote = record.remote.clone();
                let event = match record.direction {
                    CallDirection::Outbound => AppEvent::RingingRemote,
                    CallDirection::Inbound => AppEvent::RingingLocal,
                };
                let snapshot = record.info();
                self.info.insert(call_id, snapshot);
                self.emitter.event(remote, event);
            }
            CallState::Reconnecting => {
                record.transition_to(CallState::Connected);
                record.reconnect_deadline = None;
                let remote = record.remote.clone();
                let snapshot = record.info();
                self.info.insert(call_id, snapshot);
                self.emitter.event(remote, AppEvent::Reconnected);
            }
            _ => {}
        }
    }

    fn on_ice_disconnected(&mut self, call_id: CallId) {
        let Some(record) = self.registry.get_mut(call_id) else {
            return;
        };
        if record.state != CallState::Connected {
            return;
        }
        record.transition_to(CallState::Reconnecting);
        record.reconnect_deadline = Some(Instant::now() + self.config.reconnect_timeout);
        let remote = record.remote.clone();
        let snapshot = record.info();
        self.info.insert(call_id, snapshot);
        self.emitter.event(remote, AppEvent::Reconnecting);
    }

    fn on_media_connected(&mut self, call_id: CallId, stream: Arc<dyn MediaStream>) {
        let Some(record) = self.registry.get_mut(call_id) else {
            return;
        };
        record.media_connected = true;
        record.remote_stream = Some(stream);
        let direction = record.direction;
        let state = record.state;
        match (direction, state) {
            (CallDirection::Outbound, CallState::Proceeding | CallState::Ringing) => {
                self.finish_connect(call_id);
            }
            (CallDirection::Inbound, CallState::Accepting) => {
                self.finish_connect(call_id);
            }
            // Inbound media can arrive while still ringing; the call
            // connects when the user accepts.
            _ => {}
        }
    }

    fn finish_connect(&mut self, call_id: CallId) {
        let Some(record) = self.registry.get_mut(call_id) else {
            return;
        };
        record.transition_to(CallState::Connected);
        record.connected_at = Some(Utc::now());
        record.setup_deadline = None;
        let remote = record.remote.clone();
        let direction = record.direction;
        let stream = record.remote_stream.clone();
        let snapshot = record.info();
        self.info.insert(call_id, snapshot);
        info!(call_id = %call_id, "call connected");

        match direction {
            CallDirection::Outbound => {
                self.emitter.event(remote.clone(), AppEvent::ConnectedRemote);
                self.emitter.event(remote.clone(), AppEvent::ConnectedLocal);
            }
            CallDirection::Inbound => {
                self.emitter.event(remote.clone(), AppEvent::ConnectedLocal);
                self.emitter.event(remote.clone(), AppEvent::ConnectedRemote);
            }
        }

        if let Some(stream) = stream {
            match stream.video_tracks().into_iter().next() {
                Some(track) => {
                    self.emitter.remote_video_track(remote.clone(), track);
                    self.emitter.event(remote, AppEvent::RemoteVideoEnable);
                }
                None => debug!(call_id = %call_id, "remote stream carries no video track"),
            }
        }
    }

    // ===== Timers =====

    fn sweep_deadlines(&mut self) {
        let now = Instant::now();
        let mut timed_out = Vec::new();
        let mut reconnect_failed = Vec::new();
        for id in self.registry.ids() {
            let Some(record) = self.registry.get(id) else {
                continue;
            };
            if record.state.is_terminated() {
                continue;
            }
            if let Some(deadline) = record.setup_deadline {
                if now >= deadline {
                    timed_out.push(id);
                    continue;
                }
            }
            if let Some(deadline) = record.reconnect_deadline {
                if now >= deadline && record.state == CallState::Reconnecting {
                    reconnect_failed.push(id);
                }
            }
        }
        for id in timed_out {
            warn!(call_id = %id, "call setup timed out");
            let target = self
                .registry
                .get(id)
                .map(|record| (record.remote.clone(), record.directive_dest()));
            if let Some((remote, dest)) = target {
                self.enqueue_directive(id, remote, dest, SignalingMessage::Hangup, false);
            }
            self.terminate_call(id, EndReason::Timeout, true);
        }
        for id in reconnect_failed {
            warn!(call_id = %id, "reconnect window exhausted");
            self.terminate_call(id, EndReason::ConnectionFailure, true);
        }
    }

    // ===== Shared helpers =====

    fn active_record(&self) -> Result<&CallRecord> {
        self.registry.active_call().ok_or(CallError::NoActiveCall)
    }

    fn offer_expired(&self, sent_at: DateTime<Utc>) -> bool {
        match (Utc::now() - sent_at).to_std() {
            Ok(age) => age > self.config.offer_max_age,
            // Timestamp in the future: clock skew, treat as fresh.
            Err(_) => false,
        }
    }

    fn enqueue_directive(
        &mut self,
        call_id: CallId,
        remote: RemoteHandle,
        dest_device: Option<DeviceId>,
        message: SignalingMessage,
        essential: bool,
    ) {
        let directive = Directive {
            call_id,
            dest_device,
            message,
            essential,
        };
        if let Some(released) = self.dispatcher.enqueue(directive) {
            self.emitter.send(
                released.call_id,
                remote,
                released.dest_device,
                released.message,
            );
        }
    }

    fn emit_directive(&mut self, directive: Directive) {
        if let Some(remote) = self.remote_of(directive.call_id) {
            self.emitter.send(
                directive.call_id,
                remote,
                directive.dest_device,
                directive.message,
            );
        }
    }

    fn remote_of(&self, call_id: CallId) -> Option<RemoteHandle> {
        self.registry.get(call_id).map(|record| record.remote.clone())
    }

    /// Batch any gathered local candidates into one directive when the
    /// call's send slot is free.
    fn flush_pending_ice(&mut self, call_id: CallId) {
        if !self.dispatcher.is_idle(call_id) {
            return;
        }
        let Some(record) = self.registry.get_mut(call_id) else {
            return;
        };
        if record.state.is_terminated() || record.pending_ice_out.is_empty() {
            return;
        }
        let candidates: Vec<IceCandidate> = record.pending_ice_out.drain(..).collect();
        let remote = record.remote.clone();
        let dest_device = record.directive_dest();
        self.enqueue_directive(
            call_id,
            remote,
            dest_device,
            SignalingMessage::IceUpdate { candidates },
            false,
        );
    }

    fn terminate_call(&mut self, call_id: CallId, reason: EndReason, emit_event: bool) {
        let Some(record) = self.registry.get_mut(call_id) else {
            return;
        };
        if record.state.is_terminated() {
            return;
        }
        record.transition_to(CallState::Terminated(reason));
        record.release_media();
        record.setup_deadline = None;
        record.reconnect_deadline = None;
        let remote = record.remote.clone();
        let snapshot = record.info();
        self.info.insert(call_id, snapshot);
        info!(call_id = %call_id, %reason, "call terminated");
        if emit_event {
            self.emitter.event(remote, reason.app_event());
        }
        self.maybe_conclude(call_id);
    }

    /// Remove a terminated record once its outbound queue has drained, and
    /// release the grip on the remote handle exactly once.
    fn maybe_conclude(&mut self, call_id: CallId) {
        let terminated = self
            .registry
            .get(call_id)
            .map(|record| record.state.is_terminated())
            .unwrap_or(false);
        if !terminated || !self.dispatcher.is_idle(call_id) {
            return;
        }
        if let Some(record) = self.registry.remove(call_id) {
            self.dispatcher.remove_call(call_id);
            debug!(call_id = %call_id, "call concluded");
            self.emitter.concluded(record.remote);
        }
    }

    /// Hard teardown: close everything, release every grip, emit nothing.
    fn teardown_all(&mut self) {
        for mut record in self.registry.drain() {
            record.release_media();
            self.emitter.concluded(record.remote.clone());
        }
        self.dispatcher.clear();
        self.info.clear();
    }
}
