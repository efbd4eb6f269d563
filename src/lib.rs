//! # webrtc-call-engine
//!
//! Core of a 1:1 real-time call signaling engine. It sits between a
//! platform application (UI, messaging transport, WebRTC peer-connection
//! factory) and the media plane, and owns the per-call state machine, call
//! identifier and remote-handle lifetimes, signaling dispatch, glare
//! resolution, and peer-connection orchestration.
//!
//! ```text
//! ┌─────────────────────────────┐
//! │        Application          │
//! │   UI · transport · WebRTC   │
//! └──────┬───────────▲──────────┘
//!        │ façade    │ delegate callbacks
//! ┌──────▼───────────┴──────────┐
//! │         CallManager         │
//! ├─────────────────────────────┤
//! │  event task (single writer) │
//! │   registry · state machine  │
//! │   dispatcher · arbiter      │
//! │   coordinator · emitter     │
//! └──────┬───────────▲──────────┘
//!        │ factory   │ connection events
//! ┌──────▼───────────┴──────────┐
//! │   injected MediaFactory     │
//! └─────────────────────────────┘
//! ```
//!
//! The application installs a [`CallDelegate`] (the callback bundle) and a
//! [`MediaFactory`] (the media-plane collaborator) once, then drives calls
//! through [`CallManager`]: `place`, `proceed`, `accept`, `hangup`, and the
//! `receive_*` entry points for inbound signaling. All state transitions
//! happen on one event task; every callback is delivered in per-call order,
//! and every call's event stream finishes with exactly one `Ended*` event.
//!
//! The engine defines signaling *semantics* only — offers, answers, ICE
//! updates, hangup and busy — never wire framing; delivery belongs to the
//! application's transport, which reports back with `message_sent` /
//! `message_send_failure`. Nothing is persisted; the core is entirely
//! in-memory.

pub mod arbiter;
pub mod call;
pub mod config;
pub mod delegate;
pub mod dispatcher;
pub mod errors;
pub mod media;
pub mod registry;
pub mod types;

mod coordinator;
mod emitter;
mod engine;
mod manager;

pub use config::EngineConfig;
pub use delegate::{CallDelegate, EventToken};
pub use errors::{CallError, Result};
pub use manager::CallManager;
pub use media::{
    AudioSource, AudioTrack, BundlePolicy, CameraCapturer, ConnectionEvent, ConnectionEnvelope,
    ConnectionEventSender, ConnectionParameters, IceTransportPolicy, MediaError, MediaFactory,
    MediaResult, MediaStream, PeerConnection, RtcpMuxPolicy, VideoSource, VideoTrack,
};
pub use registry::CallStats;
pub use types::{
    AppEvent, CallDirection, CallId, CallInfo, CallState, DeviceId, EndReason, IceCandidate,
    RemoteHandle, RemotePeer, SignalingMessage,
};
