//! Core types for the call engine.
//!
//! This module defines the identifiers, state and event enums, and the
//! signaling-message payloads used throughout the crate.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process-unique identifier of a call.
///
/// Assigned by the engine when placing an outbound call and carried verbatim
/// in inbound signaling. Compared as an unsigned 64-bit integer for glare
/// resolution.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CallId(pub u64);

impl CallId {
    /// Draw a fresh identifier from 64 bits of a v4 UUID.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().as_u128() as u64)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

/// Identifier of one of the remote party's devices.
pub type DeviceId = u32;

/// Application-owned reference to a remote party.
///
/// The engine never inspects the value. Identity is decided by the
/// application's `should_compare_calls` oracle, which can use [`as_any`]
/// to recover the concrete type.
///
/// [`as_any`]: RemotePeer::as_any
pub trait RemotePeer: fmt::Debug + Send + Sync {
    /// Downcast support for the identity oracle.
    fn as_any(&self) -> &dyn Any;
}

/// Reference-counted, non-owning grip on a remote party.
///
/// The registry clones the grip when a call is registered and drops its
/// clone exactly once when the call concludes.
pub type RemoteHandle = Arc<dyn RemotePeer>;

/// Direction of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    Outbound,
    Inbound,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallDirection::Outbound => write!(f, "outbound"),
            CallDirection::Inbound => write!(f, "inbound"),
        }
    }
}

/// Why a call reached [`CallState::Terminated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndReason {
    LocalHangup,
    RemoteHangup,
    RemoteBusy,
    RemoteGlare,
    Timeout,
    InternalFailure,
    SignalingFailure,
    ConnectionFailure,
    Dropped,
    ReceivedOfferExpired,
    ReceivedOfferWhileActive,
}

impl EndReason {
    /// The delegate event announcing this terminal reason.
    pub fn app_event(self) -> AppEvent {
        match self {
            EndReason::LocalHangup => AppEvent::EndedLocalHangup,
            EndReason::RemoteHangup => AppEvent::EndedRemoteHangup,
            EndReason::RemoteBusy => AppEvent::EndedRemoteBusy,
            EndReason::RemoteGlare => AppEvent::EndedRemoteGlare,
            EndReason::Timeout => AppEvent::EndedTimeout,
            EndReason::InternalFailure => AppEvent::EndedInternalFailure,
            EndReason::SignalingFailure => AppEvent::EndedSignalingFailure,
            EndReason::ConnectionFailure => AppEvent::EndedConnectionFailure,
            EndReason::Dropped => AppEvent::EndedDropped,
            EndReason::ReceivedOfferExpired => AppEvent::EndedReceivedOfferExpired,
            EndReason::ReceivedOfferWhileActive => AppEvent::EndedReceivedOfferWhileActive,
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Per-call state.
///
/// At most one call occupies the active slot (`Starting` through
/// `Reconnecting`); any other record is either `Pending` (inbound,
/// awaiting `proceed`) or `Terminated` awaiting cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Record created, no transition applied yet.
    Idle,
    /// Outbound call awaiting `proceed`.
    Starting,
    /// Inbound call awaiting `proceed`.
    Pending,
    /// Peer connection being built, offer/answer in flight.
    Proceeding,
    /// ICE/DTLS established; ringing on the relevant side.
    Ringing,
    /// Inbound call accepted locally, media coming up.
    Accepting,
    Connected,
    /// Connected call that lost ICE connectivity.
    Reconnecting,
    Terminated(EndReason),
}

impl CallState {
    /// Whether this call occupies the single active slot.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CallState::Starting
                | CallState::Proceeding
                | CallState::Ringing
                | CallState::Accepting
                | CallState::Connected
                | CallState::Reconnecting
        )
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, CallState::Terminated(_))
    }

    /// Whether an outbound call in this state is still inside the glare
    /// window (no answer latched, setup not complete).
    pub fn in_glare_window(&self) -> bool {
        matches!(
            self,
            CallState::Starting | CallState::Proceeding | CallState::Ringing
        )
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Terminated(reason) => write!(f, "Terminated({})", reason),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Events surfaced to the application delegate via `on_event`.
///
/// Discriminants are stable on the wire-to-UI boundary; do not reorder.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppEvent {
    RingingLocal = 0,
    RingingRemote = 1,
    ConnectedLocal = 2,
    ConnectedRemote = 3,
    EndedLocalHangup = 4,
    EndedRemoteHangup = 5,
    EndedRemoteBusy = 6,
    EndedRemoteGlare = 7,
    EndedTimeout = 8,
    EndedInternalFailure = 9,
    EndedSignalingFailure = 10,
    EndedConnectionFailure = 11,
    EndedDropped = 12,
    RemoteVideoEnable = 13,
    RemoteVideoDisable = 14,
    Reconnecting = 15,
    Reconnected = 16,
    EndedReceivedOfferExpired = 17,
    EndedReceivedOfferWhileActive = 18,
}

impl AppEvent {
    /// Stable index for the UI boundary.
    pub fn as_index(self) -> i32 {
        self as i32
    }

    /// Inverse of [`as_index`](AppEvent::as_index).
    pub fn from_index(index: i32) -> Option<Self> {
        Some(match index {
            0 => AppEvent::RingingLocal,
            1 => AppEvent::RingingRemote,
            2 => AppEvent::ConnectedLocal,
            3 => AppEvent::ConnectedRemote,
            4 => AppEvent::EndedLocalHangup,
            5 => AppEvent::EndedRemoteHangup,
            6 => AppEvent::EndedRemoteBusy,
            7 => AppEvent::EndedRemoteGlare,
            8 => AppEvent::EndedTimeout,
            9 => AppEvent::EndedInternalFailure,
            10 => AppEvent::EndedSignalingFailure,
            11 => AppEvent::EndedConnectionFailure,
            12 => AppEvent::EndedDropped,
            13 => AppEvent::RemoteVideoEnable,
            14 => AppEvent::RemoteVideoDisable,
            15 => AppEvent::Reconnecting,
            16 => AppEvent::Reconnected,
            17 => AppEvent::EndedReceivedOfferExpired,
            18 => AppEvent::EndedReceivedOfferWhileActive,
            _ => return None,
        })
    }

    /// Whether this event concludes the call's event stream.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AppEvent::EndedLocalHangup
                | AppEvent::EndedRemoteHangup
                | AppEvent::EndedRemoteBusy
                | AppEvent::EndedRemoteGlare
                | AppEvent::EndedTimeout
                | AppEvent::EndedInternalFailure
                | AppEvent::EndedSignalingFailure
                | AppEvent::EndedConnectionFailure
                | AppEvent::EndedDropped
                | AppEvent::EndedReceivedOfferExpired
                | AppEvent::EndedReceivedOfferWhileActive
        )
    }
}

impl fmt::Display for AppEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A single ICE candidate, as produced by the peer connection. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub sdp_mid: String,
    pub sdp_mline_index: i32,
    pub sdp: String,
}

impl IceCandidate {
    pub fn new(
        sdp_mid: impl Into<String>,
        sdp_mline_index: i32,
        sdp: impl Into<String>,
    ) -> Self {
        Self {
            sdp_mid: sdp_mid.into(),
            sdp_mline_index,
            sdp: sdp.into(),
        }
    }
}

/// Outbound signaling payloads, dispatched by tag.
///
/// This is the exhaustive set of directives the state machine can emit;
/// the delegate receives them through a single `should_send` slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalingMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    IceUpdate { candidates: Vec<IceCandidate> },
    Hangup,
    Busy,
}

impl SignalingMessage {
    /// The directive tag, for logging and dispatch.
    pub fn tag(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => "Offer",
            SignalingMessage::Answer { .. } => "Answer",
            SignalingMessage::IceUpdate { .. } => "IceUpdate",
            SignalingMessage::Hangup => "Hangup",
            SignalingMessage::Busy => "Busy",
        }
    }
}

impl fmt::Display for SignalingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Snapshot of a call, readable from any thread without hopping to the
/// event task.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub call_id: CallId,
    pub direction: CallDirection,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub selected_device: Option<DeviceId>,
}
