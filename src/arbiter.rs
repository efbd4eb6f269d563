//! Glare and busy arbitration.
//!
//! Pure decision logic for inbound offers colliding with local state, kept
//! free of engine plumbing so the tie-breaks are unit-testable.

use crate::registry::CallRegistry;
use crate::types::{CallDirection, CallId, RemoteHandle};

/// What to do with an inbound offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDisposition {
    /// No collision; surface the offer.
    Surface,
    /// The same offer was re-delivered; ignore it.
    Duplicate,
    /// A call is active and keeps the line; refuse the offer busy.
    RefuseBusy,
    /// Glare, and the incoming offer wins: the local outbound call dies.
    GlareIncomingWins { local: CallId },
    /// Glare, and the local outbound call wins: the incoming offer dies.
    GlareLocalWins,
    /// The offer supersedes an older, still-pending inbound call from the
    /// same remote.
    ReplacesPending { older: CallId },
}

/// Greater `CallId` wins a glare tie-break.
pub fn glare_winner(a: CallId, b: CallId) -> CallId {
    if a.0 >= b.0 {
        a
    } else {
        b
    }
}

/// Classify an inbound offer against the registry.
///
/// `same_remote` is the application's identity oracle, invoked
/// synchronously on the event thread.
pub fn classify_offer<F>(
    registry: &CallRegistry,
    incoming_id: CallId,
    incoming_remote: &RemoteHandle,
    same_remote: F,
) -> OfferDisposition
where
    F: Fn(&RemoteHandle, &RemoteHandle) -> bool,
{
    if registry.contains(incoming_id) {
        return OfferDisposition::Duplicate;
    }

    if let Some(active) = registry.active_call() {
        let glare = active.direction == CallDirection::Outbound
            && active.state.in_glare_window()
            && same_remote(&active.remote, incoming_remote);

        if glare {
            return if glare_winner(incoming_id, active.id) == incoming_id {
                OfferDisposition::GlareIncomingWins { local: active.id }
            } else {
                OfferDisposition::GlareLocalWins
            };
        }
        return OfferDisposition::RefuseBusy;
    }

    for pending in registry.pending_inbound() {
        if same_remote(&pending.remote, incoming_remote) {
            return OfferDisposition::ReplacesPending { older: pending.id };
        }
    }

    OfferDisposition::Surface
}
