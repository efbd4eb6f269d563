//! Outbound signaling dispatch.
//!
//! Maintains a per-call FIFO of directives with at most one in flight at
//! any time. The next directive is released when the application reports
//! `message_sent`; an essential-message send failure terminates the call,
//! optional failures log and continue.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::errors::{CallError, Result};
use crate::types::{CallId, DeviceId, SignalingMessage};

/// One outbound directive awaiting transport.
#[derive(Debug, Clone)]
pub struct Directive {
    pub call_id: CallId,
    /// `None` broadcasts to every contacted device.
    pub dest_device: Option<DeviceId>,
    pub message: SignalingMessage,
    /// Essential directives terminate the call when their send fails.
    pub essential: bool,
}

/// Outcome of a reported send failure.
#[derive(Debug)]
pub struct SendFailure {
    /// The failed directive was essential; the call must terminate.
    pub essential: bool,
    /// Next directive released for transport, when the call survives.
    pub next: Option<Directive>,
}

#[derive(Debug, Default)]
struct OutboundQueue {
    pending: VecDeque<Directive>,
    in_flight: Option<Directive>,
}

/// Per-call directive FIFOs.
pub struct SignalingDispatcher {
    queues: HashMap<CallId, OutboundQueue>,
}

impl SignalingDispatcher {
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
        }
    }

    /// Queue a directive. Returns the directive to hand to the transport
    /// now, if nothing is in flight for the call.
    pub fn enqueue(&mut self, directive: Directive) -> Option<Directive> {
        let queue = self.queues.entry(directive.call_id).or_default();
        queue.pending.push_back(directive);
        if queue.in_flight.is_none() {
            let next = queue.pending.pop_front();
            queue.in_flight = next.clone();
            next
        } else {
            None
        }
    }

    /// The application delivered the in-flight message. Returns the next
    /// directive released for transport, if any.
    pub fn message_sent(&mut self, call_id: CallId) -> Result<Option<Directive>> {
        let queue = self
            .queues
            .get_mut(&call_id)
            .ok_or(CallError::CallNotFound { call_id })?;
        let sent = queue.in_flight.take().ok_or_else(|| {
            CallError::invalid_state("message_sent", "no message in flight")
        })?;
        debug!(call_id = %call_id, message = %sent.message, "outbound message sent");
        let next = queue.pending.pop_front();
        queue.in_flight = next.clone();
        Ok(next)
    }

    /// The application failed to deliver the in-flight message.
    pub fn message_send_failure(&mut self, call_id: CallId) -> Result<SendFailure> {
        let queue = self
            .queues
            .get_mut(&call_id)
            .ok_or(CallError::CallNotFound { call_id })?;
        let failed = queue.in_flight.take().ok_or_else(|| {
            CallError::invalid_state("message_send_failure", "no message in flight")
        })?;
        if failed.essential {
            // The call is going down; nothing else will be sent for it.
            queue.pending.clear();
            return Ok(SendFailure {
                essential: true,
                next: None,
            });
        }
        debug!(call_id = %call_id, message = %failed.message, "optional message send failed");
        let next = queue.pending.pop_front();
        queue.in_flight = next.clone();
        Ok(SendFailure {
            essential: false,
            next,
        })
    }

    /// No directives queued or in flight for the call.
    pub fn is_idle(&self, call_id: CallId) -> bool {
        match self.queues.get(&call_id) {
            Some(queue) => queue.in_flight.is_none() && queue.pending.is_empty(),
            None => true,
        }
    }

    pub fn message_in_flight(&self, call_id: CallId) -> bool {
        self.queues
            .get(&call_id)
            .map(|queue| queue.in_flight.is_some())
            .unwrap_or(false)
    }

    /// Drop all dispatch state for a call.
    pub fn remove_call(&mut self, call_id: CallId) {
        self.queues.remove(&call_id);
    }

    pub fn clear(&mut self) {
        self.queues.clear();
    }
}
