//! Call registry: the `CallId` -> record table.
//!
//! Owned exclusively by the engine's event task; exclusive ownership is
//! what upholds the single-writer invariant, so no interior locking is
//! needed here.

use std::collections::HashMap;

use crate::call::CallRecord;
use crate::errors::{CallError, Result};
use crate::types::{CallDirection, CallId, CallState};

/// Per-state counts over the live records.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallStats {
    pub total: usize,
    pub starting: usize,
    pub pending: usize,
    pub proceeding: usize,
    pub ringing: usize,
    pub accepting: usize,
    pub connected: usize,
    pub reconnecting: usize,
    pub terminated: usize,
}

/// Table of live call records.
pub struct CallRegistry {
    calls: HashMap<CallId, CallRecord>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self {
            calls: HashMap::new(),
        }
    }

    /// Insert a record. A duplicate `CallId` is an invariant violation.
    pub fn insert(&mut self, record: CallRecord) -> Result<()> {
        let id = record.id;
        if self.calls.contains_key(&id) {
            return Err(CallError::Internal {
                message: format!("duplicate call record for {}", id),
            });
        }
        self.calls.insert(id, record);
        Ok(())
    }

    pub fn get(&self, id: CallId) -> Option<&CallRecord> {
        self.calls.get(&id)
    }

    pub fn get_mut(&mut self, id: CallId) -> Option<&mut CallRecord> {
        self.calls.get_mut(&id)
    }

    pub fn contains(&self, id: CallId) -> bool {
        self.calls.contains_key(&id)
    }

    pub fn remove(&mut self, id: CallId) -> Option<CallRecord> {
        self.calls.remove(&id)
    }

    /// The unique record occupying the active slot, if any.
    pub fn active_call_id(&self) -> Option<CallId> {
        self.active_call().map(|record| record.id)
    }

    /// The unique record occupying the active slot, if any.
    pub fn active_call(&self) -> Option<&CallRecord> {
        self.calls.values().find(|record| record.state.is_active())
    }

    /// Inbound records still awaiting `proceed`.
    pub fn pending_inbound(&self) -> impl Iterator<Item = &CallRecord> {
        self.calls.values().filter(|record| {
            record.direction == CallDirection::Inbound && record.state == CallState::Pending
        })
    }

    /// Ids of inbound calls still awaiting `proceed`.
    pub fn pending_inbound_ids(&self) -> Vec<CallId> {
        self.pending_inbound().map(|record| record.id).collect()
    }

    pub fn ids(&self) -> Vec<CallId> {
        self.calls.keys().copied().collect()
    }

    pub fn drain(&mut self) -> Vec<CallRecord> {
        self.calls.drain().map(|(_, record)| record).collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn stats(&self) -> CallStats {
        let mut stats = CallStats::default();
        for record in self.calls.values() {
            stats.total += 1;
            match record.state {
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
