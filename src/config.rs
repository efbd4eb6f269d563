//! Engine configuration.

use std::time::Duration;

/// Tunable budgets and capacities for the engine.
///
/// The defaults match the recommended production values; tests shrink the
/// budgets to keep wall-clock time down.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum age of an inbound offer before it is refused as expired.
    pub offer_max_age: Duration,
    /// Wall-clock budget from call creation until `Connected`.
    pub setup_timeout: Duration,
    /// How long a connected call may stay in `Reconnecting` before it is
    /// terminated with a connection failure.
    pub reconnect_timeout: Duration,
    /// Cadence of the deadline sweep on the event task.
    pub tick_interval: Duration,
    /// Depth of the command and connection-event channels.
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            offer_max_age: Duration::from_secs(60),
            setup_timeout: Duration::from_secs(60),
            reconnect_timeout: Duration::from_secs(30),
            tick_interval: Duration::from_secs(1),
            channel_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn with_offer_max_age(mut self, age: Duration) -> Self {
        self.offer_max_age = age;
        self
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    pub fn with_reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.reconnect_timeout = timeout;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}
