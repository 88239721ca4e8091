//! Shared connection-health state.
//! Updated by the feed manager, read by the engine's diagnostic logger.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Degraded-health signal for the upstream feed. Persistent connection
/// failure never terminates the process — it shows up here and in the logs.
#[derive(Default)]
pub struct HealthState {
    /// True while the WebSocket is connected and in its read loop.
    pub feed_connected: AtomicBool,
    /// Reconnect attempts since process start.
    pub reconnects: AtomicU64,
    /// Nanosecond timestamp of the last event handed to the engine (0 = none).
    pub last_event_at_ns: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_feed_connected(&self, v: bool) {
        self.feed_connected.store(v, Ordering::Relaxed);
    }

    pub fn feed_connected(&self) -> bool {
        self.feed_connected.load(Ordering::Relaxed)
    }

    pub fn inc_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn set_last_event_at_ns(&self, ns: u64) {
        self.last_event_at_ns.store(ns, Ordering::Relaxed);
    }

    pub fn last_event_at_ns(&self) -> u64 {
        self.last_event_at_ns.load(Ordering::Relaxed)
    }
}
