//! Time utilities for the match simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Process start time for uptime tracking
static PEER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize process start time (call once at startup)
pub fn init_peer_time() {
    PEER_START.get_or_init(Instant::now);
}

/// Get peer uptime in seconds
pub fn uptime_secs() -> u64 {
    PEER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 60; // one logical tick per rendered frame
pub const TICK_DURATION_MICROS: u64 = 1_000_000 / SIMULATION_TPS as u64;

/// Own-entity `sync` broadcast cadence, decoupled from the tick rate
pub const PLAYER_SYNC_INTERVAL_MS: u64 = 50;
/// Host `bot_sync` cadence
pub const BOT_SYNC_INTERVAL_MS: u64 = 100;

/// Calculate delta time for a fixed tick (in seconds)
pub fn tick_delta() -> f32 {
    1.0 / SIMULATION_TPS as f32
}

/// Convert a delta in seconds to whole microseconds.
/// The match clock carries the sub-millisecond rest.
pub fn delta_micros(dt: f32) -> u64 {
    (dt.max(0.0) * 1_000_000.0).round() as u64
}

/// A simple timer for measuring durations
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_micros_rounds_and_clamps() {
        assert_eq!(delta_micros(tick_delta()), 16_667);
        assert_eq!(delta_micros(0.25), 250_000);
        assert_eq!(delta_micros(-1.0), 0);
    }
}
