//! Time utilities for the tick-driven simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 30; // 30 ticks per second
pub const SNAPSHOT_TPS: u32 = 15; // 15 snapshots per second
pub const TICK_DURATION_MICROS: u64 = 1_000_000 / SIMULATION_TPS as u64;

/// Calculate delta time for physics (in seconds)
pub fn tick_delta() -> f32 {
    1.0 / SIMULATION_TPS as f32
}

/// Convert a duration in seconds to whole ticks (never less than one)
pub fn secs_to_ticks(secs: f32) -> u64 {
    let ticks = (secs.max(0.0) * SIMULATION_TPS as f32).round() as u64;
    ticks.max(1)
}

/// Convert a tick count back to seconds
pub fn ticks_to_secs(ticks: u64) -> f32 {
    ticks as f32 / SIMULATION_TPS as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secs_to_ticks_rounds_and_floors_at_one() {
        assert_eq!(secs_to_ticks(10.0), 300);
        assert_eq!(secs_to_ticks(0.8), 24);
        assert_eq!(secs_to_ticks(0.5), 15);
        assert_eq!(secs_to_ticks(0.0), 1);
        assert_eq!(secs_to_ticks(-3.0), 1);
    }

    #[test]
    fn test_ticks_to_secs() {
        assert!((ticks_to_secs(45) - 1.5).abs() < 1e-6);
    }
}
