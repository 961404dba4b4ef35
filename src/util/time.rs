//! Frame timing helpers for the simulation loop

use std::time::{Duration, Instant};

/// Render frames per second the headless loop targets
pub const FRAME_RATE: u32 = 60;
pub const FRAME_INTERVAL_MICROS: u64 = 1_000_000 / FRAME_RATE as u64;
/// Longest step a single frame may integrate (seconds)
pub const MAX_FRAME_DELTA: f32 = 0.05;
/// Rate at which the server sends snapshots
pub const SNAPSHOT_RATE: u32 = 10;
pub const SNAPSHOT_INTERVAL_MS: f64 = 1000.0 / SNAPSHOT_RATE as f64;

pub fn frame_interval() -> Duration {
    Duration::from_micros(FRAME_INTERVAL_MICROS)
}

/// Clamp a measured frame delta so a stalled frame cannot launch bodies.
/// Non-finite or negative deltas become zero.
pub fn clamp_frame_delta(dt: f32) -> f32 {
    if dt.is_finite() {
        dt.clamp(0.0, MAX_FRAME_DELTA)
    } else {
        0.0
    }
}

/// Monotonic clock for frame timestamps
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

    /// Milliseconds since start, with sub-millisecond precision
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
