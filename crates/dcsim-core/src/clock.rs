//! Simulated clock for the discrete-time engine.
//!
//! The [`SimClock`] tracks simulated seconds independently of wall time,
//! advancing by a fixed interval per tick. An optional real-time factor
//! sleeps the calling thread so a continuous run can pace itself against
//! the wall clock without affecting simulated time.

use serde::{Deserialize, Serialize};

/// Local hour the simulation starts at (time 0 = 08:00).
const SIM_START_HOUR: f64 = 8.0;

/// Hour of day (0–24) for a simulated instant. The diurnal ambient, carbon,
/// and price curves all derive their phase from this.
pub fn hour_of_day(time_s: f64) -> f64 {
    (time_s / 3600.0 + SIM_START_HOUR) % 24.0
}

/// Simulated clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimClock {
    /// Current simulated time in seconds, starting at zero.
    current_time_s: f64,
    /// Number of completed ticks.
    tick_count: u64,
    /// Simulated seconds per tick.
    tick_interval_s: f64,
    /// Wall-clock pacing factor; 0 disables sleeping.
    realtime_factor: f64,
}

impl SimClock {
    pub fn new(tick_interval_s: f64, realtime_factor: f64) -> Self {
        Self {
            current_time_s: 0.0,
            tick_count: 0,
            tick_interval_s,
            realtime_factor,
        }
    }

    /// Advance the clock by one tick, sleeping `interval × factor` wall
    /// seconds when a real-time factor is configured.
    pub fn tick(&mut self) {
        self.tick_count += 1;
        self.current_time_s += self.tick_interval_s;

        if self.realtime_factor > 0.0 {
            let pause = self.tick_interval_s * self.realtime_factor;
            std::thread::sleep(std::time::Duration::from_secs_f64(pause));
        }
    }

    /// Current simulated time in seconds.
    pub fn now(&self) -> f64 {
        self.current_time_s
    }

    /// Number of completed ticks.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Simulated seconds per tick.
    pub fn tick_interval_s(&self) -> f64 {
        self.tick_interval_s
    }

    /// Zero the clock, keeping the configured interval and pacing.
    pub fn reset(&mut self) {
        self.current_time_s = 0.0;
        self.tick_count = 0;
    }

    /// Elapsed simulated time formatted as HH:MM:SS.
    pub fn elapsed_hms(&self) -> String {
        let total = self.current_time_s as u64;
        format!(
            "{:02}:{:02}:{:02}",
            total / 3600,
            (total % 3600) / 60,
            total % 60
        )
    }
}
