//! Grid carbon intensity and electricity price models.
//!
//! Both follow UK-style diurnal profiles: carbon intensity is a sinusoid
//! troughing overnight and peaking mid-afternoon; price is a double-peak
//! shape with morning and evening maxima. Cumulative emissions and cost
//! integrate facility power over each tick.

use crate::clock::hour_of_day;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Mean grid intensity (g CO₂/kWh).
const INTENSITY_BASE: f64 = 200.0;
/// Daily swing amplitude: ~140 at 03:00, ~280 at 15:00 including noise.
const INTENSITY_AMPLITUDE: f64 = 70.0;
const INTENSITY_NOISE_SIGMA: f64 = 5.0;
const INTENSITY_FLOOR: f64 = 50.0;

const PRICE_BASE_GBP: f64 = 0.15;
const PRICE_FLOOR_GBP: f64 = 0.02;

/// Carbon and cost snapshot for one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarbonState {
    pub carbon_intensity_gco2_kwh: f64,
    pub carbon_rate_gco2_s: f64,
    pub cumulative_carbon_kg: f64,
    pub electricity_price_gbp_kwh: f64,
    pub cost_rate_gbp_h: f64,
    pub cumulative_cost_gbp: f64,
}

/// Noise-free grid carbon intensity at a simulated instant.
pub fn intensity_curve(time_s: f64) -> f64 {
    let hour = hour_of_day(time_s);
    // Peak at 15:00, trough at 03:00.
    INTENSITY_BASE
        + INTENSITY_AMPLITUDE * (2.0 * std::f64::consts::PI * (hour - 9.0) / 24.0).sin()
}

/// Noise-free electricity price at a simulated instant: morning peak at
/// 08:00 (~0.23), evening peak at 18:00 (~0.21), overnight trough (~0.10).
pub fn price_curve(time_s: f64) -> f64 {
    let hour = hour_of_day(time_s);
    let bump = |centre: f64, width: f64| (-0.5 * ((hour - centre) / width).powi(2)).exp();
    PRICE_BASE_GBP + 0.08 * bump(8.0, 2.0) + 0.06 * bump(18.0, 2.0) - 0.05 * bump(3.0, 2.5)
}

/// Accumulates emissions and cost from facility power draw.
pub struct CarbonModel {
    cumulative_carbon_kg: f64,
    cumulative_cost_gbp: f64,
}

impl CarbonModel {
    pub fn new() -> Self {
        Self {
            cumulative_carbon_kg: 0.0,
            cumulative_cost_gbp: 0.0,
        }
    }

    pub fn step(
        &mut self,
        time_s: f64,
        total_power_kw: f64,
        tick_interval_s: f64,
        rng: &mut ChaCha8Rng,
    ) -> CarbonState {
        let noise: f64 = StandardNormal.sample(rng);
        let intensity = (intensity_curve(time_s) + INTENSITY_NOISE_SIGMA * noise)
            .max(INTENSITY_FLOOR);
        let price_noise: f64 = StandardNormal.sample(rng);
        let price = (price_curve(time_s) + 0.005 * price_noise).max(PRICE_FLOOR_GBP);

        let energy_kwh = total_power_kw * tick_interval_s / 3600.0;
        self.cumulative_carbon_kg += intensity * energy_kwh / 1000.0;
        self.cumulative_cost_gbp += price * energy_kwh;

        CarbonState {
            carbon_intensity_gco2_kwh: intensity,
            carbon_rate_gco2_s: intensity * total_power_kw / 3600.0,
            cumulative_carbon_kg: self.cumulative_carbon_kg,
            electricity_price_gbp_kwh: price,
            cost_rate_gbp_h: price * total_power_kw,
            cumulative_cost_gbp: self.cumulative_cost_gbp,
        }
    }
}

impl Default for CarbonModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    /// Simulated seconds for a given wall-clock hour (sim starts at 08:00).
    fn at_hour(hour: f64) -> f64 {
        ((hour - 8.0).rem_euclid(24.0)) * 3600.0
    }

    #[test]
    fn test_intensity_extremes() {
        let peak = intensity_curve(at_hour(15.0));
        let trough = intensity_curve(at_hour(3.0));
        assert!((peak - 270.0).abs() < 1.0, "peak {:.1}", peak);
        assert!((trough - 130.0).abs() < 1.0, "trough {:.1}", trough);
    }

    #[test]
    fn test_price_double_peak() {
        let morning = price_curve(at_hour(8.0));
        let evening = price_curve(at_hour(18.0));
        let night = price_curve(at_hour(3.0));
        let midday = price_curve(at_hour(13.0));
        assert!(morning > 0.21 && morning < 0.25);
        assert!(evening > 0.19 && evening < 0.23);
        assert!(night < 0.12);
        assert!(midday > night && midday < morning);
    }

    #[test]
    fn test_cumulative_monotonic() {
        let mut model = CarbonModel::new();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut last = CarbonState {
            carbon_intensity_gco2_kwh: 0.0,
            carbon_rate_gco2_s: 0.0,
            cumulative_carbon_kg: 0.0,
            electricity_price_gbp_kwh: 0.0,
            cost_rate_gbp_h: 0.0,
            cumulative_cost_gbp: 0.0,
        };
        for tick in 1..=1440u64 {
            let state = model.step(tick as f64 * 60.0, 50.0, 60.0, &mut rng);
            assert!(state.cumulative_carbon_kg >= last.cumulative_carbon_kg);
            assert!(state.cumulative_cost_gbp >= last.cumulative_cost_gbp);
            last = state;
        }
        // 24 h at 50 kW: 1200 kWh at ~200 g/kWh ≈ 240 kg.
        assert!(last.cumulative_carbon_kg > 180.0 && last.cumulative_carbon_kg < 300.0);
    }
}
