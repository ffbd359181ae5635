//! Thermal model: per-rack inlet/outlet temperatures, humidity, and the
//! throttling flag.
//!
//! Each rack integrates an energy balance: heat generated plus hot-aisle
//! recirculation from same-zone neighbours, minus the cooling its CRAC zone
//! can deliver after ambient, humidity, and inlet deratings. Throttling is
//! hysteretic and consumed by the workload model on the *next* tick — the
//! stabilising one-tick delay of the feedback loop.

use crate::clock::hour_of_day;
use crate::config::SimConfig;
use crate::topology::{racks_in_zone, zone_of_rack};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

/// Fraction of a neighbour's heat that recirculates into a rack's inlet.
const RECIRCULATION_COEFF: f64 = 0.08;
/// Hard ceiling on rack inlet temperature.
const MAX_INLET_C: f64 = 60.0;
/// Hysteresis width below the critical temperature for clearing throttle.
const THROTTLE_CLEAR_MARGIN_C: f64 = 2.0;

/// Thermal state for a single rack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RackThermalState {
    pub rack_id: usize,
    pub zone: usize,
    pub inlet_temp_c: f64,
    pub outlet_temp_c: f64,
    pub heat_kw: f64,
    pub humidity_pct: f64,
    pub delta_t_c: f64,
    pub throttled: bool,
}

/// Thermal state for the facility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilityThermalState {
    pub racks: Vec<RackThermalState>,
    pub ambient_temp_c: f64,
    pub avg_inlet_temp_c: f64,
    pub avg_humidity_pct: f64,
}

impl FacilityThermalState {
    /// Racks currently flagged for thermal throttling.
    pub fn throttled_racks(&self) -> BTreeSet<usize> {
        self.racks
            .iter()
            .filter(|r| r.throttled)
            .map(|r| r.rack_id)
            .collect()
    }
}

/// Outside temperature for a simulated instant: ±4 °C daily swing around
/// the configured base, warmest around 20:00.
pub fn effective_ambient(base_ambient_c: f64, time_s: f64) -> f64 {
    let hour = hour_of_day(time_s);
    base_ambient_c + 4.0 * (2.0 * std::f64::consts::PI * (hour - 14.0) / 24.0).sin()
}

/// Simulates rack temperatures from power draw and cooling.
pub struct ThermalModel {
    config: SimConfig,
    inlet_c: Vec<f64>,
    humidity_pct: Vec<f64>,
    throttled: Vec<bool>,
}

impl ThermalModel {
    pub fn new(config: &SimConfig) -> Self {
        let num_racks = config.facility.num_racks;
        Self {
            config: config.clone(),
            inlet_c: vec![config.thermal.ambient_temp_c; num_racks],
            humidity_pct: vec![45.0; num_racks],
            throttled: vec![false; num_racks],
        }
    }

    /// Advance thermal state by one tick.
    ///
    /// `rack_heat_kw` is the IT heat per rack; `zone_capacity` maps a CRAC
    /// zone to its effective capacity factor (failure health × setpoint
    /// multiplier, 0.0–1.2).
    pub fn step(
        &mut self,
        rack_heat_kw: &[f64],
        zone_capacity: impl Fn(usize) -> f64,
        ambient_temp_c: f64,
        tick_interval_s: f64,
    ) -> FacilityThermalState {
        let thermal = &self.config.thermal;
        let num_racks = self.config.facility.num_racks;
        let crac_units = thermal.crac_units;
        let mut racks = Vec::with_capacity(num_racks);

        let prev_inlet = self.inlet_c.clone();
        let prev_humidity = self.humidity_pct.clone();

        for rack_id in 0..num_racks {
            let zone = zone_of_rack(rack_id, num_racks, crac_units);
            let racks_per_zone = racks_in_zone(zone, num_racks, crac_units).len().max(1);
            let capacity_factor = zone_capacity(zone);
            let heat_kw = rack_heat_kw[rack_id];

            let ambient_derating = (1.0 - 0.02 * (ambient_temp_c - 22.0).max(0.0)).max(0.7);
            let humidity_derating = (1.0 - 0.01 * (prev_humidity[rack_id] - 60.0).max(0.0)).max(0.8);
            let inlet_derating = (1.0 - 0.02 * (prev_inlet[rack_id] - 30.0).max(0.0)).max(0.7);

            let removed = thermal.crac_cooling_capacity_kw * capacity_factor
                / racks_per_zone as f64
                * ambient_derating
                * humidity_derating
                * inlet_derating;

            // Hot-aisle recirculation from same-zone neighbours.
            let mut recirc = 0.0;
            for neighbour in [rack_id.wrapping_sub(1), rack_id + 1] {
                if neighbour < num_racks && zone_of_rack(neighbour, num_racks, crac_units) == zone {
                    recirc += RECIRCULATION_COEFF * rack_heat_kw[neighbour];
                }
            }

            let net_kw = heat_kw + recirc - removed;
            let delta = net_kw * thermal.thermal_mass_coefficient * (tick_interval_s / 60.0);
            let mut inlet = prev_inlet[rack_id] + delta;
            if !inlet.is_finite() {
                warn!(rack_id, "non-finite inlet temperature, clamping to ambient");
                inlet = ambient_temp_c;
            }
            let inlet = inlet.clamp(ambient_temp_c, MAX_INLET_C);
            self.inlet_c[rack_id] = inlet;

            let cooling_on = if capacity_factor > 0.0 { 1.0 } else { 0.0 };
            let humidity = (45.0 - 0.5 * heat_kw + 0.3 * cooling_on).clamp(10.0, 90.0);
            self.humidity_pct[rack_id] = humidity;

            // Hysteresis: set at critical, clear 2 °C below it.
            if inlet >= thermal.critical_inlet_temp_c {
                self.throttled[rack_id] = true;
            } else if inlet <= thermal.critical_inlet_temp_c - THROTTLE_CLEAR_MARGIN_C {
                self.throttled[rack_id] = false;
            }

            let delta_t = 5.0 * heat_kw;
            racks.push(RackThermalState {
                rack_id,
                zone,
                inlet_temp_c: inlet,
                outlet_temp_c: inlet + delta_t,
                heat_kw,
                humidity_pct: humidity,
                delta_t_c: delta_t,
                throttled: self.throttled[rack_id],
            });
        }

        let n = racks.len().max(1) as f64;
        FacilityThermalState {
            avg_inlet_temp_c: racks.iter().map(|r| r.inlet_temp_c).sum::<f64>() / n,
            avg_humidity_pct: racks.iter().map(|r| r.humidity_pct).sum::<f64>() / n,
            racks,
            ambient_temp_c,
        }
    }
}
