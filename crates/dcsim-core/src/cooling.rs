//! Cooling plant model: CRAC units, chilled-water loop, and cooling tower.
//!
//! Each CRAC absorbs the heat of its zone up to effective capacity. COP
//! varies with ambient temperature; cooling electrical power is the heat
//! moved divided by COP.

use crate::clock::hour_of_day;
use crate::config::SimConfig;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Design COP at reference conditions.
const BASE_COP: f64 = 4.5;
const MIN_COP: f64 = 2.0;
const MAX_COP: f64 = 6.0;
const CRAC_MAX_AIRFLOW_CFM: f64 = 20_000.0;
const CHW_DESIGN_SUPPLY_C: f64 = 7.0;
const CHW_DESIGN_FLOW_LPS: f64 = 5.0;
const TOWER_DESIGN_APPROACH_C: f64 = 5.0;

/// Telemetry for a single CRAC unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CracUnitState {
    pub unit_id: usize,
    pub supply_air_temp_c: f64,
    pub return_air_temp_c: f64,
    pub setpoint_c: f64,
    pub fan_speed_pct: f64,
    pub airflow_cfm: f64,
    pub chw_supply_temp_c: f64,
    pub chw_return_temp_c: f64,
    pub chw_flow_lps: f64,
    pub cooling_output_kw: f64,
    pub cooling_capacity_kw: f64,
    pub load_pct: f64,
    pub operational: bool,
}

/// Telemetry for the cooling tower.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoolingTowerState {
    pub wet_bulb_temp_c: f64,
    pub approach_temp_c: f64,
    pub condenser_supply_temp_c: f64,
    pub condenser_return_temp_c: f64,
    pub fan_speed_pct: f64,
    pub heat_rejection_kw: f64,
}

/// Facility-wide cooling state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilityCoolingState {
    pub crac_units: Vec<CracUnitState>,
    pub cooling_tower: CoolingTowerState,
    pub total_cooling_output_kw: f64,
    pub total_cooling_capacity_kw: f64,
    pub cooling_load_pct: f64,
    pub cop: f64,
    pub cooling_power_kw: f64,
    pub chw_plant_supply_temp_c: f64,
    pub chw_plant_return_temp_c: f64,
    pub chw_plant_delta_t_c: f64,
    pub pump_power_kw: f64,
    pub pump_flow_lps: f64,
}

/// COP falls as ambient rises past 22 °C and improves slightly below it,
/// clamped to a plausible chiller band.
pub fn cop_for_ambient(ambient_temp_c: f64) -> f64 {
    let cop = BASE_COP
        * (1.0 - 0.02 * (ambient_temp_c - 22.0).max(0.0))
        * (1.0 + 0.1 * (22.0 - ambient_temp_c).max(0.0));
    cop.clamp(MIN_COP, MAX_COP)
}

/// Simulates the cooling plant.
pub struct CoolingModel {
    crac_units: usize,
    crac_capacity_kw: f64,
    default_setpoint_c: f64,
}

impl CoolingModel {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            crac_units: config.thermal.crac_units,
            crac_capacity_kw: config.thermal.crac_cooling_capacity_kw,
            default_setpoint_c: config.thermal.crac_setpoint_c,
        }
    }

    /// Compute cooling plant state for one tick.
    ///
    /// `zone_heat_kw` is the IT heat per CRAC zone, `zone_health` the
    /// failure multiplier (0.0/0.5/1.0), `setpoints` any operator override
    /// per zone.
    pub fn step(
        &self,
        zone_heat_kw: &[f64],
        zone_health: impl Fn(usize) -> f64,
        setpoints: impl Fn(usize) -> Option<f64>,
        ambient_temp_c: f64,
        time_s: f64,
        rng: &mut ChaCha8Rng,
    ) -> FacilityCoolingState {
        // Wet-bulb approximation: 3–7 °C below dry-bulb on a daily cycle.
        let hour = hour_of_day(time_s);
        let depression = 5.0 + 2.0 * (2.0 * std::f64::consts::PI * (hour - 6.0) / 24.0).sin();
        let wb_noise: f64 = StandardNormal.sample(rng);
        let wet_bulb = ambient_temp_c - depression + 0.3 * wb_noise;

        let approach = TOWER_DESIGN_APPROACH_C + ((wet_bulb - 18.0) * 0.15).max(0.0);
        let condenser_supply = wet_bulb + approach;
        let condenser_return = condenser_supply + 5.0;

        let chw_supply = CHW_DESIGN_SUPPLY_C + ((condenser_supply - 28.0) * 0.2).max(0.0);

        let total_heat: f64 = zone_heat_kw.iter().sum();
        let cop = cop_for_ambient(ambient_temp_c);

        let mut crac_states = Vec::with_capacity(self.crac_units);
        let mut total_output = 0.0;
        for unit_id in 0..self.crac_units {
            let health = zone_health(unit_id);
            let capacity = self.crac_capacity_kw * health;
            let output = zone_heat_kw.get(unit_id).copied().unwrap_or(0.0).min(capacity);
            let operational = health > 0.0;
            let load_fraction = if capacity > 0.0 { output / capacity } else { 0.0 };

            let setpoint = setpoints(unit_id).unwrap_or(self.default_setpoint_c);
            let fan_pct = if operational {
                (30.0 + 70.0 * load_fraction).clamp(30.0, 100.0)
            } else {
                0.0
            };
            let airflow = CRAC_MAX_AIRFLOW_CFM * fan_pct / 100.0;
            let supply_air = if operational { setpoint } else { ambient_temp_c };
            let return_air = if airflow > 0.0 {
                supply_air + output / (airflow * 0.0012)
            } else {
                supply_air
            };
            let chw_flow = if operational {
                CHW_DESIGN_FLOW_LPS * fan_pct / 100.0 * 1.2
            } else {
                0.0
            };
            let chw_return = if chw_flow > 0.0 {
                chw_supply + output / (chw_flow * 4.186)
            } else {
                chw_supply
            };

            total_output += output;
            crac_states.push(CracUnitState {
                unit_id,
                supply_air_temp_c: supply_air,
                return_air_temp_c: return_air,
                setpoint_c: setpoint,
                fan_speed_pct: fan_pct,
                airflow_cfm: airflow,
                chw_supply_temp_c: chw_supply,
                chw_return_temp_c: chw_return,
                chw_flow_lps: chw_flow,
                cooling_output_kw: output,
                cooling_capacity_kw: self.crac_capacity_kw,
                load_pct: load_fraction * 100.0,
                operational,
            });
        }

        let total_capacity = self.crac_capacity_kw * self.crac_units as f64;
        let load_fraction = (total_heat / total_capacity.max(1.0)).min(1.0);
        let chw_delta_t = 3.0 + load_fraction * 4.0;
        let total_flow: f64 = crac_states.iter().map(|c| c.chw_flow_lps).sum();

        FacilityCoolingState {
            cooling_tower: CoolingTowerState {
                wet_bulb_temp_c: wet_bulb,
                approach_temp_c: approach,
                condenser_supply_temp_c: condenser_supply,
                condenser_return_temp_c: condenser_return,
                fan_speed_pct: (total_heat / total_capacity.max(1.0) * 100.0).clamp(20.0, 100.0),
                heat_rejection_kw: total_output * 1.1,
            },
            crac_units: crac_states,
            total_cooling_output_kw: total_output,
            total_cooling_capacity_kw: total_capacity,
            cooling_load_pct: total_output / total_capacity.max(1.0) * 100.0,
            cop,
            cooling_power_kw: total_output / cop,
            chw_plant_supply_temp_c: chw_supply,
            chw_plant_return_temp_c: chw_supply + chw_delta_t,
            chw_plant_delta_t_c: chw_delta_t,
            pump_power_kw: 1.0 + total_flow * 0.15,
            pump_flow_lps: total_flow,
        }
    }
}
