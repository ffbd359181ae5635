//! Power model: per-server, per-rack, and facility power draw.
//!
//! Server draw follows a non-linear GPU power curve; facility overhead uses
//! a dynamic PUE that worsens at low load and high ambient temperature.

use crate::config::SimConfig;
use crate::topology::ServerId;
use serde::{Deserialize, Serialize};

/// GPU power fraction at zero utilisation.
const IDLE_FRACTION: f64 = 0.05;

/// Power state for a single server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerPowerState {
    pub server_id: ServerId,
    pub rack_id: usize,
    pub gpu_utilisation: f64,
    pub gpu_power_w: f64,
    pub total_power_w: f64,
}

/// Power state for a rack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RackPowerState {
    pub rack_id: usize,
    pub total_power_kw: f64,
    pub pdu_utilisation_pct: f64,
    pub servers: Vec<ServerPowerState>,
}

/// Aggregate facility power state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilityPowerState {
    pub it_power_kw: f64,
    pub total_power_kw: f64,
    pub pue: f64,
    pub headroom_kw: f64,
    pub power_cap_exceeded: bool,
    pub racks: Vec<RackPowerState>,
}

/// Fraction of TDP drawn at a given utilisation.
///
/// Rises slowly at low utilisation and steeply near saturation, bottoming
/// out at the idle fraction: `idle + (1 − idle)(0.3u + 0.7u²)`.
pub fn gpu_power_curve(utilisation: f64) -> f64 {
    let u = utilisation.clamp(0.0, 1.0);
    IDLE_FRACTION + (1.0 - IDLE_FRACTION) * (0.3 * u + 0.7 * u * u)
}

/// Computes power draw from per-server GPU utilisation.
pub struct PowerModel {
    facility: crate::config::FacilitySection,
    power: crate::config::PowerSection,
}

impl PowerModel {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            facility: config.facility.clone(),
            power: config.power.clone(),
        }
    }

    /// Dynamic PUE: worse at low load, worse in hot weather, clamped to
    /// [base, base × 1.6].
    pub fn dynamic_pue(&self, it_power_kw: f64, ambient_temp_c: f64) -> f64 {
        let base = self.power.pue_overhead_factor;
        let load_fraction = (it_power_kw / self.power.facility_power_cap_kw).clamp(0.0, 1.0);
        let pue =
            base * (1.0 + 0.4 * (1.0 - load_fraction)) + 0.005 * (ambient_temp_c - 22.0).max(0.0);
        pue.clamp(base, base * 1.6)
    }

    /// Compute the facility power state for one tick.
    ///
    /// `utilisation` is indexed by flat server index; `pdu_multiplier` maps
    /// rack id to a power multiplier (PDU spikes).
    pub fn compute(
        &self,
        utilisation: &[f64],
        pdu_multiplier: impl Fn(usize) -> f64,
        ambient_temp_c: f64,
    ) -> FacilityPowerState {
        let mut racks = Vec::with_capacity(self.facility.num_racks);
        let mut it_power_w = 0.0;

        for rack_id in 0..self.facility.num_racks {
            let mut servers = Vec::with_capacity(self.facility.servers_per_rack);
            let mut rack_power_w = 0.0;

            for srv in 0..self.facility.servers_per_rack {
                let server_id = ServerId::new(rack_id, srv);
                let util = utilisation[server_id.index(&self.facility)];
                let gpu_power_w = self.facility.gpus_per_server as f64
                    * gpu_power_curve(util)
                    * self.power.gpu_tdp_watts;
                let total_power_w = self.power.server_base_power_watts + gpu_power_w;
                rack_power_w += total_power_w;
                servers.push(ServerPowerState {
                    server_id,
                    rack_id,
                    gpu_utilisation: util,
                    gpu_power_w,
                    total_power_w,
                });
            }

            let multiplier = pdu_multiplier(rack_id);
            let total_power_kw = rack_power_w / 1000.0 * multiplier;
            it_power_w += rack_power_w * multiplier;
            racks.push(RackPowerState {
                rack_id,
                total_power_kw,
                pdu_utilisation_pct: total_power_kw / self.power.pdu_capacity_kw * 100.0,
                servers,
            });
        }

        let it_power_kw = it_power_w / 1000.0;
        let pue = self.dynamic_pue(it_power_kw, ambient_temp_c);
        let total_power_kw = it_power_kw * pue;
        let headroom_kw = self.power.facility_power_cap_kw - total_power_kw;

        FacilityPowerState {
            it_power_kw,
            total_power_kw,
            pue,
            headroom_kw,
            power_cap_exceeded: headroom_kw < 0.0,
            racks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> PowerModel {
        PowerModel::new(&SimConfig::default())
    }

    #[test]
    fn test_idle_curve_at_zero() {
        // u=0: curve bottoms out at the idle fraction.
        assert!((gpu_power_curve(0.0) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_full_load_curve_at_one() {
        // u=1: 0.05 + 0.95 × 1.0 = 1.0 — full TDP.
        assert!((gpu_power_curve(1.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_server_power_boundaries() {
        let model = model();
        let num_servers = SimConfig::default().facility.num_servers();

        let idle = model.compute(&vec![0.0; num_servers], |_| 1.0, 22.0);
        let idle_server_w = &idle.racks[0].servers[0].total_power_w;
        // base 200 W + 4 GPUs × 5% × 300 W TDP.
        assert!((idle_server_w - (200.0 + 4.0 * 0.05 * 300.0)).abs() < 1e-9);

        let full = model.compute(&vec![1.0; num_servers], |_| 1.0, 22.0);
        let full_server_w = &full.racks[0].servers[0].total_power_w;
        assert!((full_server_w - (200.0 + 4.0 * 300.0)).abs() < 1e-9);
    }

    #[test]
    fn test_pue_clamped_to_band() {
        let model = model();
        // Zero load: 1.4 × 1.4 = 1.96 < 1.4 × 1.6 cap.
        assert!((model.dynamic_pue(0.0, 22.0) - 1.96).abs() < 1e-9);
        // Full load, cool day: the base.
        assert!((model.dynamic_pue(120.0, 22.0) - 1.4).abs() < 1e-9);
        // Hot day adds the ambient term.
        assert!(model.dynamic_pue(120.0, 30.0) > 1.4);
        // Never above the 1.6× band.
        assert!(model.dynamic_pue(0.0, 60.0) <= 1.4 * 1.6 + 1e-9);
    }

    #[test]
    fn test_pdu_spike_multiplies_rack_power() {
        let model = model();
        let num_servers = SimConfig::default().facility.num_servers();
        let utils = vec![0.5; num_servers];

        let normal = model.compute(&utils, |_| 1.0, 22.0);
        let spiked = model.compute(&utils, |r| if r == 2 { 1.2 } else { 1.0 }, 22.0);

        let ratio = spiked.racks[2].total_power_kw / normal.racks[2].total_power_kw;
        assert!((ratio - 1.2).abs() < 1e-9);
        assert!((spiked.racks[3].total_power_kw - normal.racks[3].total_power_kw).abs() < 1e-9);
        assert!(spiked.it_power_kw > normal.it_power_kw);
    }

    #[test]
    fn test_headroom_sign_matches_cap() {
        let model = model();
        let num_servers = SimConfig::default().facility.num_servers();
        let state = model.compute(&vec![1.0; num_servers], |_| 1.0, 22.0);
        // 32 servers at 1.4 kW = 44.8 kW IT; 44.8 × 1.4 PUE < 120 cap.
        assert!(state.headroom_kw > 0.0);
        assert!(!state.power_cap_exceeded);
        assert_eq!(state.power_cap_exceeded, state.headroom_kw < 0.0);
    }
}
