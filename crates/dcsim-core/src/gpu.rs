//! Per-GPU telemetry model.
//!
//! Derives NVIDIA-style device telemetry (junction temperature, clocks, ECC
//! counters, PCIe/NVLink bandwidth, memory occupancy) from the upstream
//! workload utilisation and rack inlet temperatures. Purely observational —
//! nothing here feeds back into the simulation.

use crate::config::SimConfig;
use crate::power::gpu_power_curve;
use crate::topology::ServerId;
use crate::workload::JobType;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

// H100-class reference parameters.
const BASE_SM_CLOCK_MHZ: f64 = 1410.0;
const BOOST_SM_CLOCK_MHZ: f64 = 1980.0;
const MEM_CLOCK_MHZ: u32 = 1593;
const MEM_TOTAL_MIB: u64 = 81_920;
const PCIE_MAX_GBPS: f64 = 64.0;
const NVLINK_MAX_GBPS: f64 = 450.0;

/// Junction temperature above which the GPU throttles.
const THERMAL_THROTTLE_C: f64 = 83.0;
/// Clock multiplier while throttling (40% degradation).
const THROTTLE_CLOCK_FACTOR: f64 = 0.6;
/// Base ECC error probability per GPU per tick.
const ECC_BASE_RATE: f64 = 1e-7;
/// ECC rate multiplier above 85 °C.
const ECC_HOT_MULTIPLIER: f64 = 3.0;
const ECC_HOT_TEMP_C: f64 = 85.0;

/// Telemetry snapshot for a single GPU device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuState {
    pub gpu_id: String,
    pub server_id: ServerId,
    pub rack_id: usize,
    pub sm_utilisation_pct: f64,
    pub gpu_temp_c: f64,
    pub mem_temp_c: f64,
    pub power_draw_w: f64,
    pub sm_clock_mhz: u32,
    pub mem_clock_mhz: u32,
    pub mem_used_mib: u64,
    pub mem_total_mib: u64,
    pub ecc_errors: u64,
    pub pcie_tx_gbps: f64,
    pub pcie_rx_gbps: f64,
    pub nvlink_tx_gbps: f64,
    pub nvlink_rx_gbps: f64,
    pub fan_speed_pct: f64,
    pub thermal_throttle: bool,
}

/// Aggregate GPU state for one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerGpuState {
    pub server_id: ServerId,
    pub rack_id: usize,
    pub gpus: Vec<GpuState>,
    pub avg_gpu_temp_c: f64,
    pub total_gpu_power_w: f64,
    pub mem_used_mib: u64,
    pub mem_total_mib: u64,
}

/// Facility-wide GPU telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilityGpuState {
    pub servers: Vec<ServerGpuState>,
    pub total_gpus: u32,
    pub healthy_gpus: u32,
    pub throttled_gpus: u32,
    pub ecc_error_gpus: u32,
    pub avg_gpu_temp_c: f64,
    pub avg_sm_util_pct: f64,
    pub total_mem_used_mib: u64,
    pub total_mem_total_mib: u64,
}

impl FacilityGpuState {
    /// Fraction of GPUs neither throttled nor carrying ECC errors.
    pub fn healthy_fraction(&self) -> f64 {
        if self.total_gpus == 0 {
            return 1.0;
        }
        self.healthy_gpus as f64 / self.total_gpus as f64
    }
}

/// Simulates per-GPU telemetry. ECC counters persist across ticks.
pub struct GpuModel {
    facility: crate::config::FacilitySection,
    gpu_tdp_w: f64,
    ecc_errors: Vec<u64>,
}

impl GpuModel {
    pub fn new(config: &SimConfig) -> Self {
        let total = config.facility.total_gpus() as usize;
        Self {
            facility: config.facility.clone(),
            gpu_tdp_w: config.power.gpu_tdp_watts,
            ecc_errors: vec![0; total],
        }
    }

    pub fn step(
        &mut self,
        utilisation: &[f64],
        rack_inlets: &[f64],
        job_types: &[Option<JobType>],
        rng: &mut ChaCha8Rng,
    ) -> FacilityGpuState {
        let gpus_per_server = self.facility.gpus_per_server as usize;

        let mut servers = Vec::with_capacity(self.facility.num_servers());
        let mut total_gpus = 0u32;
        let mut healthy = 0u32;
        let mut throttled = 0u32;
        let mut ecc_gpus = 0u32;
        let mut temp_sum = 0.0;
        let mut util_sum = 0.0;
        let mut mem_used_total = 0u64;

        for index in 0..self.facility.num_servers() {
            let server_id = ServerId::from_index(index, &self.facility);
            let util = utilisation[index];
            let inlet = rack_inlets[server_id.rack];
            let job_type = job_types[index];

            let mut gpus = Vec::with_capacity(gpus_per_server);
            let mut server_power = 0.0;
            let mut server_temp_sum = 0.0;
            let mut server_mem_used = 0u64;

            for gpu_idx in 0..gpus_per_server {
                let ecc_index = index * gpus_per_server + gpu_idx;
                total_gpus += 1;

                let noise: f64 = StandardNormal.sample(rng);
                let gpu_temp = inlet + 5.0 + 70.0 * util + noise;
                let mut mem_temp = gpu_temp - 5.0;
                if job_type == Some(JobType::Training) {
                    mem_temp += 3.0;
                }

                let thermal_throttle = gpu_temp > THERMAL_THROTTLE_C;
                let mut sm_clock = BASE_SM_CLOCK_MHZ + (BOOST_SM_CLOCK_MHZ - BASE_SM_CLOCK_MHZ) * util;
                if thermal_throttle {
                    sm_clock *= THROTTLE_CLOCK_FACTOR;
                    throttled += 1;
                }

                let power_draw_w = gpu_power_curve(util) * self.gpu_tdp_w;

                let mem_fraction = match job_type {
                    _ if util < 0.01 => 0.01,
                    Some(JobType::Training) => 0.6 + 0.35 * util,
                    Some(JobType::Inference) => 0.2 + 0.3 * util,
                    _ => 0.3 + 0.4 * util,
                };
                let mem_used_mib = (MEM_TOTAL_MIB as f64 * mem_fraction) as u64;

                let fan_speed_pct = if gpu_temp < 50.0 {
                    30.0
                } else {
                    (30.0 + 70.0 * (gpu_temp - 50.0) / (THERMAL_THROTTLE_C - 50.0)).clamp(30.0, 100.0)
                };

                let mut pcie_base = util * PCIE_MAX_GBPS * 0.4;
                if job_type == Some(JobType::Training) {
                    pcie_base *= 1.5;
                }
                let pcie_tx = (pcie_base * (0.9 + rng.gen::<f64>() * 0.2)).min(PCIE_MAX_GBPS);
                let pcie_rx = (pcie_base * (0.9 + rng.gen::<f64>() * 0.2)).min(PCIE_MAX_GBPS);

                let (nvlink_tx, nvlink_rx) = if job_type == Some(JobType::Training) && util > 0.1 {
                    let frac = util * 0.5;
                    (
                        (frac * NVLINK_MAX_GBPS * (0.85 + rng.gen::<f64>() * 0.3))
                            .min(NVLINK_MAX_GBPS),
                        (frac * NVLINK_MAX_GBPS * (0.85 + rng.gen::<f64>() * 0.3))
                            .min(NVLINK_MAX_GBPS),
                    )
                } else {
                    (0.0, 0.0)
                };

                let ecc_rate = if gpu_temp > ECC_HOT_TEMP_C {
                    ECC_BASE_RATE * ECC_HOT_MULTIPLIER
                } else {
                    ECC_BASE_RATE
                };
                if rng.gen::<f64>() < ecc_rate {
                    self.ecc_errors[ecc_index] += 1;
                }
                let ecc_errors = self.ecc_errors[ecc_index];
                if ecc_errors > 0 {
                    ecc_gpus += 1;
                }
                if !thermal_throttle && ecc_errors == 0 {
                    healthy += 1;
                }

                server_power += power_draw_w;
                server_temp_sum += gpu_temp;
                server_mem_used += mem_used_mib;
                temp_sum += gpu_temp;
                util_sum += util * 100.0;

                gpus.push(GpuState {
                    gpu_id: format!("{}-gpu-{}", server_id, gpu_idx),
                    server_id,
                    rack_id: server_id.rack,
                    sm_utilisation_pct: util * 100.0,
                    gpu_temp_c: gpu_temp,
                    mem_temp_c: mem_temp,
                    power_draw_w,
                    sm_clock_mhz: sm_clock as u32,
                    mem_clock_mhz: MEM_CLOCK_MHZ,
                    mem_used_mib,
                    mem_total_mib: MEM_TOTAL_MIB,
                    ecc_errors,
                    pcie_tx_gbps: pcie_tx,
                    pcie_rx_gbps: pcie_rx,
                    nvlink_tx_gbps: nvlink_tx,
                    nvlink_rx_gbps: nvlink_rx,
                    fan_speed_pct,
                    thermal_throttle,
                });
            }

            mem_used_total += server_mem_used;
            servers.push(ServerGpuState {
                server_id,
                rack_id: server_id.rack,
                avg_gpu_temp_c: server_temp_sum / gpus_per_server as f64,
                total_gpu_power_w: server_power,
                mem_used_mib: server_mem_used,
                mem_total_mib: MEM_TOTAL_MIB * gpus_per_server as u64,
                gpus,
            });
        }

        FacilityGpuState {
            servers,
            total_gpus,
            healthy_gpus: healthy,
            throttled_gpus: throttled,
            ecc_error_gpus: ecc_gpus,
            avg_gpu_temp_c: temp_sum / total_gpus.max(1) as f64,
            avg_sm_util_pct: util_sum / total_gpus.max(1) as f64,
            total_mem_used_mib: mem_used_total,
            total_mem_total_mib: MEM_TOTAL_MIB * total_gpus as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn setup() -> (GpuModel, ChaCha8Rng, usize) {
        let config = SimConfig::default();
        let n = config.facility.num_servers();
        (GpuModel::new(&config), ChaCha8Rng::seed_from_u64(42), n)
    }

    #[test]
    fn test_idle_gpus_run_cool_and_healthy() {
        let (mut model, mut rng, n) = setup();
        let state = model.step(&vec![0.05; n], &vec![22.0; 8], &vec![None; n], &mut rng);
        assert_eq!(state.total_gpus, 128);
        assert_eq!(state.throttled_gpus, 0);
        // inlet 22 + 5 + 3.5 ± noise.
        assert!(state.avg_gpu_temp_c > 25.0 && state.avg_gpu_temp_c < 36.0);
        assert!(state.healthy_fraction() > 0.99);
    }

    #[test]
    fn test_hot_inlet_plus_full_util_throttles() {
        let (mut model, mut rng, n) = setup();
        // 40 + 5 + 70 ≈ 115 °C junction: everything throttles.
        let state = model.step(
            &vec![1.0; n],
            &vec![40.0; 8],
            &vec![Some(JobType::Training); n],
            &mut rng,
        );
        assert_eq!(state.throttled_gpus, state.total_gpus);

        // Clocks degraded by 40%.
        let gpu = &state.servers[0].gpus[0];
        let expected = (BOOST_SM_CLOCK_MHZ * THROTTLE_CLOCK_FACTOR) as u32;
        assert!(gpu.sm_clock_mhz <= expected + 1);
    }

    #[test]
    fn test_training_uses_nvlink_inference_does_not() {
        let (mut model, mut rng, n) = setup();
        let mut types = vec![Some(JobType::Inference); n];
        types[0] = Some(JobType::Training);
        let state = model.step(&vec![0.9; n], &vec![22.0; 8], &types, &mut rng);
        assert!(state.servers[0].gpus[0].nvlink_tx_gbps > 0.0);
        assert_eq!(state.servers[1].gpus[0].nvlink_tx_gbps, 0.0);
    }

    #[test]
    fn test_ecc_counters_persist() {
        let (mut model, mut rng, n) = setup();
        // Force counters up by stepping many times at hot temps; the rate is
        // tiny, so seed the counter directly instead of hoping.
        model.ecc_errors[0] = 2;
        let state = model.step(&vec![0.5; n], &vec![22.0; 8], &vec![None; n], &mut rng);
        assert_eq!(state.servers[0].gpus[0].ecc_errors, 2);
        assert_eq!(state.ecc_error_gpus, 1);
        assert!(state.healthy_fraction() < 1.0);
    }
}
