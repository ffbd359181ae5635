//! Network fabric model: per-rack ToR switches and the spine.
//!
//! Traffic is generated per server from the running job mix (training jobs
//! hammer RDMA, inference is north-south, batch is storage I/O), then ToR
//! latency follows an M/M/1 queue and loss appears past 80% utilisation.
//! Multi-rack jobs put their cross-rack share onto spine links.

use crate::config::SimConfig;
use crate::topology::ServerId;
use crate::workload::{Job, JobType};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const TOR_UPLINK_GBPS: f64 = 100.0;
const SPINE_LINK_GBPS: f64 = 400.0;
/// Single-hop ToR latency at zero load.
const BASE_INTRA_LATENCY_US: f64 = 2.0;
/// Cross-spine latency at zero load.
const BASE_INTER_LATENCY_US: f64 = 5.0;
const PORTS_PER_TOR: u32 = 48;

// Per-server traffic at 100% GPU utilisation (Gbps).
const TRAINING_RDMA_GBPS: f64 = 40.0;
const INFERENCE_NS_GBPS: f64 = 8.0;
const BATCH_STORAGE_GBPS: f64 = 15.0;
const IDLE_TRAFFIC_GBPS: f64 = 0.1;

/// Network telemetry for one rack's ToR switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RackNetworkState {
    pub rack_id: usize,
    pub ingress_gbps: f64,
    pub egress_gbps: f64,
    pub intra_rack_gbps: f64,
    pub tor_capacity_gbps: f64,
    pub tor_utilisation_pct: f64,
    pub avg_latency_us: f64,
    pub p99_latency_us: f64,
    pub packet_loss_pct: f64,
    pub crc_errors: u64,
    pub rdma_tx_gbps: f64,
    pub rdma_rx_gbps: f64,
    pub active_ports: u32,
    pub total_ports: u32,
}

/// A spine fabric link between two racks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpineLinkState {
    pub src_rack: usize,
    pub dst_rack: usize,
    pub bandwidth_gbps: f64,
    pub capacity_gbps: f64,
    pub utilisation_pct: f64,
    pub latency_us: f64,
}

/// Facility-wide network telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilityNetworkState {
    pub racks: Vec<RackNetworkState>,
    pub spine_links: Vec<SpineLinkState>,
    pub total_east_west_gbps: f64,
    pub total_north_south_gbps: f64,
    pub total_rdma_gbps: f64,
    pub avg_fabric_latency_us: f64,
    pub total_packet_loss_pct: f64,
    pub total_crc_errors: u64,
}

/// M/M/1 latency: service time divided by remaining capacity.
fn queue_latency_us(base_us: f64, utilisation: f64) -> f64 {
    base_us / (1.0 - utilisation).max(0.01)
}

/// Loss is zero below 80% utilisation, quadratic above.
fn packet_loss_pct(utilisation: f64) -> f64 {
    let u = utilisation.clamp(0.0, 1.0);
    if u <= 0.8 {
        0.0
    } else {
        0.5 * ((u - 0.8) / 0.2).powi(2)
    }
}

/// Simulates ToR and spine telemetry. CRC counters persist across ticks.
pub struct NetworkModel {
    facility: crate::config::FacilitySection,
    crc_errors: Vec<u64>,
}

impl NetworkModel {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            facility: config.facility.clone(),
            crc_errors: vec![0; config.facility.num_racks],
        }
    }

    pub fn step(
        &mut self,
        utilisation: &[f64],
        job_types: &[Option<JobType>],
        running_jobs: &[Job],
        partitioned_racks: &BTreeSet<usize>,
        rng: &mut ChaCha8Rng,
    ) -> FacilityNetworkState {
        let num_racks = self.facility.num_racks;

        // Racks each multi-rack job spans, for spine traffic attribution.
        let mut partner_racks: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); num_racks];
        for job in running_jobs {
            let racks = job.racks();
            if racks.len() > 1 {
                for &r in &racks {
                    for &other in &racks {
                        if other != r {
                            partner_racks[r].insert(other);
                        }
                    }
                }
            }
        }

        let mut rack_states = Vec::with_capacity(num_racks);
        let mut spine_traffic: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        let mut total_ew = 0.0;
        let mut total_ns = 0.0;
        let mut total_rdma = 0.0;
        let mut total_crc = 0u64;

        for rack_id in 0..num_racks {
            let partitioned = partitioned_racks.contains(&rack_id);
            let mut ingress = 0.0;
            let mut egress = 0.0;
            let mut intra = 0.0;
            let mut rdma_tx = 0.0;
            let mut rdma_rx = 0.0;
            let mut active_ports = 0u32;

            for srv in 0..self.facility.servers_per_rack {
                if partitioned {
                    continue;
                }
                let index = ServerId::new(rack_id, srv).index(&self.facility);
                let util = utilisation[index];

                if util < 0.01 || job_types[index].is_none() {
                    intra += IDLE_TRAFFIC_GBPS;
                    active_ports += 1;
                    continue;
                }
                active_ports += 1;

                match job_types[index] {
                    Some(JobType::Training) => {
                        let rdma = TRAINING_RDMA_GBPS * util;
                        rdma_tx += rdma * 0.5;
                        rdma_rx += rdma * 0.5;
                        intra += rdma * 0.7;
                        let inter = rdma * 0.3;
                        let partners = &partner_racks[rack_id];
                        if !partners.is_empty() {
                            let share = inter / partners.len() as f64;
                            for &partner in partners {
                                let key = (rack_id.min(partner), rack_id.max(partner));
                                *spine_traffic.entry(key).or_insert(0.0) += share;
                            }
                            egress += inter;
                        }
                        // Checkpoint traffic rides the uplink too.
                        egress += 2.0 * util;
                        total_rdma += rdma;
                    }
                    Some(JobType::Inference) => {
                        let ns = INFERENCE_NS_GBPS * util;
                        ingress += ns * 0.6;
                        egress += ns * 0.4;
                        intra += ns * 0.2;
                        total_ns += ns;
                    }
                    _ => {
                        let storage = BATCH_STORAGE_GBPS * util;
                        ingress += storage * 0.7;
                        egress += storage * 0.3;
                        intra += storage * 0.1;
                    }
                }
            }

            let noise: f64 = StandardNormal.sample(rng);
            let jitter = 1.0 + 0.03 * noise;
            ingress *= jitter;
            egress *= jitter;

            total_ew += intra;
            let uplink = ingress + egress;
            let tor_util = if partitioned {
                0.0
            } else {
                uplink / TOR_UPLINK_GBPS
            };
            let rho = tor_util.min(1.0);
            let avg_latency = queue_latency_us(BASE_INTRA_LATENCY_US, rho);
            let loss = packet_loss_pct(rho);

            if rng.gen::<f64>() < 0.001 {
                self.crc_errors[rack_id] += rng.gen_range(1..5);
            }
            total_crc += self.crc_errors[rack_id];

            rack_states.push(RackNetworkState {
                rack_id,
                ingress_gbps: ingress,
                egress_gbps: egress,
                intra_rack_gbps: intra,
                tor_capacity_gbps: TOR_UPLINK_GBPS,
                tor_utilisation_pct: (tor_util * 100.0).min(100.0),
                avg_latency_us: avg_latency,
                p99_latency_us: avg_latency * (1.0 + 2.3 * rho),
                packet_loss_pct: loss,
                crc_errors: self.crc_errors[rack_id],
                rdma_tx_gbps: rdma_tx,
                rdma_rx_gbps: rdma_rx,
                active_ports,
                total_ports: PORTS_PER_TOR,
            });
        }

        let mut spine_links = Vec::with_capacity(spine_traffic.len());
        let mut latency_sum = 0.0;
        for (&(src, dst), &bw) in &spine_traffic {
            let rho = (bw / SPINE_LINK_GBPS).min(1.0);
            let latency = queue_latency_us(BASE_INTER_LATENCY_US, rho);
            latency_sum += latency;
            spine_links.push(SpineLinkState {
                src_rack: src,
                dst_rack: dst,
                bandwidth_gbps: bw,
                capacity_gbps: SPINE_LINK_GBPS,
                utilisation_pct: (rho * 100.0).min(100.0),
                latency_us: latency,
            });
        }
        let avg_fabric_latency_us = if spine_links.is_empty() {
            BASE_INTER_LATENCY_US
        } else {
            latency_sum / spine_links.len() as f64
        };
        let total_packet_loss_pct = rack_states.iter().map(|r| r.packet_loss_pct).sum::<f64>()
            / rack_states.len().max(1) as f64;

        FacilityNetworkState {
            racks: rack_states,
            spine_links,
            total_east_west_gbps: total_ew,
            total_north_south_gbps: total_ns,
            total_rdma_gbps: total_rdma,
            avg_fabric_latency_us,
            total_packet_loss_pct,
            total_crc_errors: total_crc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_curve() {
        assert!((queue_latency_us(2.0, 0.0) - 2.0).abs() < 1e-9);
        assert!((queue_latency_us(2.0, 0.5) - 4.0).abs() < 1e-9);
        // Saturated: denominator floors at 0.01.
        assert!((queue_latency_us(2.0, 1.0) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_loss_only_past_eighty_pct() {
        assert_eq!(packet_loss_pct(0.5), 0.0);
        assert_eq!(packet_loss_pct(0.8), 0.0);
        assert!((packet_loss_pct(0.9) - 0.125).abs() < 1e-9);
        assert!((packet_loss_pct(1.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_partitioned_rack_goes_silent() {
        use rand::SeedableRng;
        let config = SimConfig::default();
        let mut model = NetworkModel::new(&config);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let n = config.facility.num_servers();
        let partitioned: BTreeSet<usize> = [2].into_iter().collect();

        let state = model.step(
            &vec![0.9; n],
            &vec![Some(JobType::Inference); n],
            &[],
            &partitioned,
            &mut rng,
        );
        assert_eq!(state.racks[2].ingress_gbps, 0.0);
        assert_eq!(state.racks[2].tor_utilisation_pct, 0.0);
        assert!(state.racks[1].ingress_gbps > 0.0);
    }
}
