//! Storage model: per-rack NVMe shelves.
//!
//! IOPS and throughput are generated from the running job mix; latency
//! degrades with queue depth (Little's Law); write volume accumulates into
//! drive wear. Capacity fill and wear are the only persistent state.

use crate::config::SimConfig;
use crate::topology::ServerId;
use crate::workload::JobType;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

const MAX_IOPS: u64 = 1_000_000;
const MAX_THROUGHPUT_GBPS: f64 = 25.0;
const BASE_READ_LATENCY_US: f64 = 80.0;
const BASE_WRITE_LATENCY_US: f64 = 20.0;
const CAPACITY_PER_RACK_TB: f64 = 30.0;
/// NVMe queue depth ceiling.
const MAX_QUEUE_DEPTH: u64 = 1024;
/// Rated endurance per rack shelf.
const ENDURANCE_PB: f64 = 100.0;

// Per-server I/O at 100% GPU utilisation.
const TRAINING_READ_IOPS: f64 = 50_000.0;
const TRAINING_WRITE_IOPS: f64 = 5_000.0;
const INFERENCE_READ_IOPS: f64 = 8_000.0;
const INFERENCE_WRITE_IOPS: f64 = 500.0;
const BATCH_READ_IOPS: f64 = 30_000.0;
const BATCH_WRITE_IOPS: f64 = 15_000.0;
const TRAINING_READ_GBPS: f64 = 3.0;
const TRAINING_WRITE_GBPS: f64 = 0.5;
const INFERENCE_READ_GBPS: f64 = 0.3;
const INFERENCE_WRITE_GBPS: f64 = 0.05;
const BATCH_READ_GBPS: f64 = 2.0;
const BATCH_WRITE_GBPS: f64 = 1.0;

/// Storage telemetry for one rack's NVMe shelf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RackStorageState {
    pub rack_id: usize,
    pub read_iops: u64,
    pub write_iops: u64,
    pub total_iops: u64,
    pub max_iops: u64,
    pub read_throughput_gbps: f64,
    pub write_throughput_gbps: f64,
    pub max_throughput_gbps: f64,
    pub avg_read_latency_us: f64,
    pub avg_write_latency_us: f64,
    pub p99_read_latency_us: f64,
    pub queue_depth: u64,
    pub used_tb: f64,
    pub total_tb: f64,
    pub utilisation_pct: f64,
    pub drive_health_pct: f64,
}

/// Facility-wide storage telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilityStorageState {
    pub racks: Vec<RackStorageState>,
    pub total_read_iops: u64,
    pub total_write_iops: u64,
    pub total_read_throughput_gbps: f64,
    pub total_write_throughput_gbps: f64,
    pub total_used_tb: f64,
    pub total_capacity_tb: f64,
    pub avg_read_latency_us: f64,
    pub avg_write_latency_us: f64,
    pub avg_drive_health_pct: f64,
}

/// Queue-depth-degraded latency: `base × (1 + 0.5 × qd / max_qd)`.
fn latency_us(base_us: f64, queue_depth: u64) -> f64 {
    base_us * (1.0 + 0.5 * queue_depth as f64 / MAX_QUEUE_DEPTH as f64)
}

/// Simulates per-rack NVMe storage I/O.
pub struct StorageModel {
    facility: crate::config::FacilitySection,
    tick_interval_s: f64,
    cumulative_writes_tb: Vec<f64>,
    used_tb: Vec<f64>,
}

impl StorageModel {
    /// Construction draws each shelf's pre-populated capacity from the
    /// shared stream, so a reset with the same seed reproduces it.
    pub fn new(config: &SimConfig, rng: &mut ChaCha8Rng) -> Self {
        let num_racks = config.facility.num_racks;
        Self {
            facility: config.facility.clone(),
            tick_interval_s: config.clock.tick_interval_s,
            cumulative_writes_tb: vec![0.0; num_racks],
            used_tb: (0..num_racks).map(|_| rng.gen_range(5.0..15.0)).collect(),
        }
    }

    pub fn step(
        &mut self,
        utilisation: &[f64],
        job_types: &[Option<JobType>],
        rng: &mut ChaCha8Rng,
    ) -> FacilityStorageState {
        let mut racks = Vec::with_capacity(self.facility.num_racks);

        for rack_id in 0..self.facility.num_racks {
            let mut read_iops = 0.0;
            let mut write_iops = 0.0;
            let mut read_gbps = 0.0;
            let mut write_gbps = 0.0;

            for srv in 0..self.facility.servers_per_rack {
                let index = ServerId::new(rack_id, srv).index(&self.facility);
                let util = utilisation[index];

                let job_type = match job_types[index] {
                    Some(t) if util >= 0.01 => t,
                    _ => {
                        // Idle: background scrubbing and metadata traffic.
                        read_iops += 100.0;
                        write_iops += 10.0;
                        read_gbps += 0.01;
                        write_gbps += 0.001;
                        continue;
                    }
                };

                let jitter: f64 = StandardNormal.sample(rng);
                let noise = 1.0 + 0.05 * jitter;
                let (ri, wi, rg, wg) = match job_type {
                    JobType::Training => (
                        TRAINING_READ_IOPS,
                        TRAINING_WRITE_IOPS,
                        TRAINING_READ_GBPS,
                        TRAINING_WRITE_GBPS,
                    ),
                    JobType::Inference => (
                        INFERENCE_READ_IOPS,
                        INFERENCE_WRITE_IOPS,
                        INFERENCE_READ_GBPS,
                        INFERENCE_WRITE_GBPS,
                    ),
                    JobType::Batch => (
                        BATCH_READ_IOPS,
                        BATCH_WRITE_IOPS,
                        BATCH_READ_GBPS,
                        BATCH_WRITE_GBPS,
                    ),
                };
                read_iops += ri * util * noise;
                write_iops += wi * util * noise;
                read_gbps += rg * util * noise;
                write_gbps += wg * util * noise;
            }

            // Shelf limits: IOPS capped preserving the read/write mix,
            // throughput rescaled proportionally.
            let total = read_iops + write_iops;
            let capped_total = total.min(MAX_IOPS as f64);
            let read_fraction = if total > 0.0 { read_iops / total } else { 0.5 };
            let read_iops = (capped_total * read_fraction) as u64;
            let write_iops = capped_total as u64 - read_iops;

            let throughput = read_gbps + write_gbps;
            if throughput > MAX_THROUGHPUT_GBPS {
                let scale = MAX_THROUGHPUT_GBPS / throughput;
                read_gbps *= scale;
                write_gbps *= scale;
            }

            // Little's Law: depth = arrival rate × service time.
            let queue_depth = ((capped_total * BASE_READ_LATENCY_US / 1e6) as u64)
                .clamp(1, MAX_QUEUE_DEPTH);
            let avg_read = latency_us(BASE_READ_LATENCY_US, queue_depth);
            let avg_write = latency_us(BASE_WRITE_LATENCY_US, queue_depth);

            // Gbps over the tick → terabytes written.
            let writes_tb = write_gbps * self.tick_interval_s / 8000.0;
            self.cumulative_writes_tb[rack_id] += writes_tb;
            let worn_pb = self.cumulative_writes_tb[rack_id] / 1000.0;
            let drive_health_pct = (100.0 * (1.0 - worn_pb / ENDURANCE_PB)).max(0.0);

            self.used_tb[rack_id] = (self.used_tb[rack_id] + writes_tb * 0.001)
                .min(CAPACITY_PER_RACK_TB * 0.95);
            let used_tb = self.used_tb[rack_id];

            racks.push(RackStorageState {
                rack_id,
                read_iops,
                write_iops,
                total_iops: read_iops + write_iops,
                max_iops: MAX_IOPS,
                read_throughput_gbps: read_gbps,
                write_throughput_gbps: write_gbps,
                max_throughput_gbps: MAX_THROUGHPUT_GBPS,
                avg_read_latency_us: avg_read,
                avg_write_latency_us: avg_write,
                p99_read_latency_us: avg_read * 2.5,
                queue_depth,
                used_tb,
                total_tb: CAPACITY_PER_RACK_TB,
                utilisation_pct: used_tb / CAPACITY_PER_RACK_TB * 100.0,
                drive_health_pct,
            });
        }

        let n = racks.len().max(1) as f64;
        FacilityStorageState {
            total_read_iops: racks.iter().map(|r| r.read_iops).sum(),
            total_write_iops: racks.iter().map(|r| r.write_iops).sum(),
            total_read_throughput_gbps: racks.iter().map(|r| r.read_throughput_gbps).sum(),
            total_write_throughput_gbps: racks.iter().map(|r| r.write_throughput_gbps).sum(),
            total_used_tb: racks.iter().map(|r| r.used_tb).sum(),
            total_capacity_tb: CAPACITY_PER_RACK_TB * racks.len() as f64,
            avg_read_latency_us: racks.iter().map(|r| r.avg_read_latency_us).sum::<f64>() / n,
            avg_write_latency_us: racks.iter().map(|r| r.avg_write_latency_us).sum::<f64>() / n,
            avg_drive_health_pct: racks.iter().map(|r| r.drive_health_pct).sum::<f64>() / n,
            racks,
        }
    }
}
