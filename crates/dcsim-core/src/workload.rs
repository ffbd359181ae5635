//! Workload model: job queues, stochastic arrivals, and the GPU-slot
//! scheduler.
//!
//! Jobs arrive via a Poisson process, wait in an insertion-ordered pending
//! queue, and are placed by priority-first-fit onto server GPU slots. The
//! model publishes per-server GPU utilisation each tick, which drives the
//! power and thermal models downstream.

use crate::config::SimConfig;
use crate::error::SimError;
use crate::topology::ServerId;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Idle GPU utilisation floor (fans, memory refresh).
pub const IDLE_UTILISATION: f64 = 0.05;
/// Utilisation cap applied to servers on a thermally throttled rack.
const THROTTLED_UTIL_CAP: f64 = 0.5;
/// Utilisation cap applied to servers with a degraded GPU.
const DEGRADED_UTIL_CAP: f64 = 0.3;
/// Completed-job retention.
const MAX_COMPLETED: usize = 1000;

/// Workload classes with distinct resource and urgency profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Training,
    Inference,
    Batch,
}

impl JobType {
    /// (gpu range, duration range s, priority range, sla range s, target util)
    fn profile(&self) -> ((u32, u32), (u32, u32), (u8, u8), (f64, f64), f64) {
        match self {
            JobType::Training => ((4, 16), (3600, 14400), (2, 4), (1800.0, 7200.0), 0.92),
            JobType::Inference => ((1, 2), (60, 600), (4, 5), (30.0, 300.0), 0.60),
            JobType::Batch => ((2, 8), (600, 7200), (1, 3), (3600.0, 14400.0), 0.85),
        }
    }

    /// Sustained GPU utilisation while running.
    pub fn target_utilisation(&self) -> f64 {
        self.profile().4
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobType::Training => "training",
            JobType::Inference => "inference",
            JobType::Batch => "batch",
        };
        f.write_str(s)
    }
}

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Preempted,
}

/// A single workload job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub name: String,
    pub job_type: JobType,
    pub gpu_requirement: u32,
    /// 1 (low) to 5 (critical).
    pub priority: u8,
    pub duration_s: f64,
    pub submitted_at: f64,
    pub started_at: Option<f64>,
    pub completed_at: Option<f64>,
    /// One entry per GPU slot held; empty unless running.
    pub assigned_servers: Vec<ServerId>,
    pub gpu_util_target: f64,
    pub sla_deadline_s: f64,
    pub sla_violated: bool,
    pub status: JobStatus,
}

impl Job {
    /// Distinct racks this job's GPUs occupy.
    pub fn racks(&self) -> Vec<usize> {
        let set: BTreeSet<usize> = self.assigned_servers.iter().map(|s| s.rack).collect();
        set.into_iter().collect()
    }
}

/// Caller-supplied parameters for [`WorkloadModel::submit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: Option<String>,
    pub job_type: JobType,
    pub gpu_requirement: u32,
    pub priority: u8,
    pub duration_s: f64,
    pub sla_deadline_s: f64,
    pub gpu_util_target: Option<f64>,
}

/// Queue counters for snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub sla_violations: usize,
    pub total_submitted: u64,
}

/// Job queues plus the server GPU-slot arena.
pub struct WorkloadModel {
    facility: crate::config::FacilitySection,
    mean_arrival_interval_s: f64,
    tick_interval_s: f64,
    /// Free GPU slots per server, indexed by flat server index.
    free_slots: Vec<u32>,
    pending: Vec<Job>,
    running: Vec<Job>,
    completed: Vec<Job>,
    total_submitted: u64,
}

impl WorkloadModel {
    pub fn new(config: &SimConfig) -> Self {
        let facility = config.facility.clone();
        let free_slots = vec![facility.gpus_per_server; facility.num_servers()];
        Self {
            facility,
            mean_arrival_interval_s: config.workload.mean_job_arrival_interval_s,
            tick_interval_s: config.clock.tick_interval_s,
            free_slots,
            pending: Vec::new(),
            running: Vec::new(),
            completed: Vec::new(),
            total_submitted: 0,
        }
    }

    /// Advance the workload by one tick: arrivals, partition failures,
    /// scheduling, completion, SLA flagging — in that order.
    pub fn tick(&mut self, now: f64, rng: &mut ChaCha8Rng, partitioned_racks: &BTreeSet<usize>) {
        self.sample_arrival(now, rng);
        self.fail_partitioned(now, partitioned_racks);
        self.schedule(now);
        self.complete(now);

        for job in &mut self.pending {
            if !job.sla_violated && now - job.submitted_at > job.sla_deadline_s {
                job.sla_violated = true;
            }
        }
    }

    /// Poisson arrivals: P(at least one) = 1 − exp(−tick / mean).
    fn sample_arrival(&mut self, now: f64, rng: &mut ChaCha8Rng) {
        let p = 1.0 - (-self.tick_interval_s / self.mean_arrival_interval_s).exp();
        if rng.gen::<f64>() >= p {
            return;
        }

        // Arrival mix: inference 0.5, batch 0.3, training 0.2.
        let job_type = match rng.gen::<f64>() {
            x if x < 0.5 => JobType::Inference,
            x if x < 0.8 => JobType::Batch,
            _ => JobType::Training,
        };
        let ((gpu_lo, gpu_hi), (dur_lo, dur_hi), (pri_lo, pri_hi), (sla_lo, sla_hi), util) =
            job_type.profile();

        let gpu_requirement = rng
            .gen_range(gpu_lo..=gpu_hi)
            .min(self.facility.total_gpus())
            .max(1);
        let duration_s = rng.gen_range(dur_lo..=dur_hi) as f64;
        let priority = rng.gen_range(pri_lo..=pri_hi);
        let sla_deadline_s = rng.gen_range(sla_lo..sla_hi);

        let job_id = crate::random_uuid(rng);
        let name = format!("{}-{}", job_type, &job_id[..8]);
        self.total_submitted += 1;
        self.pending.push(Job {
            job_id,
            name,
            job_type,
            gpu_requirement,
            priority,
            duration_s,
            submitted_at: now,
            started_at: None,
            completed_at: None,
            assigned_servers: Vec::new(),
            gpu_util_target: util,
            sla_deadline_s,
            sla_violated: false,
            status: JobStatus::Queued,
        });
    }

    /// Submit an explicit job. Returns the new job id.
    pub fn submit(&mut self, spec: JobSpec, now: f64, rng: &mut ChaCha8Rng) -> Result<String, SimError> {
        if spec.gpu_requirement == 0 || spec.gpu_requirement > self.facility.total_gpus() {
            return Err(SimError::InvalidArgument(format!(
                "gpu_requirement {} outside 1..={}",
                spec.gpu_requirement,
                self.facility.total_gpus(),
            )));
        }
        if !(1..=5).contains(&spec.priority) {
            return Err(SimError::InvalidArgument(format!(
                "priority {} outside 1..=5",
                spec.priority
            )));
        }
        if spec.duration_s <= 0.0 || spec.sla_deadline_s <= 0.0 {
            return Err(SimError::InvalidArgument(
                "duration_s and sla_deadline_s must be > 0".to_string(),
            ));
        }

        let job_id = crate::random_uuid(rng);
        let name = spec
            .name
            .unwrap_or_else(|| format!("{}-{}", spec.job_type, &job_id[..8]));
        self.total_submitted += 1;
        self.pending.push(Job {
            job_id: job_id.clone(),
            name,
            job_type: spec.job_type,
            gpu_requirement: spec.gpu_requirement,
            priority: spec.priority,
            duration_s: spec.duration_s,
            submitted_at: now,
            started_at: None,
            completed_at: None,
            assigned_servers: Vec::new(),
            gpu_util_target: spec
                .gpu_util_target
                .unwrap_or_else(|| spec.job_type.target_utilisation()),
            sla_deadline_s: spec.sla_deadline_s,
            sla_violated: false,
            status: JobStatus::Queued,
        });
        Ok(job_id)
    }

    /// Fail every running job touching a partitioned rack, freeing its slots.
    fn fail_partitioned(&mut self, _now: f64, partitioned_racks: &BTreeSet<usize>) {
        if partitioned_racks.is_empty() {
            return;
        }
        let jobs = std::mem::take(&mut self.running);
        for mut job in jobs {
            let severed = job
                .assigned_servers
                .iter()
                .any(|s| partitioned_racks.contains(&s.rack));
            if severed {
                for server in &job.assigned_servers {
                    self.free_slots[server.index(&self.facility)] += 1;
                }
                job.assigned_servers.clear();
                job.status = JobStatus::Failed;
                self.push_completed(job);
            } else {
                self.running.push(job);
            }
        }
    }

    /// Priority-first-fit scheduling pass.
    ///
    /// Pending jobs are considered by (priority desc, submitted_at asc) but
    /// stored in insertion order. Placement prefers a single server with
    /// enough free slots; otherwise slots are gathered greedily in server
    /// scan order.
    fn schedule(&mut self, now: f64) {
        let mut order: Vec<usize> = (0..self.pending.len()).collect();
        order.sort_by(|&a, &b| {
            let (ja, jb) = (&self.pending[a], &self.pending[b]);
            jb.priority
                .cmp(&ja.priority)
                .then(ja.submitted_at.total_cmp(&jb.submitted_at))
        });

        let num_servers = self.facility.num_servers();
        let mut placements: Vec<Option<Vec<(usize, u32)>>> = vec![None; self.pending.len()];
        for &i in &order {
            let req = self.pending[i].gpu_requirement;
            if let Some(assignment) = find_placement(&self.free_slots, 0..num_servers, req) {
                for &(server, take) in &assignment {
                    self.free_slots[server] -= take;
                }
                placements[i] = Some(assignment);
            }
        }

        let facility = self.facility.clone();
        let mut index = 0;
        let mut placed = Vec::new();
        self.pending.retain_mut(|job| {
            let assignment = placements[index].take();
            index += 1;
            match assignment {
                Some(assignment) => {
                    job.status = JobStatus::Running;
                    job.started_at = Some(now);
                    for (server, take) in assignment {
                        let id = ServerId::from_index(server, &facility);
                        for _ in 0..take {
                            job.assigned_servers.push(id);
                        }
                    }
                    placed.push(job.clone());
                    false
                }
                None => true,
            }
        });
        self.running.extend(placed);
    }

    fn complete(&mut self, now: f64) {
        let facility = self.facility.clone();
        let mut finished = Vec::new();
        let mut free_slots = std::mem::take(&mut self.free_slots);
        self.running.retain_mut(|job| {
            let started = job.started_at.unwrap_or(now);
            if now - started >= job.duration_s {
                for server in &job.assigned_servers {
                    free_slots[server.index(&facility)] += 1;
                }
                job.assigned_servers.clear();
                job.completed_at = Some(now);
                job.status = JobStatus::Completed;
                finished.push(job.clone());
                false
            } else {
                true
            }
        });
        self.free_slots = free_slots;
        for job in finished {
            self.push_completed(job);
        }
    }

    fn push_completed(&mut self, job: Job) {
        self.completed.push(job);
        if self.completed.len() > MAX_COMPLETED {
            let excess = self.completed.len() - MAX_COMPLETED;
            self.completed.drain(0..excess);
        }
    }

    /// Preempt a running job, freeing its GPU slots.
    pub fn preempt(&mut self, job_id: &str) -> Result<(), SimError> {
        let position = match self.running.iter().position(|j| j.job_id == job_id) {
            Some(p) => p,
            None => {
                return Err(if self.job_exists(job_id) {
                    SimError::JobNotRunning(job_id.to_string())
                } else {
                    SimError::JobNotFound(job_id.to_string())
                })
            }
        };
        let mut job = self.running.remove(position);
        for server in &job.assigned_servers {
            self.free_slots[server.index(&self.facility)] += 1;
        }
        job.assigned_servers.clear();
        job.status = JobStatus::Preempted;
        self.push_completed(job);
        Ok(())
    }

    /// Atomically move a running job's GPU slots onto `target_rack`.
    pub fn migrate(&mut self, job_id: &str, target_rack: usize) -> Result<(), SimError> {
        if target_rack >= self.facility.num_racks {
            return Err(SimError::RackNotFound(target_rack));
        }
        let position = match self.running.iter().position(|j| j.job_id == job_id) {
            Some(p) => p,
            None => {
                return Err(if self.job_exists(job_id) {
                    SimError::JobNotRunning(job_id.to_string())
                } else {
                    SimError::JobNotFound(job_id.to_string())
                })
            }
        };

        let job = &self.running[position];
        let req = job.gpu_requirement;

        // Placement is evaluated against availability with the job's own
        // slots returned, so an intra-rack move can reuse them.
        let mut avail = self.free_slots.clone();
        for server in &job.assigned_servers {
            avail[server.index(&self.facility)] += 1;
        }
        let rack_servers = target_rack * self.facility.servers_per_rack
            ..(target_rack + 1) * self.facility.servers_per_rack;
        let assignment = find_placement(&avail, rack_servers, req).ok_or(
            SimError::InsufficientCapacity {
                rack: target_rack,
                gpus: req,
            },
        )?;

        let facility = self.facility.clone();
        let job = &mut self.running[position];
        for server in &job.assigned_servers {
            self.free_slots[server.index(&facility)] += 1;
        }
        job.assigned_servers.clear();
        for (server, take) in assignment {
            self.free_slots[server] -= take;
            let id = ServerId::from_index(server, &facility);
            for _ in 0..take {
                job.assigned_servers.push(id);
            }
        }
        Ok(())
    }

    fn job_exists(&self, job_id: &str) -> bool {
        self.pending
            .iter()
            .chain(self.running.iter())
            .chain(self.completed.iter())
            .any(|j| j.job_id == job_id)
    }

    /// Per-server GPU utilisation for this tick.
    ///
    /// Raw utilisation blends running-job targets with the idle floor, then
    /// caps apply: 0.5 on throttled racks, 0.3 on degraded servers, and the
    /// server's explicit power-cap fraction when below 1.0.
    pub fn utilisation(
        &self,
        throttled_racks: &BTreeSet<usize>,
        degraded_servers: &BTreeSet<ServerId>,
        power_caps: &BTreeMap<ServerId, f64>,
    ) -> Vec<f64> {
        let total = self.facility.gpus_per_server as f64;
        let mut busy_util = vec![0.0f64; self.facility.num_servers()];
        let mut busy_count = vec![0u32; self.facility.num_servers()];
        for job in &self.running {
            for server in &job.assigned_servers {
                let index = server.index(&self.facility);
                busy_util[index] += job.gpu_util_target;
                busy_count[index] += 1;
            }
        }

        (0..self.facility.num_servers())
            .map(|index| {
                let id = ServerId::from_index(index, &self.facility);
                let idle = self.facility.gpus_per_server - busy_count[index];
                let mut util = (busy_util[index] + IDLE_UTILISATION * idle as f64) / total;
                if throttled_racks.contains(&id.rack) {
                    util = util.min(THROTTLED_UTIL_CAP);
                }
                if degraded_servers.contains(&id) {
                    util = util.min(DEGRADED_UTIL_CAP);
                }
                if let Some(&cap) = power_caps.get(&id) {
                    if cap < 1.0 {
                        util = util.min(cap);
                    }
                }
                util.clamp(0.0, 1.0)
            })
            .collect()
    }

    /// Dominant running job type per server (last assignment wins).
    pub fn server_job_types(&self) -> Vec<Option<JobType>> {
        let mut types = vec![None; self.facility.num_servers()];
        for job in &self.running {
            for server in &job.assigned_servers {
                types[server.index(&self.facility)] = Some(job.job_type);
            }
        }
        types
    }

    pub fn counts(&self) -> WorkloadCounts {
        WorkloadCounts {
            pending: self.pending.len(),
            running: self.running.len(),
            completed: self.completed.len(),
            sla_violations: self.sla_violation_count(),
            total_submitted: self.total_submitted,
        }
    }

    /// Jobs flagged as SLA-violated across all queues.
    pub fn sla_violation_count(&self) -> usize {
        self.pending
            .iter()
            .chain(self.running.iter())
            .chain(self.completed.iter())
            .filter(|j| j.sla_violated)
            .count()
    }

    pub fn pending(&self) -> &[Job] {
        &self.pending
    }

    pub fn running(&self) -> &[Job] {
        &self.running
    }

    pub fn completed(&self) -> &[Job] {
        &self.completed
    }

    /// Free GPU slots per server.
    pub fn free_slots(&self) -> &[u32] {
        &self.free_slots
    }

    /// Free GPU slots aggregated per rack.
    pub fn free_slots_per_rack(&self) -> Vec<u32> {
        let mut per_rack = vec![0u32; self.facility.num_racks];
        for (index, &free) in self.free_slots.iter().enumerate() {
            per_rack[ServerId::from_index(index, &self.facility).rack] += free;
        }
        per_rack
    }
}

/// Find GPU slots for `req` GPUs among `servers` (a flat-index range).
///
/// Prefers the first single server that fits the whole request, then falls
/// back to gathering slots greedily in scan order. Returns (server index,
/// slots taken) pairs, or `None` if the range cannot satisfy the request.
fn find_placement(
    free_slots: &[u32],
    servers: std::ops::Range<usize>,
    req: u32,
) -> Option<Vec<(usize, u32)>> {
    for server in servers.clone() {
        if free_slots[server] >= req {
            return Some(vec![(server, req)]);
        }
    }

    let mut assignment = Vec::new();
    let mut needed = req;
    for server in servers {
        if needed == 0 {
            break;
        }
        let take = free_slots[server].min(needed);
        if take > 0 {
            assignment.push((server, take));
            needed -= take;
        }
    }
    if needed == 0 {
        Some(assignment)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    /// Default facility with random arrivals effectively disabled, so slot
    /// assertions see only explicitly submitted jobs.
    fn model() -> (WorkloadModel, ChaCha8Rng) {
        let config =
            SimConfig::from_str("workload:\n  mean_job_arrival_interval_s: 1.0e12\n").unwrap();
        (WorkloadModel::new(&config), ChaCha8Rng::seed_from_u64(42))
    }

    /// Default facility with live arrivals.
    fn stochastic_model() -> (WorkloadModel, ChaCha8Rng) {
        let config = SimConfig::default();
        (WorkloadModel::new(&config), ChaCha8Rng::seed_from_u64(42))
    }

    fn spec(job_type: JobType, gpus: u32, priority: u8) -> JobSpec {
        JobSpec {
            name: None,
            job_type,
            gpu_requirement: gpus,
            priority,
            duration_s: 600.0,
            sla_deadline_s: 300.0,
            gpu_util_target: None,
        }
    }

    fn tick_quiet(model: &mut WorkloadModel, now: f64, rng: &mut ChaCha8Rng) {
        model.tick(now, rng, &BTreeSet::new());
    }

    #[test]
    fn test_submit_and_schedule_single_server() {
        let (mut model, mut rng) = model();
        model
            .submit(spec(JobType::Inference, 2, 5), 0.0, &mut rng)
            .unwrap();
        tick_quiet(&mut model, 60.0, &mut rng);

        assert_eq!(model.running().len(), 1);
        let job = &model.running()[0];
        assert_eq!(job.assigned_servers.len(), 2);
        // Both slots on the first server — single-server first fit.
        assert!(job.assigned_servers.iter().all(|s| *s == ServerId::new(0, 0)));
        assert_eq!(model.free_slots()[0], 2);
    }

    #[test]
    fn test_greedy_spread_when_no_single_server_fits() {
        let (mut model, mut rng) = model();
        // 6 GPUs > 4 per server: spills onto the second server.
        model
            .submit(spec(JobType::Batch, 6, 3), 0.0, &mut rng)
            .unwrap();
        tick_quiet(&mut model, 60.0, &mut rng);

        let job = &model.running()[0];
        assert_eq!(job.assigned_servers.len(), 6);
        assert_eq!(model.free_slots()[0], 0);
        assert_eq!(model.free_slots()[1], 2);
    }

    /// One server, one rack, no random arrivals: the smallest facility
    /// that can starve.
    fn tiny_config() -> SimConfig {
        SimConfig::from_str(
            "facility:\n  num_racks: 1\n  servers_per_rack: 1\nthermal:\n  crac_units: 1\nworkload:\n  mean_job_arrival_interval_s: 1.0e12\n",
        )
        .unwrap()
    }

    #[test]
    fn test_priority_order_wins_scarce_capacity() {
        let config = tiny_config();
        let mut model = WorkloadModel::new(&config);
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let low = model.submit(spec(JobType::Batch, 4, 1), 0.0, &mut rng).unwrap();
        let high = model.submit(spec(JobType::Inference, 4, 5), 1.0, &mut rng).unwrap();
        tick_quiet(&mut model, 60.0, &mut rng);

        assert_eq!(model.running().len(), 1);
        assert_eq!(model.running()[0].job_id, high);
        assert_eq!(model.pending()[0].job_id, low);
    }

    #[test]
    fn test_insufficient_fleet_capacity_keeps_job_pending() {
        let (mut model, mut rng) = model();
        model
            .submit(spec(JobType::Training, 16, 3), 0.0, &mut rng)
            .unwrap();
        // Fill the fleet: 8 racks × 4 servers × 4 GPUs = 128; ask for 120 first.
        for _ in 0..15 {
            model.submit(spec(JobType::Training, 8, 5), 0.0, &mut rng).unwrap();
        }
        tick_quiet(&mut model, 60.0, &mut rng);
        // 15×8 = 120 high-priority GPUs placed; the 16-GPU job can't fit.
        assert_eq!(model.pending().len(), 1);
        assert_eq!(model.pending()[0].gpu_requirement, 16);
    }

    #[test]
    fn test_completion_frees_slots() {
        let (mut model, mut rng) = model();
        model
            .submit(spec(JobType::Inference, 2, 5), 0.0, &mut rng)
            .unwrap();
        tick_quiet(&mut model, 60.0, &mut rng);
        assert_eq!(model.running().len(), 1);

        // duration 600s: done by t=660.
        tick_quiet(&mut model, 660.0, &mut rng);
        assert!(model.running().is_empty());
        assert_eq!(model.completed().len(), 1);
        assert_eq!(model.completed()[0].status, JobStatus::Completed);
        assert!(model.completed()[0].assigned_servers.is_empty());
        assert_eq!(model.free_slots()[0], 4);
    }

    #[test]
    fn test_sla_flagged_but_job_stays_eligible() {
        let config = tiny_config();
        let mut model = WorkloadModel::new(&config);
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let blocker = model.submit(spec(JobType::Batch, 4, 5), 0.0, &mut rng).unwrap();
        let starved = model.submit(spec(JobType::Inference, 4, 4), 0.0, &mut rng).unwrap();
        tick_quiet(&mut model, 60.0, &mut rng);
        assert_eq!(model.running()[0].job_id, blocker);

        // Deadline is 300s; wait past it.
        tick_quiet(&mut model, 400.0, &mut rng);
        assert!(model.pending()[0].sla_violated);
        assert_eq!(model.sla_violation_count(), 1);

        // Once capacity frees up the flagged job still runs.
        model.preempt(&blocker).unwrap();
        tick_quiet(&mut model, 460.0, &mut rng);
        assert_eq!(model.running()[0].job_id, starved);
        assert!(model.running()[0].sla_violated);
    }

    #[test]
    fn test_preempt_errors() {
        let (mut model, mut rng) = model();
        assert!(matches!(
            model.preempt("missing"),
            Err(SimError::JobNotFound(_))
        ));

        let id = model.submit(spec(JobType::Batch, 2, 3), 0.0, &mut rng).unwrap();
        assert!(matches!(model.preempt(&id), Err(SimError::JobNotRunning(_))));

        tick_quiet(&mut model, 60.0, &mut rng);
        model.preempt(&id).unwrap();
        assert!(matches!(model.preempt(&id), Err(SimError::JobNotRunning(_))));
        assert_eq!(model.completed()[0].status, JobStatus::Preempted);
    }

    #[test]
    fn test_migrate_moves_all_slots() {
        let (mut model, mut rng) = model();
        let id = model.submit(spec(JobType::Batch, 6, 3), 0.0, &mut rng).unwrap();
        tick_quiet(&mut model, 60.0, &mut rng);

        let rack0_before = model.free_slots_per_rack()[0];
        model.migrate(&id, 5).unwrap();

        let job = &model.running()[0];
        assert!(job.assigned_servers.iter().all(|s| s.rack == 5));
        assert_eq!(model.free_slots_per_rack()[0], rack0_before + 6);
        assert_eq!(model.free_slots_per_rack()[5], 16 - 6);
    }

    #[test]
    fn test_migrate_insufficient_capacity_is_atomic() {
        let (mut model, mut rng) = model();
        let id = model.submit(spec(JobType::Batch, 4, 3), 0.0, &mut rng).unwrap();
        // Fill rack 5 completely.
        for _ in 0..4 {
            model.submit(spec(JobType::Batch, 4, 5), 0.0, &mut rng).unwrap();
        }
        tick_quiet(&mut model, 60.0, &mut rng);
        let occupied: Vec<ServerId> = model
            .running()
            .iter()
            .find(|j| j.job_id == id)
            .unwrap()
            .assigned_servers
            .clone();

        // Pack the other four jobs onto rack 5 so it has no free slots.
        for job in model.running.iter().map(|j| j.job_id.clone()).collect::<Vec<_>>() {
            if job != id {
                model.migrate(&job, 5).unwrap();
            }
        }
        assert_eq!(model.free_slots_per_rack()[5], 0);

        let err = model.migrate(&id, 5).unwrap_err();
        assert!(matches!(err, SimError::InsufficientCapacity { rack: 5, .. }));
        let job = model.running().iter().find(|j| j.job_id == id).unwrap();
        assert_eq!(job.assigned_servers, occupied);
    }

    #[test]
    fn test_migrate_unknown_rack() {
        let (mut model, mut rng) = model();
        let id = model.submit(spec(JobType::Batch, 2, 3), 0.0, &mut rng).unwrap();
        tick_quiet(&mut model, 60.0, &mut rng);
        assert!(matches!(
            model.migrate(&id, 99),
            Err(SimError::RackNotFound(99))
        ));
    }

    #[test]
    fn test_partition_fails_jobs_and_frees_slots() {
        let (mut model, mut rng) = model();
        let id = model.submit(spec(JobType::Batch, 4, 3), 0.0, &mut rng).unwrap();
        tick_quiet(&mut model, 60.0, &mut rng);
        assert_eq!(model.running().len(), 1);

        let partitioned: BTreeSet<usize> = [0].into_iter().collect();
        model.tick(120.0, &mut rng, &partitioned);

        assert!(model.running().iter().all(|j| j.job_id != id));
        let failed = model
            .completed()
            .iter()
            .find(|j| j.job_id == id)
            .expect("partitioned job should be in completed");
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.assigned_servers.is_empty());
    }

    #[test]
    fn test_utilisation_idle_floor_and_caps() {
        let (mut model, mut rng) = model();
        let empty_racks = BTreeSet::new();
        let empty_servers = BTreeSet::new();
        let no_caps = BTreeMap::new();

        let idle = model.utilisation(&empty_racks, &empty_servers, &no_caps);
        assert!(idle.iter().all(|&u| (u - IDLE_UTILISATION).abs() < 1e-9));

        model.submit(spec(JobType::Training, 4, 3), 0.0, &mut rng).unwrap();
        tick_quiet(&mut model, 60.0, &mut rng);
        let busy = model.utilisation(&empty_racks, &empty_servers, &no_caps);
        assert!((busy[0] - 0.92).abs() < 1e-9);

        let throttled: BTreeSet<usize> = [0].into_iter().collect();
        let capped = model.utilisation(&throttled, &empty_servers, &no_caps);
        assert!((capped[0] - 0.5).abs() < 1e-9);

        let degraded: BTreeSet<ServerId> = [ServerId::new(0, 0)].into_iter().collect();
        let capped = model.utilisation(&empty_racks, &degraded, &no_caps);
        assert!((capped[0] - 0.3).abs() < 1e-9);

        let mut caps = BTreeMap::new();
        caps.insert(ServerId::new(0, 0), 0.25);
        let capped = model.utilisation(&empty_racks, &empty_servers, &caps);
        assert!((capped[0] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_slot_accounting_invariant() {
        let (mut model, mut rng) = stochastic_model();
        for tick in 1..=200u64 {
            tick_quiet(&mut model, tick as f64 * 60.0, &mut rng);
            let allocated: u32 = model
                .running()
                .iter()
                .map(|j| j.assigned_servers.len() as u32)
                .sum();
            let free: u32 = model.free_slots().iter().sum();
            assert_eq!(allocated + free, 128, "slot leak at tick {}", tick);
            assert!(model.free_slots().iter().all(|&f| f <= 4));
        }
    }
}
