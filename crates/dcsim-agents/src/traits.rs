//! Operator agent trait definitions.
//!
//! All agents implement the [`Agent`] trait, which receives a per-tick
//! [`Observation`] of the facility and returns a list of [`Action`]s for the
//! simulator to apply.

use serde::{Deserialize, Serialize};

/// Read-only per-rack view handed to agents.
///
/// This is the agents crate's view of a rack — it contains only the signals
/// an operator policy needs, not the full simulation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RackObservation {
    pub rack_id: usize,
    pub inlet_temp_c: f64,
    pub outlet_temp_c: f64,
    pub throttled: bool,
    pub power_kw: f64,
    pub pdu_utilisation_pct: f64,
    pub tor_utilisation_pct: f64,
    pub free_gpu_slots: u32,
}

/// Facility-level power summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerObservation {
    pub it_power_kw: f64,
    pub total_power_kw: f64,
    pub pue: f64,
    pub headroom_kw: f64,
    pub power_cap_exceeded: bool,
}

/// Grid carbon and price signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarbonObservation {
    pub carbon_intensity_gco2_kwh: f64,
    pub electricity_price_gbp_kwh: f64,
    pub cumulative_carbon_kg: f64,
    pub cumulative_cost_gbp: f64,
}

/// Workload queue counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadObservation {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub sla_violations: usize,
}

/// A running or queued job, as visible to agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobObservation {
    pub job_id: String,
    pub name: String,
    pub job_type: String,
    pub priority: u8,
    pub gpu_requirement: u32,
    /// Racks the job's GPUs are placed on (empty while queued).
    pub racks: Vec<usize>,
    pub sla_violated: bool,
}

/// An active failure, as visible to agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureObservation {
    pub failure_id: String,
    pub kind: String,
    pub target: String,
    pub effect: String,
}

/// Full per-tick observation handed to [`Agent::act`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub tick: u64,
    pub time_s: f64,
    pub racks: Vec<RackObservation>,
    pub power: PowerObservation,
    pub carbon: CarbonObservation,
    pub workload: WorkloadObservation,
    pub running_jobs: Vec<JobObservation>,
    pub pending_jobs: Vec<JobObservation>,
    pub failures: Vec<FailureObservation>,
}

/// An operator action returned by an agent.
///
/// Serialises as a tagged union, e.g.
/// `{"action": "adjust_cooling", "rack_id": 3, "setpoint_c": 15.0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Move a running job's GPUs onto a different rack.
    MigrateWorkload { job_id: String, target_rack: usize },
    /// Change the CRAC setpoint for the zone serving a rack.
    AdjustCooling { rack_id: usize, setpoint_c: f64 },
    /// Cap a server's GPU utilisation. Accepts a fraction (0–1) or a
    /// percentage (0–100); the simulator normalises.
    ThrottleGpu { server_id: String, power_cap_pct: f64 },
    /// Preempt a running job, freeing its GPU slots.
    PreemptJob { job_id: String },
    /// Clear an active failure by id.
    ResolveFailure { failure_id: String },
}

/// The core agent trait.
///
/// Implement this trait to create a custom operator policy. The evaluation
/// harness calls [`act`](Agent::act) once per tick with a fresh observation
/// and applies the returned actions before the next tick.
pub trait Agent: Send {
    /// Decide what to do this tick. May return an empty list.
    fn act(&mut self, observation: &Observation) -> Vec<Action>;

    /// Human-readable name for score reports.
    fn name(&self) -> &str;

    /// Called when an evaluation scenario starts, before the first tick.
    fn on_scenario_start(&mut self) {}
}

/// Racks currently above a given inlet temperature, hottest first.
pub fn racks_above(observation: &Observation, inlet_temp_c: f64) -> Vec<&RackObservation> {
    let mut hot: Vec<&RackObservation> = observation
        .racks
        .iter()
        .filter(|r| r.inlet_temp_c > inlet_temp_c)
        .collect();
    hot.sort_by(|a, b| b.inlet_temp_c.total_cmp(&a.inlet_temp_c));
    hot
}

/// The lowest-priority running job, if any (ties broken by job id).
pub fn lowest_priority_running(observation: &Observation) -> Option<&JobObservation> {
    observation
        .running_jobs
        .iter()
        .min_by(|a, b| a.priority.cmp(&b.priority).then(a.job_id.cmp(&b.job_id)))
}
