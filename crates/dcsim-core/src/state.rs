//! Per-tick facility snapshot.
//!
//! One [`FacilityState`] is produced at the end of every tick, composing
//! every subsystem's state plus workload summaries and active failures. It
//! is immutable once produced and serialises to JSON verbatim — this is the
//! record the telemetry ring, the JSONL log, and external readers all see.

use crate::carbon::CarbonState;
use crate::cooling::FacilityCoolingState;
use crate::failures::FailureSnapshot;
use crate::gpu::FacilityGpuState;
use crate::network::FacilityNetworkState;
use crate::power::FacilityPowerState;
use crate::storage::FacilityStorageState;
use crate::thermal::FacilityThermalState;
use crate::workload::{Job, WorkloadCounts};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of the entire facility after one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilityState {
    pub time_s: f64,
    pub tick: u64,
    pub thermal: FacilityThermalState,
    pub power: FacilityPowerState,
    pub gpu: FacilityGpuState,
    pub network: FacilityNetworkState,
    pub storage: FacilityStorageState,
    pub cooling: FacilityCoolingState,
    pub carbon: CarbonState,
    pub workload: WorkloadCounts,
    pub running_jobs: Vec<Job>,
    pub pending_jobs: Vec<Job>,
    /// Free GPU slots per rack.
    pub free_gpu_slots: Vec<u32>,
    pub active_failures: Vec<FailureSnapshot>,
}
