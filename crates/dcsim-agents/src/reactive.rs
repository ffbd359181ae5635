//! Threshold-driven reactive agent.
//!
//! A deterministic rule policy: clear failures as they appear, drive
//! setpoints down on racks trending hot (and back up once they recover),
//! and shed the lowest-priority job when the queue backs up while the
//! facility is power- or thermally-constrained.

use crate::traits::*;

/// Inlet temperature above which the agent starts cooling harder.
const HOT_INLET_C: f64 = 33.0;
/// Inlet temperature below which a previously-cooled rack is relaxed.
const RECOVERED_INLET_C: f64 = 26.0;
/// Pending-queue depth treated as overload.
const QUEUE_PRESSURE: usize = 8;

/// Deterministic rule-based operator policy.
pub struct Reactive {
    /// Racks this agent has pushed to an aggressive setpoint.
    cooled: Vec<usize>,
}

impl Reactive {
    pub fn new() -> Self {
        Self { cooled: Vec::new() }
    }
}

impl Default for Reactive {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for Reactive {
    fn act(&mut self, observation: &Observation) -> Vec<Action> {
        let mut actions = Vec::new();

        for failure in &observation.failures {
            actions.push(Action::ResolveFailure {
                failure_id: failure.failure_id.clone(),
            });
        }

        for rack in racks_above(observation, HOT_INLET_C) {
            if !self.cooled.contains(&rack.rack_id) {
                self.cooled.push(rack.rack_id);
            }
            actions.push(Action::AdjustCooling {
                rack_id: rack.rack_id,
                setpoint_c: 14.0,
            });
        }

        // Relax racks that have come back down.
        self.cooled.retain(|&rack_id| {
            let recovered = observation
                .racks
                .iter()
                .find(|r| r.rack_id == rack_id)
                .map(|r| r.inlet_temp_c < RECOVERED_INLET_C)
                .unwrap_or(true);
            if recovered {
                actions.push(Action::AdjustCooling {
                    rack_id,
                    setpoint_c: 18.0,
                });
            }
            !recovered
        });

        let constrained = observation.power.power_cap_exceeded
            || observation.racks.iter().any(|r| r.throttled);
        if constrained && observation.workload.pending >= QUEUE_PRESSURE {
            if let Some(job) = lowest_priority_running(observation) {
                actions.push(Action::PreemptJob {
                    job_id: job.job_id.clone(),
                });
            }
        }

        actions
    }

    fn name(&self) -> &str {
        "reactive"
    }

    fn on_scenario_start(&mut self) {
        self.cooled.clear();
    }
}
