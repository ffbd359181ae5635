//! Random-action baseline agent.
//!
//! Takes simple randomised actions each tick: resolves whatever failures it
//! sees, nudges one rack's cooling setpoint, and occasionally preempts the
//! lowest-priority job under queue pressure. Useful as a scoring baseline —
//! a serious policy should beat it comfortably.

use crate::traits::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Baseline agent that takes random actions.
pub struct RandomAgent {
    seed: u64,
    rng: ChaCha8Rng,
}

impl RandomAgent {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomAgent {
    fn default() -> Self {
        Self::new(42)
    }
}

impl Agent for RandomAgent {
    fn act(&mut self, observation: &Observation) -> Vec<Action> {
        let mut actions = Vec::new();

        // Always clear active failures.
        for failure in &observation.failures {
            actions.push(Action::ResolveFailure {
                failure_id: failure.failure_id.clone(),
            });
        }

        // Nudge one random rack's setpoint: colder when hot, warmer when cool.
        if !observation.racks.is_empty() {
            let rack = &observation.racks[self.rng.gen_range(0..observation.racks.len())];
            let setpoint_c = if rack.inlet_temp_c > 33.0 {
                self.rng.gen_range(14.0..16.0)
            } else if rack.inlet_temp_c < 24.0 {
                self.rng.gen_range(19.0..22.0)
            } else {
                self.rng.gen_range(16.0..20.0)
            };
            actions.push(Action::AdjustCooling {
                rack_id: rack.rack_id,
                setpoint_c,
            });
        }

        // Under queue pressure, sometimes preempt the lowest-priority job.
        if observation.workload.pending > 5
            && !observation.running_jobs.is_empty()
            && self.rng.gen::<f64>() < 0.3
        {
            if let Some(job) = lowest_priority_running(observation) {
                actions.push(Action::PreemptJob {
                    job_id: job.job_id.clone(),
                });
            }
        }

        actions
    }

    fn name(&self) -> &str {
        "random"
    }

    fn on_scenario_start(&mut self) {
        // Re-seed so every scenario run is reproducible.
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
    }
}
