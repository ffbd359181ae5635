//! Built-in operator agents for dcsim.
//!
//! This crate provides the [`Agent`] trait and baseline implementations for
//! data centre operation:
//!
//! | Agent | Strategy | Best For |
//! |-------|----------|----------|
//! | [`Noop`] | Never intervenes | Unmanaged baseline |
//! | [`RandomAgent`] | Random setpoints + failure resolution | Sanity baseline |
//! | [`Reactive`] | Threshold rules on heat, failures, queue pressure | Reference policy |

pub mod noop;
pub mod random;
pub mod reactive;
pub mod traits;

pub use noop::Noop;
pub use random::RandomAgent;
pub use reactive::Reactive;
pub use traits::*;

/// Create an agent by name.
pub fn agent_by_name(name: &str) -> Option<Box<dyn Agent>> {
    match name {
        "noop" => Some(Box::new(Noop::new())),
        "random" => Some(Box::new(RandomAgent::default())),
        "reactive" => Some(Box::new(Reactive::new())),
        _ => None,
    }
}

/// List all built-in agent names.
pub fn available_agents() -> Vec<&'static str> {
    vec!["noop", "random", "reactive"]
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Helper to create a quiet observation over N racks.
    pub fn make_observation(num_racks: usize) -> Observation {
        Observation {
            tick: 1,
            time_s: 60.0,
            racks: (0..num_racks)
                .map(|rack_id| RackObservation {
                    rack_id,
                    inlet_temp_c: 22.0,
                    outlet_temp_c: 27.0,
                    throttled: false,
                    power_kw: 1.2,
                    pdu_utilisation_pct: 6.0,
                    tor_utilisation_pct: 2.0,
                    free_gpu_slots: 16,
                })
                .collect(),
            power: PowerObservation {
                it_power_kw: 10.0,
                total_power_kw: 15.0,
                pue: 1.5,
                headroom_kw: 105.0,
                power_cap_exceeded: false,
            },
            carbon: CarbonObservation {
                carbon_intensity_gco2_kwh: 200.0,
                electricity_price_gbp_kwh: 0.15,
                cumulative_carbon_kg: 0.0,
                cumulative_cost_gbp: 0.0,
            },
            workload: WorkloadObservation {
                pending: 0,
                running: 0,
                completed: 0,
                sla_violations: 0,
            },
            running_jobs: Vec::new(),
            pending_jobs: Vec::new(),
            failures: Vec::new(),
        }
    }

    #[test]
    fn test_agent_by_name() {
        for name in available_agents() {
            assert!(agent_by_name(name).is_some(), "Missing: {}", name);
        }
        assert!(agent_by_name("nonexistent").is_none());
    }

    #[test]
    fn test_action_serialises_tagged() {
        let action = Action::AdjustCooling {
            rack_id: 3,
            setpoint_c: 15.0,
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"action\":\"adjust_cooling\""));
        assert!(json.contains("\"rack_id\":3"));
    }
}
