//! Failure injection engine.
//!
//! Maintains the set of active failures, injects random events, expires
//! failures whose window has passed, and answers the per-tick effect queries
//! the other models consume (cooling health per zone, PDU spike multipliers,
//! degraded servers, partitioned racks).

use crate::config::SimConfig;
use crate::error::SimError;
use crate::topology::{zone_of_rack, FailureTarget, ServerId};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Per-rack probability of one random failure event per tick.
const RANDOM_FAILURE_PROB_PER_RACK: f64 = 0.005;

/// Supported failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CracDegraded,
    CracFailure,
    GpuDegraded,
    PduSpike,
    NetworkPartition,
}

impl FailureKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "crac_degraded" => Some(Self::CracDegraded),
            "crac_failure" => Some(Self::CracFailure),
            "gpu_degraded" => Some(Self::GpuDegraded),
            "pdu_spike" => Some(Self::PduSpike),
            "network_partition" => Some(Self::NetworkPartition),
            _ => None,
        }
    }

    /// Human-readable effect description, surfaced to agents.
    pub fn effect(&self) -> &'static str {
        match self {
            Self::CracDegraded => "50% cooling capacity",
            Self::CracFailure => "0% cooling capacity",
            Self::GpuDegraded => "GPU stuck at 30% max util",
            Self::PduSpike => "+20% power draw",
            Self::NetworkPartition => "jobs on rack fail",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CracDegraded => "crac_degraded",
            Self::CracFailure => "crac_failure",
            Self::GpuDegraded => "gpu_degraded",
            Self::PduSpike => "pdu_spike",
            Self::NetworkPartition => "network_partition",
        };
        f.write_str(s)
    }
}

/// A currently active failure.
#[derive(Debug, Clone)]
pub struct ActiveFailure {
    pub failure_id: String,
    pub kind: FailureKind,
    pub target: FailureTarget,
    pub started_at: f64,
    /// `None` means the failure persists until manually resolved.
    pub expires_at: Option<f64>,
}

/// Serialisable view of an active failure for snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSnapshot {
    pub failure_id: String,
    pub kind: FailureKind,
    pub target: String,
    pub started_at: f64,
    pub expires_at: Option<f64>,
    pub effect: String,
}

impl From<&ActiveFailure> for FailureSnapshot {
    fn from(f: &ActiveFailure) -> Self {
        Self {
            failure_id: f.failure_id.clone(),
            kind: f.kind,
            target: f.target.to_string(),
            started_at: f.started_at,
            expires_at: f.expires_at,
            effect: f.kind.effect().to_string(),
        }
    }
}

/// One-tick effects collected before instant failures expire.
#[derive(Debug, Default)]
pub struct TickEffects {
    /// Racks whose jobs must fail this tick.
    pub partitioned_racks: BTreeSet<usize>,
    /// Failures injected by the random process this tick.
    pub injected: Vec<FailureSnapshot>,
}

/// Manages failure injection, expiry, and effect queries.
pub struct FailureEngine {
    num_racks: usize,
    crac_units: usize,
    facility: crate::config::FacilitySection,
    active: BTreeMap<String, ActiveFailure>,
}

impl FailureEngine {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            num_racks: config.facility.num_racks,
            crac_units: config.thermal.crac_units,
            facility: config.facility.clone(),
            active: BTreeMap::new(),
        }
    }

    /// Advance the failure engine by one tick.
    ///
    /// Order: random injection, effect collection, expiry. Instant failures
    /// (network partitions) therefore act exactly once — on the tick that
    /// observes them — before leaving the active set.
    pub fn tick(&mut self, now: f64, rng: &mut ChaCha8Rng) -> TickEffects {
        let mut effects = TickEffects::default();

        for rack in 0..self.num_racks {
            if rng.gen::<f64>() >= RANDOM_FAILURE_PROB_PER_RACK {
                continue;
            }
            let kind = match rng.gen_range(0..3u8) {
                0 => FailureKind::CracDegraded,
                1 => FailureKind::PduSpike,
                _ => FailureKind::NetworkPartition,
            };
            let target = match kind {
                FailureKind::CracDegraded => {
                    FailureTarget::Crac(zone_of_rack(rack, self.num_racks, self.crac_units))
                }
                _ => FailureTarget::Rack(rack),
            };
            // Duplicate targets are skipped, never overwritten.
            if let Ok(snapshot) = self.activate(kind, target, None, now, rng) {
                effects.injected.push(snapshot);
            }
        }

        effects.partitioned_racks = self.partitioned_racks();

        self.active
            .retain(|_, f| f.expires_at.map(|t| t > now).unwrap_or(true));

        effects
    }

    /// Manually inject a failure. Identical to the random path except the
    /// caller chooses kind, target, and optionally the duration.
    pub fn inject(
        &mut self,
        kind: &str,
        target: &str,
        duration_s: Option<f64>,
        now: f64,
        rng: &mut ChaCha8Rng,
    ) -> Result<FailureSnapshot, SimError> {
        let kind = FailureKind::parse(kind)
            .ok_or_else(|| SimError::InvalidArgument(format!("unknown failure type {:?}", kind)))?;
        let target = FailureTarget::parse(target, &self.facility, self.crac_units)?;
        self.activate(kind, target, duration_s, now, rng)
    }

    fn activate(
        &mut self,
        kind: FailureKind,
        target: FailureTarget,
        duration_s: Option<f64>,
        now: f64,
        rng: &mut ChaCha8Rng,
    ) -> Result<FailureSnapshot, SimError> {
        match (kind, target) {
            (FailureKind::CracDegraded | FailureKind::CracFailure, FailureTarget::Crac(_))
            | (FailureKind::GpuDegraded, FailureTarget::Server(_))
            | (FailureKind::PduSpike | FailureKind::NetworkPartition, FailureTarget::Rack(_)) => {}
            _ => return Err(SimError::InvalidTarget(target.to_string())),
        }

        if self
            .active
            .values()
            .any(|f| f.kind == kind && f.target == target)
        {
            return Err(SimError::DuplicateFailure {
                kind: kind.to_string(),
                target: target.to_string(),
            });
        }

        let duration = match (kind, duration_s) {
            (FailureKind::NetworkPartition, _) => Some(0.0),
            (FailureKind::GpuDegraded, d) => d,
            (_, Some(d)) => Some(d),
            (FailureKind::CracDegraded, None) => Some(rng.gen_range(600.0..1800.0)),
            (FailureKind::CracFailure, None) => Some(rng.gen_range(300.0..900.0)),
            (FailureKind::PduSpike, None) => Some(300.0),
        };

        let failure = ActiveFailure {
            failure_id: crate::random_uuid(rng),
            kind,
            target,
            started_at: now,
            expires_at: duration.map(|d| now + d),
        };
        let snapshot = FailureSnapshot::from(&failure);
        self.active.insert(failure.failure_id.clone(), failure);
        Ok(snapshot)
    }

    /// Manually resolve a failure by id.
    pub fn resolve(&mut self, failure_id: &str) -> Result<(), SimError> {
        self.active
            .remove(failure_id)
            .map(|_| ())
            .ok_or_else(|| SimError::UnknownFailure(failure_id.to_string()))
    }

    /// Snapshot of all active failures, ordered by id.
    pub fn active(&self) -> Vec<FailureSnapshot> {
        self.active.values().map(FailureSnapshot::from).collect()
    }

    /// Cooling health multiplier for a CRAC zone: 0.0 failed, 0.5 degraded,
    /// 1.0 healthy.
    pub fn cooling_health(&self, zone: usize) -> f64 {
        let mut factor = 1.0f64;
        for f in self.active.values() {
            if f.target == FailureTarget::Crac(zone) {
                match f.kind {
                    FailureKind::CracFailure => factor = 0.0,
                    FailureKind::CracDegraded => factor = factor.min(0.5),
                    _ => {}
                }
            }
        }
        factor
    }

    /// Power multiplier for a rack (1.2 while a PDU spike is active).
    pub fn pdu_multiplier(&self, rack: usize) -> f64 {
        let spiked = self
            .active
            .values()
            .any(|f| f.kind == FailureKind::PduSpike && f.target == FailureTarget::Rack(rack));
        if spiked {
            1.2
        } else {
            1.0
        }
    }

    /// Servers with a degraded GPU (utilisation capped at 0.3).
    pub fn degraded_servers(&self) -> BTreeSet<ServerId> {
        self.active
            .values()
            .filter_map(|f| match (f.kind, f.target) {
                (FailureKind::GpuDegraded, FailureTarget::Server(s)) => Some(s),
                _ => None,
            })
            .collect()
    }

    fn partitioned_racks(&self) -> BTreeSet<usize> {
        self.active
            .values()
            .filter_map(|f| match (f.kind, f.target) {
                (FailureKind::NetworkPartition, FailureTarget::Rack(r)) => Some(r),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn engine() -> (FailureEngine, ChaCha8Rng) {
        let config = SimConfig::default();
        (FailureEngine::new(&config), ChaCha8Rng::seed_from_u64(42))
    }

    #[test]
    fn test_inject_and_resolve() {
        let (mut engine, mut rng) = engine();
        let f = engine
            .inject("crac_failure", "crac-0", Some(600.0), 0.0, &mut rng)
            .unwrap();
        assert_eq!(engine.active().len(), 1);
        assert_eq!(engine.cooling_health(0), 0.0);
        assert_eq!(engine.cooling_health(1), 1.0);

        engine.resolve(&f.failure_id).unwrap();
        assert!(engine.active().is_empty());
        assert_eq!(engine.cooling_health(0), 1.0);
    }

    #[test]
    fn test_resolve_unknown_failure() {
        let (mut engine, _) = engine();
        assert!(matches!(
            engine.resolve("no-such-id"),
            Err(SimError::UnknownFailure(_))
        ));
    }

    #[test]
    fn test_duplicate_injection_rejected() {
        let (mut engine, mut rng) = engine();
        engine
            .inject("pdu_spike", "rack-3", None, 0.0, &mut rng)
            .unwrap();
        assert!(matches!(
            engine.inject("pdu_spike", "rack-3", None, 0.0, &mut rng),
            Err(SimError::DuplicateFailure { .. })
        ));
    }

    #[test]
    fn test_invalid_target_shapes() {
        let (mut engine, mut rng) = engine();
        assert!(engine
            .inject("crac_failure", "rack-0", None, 0.0, &mut rng)
            .is_err());
        assert!(engine
            .inject("gpu_degraded", "rack-0", None, 0.0, &mut rng)
            .is_err());
        assert!(engine
            .inject("pdu_spike", "crac-0", None, 0.0, &mut rng)
            .is_err());
        assert!(engine
            .inject("pdu_spike", "rack-99", None, 0.0, &mut rng)
            .is_err());
    }

    #[test]
    fn test_expiry() {
        let (mut engine, mut rng) = engine();
        engine
            .inject("pdu_spike", "rack-1", Some(120.0), 0.0, &mut rng)
            .unwrap();
        assert_eq!(engine.pdu_multiplier(1), 1.2);

        engine.tick(60.0, &mut rng);
        assert_eq!(engine.pdu_multiplier(1), 1.2);

        engine.tick(180.0, &mut rng);
        assert_eq!(engine.pdu_multiplier(1), 1.0);
    }

    #[test]
    fn test_gpu_degraded_persists_until_resolved() {
        let (mut engine, mut rng) = engine();
        let f = engine
            .inject("gpu_degraded", "rack-0-srv-2", None, 0.0, &mut rng)
            .unwrap();
        for i in 1..100 {
            engine.tick(i as f64 * 60.0, &mut rng);
        }
        assert_eq!(engine.degraded_servers().len(), 1);
        engine.resolve(&f.failure_id).unwrap();
        assert!(engine.degraded_servers().is_empty());
    }

    #[test]
    fn test_network_partition_acts_once_then_expires() {
        let (mut engine, mut rng) = engine();
        engine
            .inject("network_partition", "rack-5", None, 0.0, &mut rng)
            .unwrap();

        let effects = engine.tick(60.0, &mut rng);
        assert!(effects.partitioned_racks.contains(&5));
        // Gone after the tick that applied it.
        assert!(engine
            .active()
            .iter()
            .all(|f| f.kind != FailureKind::NetworkPartition));
    }

    #[test]
    fn test_random_injection_rate() {
        let (mut engine, mut rng) = engine();
        let mut injected = 0;
        for i in 0..10_000 {
            let effects = engine.tick(i as f64 * 60.0, &mut rng);
            injected += effects.injected.len();
            // Drain so duplicate guards don't suppress later events.
            for f in engine.active() {
                engine.resolve(&f.failure_id).unwrap();
            }
        }
        // Expectation: 10_000 ticks × 8 racks × 0.005 = 400.
        assert!(
            (200..=600).contains(&injected),
            "unexpected injection count {}",
            injected
        );
    }
}
