//! Domain errors for simulator operations.
//!
//! Actions are rejected with a [`SimError`]; the simulation state is left
//! untouched and the rejection is recorded in the audit log. The hosting API
//! layer maps [`ErrorCategory`] onto transport status codes.

use thiserror::Error;

/// Coarse error category, for mapping to an external surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unknown job, rack, server, or failure id.
    NotFound,
    /// Malformed id or out-of-range parameter.
    InvalidArgument,
    /// Domain state conflict (job not in required state, duplicate failure,
    /// insufficient capacity).
    Conflict,
    /// Operation requires a precondition (e.g. pause before reset).
    PreconditionFailed,
}

/// Errors returned by simulator operations.
#[derive(Debug, Clone, Error)]
pub enum SimError {
    #[error("job {0} not found")]
    JobNotFound(String),
    #[error("rack {0} not found")]
    RackNotFound(usize),
    #[error("server {0} not found")]
    ServerNotFound(String),
    #[error("failure {0} not found")]
    UnknownFailure(String),
    #[error("invalid failure target {0:?}")]
    InvalidTarget(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("job {0} is not running")]
    JobNotRunning(String),
    #[error("{kind} already active on {target}")]
    DuplicateFailure { kind: String, target: String },
    #[error("not enough free GPU slots on rack {rack} for {gpus} GPUs")]
    InsufficientCapacity { rack: usize, gpus: u32 },
    #[error("continuous simulation is running; pause first")]
    SimulationRunning,
}

impl SimError {
    /// The coarse category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SimError::JobNotFound(_)
            | SimError::RackNotFound(_)
            | SimError::ServerNotFound(_)
            | SimError::UnknownFailure(_) => ErrorCategory::NotFound,
            SimError::InvalidTarget(_) | SimError::InvalidArgument(_) => {
                ErrorCategory::InvalidArgument
            }
            SimError::JobNotRunning(_)
            | SimError::DuplicateFailure { .. }
            | SimError::InsufficientCapacity { .. } => ErrorCategory::Conflict,
            SimError::SimulationRunning => ErrorCategory::PreconditionFailed,
        }
    }

    /// Short tag recorded in the audit log for a rejected action.
    pub fn tag(&self) -> &'static str {
        match self {
            SimError::JobNotFound(_) => "job_not_found",
            SimError::RackNotFound(_) => "rack_not_found",
            SimError::ServerNotFound(_) => "server_not_found",
            SimError::UnknownFailure(_) => "unknown_failure",
            SimError::InvalidTarget(_) => "invalid_target",
            SimError::InvalidArgument(_) => "invalid_argument",
            SimError::JobNotRunning(_) => "job_not_running",
            SimError::DuplicateFailure { .. } => "duplicate_failure",
            SimError::InsufficientCapacity { .. } => "insufficient_capacity",
            SimError::SimulationRunning => "simulation_running",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            SimError::JobNotFound("x".into()).category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            SimError::InvalidArgument("bad".into()).category(),
            ErrorCategory::InvalidArgument
        );
        assert_eq!(
            SimError::InsufficientCapacity { rack: 5, gpus: 8 }.category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            SimError::SimulationRunning.category(),
            ErrorCategory::PreconditionFailed
        );
    }

    #[test]
    fn test_tags_are_stable() {
        assert_eq!(SimError::JobNotRunning("j".into()).tag(), "job_not_running");
        assert_eq!(
            SimError::DuplicateFailure {
                kind: "pdu_spike".into(),
                target: "rack-1".into()
            }
            .tag(),
            "duplicate_failure"
        );
    }
}
