//! YAML configuration parsing for dcsim.
//!
//! Defines the complete configuration schema for simulation runs: facility
//! dimensions, thermal and power tunables, workload arrival rate, clock
//! parameters, and the RNG seed. Unknown keys are rejected at load time so a
//! typo cannot silently fall back to a default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SimConfig {
    pub facility: FacilitySection,
    pub thermal: ThermalSection,
    pub power: PowerSection,
    pub workload: WorkloadSection,
    pub clock: ClockSection,
    /// Seed for the single RNG stream shared by all stochastic components.
    pub rng_seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            facility: FacilitySection::default(),
            thermal: ThermalSection::default(),
            power: PowerSection::default(),
            workload: WorkloadSection::default(),
            clock: ClockSection::default(),
            rng_seed: 42,
        }
    }
}

/// Facility layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FacilitySection {
    pub num_racks: usize,
    pub servers_per_rack: usize,
    pub gpus_per_server: u32,
}

impl Default for FacilitySection {
    fn default() -> Self {
        Self {
            num_racks: 8,
            servers_per_rack: 4,
            gpus_per_server: 4,
        }
    }
}

impl FacilitySection {
    /// Total servers across the facility.
    pub fn num_servers(&self) -> usize {
        self.num_racks * self.servers_per_rack
    }

    /// Total GPU slots across the facility.
    pub fn total_gpus(&self) -> u32 {
        (self.num_servers() as u32) * self.gpus_per_server
    }
}

/// Thermal model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ThermalSection {
    pub ambient_temp_c: f64,
    pub crac_setpoint_c: f64,
    pub crac_cooling_capacity_kw: f64,
    pub thermal_mass_coefficient: f64,
    pub max_safe_inlet_temp_c: f64,
    pub critical_inlet_temp_c: f64,
    pub crac_units: usize,
}

impl Default for ThermalSection {
    fn default() -> Self {
        Self {
            ambient_temp_c: 22.0,
            crac_setpoint_c: 18.0,
            crac_cooling_capacity_kw: 50.0,
            thermal_mass_coefficient: 0.3,
            max_safe_inlet_temp_c: 35.0,
            critical_inlet_temp_c: 40.0,
            crac_units: 2,
        }
    }
}

/// Power model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PowerSection {
    pub gpu_tdp_watts: f64,
    pub server_base_power_watts: f64,
    pub pdu_capacity_kw: f64,
    pub facility_power_cap_kw: f64,
    pub pue_overhead_factor: f64,
}

impl Default for PowerSection {
    fn default() -> Self {
        Self {
            gpu_tdp_watts: 300.0,
            server_base_power_watts: 200.0,
            pdu_capacity_kw: 20.0,
            facility_power_cap_kw: 120.0,
            pue_overhead_factor: 1.4,
        }
    }
}

/// Workload generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WorkloadSection {
    pub mean_job_arrival_interval_s: f64,
}

impl Default for WorkloadSection {
    fn default() -> Self {
        Self {
            mean_job_arrival_interval_s: 300.0,
        }
    }
}

/// Simulation clock parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ClockSection {
    pub tick_interval_s: f64,
    pub realtime_factor: f64,
}

impl Default for ClockSection {
    fn default() -> Self {
        Self {
            tick_interval_s: 60.0,
            realtime_factor: 0.0,
        }
    }
}

impl SimConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the path in `DC_SIM_CONFIG`, or defaults if unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var("DC_SIM_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path)),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Validate configuration consistency.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.facility.num_racks == 0 {
            return Err(ConfigError::Validation("num_racks must be > 0".to_string()));
        }
        if self.facility.servers_per_rack == 0 {
            return Err(ConfigError::Validation(
                "servers_per_rack must be > 0".to_string(),
            ));
        }
        if self.facility.gpus_per_server == 0 {
            return Err(ConfigError::Validation(
                "gpus_per_server must be > 0".to_string(),
            ));
        }
        if self.thermal.crac_units == 0 {
            return Err(ConfigError::Validation(
                "crac_units must be > 0".to_string(),
            ));
        }
        if self.thermal.crac_units > self.facility.num_racks {
            return Err(ConfigError::Validation(format!(
                "crac_units ({}) cannot exceed num_racks ({})",
                self.thermal.crac_units, self.facility.num_racks,
            )));
        }
        if self.thermal.critical_inlet_temp_c <= self.thermal.max_safe_inlet_temp_c {
            return Err(ConfigError::Validation(
                "critical_inlet_temp_c must exceed max_safe_inlet_temp_c".to_string(),
            ));
        }
        if self.power.facility_power_cap_kw <= 0.0 {
            return Err(ConfigError::Validation(
                "facility_power_cap_kw must be > 0".to_string(),
            ));
        }
        if self.power.pue_overhead_factor < 1.0 {
            return Err(ConfigError::Validation(
                "pue_overhead_factor must be >= 1.0".to_string(),
            ));
        }
        if self.workload.mean_job_arrival_interval_s <= 0.0 {
            return Err(ConfigError::Validation(
                "mean_job_arrival_interval_s must be > 0".to_string(),
            ));
        }
        if self.clock.tick_interval_s <= 0.0 {
            return Err(ConfigError::Validation(
                "tick_interval_s must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
