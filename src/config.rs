//! # Configuration
//!
//! Layered settings for every component: compiled-in defaults, optionally
//! overridden from a TOML file and `WARDFLOW_`-prefixed environment
//! variables. All durations are seconds unless noted.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WardflowError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Minimum total score for a candidate to be accepted.
    pub acceptance_threshold: f64,
    pub weight_medical_fit: f64,
    pub weight_preference_fit: f64,
    pub weight_cost_efficiency: f64,
    pub weight_workflow_efficiency: f64,
    pub weight_infection_control: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 50.0,
            weight_medical_fit: 0.35,
            weight_preference_fit: 0.15,
            weight_cost_efficiency: 0.15,
            weight_workflow_efficiency: 0.15,
            weight_infection_control: 0.20,
        }
    }
}

impl ScoringConfig {
    pub fn weights_sum(&self) -> f64 {
        self.weight_medical_fit
            + self.weight_preference_fit
            + self.weight_cost_efficiency
            + self.weight_workflow_efficiency
            + self.weight_infection_control
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Hours ahead the escalation path scans for expeditable discharges.
    pub expedite_discharge_horizon_hours: i64,
    /// How many cleaning beds an escalation expedites at most.
    pub expedite_cleaning_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            expedite_discharge_horizon_hours: 6,
            expedite_cleaning_limit: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Default per-step timeout.
    pub default_step_timeout_secs: u64,
    pub default_max_retries: u32,
    /// Retention of terminal workflows before garbage collection.
    pub retention_secs: u64,
    /// Age threshold after which a bed stuck in cleaning gets a
    /// turnover workflow from the trigger sweep.
    pub cleaning_trigger_after_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_secs: 1800,
            default_max_retries: 3,
            retention_secs: 24 * 3600,
            cleaning_trigger_after_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Consecutive failures before a single monitor is disabled.
    pub monitor_failure_limit: u32,
    /// Total failures across all monitors before the engine shuts down.
    pub global_failure_ceiling: u32,
    /// TTL on bed-available alerts.
    pub bed_available_ttl_secs: u64,
    /// Hours a bed may sit in cleaning before an overdue alert.
    pub cleaning_overdue_hours: i64,
    /// Hours ahead the discharge monitor looks.
    pub discharge_horizon_hours: i64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            monitor_failure_limit: 5,
            global_failure_ceiling: 10,
            bed_available_ttl_secs: 3600,
            cleaning_overdue_hours: 2,
            discharge_horizon_hours: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Scheduler tick interval.
    pub tick_secs: u64,
    /// Exponential backoff base delay.
    pub backoff_base_secs: u64,
    /// Exponential backoff cap.
    pub backoff_cap_secs: u64,
    pub default_max_retries: u32,
    /// Default per-job runtime limit.
    pub default_max_runtime_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 5,
            backoff_base_secs: 30,
            backoff_cap_secs: 300,
            default_max_retries: 3,
            default_max_runtime_secs: 300,
        }
    }
}

/// Top-level configuration for the bed operations core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardflowConfig {
    pub scoring: ScoringConfig,
    pub queue: QueueConfig,
    pub workflow: WorkflowConfig,
    pub alerts: AlertConfig,
    pub scheduler: SchedulerConfig,
}

impl WardflowConfig {
    /// Load configuration: defaults, then an optional TOML file, then
    /// `WARDFLOW_`-prefixed environment variables (`__` separates
    /// nesting, e.g. `WARDFLOW_SCHEDULER__TICK_SECS=1`).
    pub fn load(file: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("WARDFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| WardflowError::Configuration(e.to_string()))?;

        let cfg: WardflowConfig = settings
            .try_deserialize()
            .map_err(|e| WardflowError::Configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let sum = self.scoring.weights_sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(WardflowError::Configuration(format!(
                "scoring weights must sum to 1.0, got {sum}"
            )));
        }
        if self.scheduler.backoff_base_secs == 0 {
            return Err(WardflowError::Configuration(
                "scheduler.backoff_base_secs must be positive".to_string(),
            ));
        }
        if self.scheduler.backoff_cap_secs < self.scheduler.backoff_base_secs {
            return Err(WardflowError::Configuration(
                "scheduler.backoff_cap_secs must be >= backoff_base_secs".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let cfg = WardflowConfig::default();
        assert!(cfg.validate().is_ok());
        assert!((cfg.scoring.weights_sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let mut cfg = WardflowConfig::default();
        cfg.scoring.weight_medical_fit = 0.9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_backoff_bounds_rejected() {
        let mut cfg = WardflowConfig::default();
        cfg.scheduler.backoff_cap_secs = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "[scheduler]\ntick_secs = 1\nbackoff_base_secs = 2\nbackoff_cap_secs = 10"
        )
        .unwrap();

        let cfg = WardflowConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(cfg.scheduler.tick_secs, 1);
        assert_eq!(cfg.scheduler.backoff_base_secs, 2);
        // Untouched sections keep their defaults
        assert_eq!(cfg.alerts.monitor_failure_limit, 5);
    }
}
