use std::path::Path;
use std::time::Duration;

use gear_core::config::{active_profile, env_parse};
use gear_core::{CoreError, Time};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::work_force::WorkForceConfig;
use crate::block_flow::BlockFlowConfig;
use crate::error::{Result, SchedulerError};

/// Scheduler configuration, typically parsed from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of workers for regular operation. 0 = available parallelism.
    #[serde(default = "default_computation_capacity")]
    pub computation_capacity: usize,
    /// Sleep-recheck cycle for idle workers in milliseconds.
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,
    /// Idle cycles after which a worker terminates.
    #[serde(default = "default_dismiss_cycles")]
    pub dismiss_cycles: usize,
    /// Period of the scheduler »tick« for state maintenance.
    #[serde(default = "default_duty_cycle_period_ms")]
    pub duty_cycle_period_ms: u64,
    /// Maximum slip tolerated on a compulsory duty-cycle start.
    #[serde(default = "default_duty_cycle_tolerance_ms")]
    pub duty_cycle_tolerance_ms: u64,
    /// Limit of deadlines into the future.
    #[serde(default = "default_future_planning_limit_secs")]
    pub future_planning_limit_secs: u64,
    /// Upper bound on workers, as multiple of the computation capacity.
    #[serde(default = "default_max_overprovisioning")]
    pub max_overprovisioning: f64,
    #[serde(default)]
    pub block_flow: BlockFlowConfig,
}

fn default_computation_capacity() -> usize { 0 }
fn default_idle_wait_ms() -> u64 { 20 }
fn default_dismiss_cycles() -> usize { 100 }
fn default_duty_cycle_period_ms() -> u64 { 50 }
fn default_duty_cycle_tolerance_ms() -> u64 { 200 }
fn default_future_planning_limit_secs() -> u64 { 20 }
fn default_max_overprovisioning() -> f64 { 3.0 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            computation_capacity: default_computation_capacity(),
            idle_wait_ms: default_idle_wait_ms(),
            dismiss_cycles: default_dismiss_cycles(),
            duty_cycle_period_ms: default_duty_cycle_period_ms(),
            duty_cycle_tolerance_ms: default_duty_cycle_tolerance_ms(),
            future_planning_limit_secs: default_future_planning_limit_secs(),
            max_overprovisioning: default_max_overprovisioning(),
            block_flow: BlockFlowConfig::default(),
        }
    }
}

fn invalid_config(msg: impl Into<String>) -> SchedulerError {
    SchedulerError::Config(CoreError::Config(msg.into()))
}

impl SchedulerConfig {
    /// Parse config from a TOML string, then apply `GEAR_*` env overrides.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(toml_str).map_err(CoreError::from)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(CoreError::from)?;
        Self::from_toml(&content)
    }

    /// Default config with a fixed computation capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            computation_capacity: capacity,
            ..Self::default()
        }
    }

    /// Resolve the computation capacity (0 means use available parallelism).
    pub fn resolved_capacity(&self) -> usize {
        if self.computation_capacity == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.computation_capacity
        }
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn duty_cycle_period(&self) -> Time {
        Time::from_millis(self.duty_cycle_period_ms as i64)
    }

    pub fn duty_cycle_tolerance(&self) -> Time {
        Time::from_millis(self.duty_cycle_tolerance_ms as i64)
    }

    pub fn future_planning_limit(&self) -> Time {
        Time::new(0, self.future_planning_limit_secs as i64)
    }

    /// Worker threads backing the pool, including overprovisioning headroom.
    pub fn max_workers(&self) -> usize {
        let capacity = self.resolved_capacity();
        ((capacity as f64 * self.max_overprovisioning).ceil() as usize).max(capacity)
    }

    pub fn work_force_config(&self) -> WorkForceConfig {
        WorkForceConfig {
            capacity: self.resolved_capacity(),
            idle_wait: self.idle_wait(),
            dismiss_cycles: self.dismiss_cycles,
            max_overprovisioning: self.max_overprovisioning,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.idle_wait_ms == 0 {
            return Err(invalid_config("idle_wait_ms must be positive"));
        }
        if self.dismiss_cycles == 0 {
            return Err(invalid_config("dismiss_cycles must be positive"));
        }
        if self.duty_cycle_period_ms == 0 || self.duty_cycle_tolerance_ms == 0 {
            return Err(invalid_config("duty cycle period and tolerance must be positive"));
        }
        if self.max_overprovisioning < 1.0 {
            return Err(invalid_config(format!(
                "max_overprovisioning {} must be at least 1.0",
                self.max_overprovisioning
            )));
        }
        let flow = &self.block_flow;
        if flow.epoch_size == 0 || flow.max_epochs == 0 || flow.activities_per_frame == 0 {
            return Err(invalid_config("block_flow sizes must be positive"));
        }
        if !(0.0..=1.0).contains(&flow.target_fill) || flow.target_fill == 0.0 {
            return Err(invalid_config(format!(
                "block_flow.target_fill {} out of range (0, 1]",
                flow.target_fill
            )));
        }
        if !(0.0..1.0).contains(&flow.overflow_boost_factor) || flow.overflow_boost_factor == 0.0 {
            return Err(invalid_config(format!(
                "block_flow.overflow_boost_factor {} out of range (0, 1)",
                flow.overflow_boost_factor
            )));
        }
        Ok(())
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides for the active profile.
    ///
    /// Convention: `GEAR_KEY` overrides `key`, `{PROFILE}_GEAR_KEY` takes
    /// precedence when `GEAR_PROFILE` is set. Examples:
    /// - `GEAR_COMPUTATION_CAPACITY` -> `computation_capacity`
    /// - `GEAR_IDLE_WAIT_MS` -> `idle_wait_ms`
    /// - `GEAR_EPOCH_SIZE` -> `block_flow.epoch_size`
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_profile_overrides(&active_profile());
    }

    pub(crate) fn apply_profile_overrides(&mut self, profile: &str) {
        if let Some(v) = env_parse(profile, "GEAR_COMPUTATION_CAPACITY") {
            self.computation_capacity = v;
        }
        if let Some(v) = env_parse(profile, "GEAR_IDLE_WAIT_MS") {
            self.idle_wait_ms = v;
        }
        if let Some(v) = env_parse(profile, "GEAR_DISMISS_CYCLES") {
            self.dismiss_cycles = v;
        }
        if let Some(v) = env_parse(profile, "GEAR_DUTY_CYCLE_PERIOD_MS") {
            self.duty_cycle_period_ms = v;
        }
        if let Some(v) = env_parse(profile, "GEAR_DUTY_CYCLE_TOLERANCE_MS") {
            self.duty_cycle_tolerance_ms = v;
        }
        if let Some(v) = env_parse(profile, "GEAR_FUTURE_PLANNING_LIMIT_SECS") {
            self.future_planning_limit_secs = v;
        }
        if let Some(v) = env_parse(profile, "GEAR_MAX_OVERPROVISIONING") {
            self.max_overprovisioning = v;
        }
        if let Some(v) = env_parse(profile, "GEAR_EPOCH_SIZE") {
            self.block_flow.epoch_size = v;
        }
        if let Some(v) = env_parse(profile, "GEAR_MAX_EPOCHS") {
            self.block_flow.max_epochs = v;
        }
    }

    pub fn log_summary(&self) {
        info!(
            "Scheduler config: capacity={} (resolved {}), max workers={}, idle wait={}ms, duty cycle={}ms (tolerance {}ms), planning limit={}s",
            self.computation_capacity,
            self.resolved_capacity(),
            self.max_workers(),
            self.idle_wait_ms,
            self.duty_cycle_period_ms,
            self.duty_cycle_tolerance_ms,
            self.future_planning_limit_secs
        );
        info!(
            "BlockFlow config: epoch size={}, initial step={}ms, max epochs={}",
            self.block_flow.epoch_size, self.block_flow.initial_epoch_step_ms, self.block_flow.max_epochs
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_scheduler_constants() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.idle_wait(), Duration::from_millis(20));
        assert_eq!(cfg.dismiss_cycles, 100);
        assert_eq!(cfg.duty_cycle_period(), Time::from_millis(50));
        assert_eq!(cfg.duty_cycle_tolerance(), Time::from_millis(200));
        assert_eq!(cfg.future_planning_limit(), Time::new(0, 20));
        assert!(cfg.resolved_capacity() >= 1);
        cfg.validate().unwrap();
    }

    #[test]
    fn parse_partial_toml() {
        let cfg = SchedulerConfig::from_toml(
            r#"
computation_capacity = 4
duty_cycle_period_ms = 25

[block_flow]
epoch_size = 500
"#,
        )
        .unwrap();
        assert_eq!(cfg.resolved_capacity(), 4);
        assert_eq!(cfg.max_workers(), 12);
        assert_eq!(cfg.duty_cycle_period_ms, 25);
        assert_eq!(cfg.duty_cycle_tolerance_ms, 200); // default
        assert_eq!(cfg.block_flow.epoch_size, 500);
        assert_eq!(cfg.block_flow.max_epochs, 5000); // default
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            SchedulerConfig::from_toml("idle_wait_ms = 0"),
            Err(SchedulerError::Config(CoreError::Config(_)))
        ));
        assert!(SchedulerConfig::from_toml("max_overprovisioning = 0.5").is_err());
        assert!(SchedulerConfig::from_toml("[block_flow]\ntarget_fill = 1.5").is_err());
        assert!(matches!(
            SchedulerConfig::from_toml("computation_capacity = \"many\""),
            Err(SchedulerError::Config(CoreError::ConfigParse(_)))
        ));
    }

    #[test]
    fn profile_overrides_apply() {
        std::env::set_var("CFGTEST_GEAR_IDLE_WAIT_MS", "7");
        std::env::set_var("CFGTEST_GEAR_EPOCH_SIZE", "not-a-number");
        let mut cfg = SchedulerConfig::default();
        cfg.apply_profile_overrides("CFGTEST");
        assert_eq!(cfg.idle_wait_ms, 7);
        assert_eq!(cfg.block_flow.epoch_size, 100);
        std::env::remove_var("CFGTEST_GEAR_IDLE_WAIT_MS");
        std::env::remove_var("CFGTEST_GEAR_EPOCH_SIZE");
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "computation_capacity = 2\ndismiss_cycles = 5").unwrap();
        let cfg = SchedulerConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.resolved_capacity(), 2);
        assert_eq!(cfg.dismiss_cycles, 5);

        let missing = SchedulerConfig::from_file(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(SchedulerError::Config(CoreError::Io(_)))));
    }
}
