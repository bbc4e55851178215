//! Configuration types and validation for the allocation controller
//!
//! This module defines the allocation configuration loaded from
//! allocation.toml and the simulated workload loaded from scenario.toml,
//! including validation logic and serialization support.

use crate::defaults::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Allocation controller configuration loaded from allocation.toml
///
/// All fields are immutable once the controller has started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationConfig {
    /// Whether dynamic allocation is active
    #[serde(default)]
    pub enabled: bool,
    /// Lower bound on live executors per resource profile
    #[serde(default)]
    pub min_executors: usize,
    /// Upper bound on live executors per resource profile (default: unlimited)
    #[serde(default = "default_max_executors")]
    pub max_executors: usize,
    /// Executors requested at startup (default: min_executors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_executors: Option<usize>,
    /// How long the scheduler may stay backlogged before the first ramp-up
    /// step fires (default: 1)
    #[serde(default = "default_scheduler_backlog_timeout")]
    pub scheduler_backlog_timeout_seconds: u64,
    /// Delay between subsequent ramp-up steps while the backlog persists
    /// (default: scheduler_backlog_timeout_seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sustained_scheduler_backlog_timeout_seconds: Option<u64>,
    /// How long an executor must sit task-free before it becomes eligible
    /// for removal (default: 60)
    #[serde(default = "default_executor_idle_timeout")]
    pub executor_idle_timeout_seconds: u64,
    /// Idle timeout for executors hosting cached blocks; unset means such
    /// executors are never retired by the idle timer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_executor_idle_timeout_seconds: Option<u64>,
    /// Fraction of the outstanding task count converted into executor demand
    /// (default: 1.0)
    #[serde(default = "default_executor_allocation_ratio")]
    pub executor_allocation_ratio: f64,
    /// Period of the allocation schedule tick in milliseconds (default: 100)
    #[serde(default = "default_tick_interval_millis")]
    pub tick_interval_millis: u64,
    /// Cores per executor of the default resource profile (default: 1)
    #[serde(default = "default_executor_cores")]
    pub executor_cores: u32,
    /// Cpus per task of the default resource profile (default: 1)
    #[serde(default = "default_task_cpus")]
    pub task_cpus: u32,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_executors: 0,
            max_executors: default_max_executors(),
            initial_executors: None,
            scheduler_backlog_timeout_seconds: default_scheduler_backlog_timeout(),
            sustained_scheduler_backlog_timeout_seconds: None,
            executor_idle_timeout_seconds: default_executor_idle_timeout(),
            cached_executor_idle_timeout_seconds: None,
            executor_allocation_ratio: default_executor_allocation_ratio(),
            tick_interval_millis: default_tick_interval_millis(),
            executor_cores: default_executor_cores(),
            task_cpus: default_task_cpus(),
        }
    }
}

impl AllocationConfig {
    /// Validate the allocation configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.min_executors > self.max_executors {
            return Err(crate::AllocationError::Validation(format!(
                "min_executors ({}) must not exceed max_executors ({})",
                self.min_executors, self.max_executors
            ))
            .into());
        }

        if let Some(initial) = self.initial_executors {
            if initial < self.min_executors || initial > self.max_executors {
                return Err(crate::AllocationError::Validation(format!(
                    "initial_executors ({}) must be within [min_executors, max_executors] = [{}, {}]",
                    initial, self.min_executors, self.max_executors
                ))
                .into());
            }
        }

        if self.scheduler_backlog_timeout_seconds == 0 {
            return Err(crate::AllocationError::Validation(
                "scheduler_backlog_timeout_seconds must be at least 1".to_string(),
            )
            .into());
        }

        if self.sustained_scheduler_backlog_timeout_seconds == Some(0) {
            return Err(crate::AllocationError::Validation(
                "sustained_scheduler_backlog_timeout_seconds must be at least 1".to_string(),
            )
            .into());
        }

        if !(self.executor_allocation_ratio > 0.0 && self.executor_allocation_ratio <= 1.0) {
            return Err(crate::AllocationError::Validation(format!(
                "executor_allocation_ratio ({}) must be within (0.0, 1.0]",
                self.executor_allocation_ratio
            ))
            .into());
        }

        if self.tick_interval_millis == 0 {
            return Err(crate::AllocationError::Validation(
                "tick_interval_millis must be at least 1".to_string(),
            )
            .into());
        }

        if self.executor_cores == 0 {
            return Err(crate::AllocationError::Validation(
                "executor_cores must be at least 1".to_string(),
            )
            .into());
        }

        if self.task_cpus == 0 {
            return Err(crate::AllocationError::Validation(
                "task_cpus must be at least 1".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// Executors to request at startup (uses the configured value if set,
    /// otherwise the per-profile minimum)
    pub fn initial_executor_count(&self) -> usize {
        self.initial_executors.unwrap_or(self.min_executors)
    }

    /// Backlog timeout before the first ramp-up step, in milliseconds
    pub fn scheduler_backlog_timeout_millis(&self) -> u64 {
        self.scheduler_backlog_timeout_seconds.saturating_mul(1000)
    }

    /// Delay between sustained ramp-up steps, in milliseconds
    pub fn sustained_backlog_timeout_millis(&self) -> u64 {
        self.sustained_scheduler_backlog_timeout_seconds
            .unwrap_or(self.scheduler_backlog_timeout_seconds)
            .saturating_mul(1000)
    }

    /// Idle timeout for plain executors, in milliseconds
    pub fn executor_idle_timeout_millis(&self) -> u64 {
        self.executor_idle_timeout_seconds.saturating_mul(1000)
    }

    /// Idle timeout for caching executors, in milliseconds
    pub fn cached_idle_timeout_millis(&self) -> Option<u64> {
        self.cached_executor_idle_timeout_seconds
            .map(|s| s.saturating_mul(1000))
    }

    /// Period of the allocation schedule tick
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_millis)
    }
}

/// Simulated workload loaded from scenario.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioConfig {
    /// Simulation step resolution in milliseconds (default: 50)
    #[serde(default = "default_scenario_step_millis")]
    pub step_millis: u64,
    /// Delay between an executor being granted and it registering
    /// (default: 500)
    #[serde(default = "default_startup_delay_millis")]
    pub executor_startup_delay_millis: u64,
    /// Hard wall-clock limit for the simulation in seconds (default: 600)
    #[serde(default = "default_scenario_time_limit")]
    pub time_limit_seconds: u64,
    /// Stages fed to the simulated scheduler
    pub stages: Vec<StageSpec>,
}

/// One stage of the simulated workload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSpec {
    /// Stage identifier, unique within the scenario
    pub stage_id: u64,
    /// Simulation time at which the stage is submitted, in seconds
    #[serde(default)]
    pub submit_at_seconds: u64,
    /// Number of tasks in the stage
    pub task_count: usize,
    /// Runtime of each task in milliseconds
    pub task_duration_millis: u64,
    /// Optional host-locality hints: pending task count preferring each host
    #[serde(default)]
    pub locality: HashMap<String, usize>,
}

impl ScenarioConfig {
    /// Validate scenario configuration from TOML string content
    /// This is used for checking a workload file before running it
    pub fn validate_from_toml(toml_content: &str) -> crate::Result<ScenarioConfig> {
        let scenario: ScenarioConfig = toml::from_str(toml_content).map_err(|e| {
            crate::AllocationError::Validation(format!("Invalid TOML format: {}", e))
        })?;

        scenario.validate()?;

        Ok(scenario)
    }

    /// Validate all stages in the scenario
    pub fn validate(&self) -> crate::Result<()> {
        if self.stages.is_empty() {
            return Err(crate::AllocationError::Validation(
                "Scenario must define at least one stage".to_string(),
            )
            .into());
        }

        if self.step_millis == 0 {
            return Err(crate::AllocationError::Validation(
                "step_millis must be at least 1".to_string(),
            )
            .into());
        }

        let mut seen = HashSet::new();
        for (index, stage) in self.stages.iter().enumerate() {
            if !seen.insert(stage.stage_id) {
                return Err(crate::AllocationError::Validation(format!(
                    "Stage #{} (id: {}): Duplicate stage id found. Each stage must have a unique id.",
                    index + 1,
                    stage.stage_id
                ))
                .into());
            }

            if stage.task_count == 0 {
                return Err(crate::AllocationError::Validation(format!(
                    "Stage #{} (id: {}): task_count must be at least 1",
                    index + 1,
                    stage.stage_id
                ))
                .into());
            }

            if stage.task_duration_millis == 0 {
                return Err(crate::AllocationError::Validation(format!(
                    "Stage #{} (id: {}): task_duration_millis must be at least 1",
                    index + 1,
                    stage.stage_id
                ))
                .into());
            }
        }

        Ok(())
    }
}
