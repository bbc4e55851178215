//! Configuration management for the allocation controller binary
//!
//! This module handles loading and validation of the controller configuration
//! files (allocation.toml and scenario.toml).

use anyhow::{Context, Result};
use shared::config::{AllocationConfig, ScenarioConfig};
use std::path::PathBuf;
use tracing::{debug, info};

/// Configuration file names are defined as constants to avoid magic strings.
const ALLOCATION_CONFIG_FILE: &str = "allocation.toml";
const SCENARIO_CONFIG_FILE: &str = "scenario.toml";

/// Manages controller configuration loading and validation.
pub struct ConfigManager {
    /// Directory containing configuration files
    pub config_dir: PathBuf,
    /// Loaded allocation configuration, `None` before `load_config`
    pub allocation_config: Option<AllocationConfig>,
    /// Loaded scenario workload, `None` before `load_config`
    pub scenario_config: Option<ScenarioConfig>,
}

impl ConfigManager {
    /// Creates a new configuration manager, failing early when the config
    /// directory is missing or not a directory.
    pub fn new(config_dir: PathBuf) -> Result<Self> {
        if !config_dir.exists() {
            return Err(anyhow::anyhow!(
                "Configuration directory does not exist: {}",
                config_dir.display()
            ));
        }

        if !config_dir.is_dir() {
            return Err(anyhow::anyhow!(
                "Configuration path is not a directory: {}",
                config_dir.display()
            ));
        }

        Ok(Self {
            config_dir,
            allocation_config: None,
            scenario_config: None,
        })
    }

    /// Loads both configuration files from disk, parses them, and runs
    /// semantic validation.
    pub async fn load_config(&mut self) -> Result<()> {
        info!(
            "Loading controller configuration from {}",
            self.config_dir.display()
        );

        // Load allocation.toml
        let allocation_path = self.config_dir.join(ALLOCATION_CONFIG_FILE);
        let allocation_content = tokio::fs::read_to_string(&allocation_path)
            .await
            .with_context(|| format!("Failed to read {}", allocation_path.display()))?;

        let allocation_config: AllocationConfig =
            toml::from_str(&allocation_content).with_context(|| {
                format!(
                    "Failed to parse {} - TOML syntax error in allocation configuration file",
                    allocation_path.display()
                )
            })?;

        allocation_config.validate().with_context(|| {
            format!(
                "Validation failed for allocation configuration in {}",
                allocation_path.display()
            )
        })?;

        // Load scenario.toml; parse and semantic checks are shared so other
        // tooling can vet a workload file the same way.
        let scenario_path = self.config_dir.join(SCENARIO_CONFIG_FILE);
        let scenario_content = tokio::fs::read_to_string(&scenario_path)
            .await
            .with_context(|| format!("Failed to read {}", scenario_path.display()))?;

        let scenario_config =
            ScenarioConfig::validate_from_toml(&scenario_content).with_context(|| {
                format!(
                    "Validation failed for scenario in {}",
                    scenario_path.display()
                )
            })?;

        // Log all allocation parameters at debug level
        debug!("Allocation configuration parameters (including defaults):");
        debug!("  enabled: {}", allocation_config.enabled);
        debug!("  min_executors: {}", allocation_config.min_executors);
        debug!("  max_executors: {}", allocation_config.max_executors);
        debug!(
            "  initial_executors: {}",
            allocation_config.initial_executor_count()
        );
        debug!(
            "  scheduler_backlog_timeout_seconds: {}",
            allocation_config.scheduler_backlog_timeout_seconds
        );
        debug!(
            "  sustained_scheduler_backlog_timeout_seconds: {}",
            allocation_config
                .sustained_scheduler_backlog_timeout_seconds
                .unwrap_or(allocation_config.scheduler_backlog_timeout_seconds)
        );
        debug!(
            "  executor_idle_timeout_seconds: {}",
            allocation_config.executor_idle_timeout_seconds
        );
        debug!(
            "  executor_allocation_ratio: {}",
            allocation_config.executor_allocation_ratio
        );
        debug!(
            "  tick_interval_millis: {}",
            allocation_config.tick_interval_millis
        );
        debug!("  executor_cores: {}", allocation_config.executor_cores);
        debug!("  task_cpus: {}", allocation_config.task_cpus);

        info!(
            enabled = allocation_config.enabled,
            stage_count = scenario_config.stages.len(),
            "Configuration loaded successfully"
        );

        self.allocation_config = Some(allocation_config);
        self.scenario_config = Some(scenario_config);

        Ok(())
    }

    /// Check if the configuration has been loaded.
    #[allow(dead_code)]
    pub fn is_loaded(&self) -> bool {
        self.allocation_config.is_some() && self.scenario_config.is_some()
    }
}
