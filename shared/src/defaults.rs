//! Default values for configuration parameters
//!
//! This module centralizes all default value functions used by the
//! configuration structures. These functions are used by serde when
//! deserializing configuration files that don't specify certain optional
//! fields.

// Allocation defaults

/// Default upper bound on executors per profile (effectively unlimited)
pub fn default_max_executors() -> usize {
    usize::MAX
}

/// Default scheduler backlog timeout before the first ramp-up step (1 second)
pub fn default_scheduler_backlog_timeout() -> u64 {
    1
}

/// Default executor idle timeout (60 seconds)
pub fn default_executor_idle_timeout() -> u64 {
    60
}

/// Default executor allocation ratio (one executor slot per outstanding task)
pub fn default_executor_allocation_ratio() -> f64 {
    1.0
}

/// Default schedule tick interval (100 milliseconds)
pub fn default_tick_interval_millis() -> u64 {
    100
}

/// Default number of cores per executor
pub fn default_executor_cores() -> u32 {
    1
}

/// Default number of cpus per task
pub fn default_task_cpus() -> u32 {
    1
}

// Scenario simulation defaults

/// Default simulation step resolution (50 milliseconds)
pub fn default_scenario_step_millis() -> u64 {
    50
}

/// Default simulated executor startup delay (500 milliseconds)
pub fn default_startup_delay_millis() -> u64 {
    500
}

/// Default wall-clock limit for a simulation run (600 seconds)
pub fn default_scenario_time_limit() -> u64 {
    600
}
