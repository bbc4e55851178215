//! Tests for allocation and scenario configuration parsing and validation

use crate::config::{AllocationConfig, ScenarioConfig};

#[test]
fn test_allocation_config_defaults() {
    let config: AllocationConfig = toml::from_str("").unwrap();

    assert!(!config.enabled);
    assert_eq!(config.min_executors, 0);
    assert_eq!(config.max_executors, usize::MAX);
    assert_eq!(config.initial_executor_count(), 0);
    assert_eq!(config.scheduler_backlog_timeout_seconds, 1);
    assert_eq!(config.sustained_backlog_timeout_millis(), 1_000);
    assert_eq!(config.executor_idle_timeout_seconds, 60);
    assert_eq!(config.cached_idle_timeout_millis(), None);
    assert_eq!(config.executor_allocation_ratio, 1.0);
    assert_eq!(config.tick_interval_millis, 100);
    assert_eq!(config.executor_cores, 1);
    assert_eq!(config.task_cpus, 1);
    assert!(config.validate().is_ok());
}

#[test]
fn test_allocation_config_parsing() {
    let toml_content = r#"
        enabled = true
        min_executors = 2
        max_executors = 16
        initial_executors = 4
        scheduler_backlog_timeout_seconds = 2
        sustained_scheduler_backlog_timeout_seconds = 5
        executor_idle_timeout_seconds = 30
        cached_executor_idle_timeout_seconds = 120
        executor_allocation_ratio = 0.5
        executor_cores = 4
        task_cpus = 2
    "#;

    let config: AllocationConfig = toml::from_str(toml_content).unwrap();
    assert!(config.validate().is_ok());

    assert_eq!(config.initial_executor_count(), 4);
    assert_eq!(config.scheduler_backlog_timeout_millis(), 2_000);
    assert_eq!(config.sustained_backlog_timeout_millis(), 5_000);
    assert_eq!(config.executor_idle_timeout_millis(), 30_000);
    assert_eq!(config.cached_idle_timeout_millis(), Some(120_000));
    assert_eq!(config.executor_allocation_ratio, 0.5);
}

#[test]
fn test_initial_executors_defaults_to_min() {
    let config: AllocationConfig = toml::from_str("min_executors = 3").unwrap();
    assert_eq!(config.initial_executor_count(), 3);
    assert!(config.validate().is_ok());
}

#[test]
fn test_min_above_max_rejected() {
    let config: AllocationConfig = toml::from_str(
        r#"
        min_executors = 8
        max_executors = 4
    "#,
    )
    .unwrap();

    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("min_executors"), "unexpected error: {}", err);
}

#[test]
fn test_initial_outside_bounds_rejected() {
    let config: AllocationConfig = toml::from_str(
        r#"
        min_executors = 2
        max_executors = 4
        initial_executors = 10
    "#,
    )
    .unwrap();

    assert!(config.validate().is_err());

    let config: AllocationConfig = toml::from_str(
        r#"
        min_executors = 2
        max_executors = 4
        initial_executors = 1
    "#,
    )
    .unwrap();

    assert!(config.validate().is_err());
}

#[test]
fn test_allocation_ratio_bounds() {
    let mut config = AllocationConfig::default();

    config.executor_allocation_ratio = 0.0;
    assert!(config.validate().is_err());

    config.executor_allocation_ratio = 1.5;
    assert!(config.validate().is_err());

    config.executor_allocation_ratio = 0.25;
    assert!(config.validate().is_ok());
}

#[test]
fn test_zero_timeouts_rejected() {
    let mut config = AllocationConfig::default();
    config.scheduler_backlog_timeout_seconds = 0;
    assert!(config.validate().is_err());

    let mut config = AllocationConfig::default();
    config.sustained_scheduler_backlog_timeout_seconds = Some(0);
    assert!(config.validate().is_err());

    let mut config = AllocationConfig::default();
    config.tick_interval_millis = 0;
    assert!(config.validate().is_err());

    let mut config = AllocationConfig::default();
    config.executor_cores = 0;
    assert!(config.validate().is_err());

    let mut config = AllocationConfig::default();
    config.task_cpus = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_scenario_parsing_and_validation() {
    let toml_content = r#"
        step_millis = 20
        time_limit_seconds = 60

        [[stages]]
        stage_id = 1
        task_count = 100
        task_duration_millis = 250

        [[stages]]
        stage_id = 2
        submit_at_seconds = 10
        task_count = 10
        task_duration_millis = 500

        [stages.locality]
        "host-a" = 4
    "#;

    let scenario: ScenarioConfig = toml::from_str(toml_content).unwrap();
    assert!(scenario.validate().is_ok());
    assert_eq!(scenario.stages.len(), 2);
    assert_eq!(scenario.step_millis, 20);
    assert_eq!(scenario.executor_startup_delay_millis, 500);
    assert_eq!(scenario.stages[1].locality.get("host-a"), Some(&4));
}

#[test]
fn test_scenario_duplicate_stage_ids_rejected() {
    let toml_content = r#"
        [[stages]]
        stage_id = 7
        task_count = 1
        task_duration_millis = 10

        [[stages]]
        stage_id = 7
        task_count = 1
        task_duration_millis = 10
    "#;

    let scenario: ScenarioConfig = toml::from_str(toml_content).unwrap();
    let err = scenario.validate().unwrap_err().to_string();
    assert!(err.contains("Duplicate stage id"), "unexpected error: {}", err);
}

#[test]
fn test_scenario_empty_rejected() {
    let scenario: ScenarioConfig = toml::from_str("stages = []").unwrap();
    assert!(scenario.validate().is_err());
}

#[test]
fn test_scenario_validate_from_toml() {
    let valid = r#"
        [[stages]]
        stage_id = 1
        task_count = 4
        task_duration_millis = 100
    "#;
    let scenario = ScenarioConfig::validate_from_toml(valid).unwrap();
    assert_eq!(scenario.stages.len(), 1);

    let err = ScenarioConfig::validate_from_toml("stages = [not toml")
        .unwrap_err()
        .to_string();
    assert!(err.contains("Invalid TOML format"), "unexpected error: {}", err);

    assert!(ScenarioConfig::validate_from_toml("stages = []").is_err());
}

#[test]
fn test_scenario_zero_tasks_rejected() {
    let toml_content = r#"
        [[stages]]
        stage_id = 1
        task_count = 0
        task_duration_millis = 10
    "#;

    let scenario: ScenarioConfig = toml::from_str(toml_content).unwrap();
    assert!(scenario.validate().is_err());
}
