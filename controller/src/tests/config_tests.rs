//! Tests for controller configuration loading

use crate::config::ConfigManager;
use std::path::PathBuf;
use tempfile::TempDir;

const VALID_ALLOCATION: &str = r#"
enabled = true
min_executors = 1
max_executors = 8
executor_idle_timeout_seconds = 30
"#;

const VALID_SCENARIO: &str = r#"
[[stages]]
stage_id = 1
task_count = 10
task_duration_millis = 100
"#;

fn write_configs(dir: &TempDir, allocation: &str, scenario: &str) {
    std::fs::write(dir.path().join("allocation.toml"), allocation).unwrap();
    std::fs::write(dir.path().join("scenario.toml"), scenario).unwrap();
}

#[test]
fn test_missing_config_dir_rejected() {
    let result = ConfigManager::new(PathBuf::from("/nonexistent/config/dir"));
    assert!(result.is_err());
}

#[test]
fn test_config_path_must_be_a_directory() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("not-a-dir");
    std::fs::write(&file_path, "x").unwrap();

    let result = ConfigManager::new(file_path);
    assert!(result.is_err());
}

#[tokio::test]
async fn test_load_valid_configuration() {
    let temp_dir = TempDir::new().unwrap();
    write_configs(&temp_dir, VALID_ALLOCATION, VALID_SCENARIO);

    let mut manager = ConfigManager::new(temp_dir.path().to_path_buf()).unwrap();
    assert!(!manager.is_loaded());

    manager.load_config().await.unwrap();
    assert!(manager.is_loaded());

    let allocation = manager.allocation_config.as_ref().unwrap();
    assert!(allocation.enabled);
    assert_eq!(allocation.min_executors, 1);
    assert_eq!(allocation.max_executors, 8);
    // defaults fill the rest
    assert_eq!(allocation.tick_interval_millis, 100);

    let scenario = manager.scenario_config.as_ref().unwrap();
    assert_eq!(scenario.stages.len(), 1);
}

#[tokio::test]
async fn test_missing_files_reported() {
    let temp_dir = TempDir::new().unwrap();

    let mut manager = ConfigManager::new(temp_dir.path().to_path_buf()).unwrap();
    let err = manager.load_config().await.unwrap_err();
    assert!(format!("{:?}", err).contains("Failed to read"));
}

#[tokio::test]
async fn test_invalid_toml_reported() {
    let temp_dir = TempDir::new().unwrap();
    write_configs(&temp_dir, "enabled = [not toml", VALID_SCENARIO);

    let mut manager = ConfigManager::new(temp_dir.path().to_path_buf()).unwrap();
    let err = manager.load_config().await.unwrap_err();
    assert!(format!("{:?}", err).contains("Failed to parse"));
}

#[tokio::test]
async fn test_semantic_validation_failure_reported() {
    let temp_dir = TempDir::new().unwrap();
    write_configs(
        &temp_dir,
        r#"
        min_executors = 9
        max_executors = 2
        "#,
        VALID_SCENARIO,
    );

    let mut manager = ConfigManager::new(temp_dir.path().to_path_buf()).unwrap();
    let err = manager.load_config().await.unwrap_err();
    assert!(format!("{:?}", err).contains("Validation failed"));
}

#[tokio::test]
async fn test_invalid_scenario_reported() {
    let temp_dir = TempDir::new().unwrap();
    write_configs(&temp_dir, VALID_ALLOCATION, "stages = []");

    let mut manager = ConfigManager::new(temp_dir.path().to_path_buf()).unwrap();
    let err = manager.load_config().await.unwrap_err();
    assert!(format!("{:?}", err).contains("Validation failed for scenario"));
}
