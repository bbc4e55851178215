//! Tests for resource profiles and the profile registry

use crate::profile::{
    ExecutorRequirements, ResourceProfile, ResourceProfileRegistry, TaskRequirements,
    DEFAULT_RESOURCE_PROFILE_ID,
};
use std::collections::BTreeMap;

fn gpu_profile(cores: u32, gpus: u64) -> ResourceProfile {
    let mut executor_resources = BTreeMap::new();
    executor_resources.insert("gpu".to_string(), gpus);
    let mut task_resources = BTreeMap::new();
    task_resources.insert("gpu".to_string(), 1);

    ResourceProfile::new(
        ExecutorRequirements {
            cores,
            memory_mb: 4096,
            resources: executor_resources,
        },
        TaskRequirements {
            cpus: 1,
            resources: task_resources,
        },
    )
}

#[test]
fn test_default_profile_has_id_zero() {
    let registry = ResourceProfileRegistry::new(ResourceProfile::cores_only(4, 1));

    assert_eq!(registry.default_id(), DEFAULT_RESOURCE_PROFILE_ID);
    assert_eq!(registry.len(), 1);
    assert!(registry.contains(0));
    assert_eq!(
        registry.lookup(0),
        Some(ResourceProfile::cores_only(4, 1))
    );
}

#[test]
fn test_ids_are_dense_and_monotonic() {
    let registry = ResourceProfileRegistry::default();

    let a = registry.get_or_create(gpu_profile(8, 2));
    let b = registry.get_or_create(gpu_profile(16, 4));
    let c = registry.get_or_create(ResourceProfile::cores_only(2, 1));

    assert_eq!(a, 1);
    assert_eq!(b, 2);
    assert_eq!(c, 3);
    assert_eq!(registry.len(), 4);
}

#[test]
fn test_value_equal_profiles_share_an_id() {
    let registry = ResourceProfileRegistry::default();

    let first = registry.get_or_create(gpu_profile(8, 2));
    let second = registry.get_or_create(gpu_profile(8, 2));

    assert_eq!(first, second);
    assert_eq!(registry.len(), 2);

    // registering the default profile again returns id 0
    let default_again = registry.get_or_create(ResourceProfile::cores_only(1, 1));
    assert_eq!(default_again, DEFAULT_RESOURCE_PROFILE_ID);
}

#[test]
fn test_lookup_unknown_id() {
    let registry = ResourceProfileRegistry::default();
    assert_eq!(registry.lookup(42), None);
    assert!(!registry.contains(42));
}

#[test]
fn test_tasks_per_executor() {
    assert_eq!(ResourceProfile::cores_only(1, 1).tasks_per_executor(), 1);
    assert_eq!(ResourceProfile::cores_only(8, 2).tasks_per_executor(), 4);
    assert_eq!(ResourceProfile::cores_only(5, 2).tasks_per_executor(), 2);
    // tasks needing more cpus than an executor has still get one slot
    assert_eq!(ResourceProfile::cores_only(2, 4).tasks_per_executor(), 1);
}
