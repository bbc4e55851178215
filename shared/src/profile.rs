//! Resource profiles and the profile registry
//!
//! A resource profile bundles the per-executor and per-task resource
//! requirements of a workload. Profiles are registered once, receive dense
//! integer ids in insertion order, and are treated as immutable afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Id of the default resource profile; the registry always contains it
pub const DEFAULT_RESOURCE_PROFILE_ID: u32 = 0;

/// Per-executor resource requirements
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutorRequirements {
    /// Number of cores per executor
    pub cores: u32,
    /// Memory per executor in megabytes
    #[serde(default)]
    pub memory_mb: u64,
    /// Additional named resources (accelerators etc.) and their counts
    #[serde(default)]
    pub resources: BTreeMap<String, u64>,
}

/// Per-task resource requirements
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRequirements {
    /// Cpus per task
    pub cpus: u32,
    /// Additional named resources required by each task
    #[serde(default)]
    pub resources: BTreeMap<String, u64>,
}

/// An immutable bundle of executor and task requirements.
///
/// Profiles are value-equal: registering the same requirements twice yields
/// the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceProfile {
    /// What each executor of this profile provides
    pub executor: ExecutorRequirements,
    /// What each task of this profile consumes
    pub task: TaskRequirements,
}

impl ResourceProfile {
    pub fn new(executor: ExecutorRequirements, task: TaskRequirements) -> Self {
        Self { executor, task }
    }

    /// Profile describing plain cores-only executors
    pub fn cores_only(executor_cores: u32, task_cpus: u32) -> Self {
        Self {
            executor: ExecutorRequirements {
                cores: executor_cores,
                memory_mb: 0,
                resources: BTreeMap::new(),
            },
            task: TaskRequirements {
                cpus: task_cpus,
                resources: BTreeMap::new(),
            },
        }
    }

    /// How many tasks fit on one executor of this profile (at least 1)
    pub fn tasks_per_executor(&self) -> usize {
        let cores = self.executor.cores.max(1);
        let cpus = self.task.cpus.max(1);
        ((cores / cpus) as usize).max(1)
    }
}

/// Assigns dense, monotonically increasing ids to resource profiles.
///
/// The registry is shared between the scheduler-facing side (which registers
/// profiles) and the controller (which resolves ids on every tick), so the
/// interior state sits behind a mutex.
#[derive(Debug)]
pub struct ResourceProfileRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    by_value: HashMap<ResourceProfile, u32>,
    by_id: Vec<ResourceProfile>,
}

impl ResourceProfileRegistry {
    /// Creates a registry seeded with the default profile at id 0.
    pub fn new(default_profile: ResourceProfile) -> Self {
        let mut by_value = HashMap::new();
        by_value.insert(default_profile.clone(), DEFAULT_RESOURCE_PROFILE_ID);
        Self {
            inner: Mutex::new(RegistryInner {
                by_value,
                by_id: vec![default_profile],
            }),
        }
    }

    /// Returns the id of the given profile, assigning the next dense id if
    /// the profile has not been seen before.
    pub fn get_or_create(&self, profile: ResourceProfile) -> u32 {
        let mut inner = self.lock();
        if let Some(id) = inner.by_value.get(&profile) {
            return *id;
        }
        let id = inner.by_id.len() as u32;
        inner.by_value.insert(profile.clone(), id);
        inner.by_id.push(profile);
        tracing::debug!("Registered resource profile id {}", id);
        id
    }

    /// Id of the default profile
    pub fn default_id(&self) -> u32 {
        DEFAULT_RESOURCE_PROFILE_ID
    }

    /// Resolves an id back to its profile, if the registry ever assigned it
    pub fn lookup(&self, id: u32) -> Option<ResourceProfile> {
        self.lock().by_id.get(id as usize).cloned()
    }

    /// Whether the registry has assigned the given id
    pub fn contains(&self, id: u32) -> bool {
        (id as usize) < self.lock().by_id.len()
    }

    /// Number of registered profiles (always at least 1)
    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ResourceProfileRegistry {
    fn default() -> Self {
        Self::new(ResourceProfile::cores_only(1, 1))
    }
}
