//! Test modules for the controller crate

mod config_tests;
mod intake_tests;

use std::sync::{Arc, Mutex};

use shared::config::AllocationConfig;
use shared::profile::{ResourceProfile, ResourceProfileRegistry};

use crate::clock::ManualClock;
use crate::cluster::{ClusterClient, ClusterError, ExecutorTargets};
use crate::manager::AllocationManager;

/// Allocation config used by most controller tests: min 0, max 10, initial 0,
/// one-second backlog timeouts, one-minute idle timeout, one task per
/// executor.
pub fn test_config() -> AllocationConfig {
    AllocationConfig {
        enabled: true,
        min_executors: 0,
        max_executors: 10,
        initial_executors: Some(0),
        scheduler_backlog_timeout_seconds: 1,
        sustained_scheduler_backlog_timeout_seconds: Some(1),
        executor_idle_timeout_seconds: 60,
        cached_executor_idle_timeout_seconds: None,
        executor_allocation_ratio: 1.0,
        tick_interval_millis: 100,
        executor_cores: 1,
        task_cpus: 1,
    }
}

/// Builds a manager driven by a manual clock starting at t=0, with a registry
/// seeded from the config's default executor shape.
pub fn test_manager(config: AllocationConfig) -> (AllocationManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let registry = Arc::new(ResourceProfileRegistry::new(ResourceProfile::cores_only(
        config.executor_cores,
        config.task_cpus,
    )));
    let manager = AllocationManager::new(config, registry, clock.clone()).unwrap();
    (manager, clock)
}

/// Cluster client test double that records every call and can be told to
/// refuse kill requests.
#[derive(Default)]
pub struct RecordingClusterClient {
    state: Mutex<RecordingState>,
}

#[derive(Default)]
struct RecordingState {
    target_requests: Vec<ExecutorTargets>,
    kill_requests: Vec<Vec<String>>,
    refuse_kills: bool,
}

impl RecordingClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent kill calls return an empty killed set
    pub fn refuse_kills(&self) {
        self.lock().refuse_kills = true;
    }

    pub fn last_targets(&self) -> Option<ExecutorTargets> {
        self.lock().target_requests.last().cloned()
    }

    pub fn kill_requests(&self) -> Vec<Vec<String>> {
        self.lock().kill_requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ClusterClient for RecordingClusterClient {
    fn request_total_executors(&self, targets: &ExecutorTargets) -> Result<bool, ClusterError> {
        self.lock().target_requests.push(targets.clone());
        Ok(true)
    }

    fn kill_executors(
        &self,
        executor_ids: &[String],
        _replace: bool,
        _force: bool,
        _count_failures: bool,
    ) -> Result<Vec<String>, ClusterError> {
        let mut state = self.lock();
        state.kill_requests.push(executor_ids.to_vec());
        if state.refuse_kills {
            Ok(Vec::new())
        } else {
            Ok(executor_ids.to_vec())
        }
    }

    fn is_executor_active(&self, _executor_id: &str) -> bool {
        true
    }
}
