//! Cluster manager interface and the simulated implementation
//!
//! `ClusterClient` is the controller's outbound contract: declare the desired
//! executor totals, kill executors, and query liveness. Transport and
//! serialization are the implementation's concern. The bundled
//! `SimulatedClusterClient` backs the scenario simulator: it records what the
//! controller asked for, and the simulation loop turns those requests into
//! executor lifecycle events.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

/// Errors surfaced by a cluster client implementation
#[allow(dead_code)]
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The cluster manager understood the request but refused it
    #[error("Cluster request rejected: {0}")]
    Rejected(String),

    /// The cluster manager could not be reached
    #[error("Cluster transport error: {0}")]
    Transport(String),
}

/// Desired state pushed to the cluster manager on each sync
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutorTargets {
    /// Desired total executor count per resource profile
    pub targets: HashMap<u32, usize>,
    /// Number of locality-aware pending tasks per profile
    pub locality_aware_tasks: HashMap<u32, usize>,
    /// Pending task count preferring each host, per profile
    pub host_to_local_tasks: HashMap<u32, HashMap<String, usize>>,
}

/// Capability set the controller requires from a cluster manager.
///
/// Implementations must be cheap to call from the controller worker; any
/// blocking transport work (and its timeouts) is their own business.
pub trait ClusterClient: Send + Sync {
    /// Declares the desired executor totals per profile. Idempotent.
    /// Returns whether the cluster manager accepted the declaration.
    fn request_total_executors(&self, targets: &ExecutorTargets) -> Result<bool, ClusterError>;

    /// Requests that the given executors be killed and returns the subset
    /// actually killed. With `replace = false` the cluster manager must not
    /// start replacements.
    fn kill_executors(
        &self,
        executor_ids: &[String],
        replace: bool,
        force: bool,
        count_failures: bool,
    ) -> Result<Vec<String>, ClusterError>;

    /// Whether the executor is currently known to the cluster manager.
    fn is_executor_active(&self, executor_id: &str) -> bool;
}

/// In-process cluster manager used by the scenario simulator.
#[derive(Debug, Default)]
pub struct SimulatedClusterClient {
    state: Mutex<SimulatedClusterState>,
}

#[derive(Debug, Default)]
struct SimulatedClusterState {
    desired: HashMap<u32, usize>,
    kill_requests: Vec<String>,
    live: HashSet<String>,
    requests_accepted: u64,
}

#[allow(dead_code)]
impl SimulatedClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest desired total declared for a profile
    pub fn desired_total(&self, profile_id: u32) -> usize {
        self.lock().desired.get(&profile_id).copied().unwrap_or(0)
    }

    /// Drains the kill requests issued since the last poll
    pub fn take_kill_requests(&self) -> Vec<String> {
        std::mem::take(&mut self.lock().kill_requests)
    }

    /// Number of target declarations accepted so far
    pub fn requests_accepted(&self) -> u64 {
        self.lock().requests_accepted
    }

    /// The simulation records an executor as started
    pub fn note_executor_started(&self, executor_id: &str) {
        self.lock().live.insert(executor_id.to_string());
    }

    /// The simulation records an executor as gone
    pub fn note_executor_stopped(&self, executor_id: &str) {
        self.lock().live.remove(executor_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimulatedClusterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ClusterClient for SimulatedClusterClient {
    fn request_total_executors(&self, targets: &ExecutorTargets) -> Result<bool, ClusterError> {
        let mut state = self.lock();
        state.desired = targets.targets.clone();
        state.requests_accepted += 1;
        debug!("Simulated cluster accepted targets: {:?}", targets.targets);
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
        state
            .kill_requests
            .extend(executor_ids.iter().cloned());
        debug!("Simulated cluster will kill: {:?}", executor_ids);
        Ok(executor_ids.to_vec())
    }

    fn is_executor_active(&self, executor_id: &str) -> bool {
        self.lock().live.contains(executor_id)
    }
}
