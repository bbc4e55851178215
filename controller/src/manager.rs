//! Allocation state machine for the executor controller
//!
//! The manager owns the per-profile target/pending state, tracks the stage
//! attempts reported by the scheduler, and on every tick decides how many
//! executors each resource profile should have: ramping up exponentially
//! while the backlog timer keeps firing, syncing the target down when demand
//! drops, and retiring executors whose idle timer expired. Cluster calls are
//! never made from here; each tick returns a `SyncPlan` that the worker
//! executes once the state lock is released.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info};

use shared::config::AllocationConfig;
use shared::events::{EventKind, StageLocality, TaskEndReason, TaskInfo};
use shared::profile::ResourceProfileRegistry;
use shared::DEFAULT_RESOURCE_PROFILE_ID;

use crate::clock::Clock;
use crate::cluster::ExecutorTargets;
use crate::monitor::ExecutorMonitor;

/// Why an executor is being asked to die
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The executor sat idle past the configured timeout
    IdleTimeout,
    /// The executor is surplus to requirements; removing it lowers the target
    NotNeeded,
}

/// Cluster calls staged under the lock and executed after it
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Consolidated totals to declare, present when any target changed or
    /// executors were removed this round
    pub request: Option<ExecutorTargets>,
    /// Executors to kill this round
    pub kills: Vec<String>,
}

/// Per-profile allocation state
#[derive(Debug)]
struct ProfileState {
    /// Current desired executor count
    target: usize,
    /// Size of the next ramp-up step
    to_add: usize,
    /// Executors asked to die whose death is not yet confirmed
    pending_to_remove: HashSet<String>,
    /// Live executors tagged with this profile
    running_executors: HashSet<String>,
    locality_aware_tasks: usize,
    host_to_local_tasks: HashMap<String, usize>,
}

impl ProfileState {
    fn new(target: usize) -> Self {
        Self {
            target,
            to_add: 1,
            pending_to_remove: HashSet::new(),
            running_executors: HashSet::new(),
            locality_aware_tasks: 0,
            host_to_local_tasks: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct StageAttemptKey {
    stage_id: u64,
    attempt_id: u32,
}

/// One attempt at executing a stage. The record survives stage completion as
/// a zombie while tasks are still running, and is destroyed once the last of
/// them terminates.
#[derive(Debug)]
struct StageAttempt {
    profile_id: u32,
    #[allow(dead_code)]
    task_count: usize,
    /// Indices of tasks the scheduler has not started yet
    unsubmitted: HashSet<usize>,
    /// Indices of currently running tasks
    running: HashSet<usize>,
    /// Speculative copies queued but not yet started
    pending_speculative: usize,
    /// Set once the stage completed; running tasks make this a zombie
    completed: bool,
    locality: StageLocality,
}

/// Read-only view of the allocation state for inspection and tests
#[derive(Debug, Clone, Serialize)]
pub struct AllocationSnapshot {
    /// When the next ramp-up step is authorised; `None` while no backlog
    /// timer is armed
    pub add_time_millis: Option<u64>,
    /// Total live executors across all profiles
    pub executor_count: usize,
    pub profiles: BTreeMap<u32, ProfileSnapshot>,
}

/// Per-profile slice of the snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ProfileSnapshot {
    pub target: usize,
    pub to_add: usize,
    pub max_needed: usize,
    pub pending_to_remove: Vec<String>,
    pub running_executors: Vec<String>,
    pub locality_aware_tasks: usize,
    pub host_to_local_tasks: BTreeMap<String, usize>,
}

/// The allocation control state machine.
pub struct AllocationManager {
    config: AllocationConfig,
    registry: Arc<ResourceProfileRegistry>,
    clock: Arc<dyn Clock>,
    monitor: ExecutorMonitor,
    profiles: HashMap<u32, ProfileState>,
    stages: HashMap<StageAttemptKey, StageAttempt>,
    /// When the next ramp-up step is authorised; `None` = timer not armed
    add_time_millis: Option<u64>,
    /// True until the first stage arrives; suppresses the downward target
    /// sync so a configured warm pool survives an idle start
    initializing: bool,
}

impl AllocationManager {
    /// Validates the configuration and initialises the default profile with
    /// the configured initial target. Fails fast on invalid bounds.
    pub fn new(
        config: AllocationConfig,
        registry: Arc<ResourceProfileRegistry>,
        clock: Arc<dyn Clock>,
    ) -> shared::Result<Self> {
        config.validate()?;

        let monitor = ExecutorMonitor::new(
            config.executor_idle_timeout_millis(),
            config.cached_idle_timeout_millis(),
        );

        let mut profiles = HashMap::new();
        profiles.insert(
            DEFAULT_RESOURCE_PROFILE_ID,
            ProfileState::new(config.initial_executor_count()),
        );

        info!(
            min = config.min_executors,
            max = config.max_executors,
            initial = config.initial_executor_count(),
            "Allocation manager initialised"
        );

        Ok(Self {
            config,
            registry,
            clock,
            monitor,
            profiles,
            stages: HashMap::new(),
            add_time_millis: None,
            initializing: true,
        })
    }

    // ---------------------------------------------------------------------
    // Event sink
    // ---------------------------------------------------------------------

    /// Applies one scheduler event. Events for unknown tasks, stages, or
    /// executors are tolerated quietly; events for unknown resource profiles
    /// are dropped loudly (programmer error upstream).
    pub fn handle_event(&mut self, kind: &EventKind) {
        match kind {
            EventKind::StageSubmitted {
                stage_id,
                attempt_id,
                profile_id,
                task_count,
                locality,
            } => self.on_stage_submitted(
                *stage_id,
                *attempt_id,
                *profile_id,
                *task_count,
                locality.clone(),
            ),
            EventKind::StageCompleted { stage_id } => self.on_stage_completed(*stage_id),
            EventKind::TaskStart {
                stage_id,
                attempt_id,
                info,
            } => self.on_task_start(*stage_id, *attempt_id, info),
            EventKind::TaskEnd {
                stage_id,
                attempt_id,
                reason,
                info,
            } => self.on_task_end(*stage_id, *attempt_id, *reason, info),
            EventKind::SpeculativeTaskSubmitted { stage_id } => {
                self.on_speculative_task_submitted(*stage_id)
            }
            EventKind::ExecutorAdded { executor_id, info } => {
                self.on_executor_added(executor_id, &info.host, info.profile_id)
            }
            EventKind::ExecutorRemoved { executor_id } => self.on_executor_removed(executor_id),
            EventKind::BlockCacheUpdated {
                executor_id,
                cached_blocks,
            } => self.monitor.set_cached_blocks(executor_id, *cached_blocks),
        }
    }

    pub fn on_stage_submitted(
        &mut self,
        stage_id: u64,
        attempt_id: u32,
        profile_id: u32,
        task_count: usize,
        locality: StageLocality,
    ) {
        if self.registry.lookup(profile_id).is_none() {
            error!(
                "Stage {} refers to unknown resource profile {}, dropping event",
                stage_id, profile_id
            );
            return;
        }

        self.initializing = false;

        let key = StageAttemptKey {
            stage_id,
            attempt_id,
        };
        let attempt = StageAttempt {
            profile_id,
            task_count,
            unsubmitted: (0..task_count).collect(),
            running: HashSet::new(),
            pending_speculative: 0,
            completed: false,
            locality,
        };
        if self.stages.insert(key, attempt).is_some() {
            debug!(
                "Stage {} attempt {} submitted twice, replacing previous record",
                stage_id, attempt_id
            );
        }

        self.profile_state_mut(profile_id);
        self.update_locality_aggregates(profile_id);
        self.sync_backlog_state();
    }

    pub fn on_stage_completed(&mut self, stage_id: u64) {
        let mut touched = HashSet::new();
        self.stages.retain(|key, attempt| {
            if key.stage_id != stage_id {
                return true;
            }
            attempt.completed = true;
            touched.insert(attempt.profile_id);
            // attempts with running tasks stay around as zombies
            !attempt.running.is_empty()
        });

        for profile_id in touched {
            self.update_locality_aggregates(profile_id);
        }
        self.sync_backlog_state();
    }

    pub fn on_task_start(&mut self, stage_id: u64, attempt_id: u32, info: &TaskInfo) {
        self.monitor.task_start(&info.executor_id);

        let key = StageAttemptKey {
            stage_id,
            attempt_id,
        };
        match self.stages.get_mut(&key) {
            Some(attempt) => {
                attempt.unsubmitted.remove(&info.task_index);
                attempt.running.insert(info.task_index);
                if info.speculative {
                    attempt.pending_speculative = attempt.pending_speculative.saturating_sub(1);
                }
            }
            None => debug!(
                "Task start for unknown stage {} attempt {}, ignoring",
                stage_id, attempt_id
            ),
        }

        self.sync_backlog_state();
    }

    pub fn on_task_end(
        &mut self,
        stage_id: u64,
        attempt_id: u32,
        reason: TaskEndReason,
        info: &TaskInfo,
    ) {
        let now = self.clock.now_millis();
        self.monitor.task_end(&info.executor_id, now);

        let key = StageAttemptKey {
            stage_id,
            attempt_id,
        };
        let mut attempt_done = false;
        match self.stages.get_mut(&key) {
            Some(attempt) => {
                if !attempt.running.remove(&info.task_index) {
                    debug!(
                        "Task end for task {} of stage {} that was not running, ignoring index",
                        info.task_index, stage_id
                    );
                }
                if reason.resubmits() && !attempt.completed {
                    // the scheduler will re-queue the failed task
                    attempt.unsubmitted.insert(info.task_index);
                }
                attempt_done = attempt.completed && attempt.running.is_empty();
            }
            None => debug!(
                "Task end for unknown stage {} attempt {}, ignoring",
                stage_id, attempt_id
            ),
        }

        if attempt_done {
            self.stages.remove(&key);
        }
        self.sync_backlog_state();
    }

    pub fn on_speculative_task_submitted(&mut self, stage_id: u64) {
        let latest = self
            .stages
            .iter_mut()
            .filter(|(key, attempt)| key.stage_id == stage_id && !attempt.completed)
            .max_by_key(|(key, _)| key.attempt_id);

        match latest {
            Some((_, attempt)) => attempt.pending_speculative += 1,
            None => {
                debug!(
                    "Speculative task for unknown or finished stage {}, ignoring",
                    stage_id
                );
                return;
            }
        }

        self.sync_backlog_state();
    }

    pub fn on_executor_added(&mut self, executor_id: &str, host: &str, profile_id: u32) {
        if self.registry.lookup(profile_id).is_none() {
            error!(
                "Executor '{}' refers to unknown resource profile {}, dropping event",
                executor_id, profile_id
            );
            return;
        }

        let now = self.clock.now_millis();
        self.monitor.add(executor_id, host, profile_id, now);
        self.profile_state_mut(profile_id)
            .running_executors
            .insert(executor_id.to_string());
    }

    pub fn on_executor_removed(&mut self, executor_id: &str) {
        let profile_id = self.monitor.remove(executor_id).or_else(|| {
            // executor may have been forgotten by a reset between kill and death
            self.profiles
                .iter()
                .find(|(_, state)| state.running_executors.contains(executor_id))
                .map(|(id, _)| *id)
        });

        if let Some(profile_id) = profile_id {
            let state = self.profile_state_mut(profile_id);
            state.running_executors.remove(executor_id);
            state.pending_to_remove.remove(executor_id);
            debug!("Executor '{}' removed from profile {}", executor_id, profile_id);
        }
    }

    // ---------------------------------------------------------------------
    // Backlog timers
    // ---------------------------------------------------------------------

    /// Arms the backlog timer. Re-entry while the timer is armed does not
    /// restart it.
    pub fn on_scheduler_backlogged(&mut self) {
        if self.add_time_millis.is_none() {
            let fire_at = self
                .clock
                .now_millis()
                .saturating_add(self.config.scheduler_backlog_timeout_millis());
            debug!("Scheduler backlogged, first ramp-up step authorised at {}", fire_at);
            self.add_time_millis = Some(fire_at);
        }
    }

    /// Disarms the backlog timer and resets every profile's ramp step.
    pub fn on_scheduler_queue_empty(&mut self) {
        self.add_time_millis = None;
        for state in self.profiles.values_mut() {
            state.to_add = 1;
        }
    }

    fn sync_backlog_state(&mut self) {
        if self.total_pending_tasks() > 0 {
            self.on_scheduler_backlogged();
        } else {
            self.on_scheduler_queue_empty();
        }
    }

    // ---------------------------------------------------------------------
    // Periodic schedule
    // ---------------------------------------------------------------------

    /// One pass of the periodic schedule: sync targets with demand, ramp up
    /// if the backlog timer fired, and retire executors whose idle timer
    /// expired. Returns the cluster calls to perform once the lock is
    /// released.
    pub fn schedule(&mut self) -> SyncPlan {
        let now = self.clock.now_millis();
        let targets_changed = self.update_and_sync_targets(now);

        let candidates: Vec<(String, RemovalReason)> = self
            .monitor
            .timed_out_executors(now)
            .into_iter()
            .map(|id| (id, RemovalReason::IdleTimeout))
            .collect();
        let kills = self.remove_executors(&candidates);

        let mut plan = SyncPlan {
            request: None,
            kills,
        };
        if targets_changed || !plan.kills.is_empty() {
            plan.request = Some(self.executor_targets());
        }
        plan
    }

    /// Lowers targets that exceed demand and performs a ramp-up step when
    /// the backlog timer has fired. Returns whether any target changed.
    fn update_and_sync_targets(&mut self, now_millis: u64) -> bool {
        let mut changed = false;
        let profile_ids: Vec<u32> = self.profiles.keys().copied().collect();

        if !self.initializing {
            for profile_id in &profile_ids {
                let max_needed = self.max_needed(*profile_id);
                let min = self.config.min_executors;
                let max = self.config.max_executors;
                let state = self.profile_state_mut(*profile_id);
                if state.target > max_needed {
                    let new_target = max_needed.clamp(min, max);
                    if new_target != state.target {
                        debug!(
                            profile = *profile_id,
                            old = state.target,
                            new = new_target,
                            "Lowering executor target to match demand"
                        );
                        state.target = new_target;
                        state.to_add = 1;
                        changed = true;
                    }
                }
            }
        }

        if let Some(add_time) = self.add_time_millis {
            if now_millis >= add_time {
                for profile_id in &profile_ids {
                    let max_needed = self.max_needed(*profile_id);
                    if self.add_executors_to_target(max_needed, *profile_id) > 0 {
                        changed = true;
                    }
                }
                self.add_time_millis =
                    Some(now_millis.saturating_add(self.config.sustained_backlog_timeout_millis()));
            }
        }

        changed
    }

    /// Exponential ramp-up step for one profile. Returns the number of
    /// executors added to the target.
    pub fn add_executors_to_target(&mut self, max_needed: usize, profile_id: u32) -> usize {
        let max = self.config.max_executors;
        let state = self.profile_state_mut(profile_id);

        if state.target >= max_needed || state.target >= max {
            // demand is covered; start the next ramp from a single step
            state.to_add = 1;
            return 0;
        }

        let delta = state
            .to_add
            .min(max_needed - state.target)
            .min(max - state.target);
        state.target += delta;

        if state.target == max || state.target == max_needed {
            state.to_add = 1;
        } else {
            state.to_add = state.to_add.saturating_mul(2);
        }

        debug!(
            profile = profile_id,
            delta,
            target = state.target,
            "Ramping up executor target"
        );
        delta
    }

    /// Filters removal candidates through the per-profile floor and marks
    /// the accepted ones pending. Target-driven removals also lower the
    /// target; idle-timeout removals leave it alone so the scheduler can
    /// ramp back up naturally.
    pub fn remove_executors(&mut self, candidates: &[(String, RemovalReason)]) -> Vec<String> {
        let mut accepted = Vec::new();

        for (executor_id, reason) in candidates {
            let Some(profile_id) = self.monitor.profile_of(executor_id) else {
                debug!(
                    "Removal candidate '{}' is not a live executor, skipping",
                    executor_id
                );
                continue;
            };

            let min = self.config.min_executors;
            let state = self.profile_state_mut(profile_id);
            if state.pending_to_remove.contains(executor_id) {
                continue;
            }

            let remaining = state
                .running_executors
                .len()
                .saturating_sub(state.pending_to_remove.len())
                .saturating_sub(1);
            if remaining < min {
                debug!(
                    profile = profile_id,
                    "Keeping executor '{}' to honour the minimum of {}", executor_id, min
                );
                continue;
            }

            state.pending_to_remove.insert(executor_id.clone());
            if *reason == RemovalReason::NotNeeded {
                state.target = state.target.saturating_sub(1).max(min);
            }
            accepted.push(executor_id.clone());
        }

        if !accepted.is_empty() {
            debug!("Marked {} executors pending removal", accepted.len());
        }
        accepted
    }

    /// Explicit "not needed" kill path: accepted ids move to the pending set
    /// and shrink the target. Returns the accepted subset.
    pub fn kill_executors(&mut self, executor_ids: &[String]) -> Vec<String> {
        let candidates: Vec<(String, RemovalReason)> = executor_ids
            .iter()
            .map(|id| (id.clone(), RemovalReason::NotNeeded))
            .collect();
        self.remove_executors(&candidates)
    }

    /// Drops ids the cluster manager refused to kill from the pending set so
    /// they keep counting toward the per-profile pool. Targets are never
    /// rolled back.
    pub fn rollback_failed_kills(&mut self, requested: &[String], killed: &[String]) {
        let killed: HashSet<&String> = killed.iter().collect();
        for executor_id in requested.iter().filter(|id| !killed.contains(id)) {
            for state in self.profiles.values_mut() {
                if state.pending_to_remove.remove(executor_id) {
                    debug!(
                        "Cluster manager declined to kill executor '{}', keeping it",
                        executor_id
                    );
                    break;
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Aggregates and accessors
    // ---------------------------------------------------------------------

    /// Executors needed to run every pending, running, and speculative task
    /// of the profile, scaled by the allocation ratio.
    pub fn max_needed(&self, profile_id: u32) -> usize {
        let tasks = self.pending_tasks(profile_id)
            + self.running_tasks(profile_id)
            + self.pending_speculative_tasks(profile_id);
        let per_executor = self
            .registry
            .lookup(profile_id)
            .map(|profile| profile.tasks_per_executor())
            .unwrap_or(1);
        let scaled = tasks as f64 * self.config.executor_allocation_ratio / per_executor as f64;
        scaled.ceil() as usize
    }

    /// Current desired executor count for a profile
    pub fn target_for(&self, profile_id: u32) -> usize {
        self.profiles
            .get(&profile_id)
            .map(|state| state.target)
            .unwrap_or(0)
    }

    /// Consolidated desired state for the cluster manager
    pub fn executor_targets(&self) -> ExecutorTargets {
        let mut out = ExecutorTargets::default();
        for (profile_id, state) in &self.profiles {
            out.targets.insert(*profile_id, state.target);
            out.locality_aware_tasks
                .insert(*profile_id, state.locality_aware_tasks);
            out.host_to_local_tasks
                .insert(*profile_id, state.host_to_local_tasks.clone());
        }
        out
    }

    /// Returns the controller to its post-start state: initial targets, unit
    /// ramp steps, no pending removals, no tracked executors, no armed timer.
    pub fn reset(&mut self) {
        for (profile_id, state) in self.profiles.iter_mut() {
            state.target = if *profile_id == DEFAULT_RESOURCE_PROFILE_ID {
                self.config.initial_executor_count()
            } else {
                0
            };
            state.to_add = 1;
            state.pending_to_remove.clear();
            state.running_executors.clear();
        }
        self.monitor.clear();
        self.add_time_millis = None;
        self.initializing = true;
        info!("Allocation state reset");
    }

    /// Read-only view of the current state
    pub fn snapshot(&self) -> AllocationSnapshot {
        let profiles = self
            .profiles
            .iter()
            .map(|(profile_id, state)| {
                let mut pending: Vec<String> =
                    state.pending_to_remove.iter().cloned().collect();
                pending.sort();
                let mut running: Vec<String> =
                    state.running_executors.iter().cloned().collect();
                running.sort();
                (
                    *profile_id,
                    ProfileSnapshot {
                        target: state.target,
                        to_add: state.to_add,
                        max_needed: self.max_needed(*profile_id),
                        pending_to_remove: pending,
                        running_executors: running,
                        locality_aware_tasks: state.locality_aware_tasks,
                        host_to_local_tasks: state
                            .host_to_local_tasks
                            .iter()
                            .map(|(host, count)| (host.clone(), *count))
                            .collect(),
                    },
                )
            })
            .collect();

        AllocationSnapshot {
            add_time_millis: self.add_time_millis,
            executor_count: self.monitor.executor_count(),
            profiles,
        }
    }

    fn pending_tasks(&self, profile_id: u32) -> usize {
        self.stages
            .values()
            .filter(|attempt| attempt.profile_id == profile_id && !attempt.completed)
            .map(|attempt| attempt.unsubmitted.len())
            .sum()
    }

    fn pending_speculative_tasks(&self, profile_id: u32) -> usize {
        self.stages
            .values()
            .filter(|attempt| attempt.profile_id == profile_id && !attempt.completed)
            .map(|attempt| attempt.pending_speculative)
            .sum()
    }

    /// Running tasks, including those of zombie attempts
    fn running_tasks(&self, profile_id: u32) -> usize {
        self.stages
            .values()
            .filter(|attempt| attempt.profile_id == profile_id)
            .map(|attempt| attempt.running.len())
            .sum()
    }

    fn total_pending_tasks(&self) -> usize {
        self.stages
            .values()
            .filter(|attempt| !attempt.completed)
            .map(|attempt| attempt.unsubmitted.len() + attempt.pending_speculative)
            .sum()
    }

    fn update_locality_aggregates(&mut self, profile_id: u32) {
        let mut aware = 0usize;
        let mut hosts: HashMap<String, usize> = HashMap::new();
        for attempt in self
            .stages
            .values()
            .filter(|attempt| attempt.profile_id == profile_id && !attempt.completed)
        {
            aware += attempt.locality.locality_aware_tasks;
            for (host, count) in &attempt.locality.host_counts {
                *hosts.entry(host.clone()).or_default() += count;
            }
        }

        let state = self.profile_state_mut(profile_id);
        state.locality_aware_tasks = aware;
        state.host_to_local_tasks = hosts;
    }

    fn profile_state_mut(&mut self, profile_id: u32) -> &mut ProfileState {
        self.profiles
            .entry(profile_id)
            .or_insert_with(|| ProfileState::new(0))
    }
}
