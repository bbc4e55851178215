//! Scheduler event schema consumed by the allocation controller
//!
//! These types form the system boundary towards the upstream task scheduler.
//! Each event carries a monotonic timestamp and a discriminated kind with
//! kind-specific payload fields.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A timestamped scheduler event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerEvent {
    /// Milliseconds since the unix epoch at which the event was emitted
    pub timestamp_millis: u64,
    /// The event payload
    #[serde(flatten)]
    pub kind: EventKind,
}

impl SchedulerEvent {
    pub fn new(timestamp_millis: u64, kind: EventKind) -> Self {
        Self {
            timestamp_millis,
            kind,
        }
    }
}

/// Discriminated scheduler event payloads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// A new stage attempt was submitted to the scheduler
    StageSubmitted {
        stage_id: u64,
        attempt_id: u32,
        profile_id: u32,
        task_count: usize,
        #[serde(default)]
        locality: StageLocality,
    },
    /// A stage finished; its attempts become zombies until their remaining
    /// tasks terminate
    StageCompleted { stage_id: u64 },
    /// The scheduler launched a task on an executor
    TaskStart {
        stage_id: u64,
        attempt_id: u32,
        info: TaskInfo,
    },
    /// A task reached a terminal state
    TaskEnd {
        stage_id: u64,
        attempt_id: u32,
        reason: TaskEndReason,
        info: TaskInfo,
    },
    /// The scheduler queued a speculative copy of a slow task
    SpeculativeTaskSubmitted { stage_id: u64 },
    /// An executor registered with the scheduler
    ExecutorAdded {
        executor_id: String,
        info: ExecutorInfo,
    },
    /// An executor is gone
    ExecutorRemoved { executor_id: String },
    /// The number of cached blocks hosted by an executor changed
    BlockCacheUpdated {
        executor_id: String,
        cached_blocks: u64,
    },
}

/// Host-locality preferences of a stage's pending tasks
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageLocality {
    /// Number of pending tasks that carry any locality preference
    #[serde(default)]
    pub locality_aware_tasks: usize,
    /// Pending task count preferring each host
    #[serde(default)]
    pub host_counts: HashMap<String, usize>,
}

/// Per-task payload attached to task lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskInfo {
    /// Index of the task within its stage
    pub task_index: usize,
    /// Executor the task runs (or ran) on
    pub executor_id: String,
    /// Whether this is a speculative copy of another task
    #[serde(default)]
    pub speculative: bool,
}

/// Executor metadata attached to `ExecutorAdded`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorInfo {
    /// Host the executor runs on
    pub host: String,
    /// Resource profile the executor was started for
    pub profile_id: u32,
}

/// Terminal status of a task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskEndReason {
    Success,
    ExceptionFailure,
    FetchFailed,
    TaskKilled,
}

impl TaskEndReason {
    /// Whether the scheduler will re-queue the task after this outcome.
    /// Every non-success reason counts as pending again; over-allocation
    /// from reasons that are never actually resubmitted drains through the
    /// idle timeout.
    pub fn resubmits(&self) -> bool {
        !matches!(self, TaskEndReason::Success)
    }
}
