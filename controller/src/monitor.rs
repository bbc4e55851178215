//! Executor liveness and idle tracking
//!
//! The monitor keeps one record per live executor: which resource profile it
//! belongs to, whether it is busy, how many cached blocks it hosts, and since
//! when it has been idle. The allocation manager consults it on every tick to
//! find executors whose idle timer has expired.

use std::collections::HashMap;
use tracing::debug;

/// Tracks the set of live executors and their idle state.
pub struct ExecutorMonitor {
    executors: HashMap<String, ExecutorTracker>,
    idle_timeout_millis: u64,
    cached_idle_timeout_millis: Option<u64>,
}

/// Per-executor bookkeeping record
#[derive(Debug)]
struct ExecutorTracker {
    #[allow(dead_code)]
    host: String,
    profile_id: u32,
    running_tasks: usize,
    cached_blocks: u64,
    /// Set while the executor has no running tasks
    idle_since_millis: Option<u64>,
    /// Last time a task finished on this executor
    last_task_finished_at_millis: u64,
}

impl ExecutorTracker {
    /// When this executor's idle timer expires; `None` while it can never
    /// time out (busy, or caching with no cached timeout configured)
    fn idle_deadline(&self, idle_timeout: u64, cached_timeout: Option<u64>) -> Option<u64> {
        let since = self.idle_since_millis?;
        if self.cached_blocks > 0 {
            cached_timeout.map(|timeout| since.saturating_add(timeout))
        } else {
            Some(since.saturating_add(idle_timeout))
        }
    }
}

impl ExecutorMonitor {
    pub fn new(idle_timeout_millis: u64, cached_idle_timeout_millis: Option<u64>) -> Self {
        Self {
            executors: HashMap::new(),
            idle_timeout_millis,
            cached_idle_timeout_millis,
        }
    }

    /// Registers a new executor, starting out idle. Duplicate ids keep the
    /// existing record.
    pub fn add(&mut self, executor_id: &str, host: &str, profile_id: u32, now_millis: u64) {
        if self.executors.contains_key(executor_id) {
            debug!(
                "Executor '{}' is already tracked, ignoring duplicate add",
                executor_id
            );
            return;
        }

        self.executors.insert(
            executor_id.to_string(),
            ExecutorTracker {
                host: host.to_string(),
                profile_id,
                running_tasks: 0,
                cached_blocks: 0,
                idle_since_millis: Some(now_millis),
                last_task_finished_at_millis: now_millis,
            },
        );
        debug!("Tracking executor '{}' on host '{}'", executor_id, host);
    }

    /// Forgets an executor. Returns its profile id when it was known.
    pub fn remove(&mut self, executor_id: &str) -> Option<u32> {
        match self.executors.remove(executor_id) {
            Some(tracker) => Some(tracker.profile_id),
            None => {
                debug!("Removal of unknown executor '{}', ignoring", executor_id);
                None
            }
        }
    }

    /// Marks one more task running on the executor.
    pub fn task_start(&mut self, executor_id: &str) {
        match self.executors.get_mut(executor_id) {
            Some(tracker) => {
                tracker.running_tasks += 1;
                tracker.idle_since_millis = None;
            }
            None => debug!("Task start for unknown executor '{}', ignoring", executor_id),
        }
    }

    /// Marks one task finished on the executor; the idle timer starts once
    /// the last running task is gone.
    pub fn task_end(&mut self, executor_id: &str, now_millis: u64) {
        match self.executors.get_mut(executor_id) {
            Some(tracker) => {
                tracker.running_tasks = tracker.running_tasks.saturating_sub(1);
                tracker.last_task_finished_at_millis = now_millis;
                if tracker.running_tasks == 0 {
                    tracker.idle_since_millis = Some(now_millis);
                }
            }
            None => debug!("Task end for unknown executor '{}', ignoring", executor_id),
        }
    }

    /// Updates the cached block count reported for an executor.
    pub fn set_cached_blocks(&mut self, executor_id: &str, cached_blocks: u64) {
        match self.executors.get_mut(executor_id) {
            Some(tracker) => tracker.cached_blocks = cached_blocks,
            None => debug!(
                "Cache update for unknown executor '{}', ignoring",
                executor_id
            ),
        }
    }

    /// Executors whose idle timer has expired, ordered by ascending
    /// idle-since time with ties broken by id.
    pub fn timed_out_executors(&self, now_millis: u64) -> Vec<String> {
        let mut expired: Vec<(u64, &str)> = self
            .executors
            .iter()
            .filter_map(|(id, tracker)| {
                let deadline =
                    tracker.idle_deadline(self.idle_timeout_millis, self.cached_idle_timeout_millis)?;
                if deadline <= now_millis {
                    Some((tracker.idle_since_millis.unwrap_or(0), id.as_str()))
                } else {
                    None
                }
            })
            .collect();

        expired.sort();
        expired.into_iter().map(|(_, id)| id.to_string()).collect()
    }

    /// Total number of live executors
    pub fn executor_count(&self) -> usize {
        self.executors.len()
    }

    /// Resource profile of a live executor
    pub fn profile_of(&self, executor_id: &str) -> Option<u32> {
        self.executors.get(executor_id).map(|t| t.profile_id)
    }

    /// Whether the executor has at least one running task
    #[allow(dead_code)]
    pub fn is_busy(&self, executor_id: &str) -> Option<bool> {
        self.executors.get(executor_id).map(|t| t.running_tasks > 0)
    }

    /// Last time a task finished on the executor
    #[allow(dead_code)]
    pub fn last_task_finished_at(&self, executor_id: &str) -> Option<u64> {
        self.executors
            .get(executor_id)
            .map(|t| t.last_task_finished_at_millis)
    }

    /// Forgets every tracked executor
    pub fn clear(&mut self) {
        self.executors.clear();
    }
}
