//! Dynamic Executor Allocation Controller
//!
//! The controller observes the workload of a job (pending tasks, running
//! tasks, idle executors) and continually adjusts how many executors should
//! be requested from the cluster manager. This binary drives the controller
//! against a simulated cluster using a declarative scenario file, which makes
//! the ramp-up/ramp-down behaviour observable end to end.
// This is the main entry point for the controller binary. It is responsible
// for:
// - Initializing logging and configuration.
// - Starting the allocation controller.
// - Running the scenario simulation loop.
// - Managing the application's lifecycle, including graceful shutdown.

// Use jemalloc as the global allocator for better performance
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use rand::Rng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

// The controller is organized into several modules, each with a distinct
// responsibility.
mod clock;
mod cluster;
mod config;
mod intake;
mod manager;
mod monitor;
#[cfg(test)]
mod tests;

use clock::{Clock, SystemClock};
use cluster::SimulatedClusterClient;
use config::ConfigManager;
use intake::{AllocationController, EventIntake};
use shared::config::{AllocationConfig, ScenarioConfig};
use shared::events::{
    EventKind, ExecutorInfo, SchedulerEvent, StageLocality, TaskEndReason, TaskInfo,
};
use shared::profile::{ResourceProfile, ResourceProfileRegistry};
use shared::DEFAULT_RESOURCE_PROFILE_ID;

/// Command-line arguments for the controller simulator
#[derive(Parser, Debug)]
#[command(name = "controller")]
#[command(about = "Dynamic executor allocation controller driven by a simulated workload", long_about = None)]
struct CliArgs {
    /// Path to the configuration directory containing allocation.toml and scenario.toml
    #[arg(value_name = "CONFIG_DIR")]
    config_dir: PathBuf,

    /// Override min_executors from the config file
    #[arg(long = "min-executors", value_name = "N")]
    min_executors: Option<usize>,

    /// Override max_executors from the config file
    #[arg(long = "max-executors", value_name = "N")]
    max_executors: Option<usize>,

    /// Override initial_executors from the config file
    #[arg(long = "initial-executors", value_name = "N")]
    initial_executors: Option<usize>,

    /// Override the simulation time limit in seconds
    #[arg(long = "time-limit", value_name = "SECONDS")]
    time_limit: Option<u64>,
}

/// One stage of the simulated workload, with its live bookkeeping.
struct SimStage {
    spec: shared::config::StageSpec,
    submitted: bool,
    completed: bool,
    /// Task indices the simulated scheduler has not started yet
    unstarted: Vec<usize>,
    /// Tasks not yet finished
    outstanding: usize,
}

/// A live simulated executor
struct SimExecutor {
    free_slots: usize,
    running: Vec<SimTask>,
}

struct SimTask {
    stage_id: u64,
    task_index: usize,
    /// Simulation time at which the task finishes
    ends_at_millis: u64,
}

/// An executor the cluster granted but that has not registered yet
struct PendingExecutor {
    executor_id: String,
    ready_at_millis: u64,
}

/// Closed-loop simulation: a trivial task scheduler plus a cluster that
/// grants the controller's executor requests after a startup delay.
struct Simulation {
    controller: AllocationController,
    intake: EventIntake,
    client: Arc<SimulatedClusterClient>,
    clock: Arc<dyn Clock>,
    scenario: ScenarioConfig,
    min_executors: usize,
    slots_per_executor: usize,
    stages: Vec<SimStage>,
    executors: HashMap<String, SimExecutor>,
    starting: Vec<PendingExecutor>,
    next_executor_index: u64,
    started_at: Instant,
    peak_executors: usize,
    tasks_completed: u64,
    executors_started: u64,
    executors_killed: u64,
}

impl Simulation {
    fn new(
        controller: AllocationController,
        client: Arc<SimulatedClusterClient>,
        clock: Arc<dyn Clock>,
        allocation: &AllocationConfig,
        scenario: ScenarioConfig,
    ) -> Self {
        let stages = scenario
            .stages
            .iter()
            .map(|spec| SimStage {
                spec: spec.clone(),
                submitted: false,
                completed: false,
                unstarted: (0..spec.task_count).rev().collect(),
                outstanding: spec.task_count,
            })
            .collect();

        let slots_per_executor =
            ResourceProfile::cores_only(allocation.executor_cores, allocation.task_cpus)
                .tasks_per_executor();

        let intake = controller.intake();
        Self {
            controller,
            intake,
            client,
            clock,
            min_executors: allocation.min_executors,
            slots_per_executor,
            scenario,
            stages,
            executors: HashMap::new(),
            starting: Vec::new(),
            next_executor_index: 0,
            started_at: Instant::now(),
            peak_executors: 0,
            tasks_completed: 0,
            executors_started: 0,
            executors_killed: 0,
        }
    }

    /// Runs the simulation to completion (or until the time limit).
    async fn run(&mut self) -> Result<()> {
        info!(
            "Simulation started at {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        self.started_at = Instant::now();
        let step = Duration::from_millis(self.scenario.step_millis);
        let time_limit_millis = self.scenario.time_limit_seconds.saturating_mul(1000);
        let mut last_progress_second = 0;

        loop {
            tokio::time::sleep(step).await;
            let elapsed = self.started_at.elapsed().as_millis() as u64;

            self.submit_due_stages(elapsed).await?;
            self.process_cluster_grants(elapsed).await?;
            self.process_kill_requests().await?;
            self.finish_due_tasks(elapsed).await?;
            self.assign_tasks(elapsed).await?;

            self.peak_executors = self.peak_executors.max(self.executors.len());

            let second = elapsed / 1000;
            if second > last_progress_second {
                last_progress_second = second;
                let desired = self.controller.target_for(DEFAULT_RESOURCE_PROFILE_ID).await;
                info!(
                    desired,
                    live = self.executors.len(),
                    starting = self.starting.len(),
                    tasks_completed = self.tasks_completed,
                    "Allocation progress"
                );
            }

            if elapsed >= time_limit_millis {
                warn!(
                    "Simulation time limit of {}s reached, stopping",
                    self.scenario.time_limit_seconds
                );
                break;
            }

            let workload_done = self.stages.iter().all(|stage| stage.completed);
            if workload_done && self.executors.len() <= self.min_executors {
                info!("Workload complete and executor pool drained to the minimum");
                break;
            }
        }

        Ok(())
    }

    /// Submits stages whose start time has arrived.
    async fn submit_due_stages(&mut self, elapsed: u64) -> Result<()> {
        let now = self.clock.now_millis();
        for stage in self
            .stages
            .iter_mut()
            .filter(|s| !s.submitted && elapsed >= s.spec.submit_at_seconds.saturating_mul(1000))
        {
            stage.submitted = true;
            info!(
                stage_id = stage.spec.stage_id,
                task_count = stage.spec.task_count,
                "Submitting stage"
            );
            let locality = StageLocality {
                locality_aware_tasks: stage.spec.locality.values().sum(),
                host_counts: stage.spec.locality.clone(),
            };
            // wait until the controller has seen the stage before its tasks
            // start landing on executors
            self.intake
                .post_sync(SchedulerEvent::new(
                    now,
                    EventKind::StageSubmitted {
                        stage_id: stage.spec.stage_id,
                        attempt_id: 0,
                        profile_id: DEFAULT_RESOURCE_PROFILE_ID,
                        task_count: stage.spec.task_count,
                        locality,
                    },
                ))
                .await?;
        }
        Ok(())
    }

    /// Grants executor requests: spawns pending executors for any shortfall
    /// against the declared target and registers the ones whose startup
    /// delay has elapsed.
    async fn process_cluster_grants(&mut self, elapsed: u64) -> Result<()> {
        let desired = self.client.desired_total(DEFAULT_RESOURCE_PROFILE_ID);
        let have = self.executors.len() + self.starting.len();

        for _ in have..desired {
            let executor_id = format!("exec-{}", self.next_executor_index);
            self.next_executor_index += 1;
            let jitter = rand::rng()
                .random_range(0..=self.scenario.executor_startup_delay_millis / 4 + 1);
            self.starting.push(PendingExecutor {
                executor_id,
                ready_at_millis: elapsed + self.scenario.executor_startup_delay_millis + jitter,
            });
        }

        let now = self.clock.now_millis();
        let ready: Vec<PendingExecutor> = {
            let (ready, waiting) = std::mem::take(&mut self.starting)
                .into_iter()
                .partition(|pending| pending.ready_at_millis <= elapsed);
            self.starting = waiting;
            ready
        };

        for pending in ready {
            let host = format!("host-{}", self.next_executor_index % 4);
            debug!("Executor '{}' registered", pending.executor_id);
            self.client.note_executor_started(&pending.executor_id);
            self.executors.insert(
                pending.executor_id.clone(),
                SimExecutor {
                    free_slots: self.slots_per_executor,
                    running: Vec::new(),
                },
            );
            self.executors_started += 1;
            self.intake
                .post(SchedulerEvent::new(
                    now,
                    EventKind::ExecutorAdded {
                        executor_id: pending.executor_id,
                        info: ExecutorInfo {
                            host,
                            profile_id: DEFAULT_RESOURCE_PROFILE_ID,
                        },
                    },
                ))
                .await?;
        }

        Ok(())
    }

    /// Stops executors the controller asked to kill. Tasks still running on
    /// a killed executor fail and go back to their stage's queue.
    async fn process_kill_requests(&mut self) -> Result<()> {
        let now = self.clock.now_millis();
        for executor_id in self.client.take_kill_requests() {
            let Some(executor) = self.executors.remove(&executor_id) else {
                continue;
            };

            for task in executor.running {
                warn!(
                    "Task {} of stage {} lost with executor '{}'",
                    task.task_index, task.stage_id, executor_id
                );
                if let Some(stage) = self
                    .stages
                    .iter_mut()
                    .find(|s| s.spec.stage_id == task.stage_id)
                {
                    stage.unstarted.push(task.task_index);
                }
                self.intake
                    .post(SchedulerEvent::new(
                        now,
                        EventKind::TaskEnd {
                            stage_id: task.stage_id,
                            attempt_id: 0,
                            reason: TaskEndReason::ExceptionFailure,
                            info: TaskInfo {
                                task_index: task.task_index,
                                executor_id: executor_id.clone(),
                                speculative: false,
                            },
                        },
                    ))
                    .await?;
            }

            info!("Executor '{}' stopped", executor_id);
            self.client.note_executor_stopped(&executor_id);
            self.executors_killed += 1;
            self.intake
                .post(SchedulerEvent::new(
                    now,
                    EventKind::ExecutorRemoved { executor_id },
                ))
                .await?;
        }
        Ok(())
    }

    /// Completes tasks whose runtime has elapsed and marks stages done.
    async fn finish_due_tasks(&mut self, elapsed: u64) -> Result<()> {
        let now = self.clock.now_millis();
        let mut finished: Vec<(String, SimTask)> = Vec::new();

        for (executor_id, executor) in self.executors.iter_mut() {
            let mut index = 0;
            while index < executor.running.len() {
                if executor.running[index].ends_at_millis <= elapsed {
                    let task = executor.running.swap_remove(index);
                    executor.free_slots += 1;
                    finished.push((executor_id.clone(), task));
                } else {
                    index += 1;
                }
            }
        }

        for (executor_id, task) in finished {
            self.tasks_completed += 1;
            self.intake
                .post(SchedulerEvent::new(
                    now,
                    EventKind::TaskEnd {
                        stage_id: task.stage_id,
                        attempt_id: 0,
                        reason: TaskEndReason::Success,
                        info: TaskInfo {
                            task_index: task.task_index,
                            executor_id,
                            speculative: false,
                        },
                    },
                ))
                .await?;

            let stage = self
                .stages
                .iter_mut()
                .find(|s| s.spec.stage_id == task.stage_id);
            if let Some(stage) = stage {
                stage.outstanding = stage.outstanding.saturating_sub(1);
                if stage.outstanding == 0 && stage.unstarted.is_empty() && !stage.completed {
                    stage.completed = true;
                    info!(stage_id = stage.spec.stage_id, "Stage completed");
                    self.intake
                        .post(SchedulerEvent::new(
                            now,
                            EventKind::StageCompleted {
                                stage_id: stage.spec.stage_id,
                            },
                        ))
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Assigns unstarted tasks of submitted stages to free executor slots.
    async fn assign_tasks(&mut self, elapsed: u64) -> Result<()> {
        let now = self.clock.now_millis();
        for stage in self
            .stages
            .iter_mut()
            .filter(|s| s.submitted && !s.completed)
        {
            while !stage.unstarted.is_empty() {
                let Some((executor_id, executor)) = self
                    .executors
                    .iter_mut()
                    .find(|(_, executor)| executor.free_slots > 0)
                else {
                    return Ok(());
                };

                let task_index = stage
                    .unstarted
                    .pop()
                    .expect("unstarted checked non-empty above");
                executor.free_slots -= 1;
                executor.running.push(SimTask {
                    stage_id: stage.spec.stage_id,
                    task_index,
                    ends_at_millis: elapsed + stage.spec.task_duration_millis,
                });

                self.intake
                    .post(SchedulerEvent::new(
                        now,
                        EventKind::TaskStart {
                            stage_id: stage.spec.stage_id,
                            attempt_id: 0,
                            info: TaskInfo {
                                task_index,
                                executor_id: executor_id.clone(),
                                speculative: false,
                            },
                        },
                    ))
                    .await?;
            }
        }
        Ok(())
    }

    /// Prints the run summary and the final allocation snapshot.
    async fn print_summary(&self) -> Result<()> {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        let stages_completed = self.stages.iter().filter(|s| s.completed).count();

        println!("\nSimulation finished in {:.1}s", elapsed);
        println!("  stages completed:    {}/{}", stages_completed, self.stages.len());
        println!("  tasks completed:     {}", self.tasks_completed);
        println!("  executors started:   {}", self.executors_started);
        println!("  executors killed:    {}", self.executors_killed);
        println!("  peak live executors: {}", self.peak_executors);

        let snapshot = self.controller.snapshot().await;
        println!(
            "\nFinal allocation snapshot:\n{}",
            serde_json::to_string_pretty(&snapshot)?
        );
        Ok(())
    }
}

// The `#[tokio::main]` attribute transforms the `async fn main` into a
// synchronous `fn main` that initializes a tokio runtime and runs the async
// code.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logging framework (`tracing`).
    let file_appender = tracing_appender::rolling::daily("./logs", "controller.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Configure logging with proper RUST_LOG environment variable handling
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Default directives are only used if RUST_LOG is not set
        tracing_subscriber::EnvFilter::new("controller=info,shared=info")
    });

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    // Parse command-line arguments
    let cli_args = CliArgs::parse();

    info!("Dynamic executor allocation controller starting up");
    info!("Configuration directory: {}", cli_args.config_dir.display());

    let mut config_manager = match ConfigManager::new(cli_args.config_dir) {
        Ok(manager) => manager,
        Err(e) => {
            error!("FATAL ERROR: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config_manager.load_config().await {
        error!("FATAL ERROR: Failed to load controller configuration");
        error!("Error: {}", e);

        // Print the full error chain to show all context
        let mut current_error = e.source();
        while let Some(err) = current_error {
            error!("  Caused by: {}", err);
            current_error = err.source();
        }

        let error_msg = format!("{:?}", e);
        if error_msg.contains("Validation") {
            error!("This appears to be a CONFIGURATION VALIDATION ERROR.");
            error!("Please review allocation.toml (bounds, timeouts, ratio) and scenario.toml (stages).");
        } else if error_msg.contains("Failed to read") {
            error!("Please ensure both allocation.toml and scenario.toml exist in the config directory.");
        } else if error_msg.contains("Failed to parse") {
            error!("Please check your TOML files for syntax errors.");
        }

        error!("Controller startup ABORTED. Please fix the errors above and try again.");
        std::process::exit(1);
    }

    let mut allocation = config_manager
        .allocation_config
        .clone()
        .expect("Allocation configuration not loaded. Call load_config() first.");
    let mut scenario = config_manager
        .scenario_config
        .clone()
        .expect("Scenario configuration not loaded. Call load_config() first.");

    // Apply command-line overrides (in memory only)
    if let Some(min) = cli_args.min_executors {
        info!("Overriding min_executors: {} -> {}", allocation.min_executors, min);
        allocation.min_executors = min;
    }
    if let Some(max) = cli_args.max_executors {
        info!("Overriding max_executors: {} -> {}", allocation.max_executors, max);
        allocation.max_executors = max;
    }
    if let Some(initial) = cli_args.initial_executors {
        info!("Overriding initial_executors to {}", initial);
        allocation.initial_executors = Some(initial);
    }
    if let Some(limit) = cli_args.time_limit {
        info!("Overriding time_limit_seconds to {}", limit);
        scenario.time_limit_seconds = limit;
    }

    if cli_args.min_executors.is_some()
        || cli_args.max_executors.is_some()
        || cli_args.initial_executors.is_some()
    {
        if let Err(e) = allocation.validate() {
            error!("Invalid configuration after applying command-line overrides: {}", e);
            std::process::exit(1);
        }
    }

    if !allocation.enabled {
        error!("Dynamic allocation is disabled; set enabled = true in allocation.toml");
        std::process::exit(1);
    }

    // Wire up the controller against the simulated cluster.
    let registry = Arc::new(ResourceProfileRegistry::new(ResourceProfile::cores_only(
        allocation.executor_cores,
        allocation.task_cpus,
    )));
    let client = Arc::new(SimulatedClusterClient::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let controller = match AllocationController::start(
        allocation.clone(),
        registry,
        client.clone(),
        clock.clone(),
    ) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Failed to start allocation controller: {}", e);
            std::process::exit(1);
        }
    };

    let mut simulation = Simulation::new(controller, client, clock, &allocation, scenario);

    // Set up signal handling for graceful shutdown.
    let shutdown_signal = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                },
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                },
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
            info!("Received Ctrl+C");
        }
    };

    tokio::select! {
        result = simulation.run() => {
            if let Err(e) = result {
                error!("Simulation error: {}", e);
                std::process::exit(1);
            }
        }
        _ = shutdown_signal => {
            info!("Shutdown signal received");
        }
    }

    if let Err(e) = simulation.print_summary().await {
        warn!("Failed to print simulation summary: {}", e);
    }

    simulation.controller.stop().await;
    info!("Controller shutdown complete");
    Ok(())
}
