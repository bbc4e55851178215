//! Event intake and the controller worker loop
//!
//! Inbound scheduler events are posted onto a bounded channel drained by a
//! single worker task, which also runs the periodic schedule tick. Events and
//! ticks therefore observe a total order. Cluster calls happen between
//! messages with no lock held, so a reset posted behind an in-flight call is
//! applied only after that call returned.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use shared::config::AllocationConfig;
use shared::events::SchedulerEvent;
use shared::profile::ResourceProfileRegistry;

use crate::clock::Clock;
use crate::cluster::{ClusterClient, ExecutorTargets};
use crate::manager::{AllocationManager, AllocationSnapshot, SyncPlan};

/// Capacity of the inbound event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Messages drained by the controller worker
#[allow(dead_code)]
enum ControlMessage {
    Event {
        event: SchedulerEvent,
        ack: Option<oneshot::Sender<()>>,
    },
    Reset {
        ack: oneshot::Sender<()>,
    },
    Kill {
        executor_ids: Vec<String>,
        reply: oneshot::Sender<Vec<String>>,
    },
}

/// Handle used by event producers to feed the controller.
#[derive(Clone)]
pub struct EventIntake {
    sender: mpsc::Sender<ControlMessage>,
}

impl EventIntake {
    /// Posts an event without waiting for it to be applied.
    pub async fn post(&self, event: SchedulerEvent) -> Result<()> {
        self.sender
            .send(ControlMessage::Event { event, ack: None })
            .await
            .map_err(|_| anyhow::anyhow!("Event intake is closed"))
    }

    /// Posts an event and waits until the worker has applied it.
    pub async fn post_sync(&self, event: SchedulerEvent) -> Result<()> {
        let (ack, applied) = oneshot::channel();
        self.sender
            .send(ControlMessage::Event {
                event,
                ack: Some(ack),
            })
            .await
            .map_err(|_| anyhow::anyhow!("Event intake is closed"))?;
        applied
            .await
            .map_err(|_| anyhow::anyhow!("Controller worker stopped before applying the event"))
    }
}

/// The running allocation controller. Owns the worker task and exposes the
/// manager's public operations behind the shared state lock.
pub struct AllocationController {
    manager: Arc<RwLock<AllocationManager>>,
    intake: EventIntake,
    shutdown_tx: broadcast::Sender<()>,
    worker: Option<tokio::task::JoinHandle<()>>,
}

impl AllocationController {
    /// Validates the configuration, registers the event intake, and arms the
    /// periodic tick. Fails fast on invalid bounds.
    pub fn start(
        config: AllocationConfig,
        registry: Arc<ResourceProfileRegistry>,
        client: Arc<dyn ClusterClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let tick_interval = config.tick_interval();
        let manager = Arc::new(RwLock::new(AllocationManager::new(
            config, registry, clock,
        )?));

        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let worker = tokio::spawn(run_worker(
            manager.clone(),
            client,
            receiver,
            shutdown_rx,
            tick_interval,
        ));

        info!("Allocation controller started");
        Ok(Self {
            manager,
            intake: EventIntake { sender },
            shutdown_tx,
            worker: Some(worker),
        })
    }

    /// Producer handle for scheduler events.
    pub fn intake(&self) -> EventIntake {
        self.intake.clone()
    }

    /// Posts an event without waiting for it to be applied.
    #[allow(dead_code)]
    pub async fn post(&self, event: SchedulerEvent) -> Result<()> {
        self.intake.post(event).await
    }

    /// Posts an event and waits until the worker has applied it.
    #[allow(dead_code)]
    pub async fn post_sync(&self, event: SchedulerEvent) -> Result<()> {
        self.intake.post_sync(event).await
    }

    /// Read-only snapshot of the allocation state.
    pub async fn snapshot(&self) -> AllocationSnapshot {
        self.manager.read().await.snapshot()
    }

    /// Current desired executor total for a profile.
    pub async fn target_for(&self, profile_id: u32) -> usize {
        self.manager.read().await.target_for(profile_id)
    }

    /// Clears allocation state back to the post-start defaults. The request
    /// travels through the worker, so it is serialised behind any in-flight
    /// cluster call.
    #[allow(dead_code)]
    pub async fn reset(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.intake
            .sender
            .send(ControlMessage::Reset { ack })
            .await
            .map_err(|_| anyhow::anyhow!("Event intake is closed"))?;
        done.await
            .map_err(|_| anyhow::anyhow!("Controller worker stopped before applying the reset"))
    }

    /// Retires specific executors as no longer needed, shrinking their
    /// profile targets. Returns the ids the cluster manager actually killed.
    #[allow(dead_code)]
    pub async fn kill_executors(&self, executor_ids: Vec<String>) -> Result<Vec<String>> {
        let (reply, done) = oneshot::channel();
        self.intake
            .sender
            .send(ControlMessage::Kill {
                executor_ids,
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("Event intake is closed"))?;
        done.await
            .map_err(|_| anyhow::anyhow!("Controller worker stopped before killing executors"))
    }

    /// Cancels the tick and stops the worker; queued events are dropped.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!("Controller worker ended abnormally: {}", e);
            }
        }
        info!("Allocation controller stopped");
    }
}

/// Single drain loop: applies events, runs the periodic tick, and performs
/// the staged cluster calls with no lock held.
async fn run_worker(
    manager: Arc<RwLock<AllocationManager>>,
    client: Arc<dyn ClusterClient>,
    mut receiver: mpsc::Receiver<ControlMessage>,
    mut shutdown_rx: broadcast::Receiver<()>,
    tick_interval: Duration,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            message = receiver.recv() => {
                let Some(message) = message else {
                    debug!("Event intake channel closed, stopping controller worker");
                    break;
                };
                handle_message(&manager, client.as_ref(), message).await;
            }
            _ = ticker.tick() => {
                let plan = manager.write().await.schedule();
                execute_plan(&manager, client.as_ref(), plan).await;
            }
            _ = shutdown_rx.recv() => {
                debug!("Shutdown signal received by controller worker");
                break;
            }
        }
    }
}

/// Applies one control message; cluster calls happen with the lock released.
async fn handle_message(
    manager: &Arc<RwLock<AllocationManager>>,
    client: &dyn ClusterClient,
    message: ControlMessage,
) {
    match message {
        ControlMessage::Event { event, ack } => {
            manager.write().await.handle_event(&event.kind);
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
        }
        ControlMessage::Reset { ack } => {
            manager.write().await.reset();
            let _ = ack.send(());
        }
        ControlMessage::Kill { executor_ids, reply } => {
            let accepted = manager.write().await.kill_executors(&executor_ids);
            let killed = perform_kills(client, &accepted);
            if killed.len() != accepted.len() {
                manager.write().await.rollback_failed_kills(&accepted, &killed);
            }
            // the target shrank, so push the new totals right away
            if !accepted.is_empty() {
                let targets = manager.read().await.executor_targets();
                push_targets(client, &targets);
            }
            let _ = reply.send(killed);
        }
    }
}

async fn execute_plan(
    manager: &Arc<RwLock<AllocationManager>>,
    client: &dyn ClusterClient,
    plan: SyncPlan,
) {
    if let Some(request) = &plan.request {
        push_targets(client, request);
    }

    if !plan.kills.is_empty() {
        let killed = perform_kills(client, &plan.kills);
        if killed.len() != plan.kills.len() {
            manager
                .write()
                .await
                .rollback_failed_kills(&plan.kills, &killed);
        }
    }
}

fn push_targets(client: &dyn ClusterClient, targets: &ExecutorTargets) {
    match client.request_total_executors(targets) {
        Ok(true) => debug!("Cluster manager accepted executor targets"),
        Ok(false) => warn!("Cluster manager declined executor targets, retrying next tick"),
        Err(e) => warn!("Failed to declare executor targets: {}", e),
    }
}

fn perform_kills(client: &dyn ClusterClient, executor_ids: &[String]) -> Vec<String> {
    // executors that died since the kill was staged are not worth a call
    let candidates: Vec<String> = executor_ids
        .iter()
        .filter(|id| {
            let active = client.is_executor_active(id);
            if !active {
                debug!("Executor '{}' is no longer active, skipping kill", id);
            }
            active
        })
        .cloned()
        .collect();
    if candidates.is_empty() {
        return Vec::new();
    }

    match client.kill_executors(&candidates, false, false, false) {
        Ok(killed) => {
            debug!(
                "Cluster manager killed {} of {} requested executors",
                killed.len(),
                candidates.len()
            );
            killed
        }
        Err(e) => {
            warn!("Failed to kill executors: {}", e);
            Vec::new()
        }
    }
}
