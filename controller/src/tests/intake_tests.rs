//! Tests for the event intake and controller worker
//!
//! These run under a paused tokio runtime: sleeps complete instantly while
//! the manager's notion of time is driven by the manual clock, so tick-driven
//! behaviour stays deterministic.

use super::{test_config, RecordingClusterClient};
use shared::events::{EventKind, ExecutorInfo, SchedulerEvent, StageLocality};
use shared::profile::{ResourceProfile, ResourceProfileRegistry};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::ManualClock;
use crate::intake::AllocationController;

fn start_controller() -> (
    AllocationController,
    Arc<RecordingClusterClient>,
    Arc<ManualClock>,
) {
    let clock = Arc::new(ManualClock::new(0));
    let client = Arc::new(RecordingClusterClient::new());
    let registry = Arc::new(ResourceProfileRegistry::new(ResourceProfile::cores_only(
        1, 1,
    )));
    let controller =
        AllocationController::start(test_config(), registry, client.clone(), clock.clone())
            .unwrap();
    (controller, client, clock)
}

fn executor_added(executor_id: &str, now: u64) -> SchedulerEvent {
    SchedulerEvent::new(
        now,
        EventKind::ExecutorAdded {
            executor_id: executor_id.to_string(),
            info: ExecutorInfo {
                host: "host-0".to_string(),
                profile_id: 0,
            },
        },
    )
}

/// Polls a condition until it holds; sleeps are instant under paused time.
macro_rules! wait_until {
    ($cond:expr) => {{
        let mut met = false;
        for _ in 0..500 {
            if $cond {
                met = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(met, "condition was not met in time: {}", stringify!($cond));
    }};
}

#[tokio::test(start_paused = true)]
async fn test_events_are_applied_in_order() {
    let (mut controller, _client, _clock) = start_controller();

    controller.post(executor_added("exec-0", 0)).await.unwrap();
    controller.post_sync(executor_added("exec-1", 0)).await.unwrap();

    // post_sync acks only after the event was applied, and ordering means
    // the earlier post has been applied too
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.executor_count, 2);
    assert_eq!(
        snapshot.profiles[&0].running_executors,
        vec!["exec-0".to_string(), "exec-1".to_string()]
    );

    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_tick_ramps_and_syncs_to_the_cluster() {
    let (mut controller, client, clock) = start_controller();

    controller
        .post_sync(SchedulerEvent::new(
            0,
            EventKind::StageSubmitted {
                stage_id: 1,
                attempt_id: 0,
                profile_id: 0,
                task_count: 100,
                locality: StageLocality::default(),
            },
        ))
        .await
        .unwrap();

    // the backlog timer fires at t=1s; ticks before that must not ramp
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(controller.target_for(0).await, 0);

    clock.set(1_000);
    wait_until!(controller.target_for(0).await == 1);

    let targets = client.last_targets().expect("a sync should have happened");
    assert_eq!(targets.targets.get(&0), Some(&1));

    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_idle_executors_are_killed_through_the_client() {
    let (mut controller, client, clock) = start_controller();

    controller.post_sync(executor_added("exec-0", 0)).await.unwrap();

    clock.set(60_000);
    wait_until!(!client.kill_requests().is_empty());

    assert_eq!(
        client.kill_requests()[0],
        vec!["exec-0".to_string()]
    );
    let snapshot = controller.snapshot().await;
    assert_eq!(
        snapshot.profiles[&0].pending_to_remove,
        vec!["exec-0".to_string()]
    );

    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_refused_kills_are_rolled_back() {
    let (mut controller, client, clock) = start_controller();
    client.refuse_kills();

    controller.post_sync(executor_added("exec-0", 0)).await.unwrap();

    clock.set(60_000);
    wait_until!(!client.kill_requests().is_empty());
    wait_until!(controller.snapshot().await.profiles[&0]
        .pending_to_remove
        .is_empty());

    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_kill_executors_roundtrip() {
    let (mut controller, client, _clock) = start_controller();

    controller.post_sync(executor_added("exec-0", 0)).await.unwrap();
    controller.post_sync(executor_added("exec-1", 0)).await.unwrap();

    let killed = controller
        .kill_executors(vec!["exec-1".to_string()])
        .await
        .unwrap();
    assert_eq!(killed, vec!["exec-1".to_string()]);
    assert_eq!(client.kill_requests(), vec![vec!["exec-1".to_string()]]);

    let snapshot = controller.snapshot().await;
    assert_eq!(
        snapshot.profiles[&0].pending_to_remove,
        vec!["exec-1".to_string()]
    );

    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_reset_clears_state() {
    let (mut controller, _client, _clock) = start_controller();

    controller.post_sync(executor_added("exec-0", 0)).await.unwrap();
    assert_eq!(controller.snapshot().await.executor_count, 1);

    controller.reset().await.unwrap();

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.executor_count, 0);
    assert!(snapshot.profiles[&0].running_executors.is_empty());

    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_inconsistent_events_are_tolerated() {
    let (mut controller, _client, _clock) = start_controller();

    // task end for a task nobody started, removal of an unknown executor
    controller
        .post_sync(SchedulerEvent::new(
            0,
            EventKind::TaskEnd {
                stage_id: 9,
                attempt_id: 0,
                reason: shared::events::TaskEndReason::Success,
                info: shared::events::TaskInfo {
                    task_index: 3,
                    executor_id: "ghost".to_string(),
                    speculative: false,
                },
            },
        ))
        .await
        .unwrap();
    controller
        .post_sync(SchedulerEvent::new(
            0,
            EventKind::ExecutorRemoved {
                executor_id: "ghost".to_string(),
            },
        ))
        .await
        .unwrap();

    assert_eq!(controller.snapshot().await.executor_count, 0);
    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_drops_subsequent_events() {
    let (mut controller, _client, _clock) = start_controller();
    let intake = controller.intake();

    controller.stop().await;

    let result = intake.post(executor_added("exec-0", 0)).await;
    assert!(result.is_err());
}
