//! Integration tests for the async operation manager.
//!
//! These drive the public API only: submission, dispatch order, the
//! concurrency ceiling, cancellation, timeouts, panics, retention and the
//! observer channel.

use async_ops::{
    AsyncOperationManager, CancelOutcome, DuplicatePolicy, FailureKind, ManagerConfig,
    OperationContext, OperationError, OperationEvent, OperationId, OperationMetadata, OperationSnapshot,
    OperationStatus, StatusFilter, SubmitOptions,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

// =============================================================================
// Helpers
// =============================================================================

fn config(max_concurrent: usize) -> ManagerConfig {
    ManagerConfig::default()
        .with_max_concurrent(max_concurrent)
        .with_default_timeout(None)
}

async fn wait_terminal(manager: &AsyncOperationManager, id: &OperationId) -> OperationSnapshot {
    for _ in 0..10_000 {
        let snapshot = manager.get_status(id).expect("operation should exist");
        if snapshot.status.is_terminal() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("operation {} never reached a terminal status", id);
}

async fn wait_status(manager: &AsyncOperationManager, id: &OperationId, status: OperationStatus) {
    for _ in 0..10_000 {
        if manager.get_status(id).expect("operation should exist").status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("operation {} never reached {}", id, status);
}

fn drain(events: &mut broadcast::Receiver<OperationEvent>) -> Vec<(OperationId, OperationStatus)> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push((event.id, event.status));
    }
    seen
}

// =============================================================================
// Lifecycle scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_single_slot_runs_in_submission_order() {
    let manager = AsyncOperationManager::new(config(1));
    let mut events = manager.subscribe();

    let a = manager
        .submit(OperationMetadata::new("a"), |_ctx| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(json!("a"))
        })
        .unwrap();
    let b = manager
        .submit(OperationMetadata::new("b"), |_ctx| async { Ok(json!("b")) })
        .unwrap();

    assert_eq!(manager.get_status(&a).unwrap().status, OperationStatus::Queued);
    assert_eq!(manager.get_status(&b).unwrap().status, OperationStatus::Queued);

    wait_status(&manager, &a, OperationStatus::Running).await;
    assert_eq!(manager.get_status(&b).unwrap().status, OperationStatus::Queued);

    let a_done = wait_terminal(&manager, &a).await;
    let b_done = wait_terminal(&manager, &b).await;

    assert_eq!(manager.get_result(&a).unwrap(), json!("a"));
    assert_eq!(manager.get_result(&b).unwrap(), json!("b"));
    assert!(b_done.started_at.unwrap() >= a_done.finished_at.unwrap());

    let seen = drain(&mut events);
    let a_succeeded = seen
        .iter()
        .position(|e| *e == (a.clone(), OperationStatus::Succeeded))
        .unwrap();
    let b_running = seen
        .iter()
        .position(|e| *e == (b.clone(), OperationStatus::Running))
        .unwrap();
    assert!(a_succeeded < b_running);
}

#[tokio::test]
async fn test_failing_work_is_recorded() {
    let manager = AsyncOperationManager::new(config(2));
    let id = manager
        .submit(OperationMetadata::new("boom"), |_ctx| async {
            Err(anyhow::anyhow!("boom"))
        })
        .unwrap();

    let snapshot = wait_terminal(&manager, &id).await;
    assert_eq!(snapshot.status, OperationStatus::Failed);
    assert_eq!(snapshot.error.as_ref().unwrap().message, "boom");

    match manager.get_result(&id) {
        Err(OperationError::Failed(detail)) => {
            assert_eq!(detail.message, "boom");
            assert_eq!(detail.kind, FailureKind::Error);
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_before_dispatch_never_runs() {
    let manager = AsyncOperationManager::new(config(1));
    let ran = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&ran);
    let id = manager
        .submit(OperationMetadata::new("never"), move |_ctx| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(json!(null))
        })
        .unwrap();

    assert_eq!(manager.cancel(&id).unwrap(), CancelOutcome::Cancelled);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = manager.get_status(&id).unwrap();
    assert_eq!(snapshot.status, OperationStatus::Cancelled);
    assert!(snapshot.started_at.is_none());
    assert!(snapshot.cancel_requested);
    assert!(!ran.load(Ordering::SeqCst));
    assert!(matches!(manager.get_result(&id), Err(OperationError::Cancelled(_))));
    assert_eq!(
        manager.cancel(&id).unwrap(),
        CancelOutcome::AlreadyTerminal(OperationStatus::Cancelled)
    );
}

#[tokio::test(start_paused = true)]
async fn test_cooperative_cancel_of_running_operation() {
    let manager = AsyncOperationManager::new(config(1));
    let id = manager
        .submit(OperationMetadata::new("loop"), |ctx| async move {
            loop {
                ctx.check()?;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .unwrap();

    wait_status(&manager, &id, OperationStatus::Running).await;
    assert_eq!(manager.cancel(&id).unwrap(), CancelOutcome::CancelRequested);

    let snapshot = wait_terminal(&manager, &id).await;
    assert_eq!(snapshot.status, OperationStatus::Cancelled);
    assert!(snapshot.cancel_requested);
    assert!(snapshot.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_uncooperative_work_finishes_despite_cancel_request() {
    let manager = AsyncOperationManager::new(config(1));
    let id = manager
        .submit(OperationMetadata::new("stubborn"), |_ctx| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(json!("done anyway"))
        })
        .unwrap();

    wait_status(&manager, &id, OperationStatus::Running).await;
    assert_eq!(manager.cancel(&id).unwrap(), CancelOutcome::CancelRequested);

    let snapshot = wait_terminal(&manager, &id).await;
    assert_eq!(snapshot.status, OperationStatus::Succeeded);
    assert!(snapshot.cancel_requested);
    assert_eq!(manager.get_result(&id).unwrap(), json!("done anyway"));
}

#[tokio::test]
async fn test_result_not_ready_and_not_found() {
    let manager = AsyncOperationManager::new(config(1));
    let id = manager
        .submit(OperationMetadata::new("slow"), |ctx| async move {
            ctx.cancelled().await;
            Err(async_ops::Cancelled.into())
        })
        .unwrap();

    assert!(matches!(
        manager.get_result(&id),
        Err(OperationError::NotReady { .. })
    ));

    let unknown = OperationId::from("op-999-missing");
    assert!(matches!(manager.get_status(&unknown), Err(OperationError::NotFound(_))));
    assert!(matches!(manager.get_result(&unknown), Err(OperationError::NotFound(_))));
    assert!(matches!(manager.cancel(&unknown), Err(OperationError::NotFound(_))));

    manager.cancel(&id).unwrap();
}

// =============================================================================
// Concurrency ceiling
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_running_never_exceeds_ceiling() {
    let manager = AsyncOperationManager::new(config(2));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut ids = Vec::new();
    for i in 0..8 {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        let id = manager
            .submit(OperationMetadata::new(format!("job-{}", i)), move |_ctx| async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(i))
            })
            .unwrap();
        ids.push(id);
    }

    for id in &ids {
        assert!(manager.stats().running <= 2);
        let snapshot = wait_terminal(&manager, id).await;
        assert_eq!(snapshot.status, OperationStatus::Succeeded);
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(manager.stats().succeeded, 8);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_queue_rejects_excess() {
    let manager = AsyncOperationManager::new(config(1).with_max_queued(Some(1)));
    let hold = |_ctx: OperationContext| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(json!(null))
    };

    let running = manager.submit(OperationMetadata::new("a"), hold).unwrap();
    wait_status(&manager, &running, OperationStatus::Running).await;

    manager.submit(OperationMetadata::new("b"), hold).unwrap();
    match manager.submit(OperationMetadata::new("c"), hold) {
        Err(OperationError::ConcurrencyLimitExceeded { limit }) => assert_eq!(limit, 1),
        other => panic!("unexpected submission result: {:?}", other),
    }
}

// =============================================================================
// Failure isolation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_timeout_fails_operation_and_frees_slot() {
    let manager = AsyncOperationManager::new(
        config(1).with_default_timeout(Some(Duration::from_secs(1))),
    );

    let slow = manager
        .submit(OperationMetadata::new("slow"), |_ctx| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!("too late"))
        })
        .unwrap();
    let next = manager
        .submit(OperationMetadata::new("next"), |_ctx| async { Ok(json!("next")) })
        .unwrap();

    let snapshot = wait_terminal(&manager, &slow).await;
    assert_eq!(snapshot.status, OperationStatus::Failed);
    assert_eq!(snapshot.error.unwrap().kind, FailureKind::Timeout);
    assert!(snapshot.cancel_requested);

    assert_eq!(wait_terminal(&manager, &next).await.status, OperationStatus::Succeeded);

    // The detached work finishing later does not change the record.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(manager.get_status(&slow).unwrap().status, OperationStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_per_submission_timeout_override() {
    let manager = AsyncOperationManager::new(
        config(1).with_default_timeout(Some(Duration::from_secs(1))),
    );

    let id = manager
        .submit_with_options(
            OperationMetadata::new("long"),
            SubmitOptions::default().with_timeout(Duration::from_secs(30)),
            |_ctx| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(json!("finished"))
            },
        )
        .unwrap();

    assert_eq!(wait_terminal(&manager, &id).await.status, OperationStatus::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_sub_second_timeout_is_enforced() {
    let manager = AsyncOperationManager::new(
        config(1).with_default_timeout(Some(Duration::from_millis(500))),
    );

    let id = manager
        .submit(OperationMetadata::new("slow"), |_ctx| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("too late"))
        })
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    let snapshot = manager.get_status(&id).unwrap();
    assert_eq!(snapshot.status, OperationStatus::Failed);
    assert_eq!(snapshot.error.unwrap().kind, FailureKind::Timeout);
}

#[tokio::test]
async fn test_panic_is_isolated() {
    let manager = AsyncOperationManager::new(config(2));

    let bad = manager
        .submit(OperationMetadata::new("panics"), |_ctx| async {
            if json!(true).as_bool() == Some(true) {
                panic!("work exploded");
            }
            Ok(json!(null))
        })
        .unwrap();
    let good = manager
        .submit(OperationMetadata::new("fine"), |_ctx| async { Ok(json!("ok")) })
        .unwrap();

    let snapshot = wait_terminal(&manager, &bad).await;
    assert_eq!(snapshot.status, OperationStatus::Failed);
    let error = snapshot.error.unwrap();
    assert_eq!(error.kind, FailureKind::Panic);
    assert!(error.message.contains("work exploded"));

    assert_eq!(wait_terminal(&manager, &good).await.status, OperationStatus::Succeeded);

    let after = manager
        .submit(OperationMetadata::new("after"), |_ctx| async { Ok(json!(1)) })
        .unwrap();
    assert_eq!(wait_terminal(&manager, &after).await.status, OperationStatus::Succeeded);
}

// =============================================================================
// Retention
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_expired_records_are_not_found_on_lookup() {
    let manager = AsyncOperationManager::new(ManagerConfig {
        retention: Duration::from_secs(10),
        prune_interval_secs: 3600,
        ..config(1)
    });

    let id = manager
        .submit(OperationMetadata::new("short"), |_ctx| async { Ok(json!(1)) })
        .unwrap();
    wait_terminal(&manager, &id).await;

    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(manager.get_status(&id).is_ok());

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(matches!(manager.get_status(&id), Err(OperationError::NotFound(_))));
    assert!(matches!(manager.get_result(&id), Err(OperationError::NotFound(_))));
    assert!(manager.list(None).is_empty());

    let next = manager
        .submit(OperationMetadata::new("next"), |_ctx| async { Ok(json!(2)) })
        .unwrap();
    assert_ne!(next, id);
}

#[tokio::test(start_paused = true)]
async fn test_sub_second_retention_keeps_fresh_records() {
    let manager = AsyncOperationManager::new(
        config(1).with_retention(Duration::from_millis(900)),
    );

    let id = manager
        .submit(OperationMetadata::new("short"), |_ctx| async { Ok(json!(1)) })
        .unwrap();
    wait_terminal(&manager, &id).await;

    tokio::time::advance(Duration::from_millis(10)).await;
    assert_eq!(manager.get_status(&id).unwrap().status, OperationStatus::Succeeded);
    assert_eq!(manager.get_result(&id).unwrap(), json!(1));

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(matches!(manager.get_status(&id), Err(OperationError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_report_carries_result_until_pruned() {
    let manager = AsyncOperationManager::new(config(1).with_retention(Duration::from_secs(10)));

    let id = manager
        .submit(OperationMetadata::new("slow"), |_ctx| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(json!({ "created": 4 }))
        })
        .unwrap();
    wait_status(&manager, &id, OperationStatus::Running).await;
    let (snapshot, result) = manager.get_report(&id).unwrap();
    assert_eq!(snapshot.status, OperationStatus::Running);
    assert!(result.is_none());

    wait_terminal(&manager, &id).await;
    let (snapshot, result) = manager.get_report(&id).unwrap();
    assert_eq!(snapshot.status, OperationStatus::Succeeded);
    assert_eq!(result, Some(json!({ "created": 4 })));

    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(matches!(manager.get_report(&id), Err(OperationError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_periodic_sweep_prunes_without_lookups() {
    let manager = AsyncOperationManager::new(ManagerConfig {
        retention: Duration::from_secs(1),
        prune_interval_secs: 1,
        ..config(1)
    });

    let id = manager
        .submit(OperationMetadata::new("short"), |_ctx| async { Ok(json!(1)) })
        .unwrap();
    wait_terminal(&manager, &id).await;
    assert_eq!(manager.stats().succeeded, 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    let stats = manager.stats();
    assert_eq!(stats.succeeded, 0);
    assert_eq!(stats.submitted_total, 1);
}

// =============================================================================
// Duplicate policies
// =============================================================================

fn keyed(tool: &str) -> OperationMetadata {
    OperationMetadata::new(tool).with_resource_key("tasks/7")
}

async fn park(ctx: OperationContext) -> anyhow::Result<serde_json::Value> {
    ctx.cancelled().await;
    Err(async_ops::Cancelled.into())
}

#[tokio::test]
async fn test_duplicate_policy_allow() {
    let manager = AsyncOperationManager::new(config(1));
    let first = manager.submit(keyed("expandTask"), park).unwrap();
    let second = manager.submit(keyed("expandTask"), park).unwrap();
    assert_ne!(first, second);
    manager.shutdown();
}

#[tokio::test]
async fn test_duplicate_policy_reject() {
    let manager =
        AsyncOperationManager::new(config(1).with_duplicate_policy(DuplicatePolicy::Reject));
    let first = manager.submit(keyed("expandTask"), park).unwrap();

    match manager.submit(keyed("expandTask"), park) {
        Err(OperationError::DuplicateInFlight {
            resource_key,
            existing,
        }) => {
            assert_eq!(resource_key, "tasks/7");
            assert_eq!(existing, first);
        }
        other => panic!("unexpected submission result: {:?}", other),
    }

    // Once the first is terminal the key is free again.
    manager.cancel(&first).unwrap();
    assert!(manager.submit(keyed("expandTask"), park).is_ok());
    manager.shutdown();
}

#[tokio::test]
async fn test_duplicate_policy_coalesce() {
    let manager =
        AsyncOperationManager::new(config(1).with_duplicate_policy(DuplicatePolicy::Coalesce));
    let first = manager.submit(keyed("expandTask"), park).unwrap();
    let second = manager.submit(keyed("expandTask"), park).unwrap();
    assert_eq!(first, second);
    assert_eq!(manager.stats().submitted_total, 1);

    let unkeyed = manager.submit(OperationMetadata::new("expandTask"), park).unwrap();
    assert_ne!(unkeyed, first);
    manager.shutdown();
}

#[tokio::test]
async fn test_overlapping_keys_conflict() {
    let manager =
        AsyncOperationManager::new(config(2).with_duplicate_policy(DuplicatePolicy::Reject));
    let all = manager
        .submit(OperationMetadata::new("expandAll").with_resource_key("tasks"), park)
        .unwrap();

    match manager.submit(keyed("expandTask"), park) {
        Err(OperationError::DuplicateInFlight {
            resource_key,
            existing,
        }) => {
            assert_eq!(resource_key, "tasks");
            assert_eq!(existing, all);
        }
        other => panic!("unexpected submission result: {:?}", other),
    }

    manager.cancel(&all).unwrap();
    let single = manager.submit(keyed("expandTask"), park).unwrap();
    let sibling = manager
        .submit(OperationMetadata::new("expandTask").with_resource_key("tasks/8"), park)
        .unwrap();
    assert_ne!(single, sibling);
    assert!(matches!(
        manager.submit(OperationMetadata::new("parsePRD").with_resource_key("tasks"), park),
        Err(OperationError::DuplicateInFlight { .. })
    ));
    manager.shutdown();
}

#[tokio::test]
async fn test_coalesce_rejects_overlapping_but_different_key() {
    let manager =
        AsyncOperationManager::new(config(1).with_duplicate_policy(DuplicatePolicy::Coalesce));
    let single = manager.submit(keyed("expandTask"), park).unwrap();

    assert!(matches!(
        manager.submit(OperationMetadata::new("expandAll").with_resource_key("tasks"), park),
        Err(OperationError::DuplicateInFlight { existing, .. }) if existing == single
    ));
    assert_eq!(manager.submit(keyed("expandTask"), park).unwrap(), single);
    manager.shutdown();
}

// =============================================================================
// Observers, listing and shutdown
// =============================================================================

#[tokio::test]
async fn test_observer_sees_every_transition() {
    let manager = AsyncOperationManager::new(config(1));
    let mut events = manager.subscribe();

    let id = manager
        .submit(OperationMetadata::new("observed"), |_ctx| async { Ok(json!(1)) })
        .unwrap();
    wait_terminal(&manager, &id).await;

    let statuses: Vec<OperationStatus> = drain(&mut events)
        .into_iter()
        .filter(|(event_id, _)| *event_id == id)
        .map(|(_, status)| status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            OperationStatus::Queued,
            OperationStatus::Running,
            OperationStatus::Succeeded
        ]
    );
}

#[tokio::test]
async fn test_list_and_stats() {
    let manager = AsyncOperationManager::new(config(1));
    let done = manager
        .submit(OperationMetadata::new("done"), |_ctx| async { Ok(json!(1)) })
        .unwrap();
    wait_terminal(&manager, &done).await;

    let parked = manager.submit(OperationMetadata::new("parked"), park).unwrap();
    let waiting = manager.submit(OperationMetadata::new("waiting"), park).unwrap();
    wait_status(&manager, &parked, OperationStatus::Running).await;

    let all: Vec<OperationId> = manager.list(None).into_iter().map(|s| s.id).collect();
    assert_eq!(all, vec![done.clone(), parked.clone(), waiting.clone()]);

    let active: Vec<OperationId> = manager
        .list(Some(StatusFilter::Active))
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(active, vec![parked, waiting]);

    let stats = manager.stats();
    assert_eq!(stats.running, 1);
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.max_concurrent, 1);
    manager.shutdown();
}

#[tokio::test]
async fn test_shutdown_cancels_and_rejects() {
    let manager = AsyncOperationManager::new(config(1));
    let running = manager.submit(OperationMetadata::new("running"), park).unwrap();
    wait_status(&manager, &running, OperationStatus::Running).await;
    let queued = manager.submit(OperationMetadata::new("queued"), park).unwrap();

    assert_eq!(manager.shutdown(), 1);
    assert!(manager.is_shutting_down());
    assert_eq!(manager.get_status(&queued).unwrap().status, OperationStatus::Cancelled);
    assert_eq!(wait_terminal(&manager, &running).await.status, OperationStatus::Cancelled);

    assert!(matches!(
        manager.submit(OperationMetadata::new("late"), park),
        Err(OperationError::ShuttingDown)
    ));
    assert_eq!(manager.shutdown(), 0);
}
