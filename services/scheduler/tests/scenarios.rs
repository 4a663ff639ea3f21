//! End-to-end scheduling scenarios over in-memory collaborators.


use std::collections::HashSet;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use harness::{job, request, worker, Harness, API};
use pollmesh_id::{ApiId, SubscriptionId};
use pollmesh_scheduler::error::SchedulerError;
use pollmesh_scheduler::monitor::CycleReport;
use pollmesh_scheduler::registry::JobEntry;
use pollmesh_scheduler::service::{Actor, SubscribeRequest};
use pollmesh_scheduler::subscriptions::{SubscriptionStatus, UserRef};
use tokio::task::JoinSet;

fn sub(n: i64) -> SubscriptionId {
    SubscriptionId::new(n)
}

#[tokio::test]
async fn test_fills_pool_then_rejects_with_no_capacity() {
    let h = Harness::new(2, 2);

    let mut placed = Vec::new();
    for user in 1..=4 {
        let activation = h.subscribe(user).await.unwrap();
        placed.push((activation.job, activation.worker));
    }
    assert_eq!(
        placed,
        vec![
            (job(1), worker(1)),
            (job(2), worker(1)),
            (job(3), worker(2)),
            (job(4), worker(2)),
        ]
    );

    let err = h.subscribe(5).await.unwrap_err();
    assert!(matches!(err, SchedulerError::NoCapacity), "got {err:?}");

    // The rejected subscription is rolled back and nothing is registered.
    assert_eq!(h.subscriptions.count(), 4);
    assert_eq!(h.jobs().await.len(), 4);
    assert_eq!(h.active_count().await, 4);
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_subscribe_records_active_subscription() {
    let h = Harness::new(2, 2);
    let activation = h.subscribe(7).await.unwrap();

    let record = h.subscriptions.get(activation.subscription_id).unwrap();
    assert_eq!(record.status, SubscriptionStatus::Active);
    assert_eq!(record.job_name.as_deref(), Some("job1"));
    assert_eq!(record.container.as_deref(), Some("system-worker-1"));
    let command = record.command.unwrap();
    assert!(command.contains("--subscriptionID 1"), "{command}");
    assert!(command.contains("--apiID 1"), "{command}");

    let entries = h.jobs().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, job(1));
    assert_eq!(entries[0].interval_secs, 5);
    assert_eq!(entries[0].command, command);
}

#[tokio::test]
async fn test_stale_worker_jobs_move_to_healthy_worker() {
    let h = Harness::new(2, 2);
    h.subscribe(1).await.unwrap();
    h.subscribe(2).await.unwrap();
    assert_eq!(h.jobs_on(worker(1)).await, vec![job(1), job(2)]);

    let now = Utc::now();
    h.scheduler
        .record_heartbeat(worker(1), now - TimeDelta::seconds(60))
        .await
        .unwrap();
    h.scheduler.record_heartbeat(worker(2), now).await.unwrap();

    let report = h.scheduler.health_monitor().run_cycle_at(now).await.unwrap();
    assert_eq!(report.newly_flagged, vec![worker(1)]);
    let rebalance = report.rebalance.expect("rebalance ran");
    assert_eq!(rebalance.moved.len(), 2);
    assert!(rebalance.dropped.is_empty());

    assert!(h.jobs_on(worker(1)).await.is_empty());
    assert_eq!(h.jobs_on(worker(2)).await, vec![job(1), job(2)]);
    for id in [sub(1), sub(2)] {
        let record = h.subscriptions.get(id).unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert_eq!(record.container.as_deref(), Some("system-worker-2"));
    }
    assert_eq!(h.active_count().await, 2);
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_stale_worker_overflow_is_dropped() {
    let h = Harness::new(2, 2);
    for user in 1..=4 {
        h.subscribe(user).await.unwrap();
    }

    let now = Utc::now();
    h.scheduler
        .record_heartbeat(worker(1), now - TimeDelta::seconds(60))
        .await
        .unwrap();
    h.scheduler.record_heartbeat(worker(2), now).await.unwrap();

    let report = h.scheduler.health_monitor().run_cycle_at(now).await.unwrap();
    let rebalance = report.rebalance.expect("rebalance ran");
    assert_eq!(rebalance.placed, 2);
    assert_eq!(rebalance.dropped, vec![job(3), job(4)]);

    assert_eq!(h.jobs_on(worker(2)).await, vec![job(1), job(2)]);
    assert_eq!(h.active_count().await, 2);
    for id in [sub(3), sub(4)] {
        let record = h.subscriptions.get(id).unwrap();
        assert_eq!(record.status, SubscriptionStatus::Inactive);
        assert_eq!(record.job_name, None);
        assert_eq!(record.container, None);
        // Kept so a later resubscribe can reuse it.
        assert!(record.command.is_some());
    }
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_failed_push_is_repaired_by_next_pass() {
    let h = Harness::new(2, 2);
    h.subscribe(1).await.unwrap();
    h.subscribe(2).await.unwrap();

    let now = Utc::now();
    h.scheduler
        .record_heartbeat(worker(1), now - TimeDelta::seconds(60))
        .await
        .unwrap();
    h.scheduler.record_heartbeat(worker(2), now).await.unwrap();

    let monitor = h.scheduler.health_monitor();
    h.subscriptions.fail_status_updates(true);
    let first = monitor.run_cycle_at(now).await.unwrap();
    let rebalance = first.rebalance.expect("rebalance ran");
    assert_eq!(rebalance.moved.len(), 2);
    assert_eq!(rebalance.failed_updates, 2);

    // The registry moved but the store still points at the stale worker.
    assert_eq!(h.jobs_on(worker(2)).await, vec![job(1), job(2)]);
    for id in [sub(1), sub(2)] {
        let record = h.subscriptions.get(id).unwrap();
        assert_eq!(record.container.as_deref(), Some("system-worker-1"));
    }

    h.subscriptions.fail_status_updates(false);
    let second = monitor.run_cycle_at(now).await.unwrap();
    let rebalance = second.rebalance.expect("rebalance ran");
    assert!(rebalance.moved.is_empty());
    assert_eq!(rebalance.failed_updates, 0);
    for id in [sub(1), sub(2)] {
        let record = h.subscriptions.get(id).unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert_eq!(record.container.as_deref(), Some("system-worker-2"));
    }
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_rebalance_continues_past_failed_pushes() {
    let h = Harness::new(2, 2);
    for user in 1..=4 {
        h.subscribe(user).await.unwrap();
    }

    let now = Utc::now();
    h.scheduler
        .record_heartbeat(worker(1), now - TimeDelta::seconds(60))
        .await
        .unwrap();
    h.scheduler.record_heartbeat(worker(2), now).await.unwrap();

    // One moved job and one dropped job cannot be pushed.
    h.subscriptions.fail_updates_for(sub(1), true);
    h.subscriptions.fail_updates_for(sub(3), true);

    let report = h.scheduler.health_monitor().run_cycle_at(now).await.unwrap();
    let rebalance = report.rebalance.expect("rebalance ran");
    assert_eq!(rebalance.placed, 2);
    assert_eq!(rebalance.moved.len(), 2);
    assert_eq!(rebalance.dropped, vec![job(3), job(4)]);
    assert_eq!(rebalance.failed_updates, 2);

    assert_eq!(h.jobs_on(worker(2)).await, vec![job(1), job(2)]);
    assert_eq!(h.active_count().await, 2);

    let moved = h.subscriptions.get(sub(2)).unwrap();
    assert_eq!(moved.container.as_deref(), Some("system-worker-2"));
    let dropped = h.subscriptions.get(sub(4)).unwrap();
    assert_eq!(dropped.status, SubscriptionStatus::Inactive);
    assert_eq!(dropped.job_name, None);

    // Failed pushes leave the old records in place.
    let unpushed = h.subscriptions.get(sub(1)).unwrap();
    assert_eq!(unpushed.container.as_deref(), Some("system-worker-1"));
    let unpushed = h.subscriptions.get(sub(3)).unwrap();
    assert_eq!(unpushed.status, SubscriptionStatus::Active);
    assert_eq!(unpushed.job_name.as_deref(), Some("job3"));
}

#[tokio::test]
async fn test_health_cycle_is_idempotent_and_recovers() {
    let h = Harness::new(2, 2);
    h.subscribe(1).await.unwrap();

    let now = Utc::now();
    h.scheduler
        .record_heartbeat(worker(1), now - TimeDelta::seconds(60))
        .await
        .unwrap();
    h.scheduler.record_heartbeat(worker(2), now).await.unwrap();

    let monitor = h.scheduler.health_monitor();
    let first = monitor.run_cycle_at(now).await.unwrap();
    assert!(first.rebalance.is_some());
    let after_first = h.jobs().await;

    let second = monitor.run_cycle_at(now).await.unwrap();
    assert_eq!(second.stale, vec![worker(1)]);
    assert!(second.newly_flagged.is_empty());
    // A worker that stays stale keeps triggering a pass, which moves nothing.
    let rebalance = second.rebalance.expect("rebalance ran");
    assert!(!rebalance.changed());
    assert_eq!(rebalance.placed, 1);
    assert_eq!(h.jobs().await, after_first);

    h.scheduler.record_heartbeat(worker(1), now).await.unwrap();
    let third = monitor.run_cycle_at(now).await.unwrap();
    assert_eq!(third.recovered, vec![worker(1)]);
    assert!(third.rebalance.is_none());
    assert!(h.scheduler.health().unhealthy().await.unwrap().is_empty());

    // A recovered worker takes new placements again.
    let activation = h.subscribe(2).await.unwrap();
    assert_eq!(activation.worker, worker(1));
}

#[tokio::test]
async fn test_fresh_heartbeats_change_nothing() {
    let h = Harness::new(2, 2);
    h.subscribe(1).await.unwrap();
    let before = h.jobs().await;

    let now = Utc::now();
    for w in [worker(1), worker(2)] {
        h.scheduler
            .record_heartbeat(w, now - TimeDelta::seconds(5))
            .await
            .unwrap();
    }

    let monitor = h.scheduler.health_monitor();
    for _ in 0..3 {
        let report = monitor.run_cycle_at(now).await.unwrap();
        assert_eq!(report, CycleReport::default());
    }
    assert!(h.scheduler.health().unhealthy().await.unwrap().is_empty());
    assert_eq!(h.jobs().await, before);
}

#[tokio::test]
async fn test_future_heartbeat_counts_as_fresh() {
    let h = Harness::new(2, 2);
    let now = Utc::now();
    h.scheduler
        .record_heartbeat(worker(1), now + TimeDelta::seconds(300))
        .await
        .unwrap();

    let report = h.scheduler.health_monitor().run_cycle_at(now).await.unwrap();
    assert!(report.stale.is_empty());
    assert!(h.scheduler.health().unhealthy().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_heartbeat_outside_pool_is_rejected() {
    let h = Harness::new(2, 2);
    let err = h
        .scheduler
        .record_heartbeat(worker(3), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Invalid(_)), "got {err:?}");
}

#[tokio::test]
async fn test_unsubscribe_repacks_remaining_jobs() {
    let h = Harness::new(2, 2);
    for user in 1..=3 {
        h.subscribe(user).await.unwrap();
    }
    assert_eq!(h.jobs_on(worker(2)).await, vec![job(3)]);

    let removed = h.scheduler.unsubscribe(&Actor::Service, sub(1)).await.unwrap();
    assert_eq!(removed, job(1));

    assert_eq!(h.jobs_on(worker(1)).await, vec![job(2), job(3)]);
    assert!(h.jobs_on(worker(2)).await.is_empty());
    assert_eq!(h.active_count().await, 2);

    let dropped = h.subscriptions.get(sub(1)).unwrap();
    assert_eq!(dropped.status, SubscriptionStatus::Inactive);
    assert_eq!(dropped.job_name, None);
    assert!(dropped.command.is_some());

    let moved = h.subscriptions.get(sub(3)).unwrap();
    assert_eq!(moved.container.as_deref(), Some("system-worker-1"));
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_unsubscribe_repacks_even_when_inactive_push_fails() {
    let h = Harness::new(2, 2);
    for user in 1..=3 {
        h.subscribe(user).await.unwrap();
    }
    h.subscriptions.fail_updates_for(sub(1), true);

    let err = h
        .scheduler
        .unsubscribe(&Actor::Service, sub(1))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Upstream(_)), "got {err:?}");

    // The job is gone and the remaining jobs were still re-packed.
    assert_eq!(h.jobs_on(worker(1)).await, vec![job(2), job(3)]);
    assert!(h.jobs_on(worker(2)).await.is_empty());
    assert_eq!(h.active_count().await, 2);
    let moved = h.subscriptions.get(sub(3)).unwrap();
    assert_eq!(moved.container.as_deref(), Some("system-worker-1"));
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_unsubscribe_requires_active_subscription() {
    let h = Harness::new(2, 2);
    h.subscribe(1).await.unwrap();
    h.scheduler.unsubscribe(&Actor::Service, sub(1)).await.unwrap();

    let err = h
        .scheduler
        .unsubscribe(&Actor::Service, sub(1))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotActive(id) if id == sub(1)), "got {err:?}");

    let err = h
        .scheduler
        .unsubscribe(&Actor::Service, sub(42))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownSubscription(_)), "got {err:?}");
}

#[tokio::test]
async fn test_unsubscribe_with_missing_job_flags_error() {
    let h = Harness::new(2, 2);
    h.subscribe(1).await.unwrap();
    assert!(h.scheduler.registry().delete_job(job(1)).await.unwrap());

    let err = h
        .scheduler
        .unsubscribe(&Actor::Service, sub(1))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::JobMissing { .. }), "got {err:?}");
    assert_eq!(h.subscription_status(sub(1)), SubscriptionStatus::Error);
}

#[tokio::test]
async fn test_user_cannot_touch_another_users_subscription() {
    let h = Harness::new(2, 2);
    h.subscribe(1).await.unwrap();

    let intruder = Actor::User {
        id: UserRef::Number(2),
        admin: false,
    };
    let err = h.scheduler.unsubscribe(&intruder, sub(1)).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Forbidden(_)), "got {err:?}");
    assert_eq!(h.subscription_status(sub(1)), SubscriptionStatus::Active);

    let owner = Actor::User {
        id: UserRef::Text("1".to_string()),
        admin: false,
    };
    h.scheduler.unsubscribe(&owner, sub(1)).await.unwrap();
}

#[tokio::test]
async fn test_resubscribe_issues_fresh_job_name() {
    let h = Harness::new(2, 2);
    let first = h.subscribe(1).await.unwrap();
    let command = h.subscriptions.get(sub(1)).unwrap().command;
    h.scheduler.unsubscribe(&Actor::Service, sub(1)).await.unwrap();

    let again = h.scheduler.resubscribe(&Actor::Service, sub(1)).await.unwrap();
    assert_eq!(again.subscription_id, sub(1));
    assert!(again.job > first.job);
    assert_eq!(again.worker, worker(1));

    let record = h.subscriptions.get(sub(1)).unwrap();
    assert_eq!(record.status, SubscriptionStatus::Active);
    assert_eq!(record.job_name, Some(again.job.to_string()));
    assert_eq!(record.command, command);
    assert_eq!(h.active_count().await, 1);

    let err = h
        .scheduler
        .resubscribe(&Actor::Service, sub(1))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::AlreadyActive(_)), "got {err:?}");
}

#[tokio::test]
async fn test_resubscribe_without_capacity_leaves_subscription_inactive() {
    let h = Harness::new(1, 1);
    h.subscribe(1).await.unwrap();
    h.scheduler.unsubscribe(&Actor::Service, sub(1)).await.unwrap();
    h.subscribe(2).await.unwrap();

    let err = h
        .scheduler
        .resubscribe(&Actor::Service, sub(1))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NoCapacity), "got {err:?}");
    assert_eq!(h.subscription_status(sub(1)), SubscriptionStatus::Inactive);
    assert_eq!(h.jobs().await.len(), 1);
}

#[tokio::test]
async fn test_unknown_api_creates_nothing() {
    let h = Harness::new(2, 2);
    let err = h
        .scheduler
        .subscribe(
            &Actor::Service,
            SubscribeRequest {
                user_id: UserRef::Number(1),
                api_id: ApiId::new(99),
                interval_secs: 5,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::UnknownApi(id) if id == ApiId::new(99)), "got {err:?}");
    assert_eq!(h.subscriptions.count(), 0);
    assert!(h.jobs().await.is_empty());
    assert_eq!(h.scheduler.counters().historical_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_zero_interval_is_rejected() {
    let h = Harness::new(2, 2);
    let mut req = request(1);
    req.interval_secs = 0;
    let err = h.scheduler.subscribe(&Actor::Service, req).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Invalid(_)), "got {err:?}");
}

#[tokio::test]
async fn test_failed_status_update_is_compensated() {
    let h = Harness::new(2, 2);
    h.subscriptions.fail_status_updates(true);

    let err = h.subscribe(1).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Upstream(_)), "got {err:?}");

    assert!(h.jobs().await.is_empty());
    assert_eq!(h.active_count().await, 0);
    assert_eq!(h.subscriptions.count(), 0);

    // The lock was released despite the failure.
    h.subscriptions.fail_status_updates(false);
    h.subscribe(1).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_subscribes_are_serialized() {
    let h = Harness::new(3, 5);
    h.subscriptions.set_create_delay(Duration::from_millis(20));
    let other = h.second_instance();

    let mut tasks = JoinSet::new();
    for user in 0..8 {
        let scheduler = if user % 2 == 0 {
            h.scheduler.clone()
        } else {
            other.clone()
        };
        tasks.spawn(async move { scheduler.subscribe(&Actor::Service, request(user)).await });
    }

    let mut names = HashSet::new();
    while let Some(result) = tasks.join_next().await {
        let activation = result.unwrap().unwrap();
        assert!(names.insert(activation.job), "duplicate {}", activation.job);
    }

    assert_eq!(h.subscriptions.max_concurrent_creates(), 1);
    assert_eq!(h.jobs().await.len(), 8);
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_job_names_are_never_reused() {
    let h = Harness::new(2, 2);
    let mut last = None;
    for round in 0..3 {
        let activation = h.subscribe(round).await.unwrap();
        if let Some(previous) = last {
            assert!(activation.job > previous);
        }
        last = Some(activation.job);
        h.scheduler
            .unsubscribe(&Actor::Service, activation.subscription_id)
            .await
            .unwrap();
    }

    // A restart over an empty registry must not rewind the counter.
    h.scheduler.bootstrap().await.unwrap();
    let next = h.subscribe(9).await.unwrap();
    assert!(Some(next.job) > last);
}

#[tokio::test]
async fn test_bootstrap_aligns_counters_with_registry() {
    let h = Harness::new(2, 2);
    let entries: Vec<JobEntry> = [4, 7]
        .into_iter()
        .map(|n| JobEntry {
            name: job(n),
            interval_secs: 30,
            command: format!("python fetch.py --subscriptionID {n} --apiID {API}"),
            assigned_worker: Some(worker(1)),
        })
        .collect();
    h.scheduler.registry().replace_jobs(&entries).await.unwrap();

    h.scheduler.bootstrap().await.unwrap();
    assert_eq!(h.active_count().await, 2);

    let next = h.subscribe(1).await.unwrap();
    assert_eq!(next.job, job(8));
    assert_eq!(next.worker, worker(2));
}
