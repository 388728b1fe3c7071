// Scheduler behaviors driven with a manual clock through `tick(now)`:
// retry with backoff, deactivation at the failure budget, at-most-once per
// window on success, and delivery fan-out.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, TimeZone, Utc};
use tokio::sync::mpsc;

use recap_core::config::RecapConfig;
use recap_core::types::{Destination, ExecutionStatus, Schedule, SinkFormat, SinkKind};
use recap_engine::{LlmClient, MockProvider, SummaryEngine};
use recap_scheduler::{Deliverer, NewTask, Scheduler};
use recap_source::{MemorySource, MessageSource};
use recap_store::Store;

struct Harness {
    scheduler: Scheduler,
    store: Arc<Store>,
    source: Arc<MemorySource>,
    mock: Arc<MockProvider>,
    delivered: mpsc::Receiver<recap_core::types::ChannelDelivery>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recap.db");
    let store = Arc::new(Store::open(path.to_str().unwrap(), 2).unwrap());

    let mut config = RecapConfig::default();
    config.llm.max_retries = 0;
    config.llm.min_dispatch_interval_ms = 0;
    config.llm.backoff_base_ms = 1;

    let mock = Arc::new(MockProvider::new());
    let llm = Arc::new(LlmClient::new(Box::new(Arc::clone(&mock)), &config.llm).unwrap());
    let source = Arc::new(MemorySource::new());
    let engine = Arc::new(SummaryEngine::new(
        Arc::clone(&source) as Arc<dyn MessageSource>,
        Arc::clone(&store),
        llm,
        &config,
    ));

    let (tx, rx) = mpsc::channel(16);
    let scheduler = Scheduler::new(
        Arc::clone(&store),
        engine,
        Deliverer::new(Some(tx)),
        StdDuration::from_secs(30),
        StdDuration::from_secs(300),
    );

    Harness {
        scheduler,
        store,
        source,
        mock,
        delivered: rx,
        _dir: dir,
    }
}

fn seed_channel(source: &MemorySource, now: chrono::DateTime<Utc>) {
    for i in 0..8 {
        source.push(
            "chan-1",
            MemorySource::message(
                &format!("m{i}"),
                "u1",
                "Ana",
                now - Duration::hours(2) + Duration::minutes(i),
                &format!("update {i} on the migration"),
            ),
        );
    }
}

fn new_task(name: &str) -> NewTask {
    NewTask {
        name: name.to_string(),
        channel_id: "chan-1".into(),
        guild_id: "guild-1".into(),
        schedule: Schedule::Daily { hour: 8, minute: 0 },
        destinations: vec![Destination {
            sink: SinkKind::Channel,
            target: "chan-1".into(),
            format: SinkFormat::Embed,
        }],
        options: Default::default(),
        created_by: "admin-1".into(),
    }
}

/// Force a task due at `now` regardless of its schedule slot.
fn force_due(
    store: &Store,
    id: &str,
    now: chrono::DateTime<Utc>,
    max_failures: u32,
) -> recap_core::types::ScheduledTask {
    let mut task = store.get_task(id).unwrap();
    task.next_run = Some(now - Duration::minutes(1));
    task.max_failures = max_failures;
    store.delete_task(id).unwrap();
    store.save_task(&task).unwrap();
    task
}

#[tokio::test]
async fn failing_task_retries_then_deactivates() {
    let h = harness();
    let now = Utc.with_ymd_and_hms(2026, 7, 10, 9, 0, 0).unwrap();
    seed_channel(&h.source, now);

    let created = h.scheduler.create_task(new_task("daily-digest")).unwrap();
    let task = force_due(&h.store, &created.id, now, 2);

    // First tick: provider fails, task schedules a retry.
    h.mock.fail_with(503, "provider down");
    assert_eq!(h.scheduler.tick(now).await.unwrap(), 1);

    let after_first = h.store.get_task(&task.id).unwrap();
    assert!(after_first.active);
    assert_eq!(after_first.consecutive_failures, 1);
    assert_eq!(
        after_first.next_run.unwrap(),
        now + Duration::minutes(5),
        "retry lands retry_delay_minutes after the failure"
    );
    let execs = h.store.executions_for_task(&task.id, 10).unwrap();
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].status, ExecutionStatus::Failed);

    // Not due yet before the retry delay elapses.
    assert_eq!(h.scheduler.tick(now + Duration::minutes(2)).await.unwrap(), 0);

    // Second tick: fails again, budget of 2 exhausted, task deactivates.
    h.mock.fail_with(503, "provider still down");
    let retry_at = now + Duration::minutes(6);
    assert_eq!(h.scheduler.tick(retry_at).await.unwrap(), 1);

    let after_second = h.store.get_task(&task.id).unwrap();
    assert!(!after_second.active);
    assert_eq!(after_second.consecutive_failures, 2);
    assert!(after_second.next_run.is_none());
    let execs = h.store.executions_for_task(&task.id, 10).unwrap();
    assert_eq!(execs.len(), 2);
    assert!(execs.iter().all(|e| e.status == ExecutionStatus::Failed));

    // Deactivated tasks never run again.
    assert_eq!(h.scheduler.tick(retry_at + Duration::hours(24)).await.unwrap(), 0);
}

#[tokio::test]
async fn successful_run_advances_and_delivers() {
    let mut h = harness();
    let now = Utc.with_ymd_and_hms(2026, 7, 10, 9, 0, 0).unwrap();
    seed_channel(&h.source, now);

    let created = h.scheduler.create_task(new_task("daily-digest")).unwrap();
    let task = force_due(&h.store, &created.id, now, 3);

    assert_eq!(h.scheduler.tick(now).await.unwrap(), 1);

    let after = h.store.get_task(&task.id).unwrap();
    assert!(after.active);
    assert_eq!(after.consecutive_failures, 0);
    assert_eq!(after.last_run, Some(now));
    // Next run comes from the schedule descriptor, strictly in the future.
    let next = after.next_run.unwrap();
    assert!(next > now);
    assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 11, 8, 0, 0).unwrap());

    let execs = h.store.executions_for_task(&task.id, 10).unwrap();
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].status, ExecutionStatus::Completed);
    assert!(execs[0].summary_id.is_some());
    assert_eq!(execs[0].deliveries.len(), 1);
    assert!(execs[0].deliveries[0].ok);

    let delivery = h.delivered.recv().await.unwrap();
    assert_eq!(delivery.channel_id, "chan-1");
    assert_eq!(delivery.summary.id, execs[0].summary_id.clone().unwrap());

    // Re-running the same instant produces no second execution: the
    // completed run already advanced next_run past now.
    assert_eq!(h.scheduler.tick(now).await.unwrap(), 0);
    assert_eq!(h.store.executions_for_task(&task.id, 10).unwrap().len(), 1);
}

#[tokio::test]
async fn one_shot_task_retires_after_firing() {
    let mut h = harness();
    let now = Utc.with_ymd_and_hms(2026, 7, 10, 9, 0, 0).unwrap();
    seed_channel(&h.source, now);

    let mut input = new_task("one-off");
    input.schedule = Schedule::Once {
        at: now + Duration::hours(1),
    };
    let created = h.scheduler.create_task(input).unwrap();
    let task = force_due(&h.store, &created.id, now, 3);

    assert_eq!(h.scheduler.tick(now).await.unwrap(), 1);
    let after = h.store.get_task(&task.id).unwrap();
    assert!(!after.active, "one-shot retires after its single run");
    assert!(after.next_run.is_none());
    let _ = h.delivered.recv().await.unwrap();
}

#[tokio::test]
async fn duplicate_task_names_are_rejected() {
    let h = harness();
    h.scheduler.create_task(new_task("daily-digest")).unwrap();
    let err = h.scheduler.create_task(new_task("daily-digest")).unwrap_err();
    assert!(matches!(err, recap_core::RecapError::StoreConstraint(_)));
}

#[tokio::test]
async fn pause_and_resume_control_dispatch() {
    let h = harness();
    let now = Utc.with_ymd_and_hms(2026, 7, 10, 9, 0, 0).unwrap();
    seed_channel(&h.source, now);

    let created = h.scheduler.create_task(new_task("daily-digest")).unwrap();
    force_due(&h.store, &created.id, now, 3);

    h.scheduler.pause_task(&created.id).unwrap();
    assert_eq!(h.scheduler.tick(now).await.unwrap(), 0);

    h.scheduler.resume_task(&created.id).unwrap();
    let resumed = h.store.get_task(&created.id).unwrap();
    assert!(resumed.active);
    // Resume recomputes next_run from the wall clock.
    assert!(resumed.next_run.unwrap() > now);
}
