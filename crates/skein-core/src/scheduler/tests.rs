use super::*;
use crate::executor::FnExecution;
use crate::repository::{JobStatus, MemoryRepository, Repository, TriggerRecord, TriggerType};
use crate::runner::RunContext;
use crate::task::{Pipeline, Task, TaskBranch};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

type Done = mpsc::UnboundedReceiver<(Uuid, JobStatus)>;

fn reporting(config: SchedulerConfig) -> (SchedulerConfig, Done) {
    let (tx, rx) = mpsc::unbounded_channel();
    let on_error = tx.clone();
    let config = config
        .on_success(move |ctx: RunContext| {
            let tx = tx.clone();
            async move {
                tx.send((ctx.id(), ctx.status())).ok();
                Ok(())
            }
        })
        .on_error(move |ctx: RunContext| {
            let tx = on_error.clone();
            async move {
                tx.send((ctx.id(), ctx.status())).ok();
                Ok(())
            }
        });
    (config, rx)
}

fn simple_pipeline() -> Pipeline {
    Pipeline::new([Task::new(
        "hello",
        FnExecution::new("hello", |_ctx| async { Ok(json!("hello")) }),
    )])
}

fn scheduler(
    name: &str,
    config: SchedulerConfig,
    pipeline: Pipeline,
) -> (Arc<SchedulerInstance>, Arc<MemoryRepository>) {
    let repo = Arc::new(MemoryRepository::new());
    let scheduler = SchedulerBuilder::new(name)
        .description("test scheduler")
        .config(config)
        .pipeline(pipeline)
        .argument("owner", json!("data-team"))
        .repository(repo.clone())
        .build()
        .unwrap();
    (scheduler, repo)
}

async fn wait_until_fired(repo: &MemoryRepository, job_id: Uuid) -> TriggerRecord {
    for _ in 0..100 {
        if let Some(trigger) = repo.get_one_trigger_by_job_id(job_id).await.unwrap() {
            if trigger.is_trigger {
                return trigger;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("trigger {job_id} never fired");
}

#[test]
fn test_builder_validation() {
    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());

    let err = SchedulerBuilder::new("no_job")
        .repository(repo.clone())
        .build()
        .unwrap_err();
    assert!(matches!(err, crate::Error::JobNotRegistered(_)));

    let err = SchedulerBuilder::new("bad_cron")
        .cron("61 * * * *")
        .pipeline(simple_pipeline())
        .repository(repo.clone())
        .build()
        .unwrap_err();
    assert!(matches!(err, crate::Error::InvalidCron { .. }));

    let err = SchedulerBuilder::new("zero")
        .config(SchedulerConfig::new().with_max_active_concurrent(0))
        .pipeline(simple_pipeline())
        .repository(repo.clone())
        .build()
        .unwrap_err();
    assert!(matches!(err, crate::Error::InvalidConfig(_)));

    let err = SchedulerBuilder::new("no_repo")
        .pipeline(simple_pipeline())
        .build()
        .unwrap_err();
    assert!(matches!(err, crate::Error::InvalidConfig(_)));

    let built = SchedulerBuilder::new("blank_cron")
        .cron("  ")
        .pipeline(simple_pipeline())
        .repository(repo)
        .build()
        .unwrap();
    assert!(built.cron_expression().is_none());
}

#[tokio::test]
async fn test_immediate_run_marks_trigger_fired() {
    let (config, mut done) = reporting(SchedulerConfig::default());
    let (scheduler, repo) = scheduler("adhoc", config, simple_pipeline());

    let trigger = TriggerRecord::external("adhoc", Uuid::new_v4(), None, Map::new());
    let job_id = scheduler.run(trigger.clone()).await.unwrap();
    assert_eq!(job_id, trigger.job_id);

    let stored = repo.get_one_trigger_by_job_id(job_id).await.unwrap().unwrap();
    assert!(stored.is_trigger);

    let (finished, status) = done.recv().await.unwrap();
    assert_eq!(finished, job_id);
    assert_eq!(status, JobStatus::Success);
}

#[tokio::test]
async fn test_nil_job_id_gets_fresh_id() {
    let (config, mut done) = reporting(SchedulerConfig::default());
    let (scheduler, _repo) = scheduler("adhoc", config, simple_pipeline());

    let trigger = TriggerRecord::external("adhoc", Uuid::nil(), None, Map::new());
    let job_id = scheduler.run(trigger).await.unwrap();
    assert!(!job_id.is_nil());
    assert_eq!(done.recv().await.unwrap().0, job_id);
}

#[tokio::test]
async fn test_run_rejects_foreign_trigger() {
    let (scheduler, _repo) = scheduler("mine", SchedulerConfig::default(), simple_pipeline());
    let trigger = TriggerRecord::external("theirs", Uuid::new_v4(), None, Map::new());
    assert!(scheduler.run(trigger).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_future_trigger_runs_when_due() {
    let (config, mut done) = reporting(SchedulerConfig::default());
    let (scheduler, repo) = scheduler("later", config, simple_pipeline());

    let at = Utc::now() + ChronoDuration::seconds(5);
    let trigger = TriggerRecord::external("later", Uuid::new_v4(), Some(at), Map::new());
    let job_id = scheduler.run(trigger).await.unwrap();

    let armed = repo.get_one_trigger_by_job_id(job_id).await.unwrap().unwrap();
    assert!(armed.is_pending());
    let waiting = repo.get_one_job(job_id).await.unwrap().unwrap();
    assert_eq!(waiting.status, JobStatus::Waiting);

    let (finished, status) = done.recv().await.unwrap();
    assert_eq!(finished, job_id);
    assert_eq!(status, JobStatus::Success);

    let fired = wait_until_fired(&repo, job_id).await;
    assert!(fired.is_active);
    assert_eq!(fired.execute_datetime, Some(at));
}

#[tokio::test(start_paused = true)]
async fn test_deactivated_future_trigger_is_skipped() {
    let runs = Arc::new(AtomicUsize::new(0));
    let pipeline = {
        let runs = runs.clone();
        Pipeline::new([Task::new(
            "count",
            FnExecution::new("count", move |_ctx| {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            }),
        )])
    };
    let (scheduler, repo) = scheduler("later", SchedulerConfig::default(), pipeline);

    let at = Utc::now() + ChronoDuration::seconds(5);
    let trigger = TriggerRecord::external("later", Uuid::new_v4(), Some(at), Map::new());
    let job_id = scheduler.run(trigger).await.unwrap();
    assert!(repo.deactivate_trigger(job_id).await.unwrap());

    let fired = wait_until_fired(&repo, job_id).await;

    assert!(!fired.is_active);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    let job = repo.get_one_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
    assert!(repo.get_trigger_timer("later").await.unwrap().is_empty());
}

fn counting_pipeline(runs: Arc<AtomicUsize>) -> Pipeline {
    Pipeline::new([Task::new(
        "count",
        FnExecution::new("count", move |_ctx| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }),
    )])
}

#[tokio::test(start_paused = true)]
async fn test_future_trigger_fires_after_stop() {
    let (config, mut done) = reporting(SchedulerConfig::default());
    let (scheduler, repo) = scheduler("later", config, simple_pipeline());
    scheduler.start();

    let at = Utc::now() + ChronoDuration::seconds(30);
    let trigger = TriggerRecord::external("later", Uuid::new_v4(), Some(at), Map::new());
    let job_id = scheduler.run(trigger).await.unwrap();
    scheduler.stop();
    assert!(!scheduler.is_running());

    let (finished, status) = done.recv().await.unwrap();
    assert_eq!(finished, job_id);
    assert_eq!(status, JobStatus::Success);
    assert!(wait_until_fired(&repo, job_id).await.is_trigger);

    // Stopped but not shut down: new future triggers still arm and fire.
    let at = Utc::now() + ChronoDuration::seconds(30);
    let trigger = TriggerRecord::external("later", Uuid::new_v4(), Some(at), Map::new());
    let second = scheduler.run(trigger).await.unwrap();
    assert_eq!(done.recv().await.unwrap().0, second);

    scheduler.start();
    assert!(scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_leaves_future_trigger_armed() {
    let (scheduler, repo) = scheduler("later", SchedulerConfig::default(), simple_pipeline());
    scheduler.start();

    let at = Utc::now() + ChronoDuration::hours(1);
    let trigger = TriggerRecord::external("later", Uuid::new_v4(), Some(at), Map::new());
    let job_id = scheduler.run(trigger).await.unwrap();
    assert_eq!(scheduler.armed_triggers(), 1);

    scheduler.shutdown();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(scheduler.is_shut_down());
    assert_eq!(scheduler.armed_triggers(), 0);
    let pending = repo.get_trigger_timer("later").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].job_id, job_id);

    let late = TriggerRecord::external("later", Uuid::new_v4(), None, Map::new());
    assert!(matches!(
        scheduler.run(late).await,
        Err(crate::Error::SchedulerShutdown(name)) if name == "later"
    ));
    assert!(scheduler.reconcile().await.is_err());

    scheduler.start();
    assert!(!scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_reconcile_arms_trigger_once() {
    let runs = Arc::new(AtomicUsize::new(0));
    let (config, mut done) = reporting(SchedulerConfig::default());
    let (scheduler, repo) = scheduler("restart", config, counting_pipeline(runs.clone()));

    let at = Utc::now() + ChronoDuration::seconds(10);
    let trigger = TriggerRecord::external("restart", Uuid::new_v4(), Some(at), Map::new());
    repo.upsert_trigger(&trigger).await.unwrap();

    assert_eq!(scheduler.reconcile().await.unwrap(), 1);
    assert_eq!(scheduler.reconcile().await.unwrap(), 0);
    assert_eq!(scheduler.armed_triggers(), 1);

    // Re-running the same trigger while armed is also a no-op.
    assert_eq!(scheduler.run(trigger.clone()).await.unwrap(), trigger.job_id);

    assert_eq!(done.recv().await.unwrap().0, trigger.job_id);
    wait_until_fired(&repo, trigger.job_id).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(done.try_recv().is_err());
    assert_eq!(scheduler.armed_triggers(), 0);
    assert_eq!(scheduler.reconcile().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_skips_trigger_fired_elsewhere() {
    let runs = Arc::new(AtomicUsize::new(0));
    let (scheduler, repo) =
        scheduler("later", SchedulerConfig::default(), counting_pipeline(runs.clone()));

    let at = Utc::now() + ChronoDuration::seconds(5);
    let trigger = TriggerRecord::external("later", Uuid::new_v4(), Some(at), Map::new());
    let job_id = scheduler.run(trigger).await.unwrap();

    let mut fired = repo.get_one_trigger_by_job_id(job_id).await.unwrap().unwrap();
    fired.is_trigger = true;
    repo.upsert_trigger(&fired).await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.armed_triggers(), 0);
    let job = repo.get_one_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
}

#[tokio::test]
async fn test_shutdown_drops_runs_waiting_for_a_slot() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let (started_tx, mut started) = mpsc::unbounded_channel();
    let pipeline = {
        let gate = gate.clone();
        Pipeline::new([Task::new(
            "held",
            FnExecution::new("held", move |ctx: RunContext| {
                let (gate, started_tx) = (gate.clone(), started_tx.clone());
                async move {
                    started_tx.send(ctx.id()).ok();
                    gate.notified().await;
                    Ok(Value::Null)
                }
            }),
        )])
    };
    let (config, mut done) =
        reporting(SchedulerConfig::new().with_job_mode(JobMode::Singleton));
    let (scheduler, repo) = scheduler("single", config, pipeline);

    let mut ids = Vec::new();
    for _ in 0..2 {
        let trigger = TriggerRecord::external("single", Uuid::new_v4(), None, Map::new());
        ids.push(scheduler.run(trigger).await.unwrap());
    }
    let running = tokio::time::timeout(Duration::from_secs(5), started.recv())
        .await
        .unwrap()
        .unwrap();
    let queued = if running == ids[0] { ids[1] } else { ids[0] };

    scheduler.shutdown();
    gate.notify_one();

    let (finished, status) = tokio::time::timeout(Duration::from_secs(5), done.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished, running);
    assert_eq!(status, JobStatus::Success);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(started.try_recv().is_err());
    assert!(done.try_recv().is_err());
    let dropped = repo.get_one_job(queued).await.unwrap().unwrap();
    assert_eq!(dropped.status, JobStatus::Waiting);
}

#[tokio::test]
async fn test_reconcile_runs_overdue_trigger() {
    let (config, mut done) = reporting(SchedulerConfig::default());
    let (scheduler, repo) = scheduler("restart", config, simple_pipeline());

    let overdue = TriggerRecord::external(
        "restart",
        Uuid::new_v4(),
        Some(Utc::now() - ChronoDuration::minutes(5)),
        Map::new(),
    );
    repo.upsert_trigger(&overdue).await.unwrap();

    assert_eq!(scheduler.reconcile().await.unwrap(), 1);
    assert_eq!(done.recv().await.unwrap().0, overdue.job_id);

    let stored = repo.get_one_trigger_by_job_id(overdue.job_id).await.unwrap().unwrap();
    assert!(stored.is_trigger);
    assert_eq!(scheduler.reconcile().await.unwrap(), 0);
}

#[tokio::test]
async fn test_singleton_mode_serializes_runs() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let pipeline = {
        let (active, peak) = (active.clone(), peak.clone());
        Pipeline::new([Task::new(
            "slow",
            FnExecution::new("slow", move |_ctx| {
                let (active, peak) = (active.clone(), peak.clone());
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            }),
        )])
    };
    let (config, mut done) =
        reporting(SchedulerConfig::new().with_job_mode(JobMode::Singleton));
    let (scheduler, _repo) = scheduler("single", config, pipeline);

    for _ in 0..3 {
        let trigger = TriggerRecord::external("single", Uuid::new_v4(), None, Map::new());
        scheduler.run(trigger).await.unwrap();
    }
    for _ in 0..3 {
        assert_eq!(done.recv().await.unwrap().1, JobStatus::Success);
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_mode_overlaps_runs() {
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let pipeline = {
        let barrier = barrier.clone();
        Pipeline::new([Task::new(
            "meet",
            FnExecution::new("meet", move |_ctx| {
                let barrier = barrier.clone();
                async move {
                    barrier.wait().await;
                    Ok(Value::Null)
                }
            }),
        )])
    };
    let (config, mut done) = reporting(SchedulerConfig::new().with_max_active_concurrent(2));
    let (scheduler, _repo) = scheduler("pair", config, pipeline);

    for _ in 0..2 {
        let trigger = TriggerRecord::external("pair", Uuid::new_v4(), None, Map::new());
        scheduler.run(trigger).await.unwrap();
    }
    for _ in 0..2 {
        let (_, status) = tokio::time::timeout(Duration::from_secs(5), done.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, JobStatus::Success);
    }
}

#[tokio::test]
async fn test_cron_dispatch_fires_schedule_runs() {
    let (config, mut done) = reporting(SchedulerConfig::default());
    let repo = Arc::new(MemoryRepository::new());
    let scheduler = SchedulerBuilder::new("every_second")
        .cron("* * * * * *")
        .config(config)
        .pipeline(simple_pipeline())
        .repository(repo.clone())
        .build()
        .unwrap();

    scheduler.start();
    let (job_id, status) = tokio::time::timeout(Duration::from_secs(5), done.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(scheduler.next_run().is_some());
    scheduler.stop();

    assert_eq!(status, JobStatus::Success);
    let tick = repo.get_one_trigger_by_job_id(job_id).await.unwrap().unwrap();
    assert_eq!(tick.trigger_type, TriggerType::Schedule);
    assert!(tick.is_trigger);
    assert!(!scheduler.is_running());
}

#[test]
fn test_snapshot_describes_scheduler() {
    let pipeline = Pipeline::new([
        crate::task::Node::from(Task::new(
            "extract",
            FnExecution::new("extract_fn", |_ctx| async { Ok(Value::Null) }),
        )),
        crate::task::Node::from(
            TaskBranch::new(
                "route",
                FnExecution::new("route_fn", |_ctx| async { Ok(json!("full")) }),
            )
            .branch("full", simple_pipeline()),
        ),
    ]);
    let repo = Arc::new(MemoryRepository::new());
    let scheduler = SchedulerBuilder::new("nightly")
        .description("nightly export")
        .cron("0 3 * * *")
        .pipeline(pipeline)
        .argument("bucket", json!("exports"))
        .repository(repo)
        .build()
        .unwrap();

    let snapshot = serde_json::to_value(scheduler.snapshot()).unwrap();
    assert_eq!(snapshot["name"], "nightly");
    assert_eq!(snapshot["cron_expression"], "0 3 * * *");
    assert_eq!(snapshot["is_running"], false);
    assert_eq!(snapshot["armed_triggers"], 0);
    assert_eq!(snapshot["arguments"]["bucket"], "exports");
    assert_eq!(snapshot["config"]["max_active_concurrent"], 32);
    assert_eq!(snapshot["tasks"][1]["type"], "BRANCH_TASK");
    assert_eq!(snapshot["tasks"][1]["branches"]["full"][0]["name"], "hello");
}
