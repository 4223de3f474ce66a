use super::*;
use crate::executor::FnExecution;
use crate::repository::{MemoryRepository, MockRepository, TriggerType};
use crate::task::{Task, TaskBranch};
use serde_json::{json, Map};
use std::sync::atomic::{AtomicUsize, Ordering};

fn context() -> RunContext {
    let arguments: Map<String, Value> = [("region".to_string(), json!("eu"))]
        .into_iter()
        .collect();
    RunContext::new(
        Uuid::new_v4(),
        "test",
        TriggerType::External,
        Utc::now(),
        arguments,
        Map::new(),
    )
}

fn value_task(name: &str, value: Value) -> Task {
    Task::new(
        name,
        FnExecution::new(name, move |_ctx| {
            let value = value.clone();
            async move { Ok(value) }
        }),
    )
}

fn failing_task(name: &str, message: &'static str) -> Task {
    Task::new(
        name,
        FnExecution::new(name, move |_ctx| async move {
            Err::<Value, _>(anyhow::anyhow!(message))
        }),
    )
}

fn counting_task(name: &str, counter: Arc<AtomicUsize>) -> Task {
    Task::new(
        name,
        FnExecution::new(name, move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }),
    )
}

fn selector(name: &str, choice: &str) -> TaskBranch {
    let choice = choice.to_string();
    TaskBranch::new(
        name,
        FnExecution::new(name, move |_ctx| {
            let choice = choice.clone();
            async move { Ok(json!(choice)) }
        }),
    )
}

fn runner(pipeline: Pipeline) -> (JobRunner, Arc<MemoryRepository>) {
    let repo = Arc::new(MemoryRepository::new());
    (JobRunner::new(context(), pipeline, repo.clone()), repo)
}

#[tokio::test]
async fn test_sequential_success() {
    let (runner, repo) = runner(Pipeline::new([
        value_task("a", json!(1)),
        value_task("b", json!(2)),
        value_task("c", json!(3)),
    ]));
    let job_id = runner.id();
    let ctx = runner.context().clone();
    assert_eq!(ctx.status(), JobStatus::Waiting);

    let outcome = runner.run().await;

    assert!(outcome.is_success());
    assert_eq!(
        outcome.task_values,
        vec![
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!(2)),
            ("c".to_string(), json!(3)),
        ]
    );
    assert_eq!(outcome.current_task_index, 2);
    assert!(outcome.exception.is_none());
    assert!(outcome.end_datetime.is_some());
    assert_eq!(ctx.status(), JobStatus::Success);

    let tasks = repo.get_job_tasks_by_job_id(job_id).await.unwrap();
    assert_eq!(tasks.len(), 3);
    assert!(tasks.iter().all(|t| t.status == JobStatus::Success));
}

#[tokio::test]
async fn test_failure_stops_pipeline() {
    let counter = Arc::new(AtomicUsize::new(0));
    let (runner, repo) = runner(Pipeline::new([
        value_task("a", json!("ok")),
        failing_task("b", "boom"),
        counting_task("c", counter.clone()),
    ]));
    let job_id = runner.id();
    let ctx = runner.context().clone();

    let outcome = runner.run().await;

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.current_task_index, 1);
    assert_eq!(outcome.exception_task_name.as_deref(), Some("b"));
    let failure = outcome.exception.unwrap();
    assert_eq!(failure.message, "boom");
    assert!(!failure.is_panic());
    assert_eq!(outcome.task_values, vec![("a".to_string(), json!("ok"))]);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.current_task().as_deref(), Some("b"));

    let tasks = repo.get_job_tasks_by_job_id(job_id).await.unwrap();
    let b = tasks.iter().find(|t| t.task_name == "b").unwrap();
    assert_eq!(b.status, JobStatus::Failed);
    assert_eq!(b.exception.as_deref(), Some("boom"));
    assert!(b.stack_trace.is_none());
    assert!(tasks.iter().all(|t| t.task_name != "c"));
}

#[tokio::test]
async fn test_panic_is_recovered_with_stack_trace() {
    let panicking = Task::new(
        "explode",
        FnExecution::new("explode", |_ctx| async {
            if true {
                panic!("kaboom");
            }
            Ok(Value::Null)
        }),
    );
    let (runner, repo) = runner(Pipeline::new([panicking]));
    let job_id = runner.id();

    let outcome = runner.run().await;

    assert_eq!(outcome.status, JobStatus::Failed);
    let failure = outcome.exception.unwrap();
    assert!(failure.is_panic());
    assert!(failure.message.starts_with("task panicked at "));
    assert!(failure.message.ends_with(": kaboom"));
    assert!(failure.message.contains(file!()), "{}", failure.message);

    let tasks = repo.get_job_tasks_by_job_id(job_id).await.unwrap();
    assert!(tasks[0].stack_trace.is_some());
}

#[tokio::test]
async fn test_panic_trace_is_taken_at_the_panic_site() {
    let (runner, _repo) = runner(Pipeline::new([Task::new(
        "explode",
        FnExecution::new("explode", |_ctx| async {
            explode_deep_in_task();
            Ok(Value::Null)
        }),
    )]));

    let failure = runner.run().await.exception.unwrap();

    let trace = failure.stack_trace.unwrap();
    assert!(trace.contains("explode_deep_in_task"), "{trace}");
}

#[inline(never)]
fn explode_deep_in_task() {
    if Utc::now().timestamp() > 0 {
        panic!("deep");
    }
}

#[tokio::test]
async fn test_panic_capture_is_scoped_to_task_polls() {
    let caught = std::panic::catch_unwind(|| panic!("outside any task"));
    assert!(caught.is_err());

    let failure = unwind::into_failure(Box::new("late"));
    assert_eq!(failure.message, "task panicked: late");
    assert!(failure.is_panic());
}

#[tokio::test]
async fn test_branch_descent_is_terminal() {
    let x = Arc::new(AtomicUsize::new(0));
    let after = Arc::new(AtomicUsize::new(0));
    let branch = selector("route", "branch2")
        .branch("branch1", Pipeline::new([counting_task("x", x.clone())]))
        .branch(
            "branch2",
            Pipeline::new([value_task("y", json!("y")), value_task("z", json!("z"))]),
        );
    let (runner, _repo) = runner(Pipeline::new([
        Node::from(branch),
        Node::from(counting_task("after", after.clone())),
    ]));

    let outcome = runner.run().await;

    assert!(outcome.is_success());
    let names: Vec<_> = outcome.task_values.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["route", "y", "z"]);
    assert_eq!(outcome.task_values[0].1, json!("branch2"));
    assert_eq!(outcome.current_task_index, 1);
    assert_eq!(x.load(Ordering::SeqCst), 0);
    assert_eq!(after.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_nested_branch_failure() {
    let inner = selector("inner", "deep").branch(
        "deep",
        Pipeline::new([value_task("d1", json!(1)), failing_task("d2", "deep failure")]),
    );
    let outer = selector("outer", "go").branch("go", Pipeline::new([inner]));
    let (runner, _repo) = runner(Pipeline::new([outer]));

    let outcome = runner.run().await;

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.exception_task_name.as_deref(), Some("d2"));
    assert_eq!(outcome.current_task_index, 1);
    assert_eq!(outcome.task_results.len(), 4);
}

#[tokio::test]
async fn test_unknown_branch_fails() {
    let branch = selector("route", "branch9")
        .branch("branch1", Pipeline::new([value_task("x", json!(1))]));
    let (runner, _repo) = runner(Pipeline::new([branch]));

    let outcome = runner.run().await;

    assert_eq!(outcome.status, JobStatus::Failed);
    let message = outcome.exception.unwrap().message;
    assert!(message.contains("branch9"));
    assert!(message.contains("not found"));
}

#[tokio::test]
async fn test_empty_branch_completes_run() {
    let branch = selector("route", "skip").branch("skip", Pipeline::new(Vec::<Node>::new()));
    let (runner, _repo) = runner(Pipeline::new([branch]));

    let outcome = runner.run().await;
    assert!(outcome.is_success());
    assert_eq!(outcome.task_values.len(), 1);
}

#[tokio::test]
async fn test_tasks_share_parameters_and_values() {
    let producer = Task::new(
        "produce",
        FnExecution::new("produce", |ctx: RunContext| async move {
            ctx.set_parameter("batch", json!(42));
            Ok(json!({"rows": 10}))
        }),
    );
    let consumer = Task::new(
        "consume",
        FnExecution::new("consume", |ctx: RunContext| async move {
            let rows = ctx.task_value("produce").unwrap_or_default()["rows"].clone();
            let batch = ctx.parameter("batch").unwrap_or_default();
            let region = ctx.argument("region").cloned().unwrap_or_default();
            assert_eq!(ctx.current_task().as_deref(), Some("consume"));
            assert_eq!(ctx.status(), JobStatus::Running);
            Ok(json!([rows, batch, region]))
        }),
    );
    let (runner, _repo) = runner(Pipeline::new([producer, consumer]));

    let outcome = runner.run().await;
    assert!(outcome.is_success());
    assert_eq!(outcome.task_values[1].1, json!([10, 42, "eu"]));
}

#[tokio::test(start_paused = true)]
async fn test_job_timeout_fails_before_next_task() {
    let counter = Arc::new(AtomicUsize::new(0));
    let slow = Task::new(
        "slow",
        FnExecution::new("slow", |ctx: RunContext| async move {
            ctx.cancellation().cancelled().await;
            Ok(json!("stopped"))
        }),
    );
    let repo = Arc::new(MemoryRepository::new());
    let runner = JobRunner::new(
        context(),
        Pipeline::new([slow, counting_task("next", counter.clone())]),
        repo,
    )
    .with_timeout(Some(Duration::from_secs(5)));
    let ctx = runner.context().clone();

    let outcome = runner.run().await;

    assert!(ctx.is_cancelled());
    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.exception_task_name.as_deref(), Some("next"));
    assert!(outcome
        .exception
        .unwrap()
        .message
        .starts_with("job timeout of 5s exceeded"));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_persistence_failure_does_not_fail_run() {
    let mut mock = MockRepository::new();
    mock.expect_upsert_job_task()
        .times(4)
        .returning(|_| Err(crate::Error::InvalidConfig("database offline".to_string())));

    let runner = JobRunner::new(
        context(),
        Pipeline::new([value_task("a", json!(1)), value_task("b", json!(2))]),
        Arc::new(mock),
    );

    let outcome = runner.run().await;
    assert!(outcome.is_success());
    assert_eq!(outcome.task_values.len(), 2);
}
