// tests/integration_cancel_behaviour.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use poddag::dag::{NodeStatus, RunStatus, ScheduledTask, Scheduler, TaskNode};
use poddag::engine::{CoreRuntime, RunHandle, Runtime, RuntimeOptions};
use poddag::exec::{PodHandle, PodSpec, WorkerOptions, run_attempt};
use tokio::sync::{mpsc, oneshot};
use poddag_test_utils::{FakeAdapter, GraphBuilder, Script, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn options() -> RuntimeOptions {
    RuntimeOptions {
        concurrency_limit: 4,
        poll_interval: Duration::from_millis(5),
        adapter_timeout: Duration::from_secs(1),
    }
}

/// `a` fans out to `b` and `c`.
fn fan_out_runtime(adapter: Arc<FakeAdapter>) -> Runtime<FakeAdapter> {
    let graph = GraphBuilder::new("cancel")
        .task("a")
        .task("b")
        .task("c")
        .edge("a", "b")
        .edge("a", "c")
        .build();
    Runtime::new(Arc::new(graph), adapter, options())
}

async fn wait_for(handle: &RunHandle, what: &str, pred: impl Fn(&poddag::dag::RunState) -> bool) {
    for _ in 0..400 {
        if handle.snapshot().as_ref().is_some_and(&pred) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn cancel_skips_pending_and_tears_down_running_pod_once() -> TestResult {
    init_tracing();

    let adapter = Arc::new(FakeAdapter::new().with_script("a", Script::Hold));
    let mut runtime = fan_out_runtime(adapter.clone());
    let handle = runtime.handle();
    let join = tokio::spawn(async move { runtime.run().await });

    wait_for(&handle, "pod handle of a", |run| {
        run.record("a").is_some_and(|r| r.handle.is_some())
    })
    .await;

    handle.cancel();
    let run = with_timeout(join).await?;

    assert_eq!(run.overall_status(), RunStatus::Cancelled);
    assert_eq!(run.status_of("a"), Some(NodeStatus::Failed));
    assert_eq!(
        run.record("a").and_then(|r| r.failure.clone()),
        Some("run cancelled".to_string())
    );
    assert_eq!(run.status_of("b"), Some(NodeStatus::Skipped));
    assert_eq!(run.status_of("c"), Some(NodeStatus::Skipped));

    assert_eq!(adapter.terminated(), vec![PodHandle::new("a-1")]);
    assert_eq!(adapter.submitted(), vec!["a"]);
    Ok(())
}

#[tokio::test]
async fn cancel_during_submission_tears_down_the_late_pod() -> TestResult {
    init_tracing();

    let adapter = Arc::new(
        FakeAdapter::new()
            .with_script("a", Script::Hold)
            .with_submit_delay("a", Duration::from_millis(100)),
    );
    let mut runtime = fan_out_runtime(adapter.clone());
    let handle = runtime.handle();
    let join = tokio::spawn(async move { runtime.run().await });

    wait_for(&handle, "a running", |run| {
        run.status_of("a") == Some(NodeStatus::Running)
    })
    .await;
    assert!(adapter.submitted().is_empty());

    handle.cancel();
    let run = with_timeout(join).await?;

    assert_eq!(run.overall_status(), RunStatus::Cancelled);
    assert_eq!(run.record("a").and_then(|r| r.handle.clone()), None);
    assert_eq!(adapter.terminated(), vec![PodHandle::new("a-1")]);
    Ok(())
}

#[tokio::test]
async fn cancel_before_the_run_starts_is_ignored() -> TestResult {
    init_tracing();

    let adapter = Arc::new(FakeAdapter::new());
    let mut runtime = fan_out_runtime(adapter.clone());
    let handle = runtime.handle();

    handle.cancel();
    let run = with_timeout(runtime.run()).await;

    assert_eq!(run.overall_status(), RunStatus::Succeeded);
    assert!(adapter.terminated().is_empty());
    Ok(())
}

#[tokio::test]
async fn cancel_after_finish_changes_nothing() -> TestResult {
    init_tracing();

    let adapter = Arc::new(FakeAdapter::new());
    let mut runtime = fan_out_runtime(adapter.clone());
    let handle = runtime.handle();

    let run = with_timeout(runtime.run()).await;
    handle.cancel();

    assert_eq!(run.overall_status(), RunStatus::Succeeded);
    assert_eq!(
        handle.snapshot().map(|s| s.overall_status()),
        Some(RunStatus::Succeeded)
    );
    Ok(())
}

#[tokio::test]
async fn many_cancels_outside_a_run_never_block() -> TestResult {
    init_tracing();

    let adapter = Arc::new(FakeAdapter::new());
    let mut runtime = fan_out_runtime(adapter.clone());
    let handle = runtime.handle();

    for _ in 0..32 {
        handle.cancel();
    }
    let run = with_timeout(runtime.run()).await;

    assert_eq!(run.overall_status(), RunStatus::Succeeded);
    assert_eq!(adapter.submitted().len(), 3);
    Ok(())
}

#[tokio::test]
async fn worker_cancelled_before_submission_never_reaches_the_adapter() -> TestResult {
    init_tracing();

    let node = TaskNode::builder("a", "busybox").build()?;
    let task = ScheduledTask {
        task: "a".to_string(),
        run_id: 1,
        attempt: 1,
        spec: PodSpec::from_node(&node, "cancel", 1, 1)?,
    };
    let adapter = Arc::new(FakeAdapter::new());
    let (event_tx, mut event_rx) = mpsc::channel(8);
    let (cancel_tx, cancel_rx) = oneshot::channel();
    cancel_tx.send(()).map_err(|_| "worker cancel channel closed")?;

    with_timeout(run_attempt(
        adapter.clone(),
        task,
        WorkerOptions::default(),
        event_tx,
        cancel_rx,
    ))
    .await;

    assert!(adapter.submitted().is_empty());
    assert!(adapter.terminated().is_empty());
    assert!(event_rx.recv().await.is_none());
    Ok(())
}

#[tokio::test]
async fn worker_permits_follow_the_core_concurrency_limit() -> TestResult {
    init_tracing();

    let graph = GraphBuilder::new("permits").task("a").task("b").build();
    let core = CoreRuntime::new(Scheduler::new(Arc::new(graph), 2));
    let adapter = Arc::new(
        FakeAdapter::new()
            .with_script("a", Script::Hold)
            .with_script("b", Script::Hold),
    );
    let options = RuntimeOptions {
        concurrency_limit: 1,
        ..options()
    };
    let mut runtime = Runtime::with_core(core, adapter.clone(), options);
    let handle = runtime.handle();
    let join = tokio::spawn(async move { runtime.run().await });

    with_timeout(adapter.wait_until_submitted("b")).await;
    assert_eq!(adapter.submitted(), vec!["a", "b"]);

    handle.cancel();
    let run = with_timeout(join).await?;

    assert_eq!(run.overall_status(), RunStatus::Cancelled);
    assert_eq!(adapter.submitted(), vec!["a", "b"]);
    let mut terminated = adapter.terminated();
    terminated.sort();
    assert_eq!(terminated, vec![PodHandle::new("a-1"), PodHandle::new("b-1")]);
    Ok(())
}
