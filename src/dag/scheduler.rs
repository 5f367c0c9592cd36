use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::graph::DependencyGraph;
use crate::dag::run_state::{NodeStatus, RunState};
use crate::dag::scheduler_step::{PendingRetry, ScheduledTask, SchedulerStep};
use crate::engine::{TaskId, TaskOutcome};
use crate::exec::{PodHandle, PodSpec};

/// Scheduler holds the immutable DAG plus the state of the current run.
///
/// It is the single writer of [`RunState`] and is responsible for:
/// - dispatching ready nodes (deterministic order, bounded by the
///   concurrency limit)
/// - resolving secrets into pod specs
/// - applying retry policies to failed attempts
/// - skipping descendants of permanently failed nodes
/// - cancelling a run
///
/// It performs no IO; the async shell in [`crate::engine::Runtime`] turns
/// its steps into adapter calls.
#[derive(Debug)]
pub struct Scheduler {
    graph: Arc<DependencyGraph>,
    concurrency_limit: usize,
    /// Monotonically increasing run ID.
    run_counter: u64,
    /// Current (or most recently finished) run.
    run: Option<RunState>,
    finished: bool,
}

impl Scheduler {
    /// `concurrency_limit` is clamped to at least 1.
    pub fn new(graph: Arc<DependencyGraph>, concurrency_limit: usize) -> Self {
        Self {
            graph,
            concurrency_limit: concurrency_limit.max(1),
            run_counter: 0,
            run: None,
            finished: false,
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Returns `true` if there is currently no active run.
    pub fn is_idle(&self) -> bool {
        self.run.is_none() || self.finished
    }

    /// Current run ID, if a run is active.
    pub fn current_run_id(&self) -> Option<u64> {
        if self.is_idle() {
            return None;
        }
        self.run.as_ref().map(RunState::run_id)
    }

    /// State of the current run, or of the last finished one.
    pub fn run_state(&self) -> Option<&RunState> {
        self.run.as_ref()
    }

    /// Hand the last run's state to the caller, leaving the scheduler empty.
    pub fn take_run(&mut self) -> Option<RunState> {
        self.finished = false;
        self.run.take()
    }

    /// Start a new run: every node pending, roots dispatched immediately.
    ///
    /// Ignored (with a warning) while another run is still active.
    pub fn start_new_run(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        if !self.is_idle() {
            warn!(
                run_id = self.current_run_id(),
                "start_new_run called while a run is active; ignoring"
            );
            return step;
        }

        self.run_counter += 1;
        self.run = Some(RunState::new(self.run_counter, &self.graph));
        self.finished = false;

        info!(
            run_id = self.run_counter,
            dag_id = %self.graph.dag_id(),
            nodes = self.graph.len(),
            "scheduler: starting new DAG run"
        );

        self.dispatch_ready(&mut step);
        step.run_just_finished = self.maybe_finish_run();
        step
    }

    /// The adapter accepted attempt `attempt` of `task` and returned `handle`.
    pub fn step_launched(
        &mut self,
        task: &str,
        run_id: u64,
        attempt: u32,
        handle: PodHandle,
    ) -> SchedulerStep {
        if !self.is_live_attempt(task, run_id, attempt) {
            debug!(
                task,
                run_id,
                attempt,
                handle = %handle,
                "launch report for an attempt that is no longer live; ignoring"
            );
            return SchedulerStep::default();
        }

        if let Some(run) = self.run.as_mut() {
            debug!(task, run_id, attempt, handle = %handle, "recorded pod handle");
            run.set_handle(task, Some(handle));
        }

        SchedulerStep::default()
    }

    /// An attempt reached a terminal outcome.
    pub fn step_completion(
        &mut self,
        task: &str,
        run_id: u64,
        attempt: u32,
        outcome: TaskOutcome,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        if !self.is_live_attempt(task, run_id, attempt) {
            debug!(
                task,
                run_id,
                attempt,
                ?outcome,
                "completion for an attempt that is no longer live; ignoring"
            );
            return step;
        }

        match outcome {
            TaskOutcome::Success => {
                if let Some(run) = self.run.as_mut() {
                    if let Err(e) = run.transition(task, NodeStatus::Succeeded) {
                        warn!(task, error = %e, "could not mark node succeeded");
                        return step;
                    }
                    run.clear_failure(task);
                    info!(task, run_id, attempt, "node succeeded");
                }
            }
            TaskOutcome::Failed(reason) => {
                self.fail_attempt(task, reason, &mut step);
            }
        }

        self.dispatch_ready(&mut step);
        step.run_just_finished = self.maybe_finish_run();
        step
    }

    /// The backoff of a failed attempt elapsed; launch the next attempt.
    pub fn step_retry_due(&mut self, task: &str, run_id: u64, attempt: u32) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let cancelled = self.run.as_ref().is_none_or(RunState::is_cancelled);
        if cancelled || !self.is_live_attempt(task, run_id, attempt) {
            debug!(task, run_id, attempt, "retry no longer applicable; ignoring");
            return step;
        }

        self.launch_attempt(task, &mut step);
        step.run_just_finished = self.maybe_finish_run();
        step
    }

    /// Cancel the active run.
    ///
    /// Pending nodes become `Skipped`; running nodes become `Failed` and are
    /// listed in `to_stop` so the executor tears their pods down.
    pub fn step_cancel(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        if self.is_idle() {
            debug!("cancel requested with no active run; ignoring");
            return step;
        }

        let Some(run) = self.run.as_mut() else {
            return step;
        };

        run.mark_cancelled();
        info!(run_id = run.run_id(), "cancelling DAG run");

        let ids: Vec<TaskId> = run.records().map(|(id, _)| id.to_string()).collect();
        for id in ids {
            match run.status_of(&id) {
                Some(NodeStatus::Pending) => {
                    if run.transition(&id, NodeStatus::Skipped).is_ok() {
                        run.set_failure(&id, "run cancelled");
                        step.newly_skipped.push(id);
                    }
                }
                Some(NodeStatus::Running) => {
                    if run.transition(&id, NodeStatus::Failed).is_ok() {
                        run.set_failure(&id, "run cancelled");
                        step.newly_failed.push(id.clone());
                        step.to_stop.push(id);
                    }
                }
                _ => {}
            }
        }

        step.run_just_finished = self.maybe_finish_run();
        step
    }

    fn is_live_attempt(&self, task: &str, run_id: u64, attempt: u32) -> bool {
        if self.is_idle() {
            return false;
        }
        let Some(run) = self.run.as_ref() else {
            return false;
        };
        run.run_id() == run_id
            && run.record(task).is_some_and(|r| {
                r.status == NodeStatus::Running && r.attempts == attempt
            })
    }

    /// Dispatch ready nodes until the concurrency limit is reached or
    /// nothing is ready.
    fn dispatch_ready(&mut self, step: &mut SchedulerStep) {
        let graph = Arc::clone(&self.graph);

        loop {
            let Some(run) = self.run.as_ref() else {
                return;
            };
            if run.is_cancelled() {
                return;
            }

            let slots = self.concurrency_limit.saturating_sub(run.running_count());
            if slots == 0 {
                return;
            }

            let ready: Vec<TaskId> = graph
                .ready_nodes(run)
                .into_iter()
                .take(slots)
                .map(|node| node.id.clone())
                .collect();
            if ready.is_empty() {
                return;
            }

            for id in ready {
                if let Some(run) = self.run.as_mut() {
                    if let Err(e) = run.transition(&id, NodeStatus::Running) {
                        warn!(task = %id, error = %e, "could not mark node running");
                        continue;
                    }
                }
                self.launch_attempt(&id, step);
            }
        }
    }

    /// Start a new attempt for a `Running` node: resolve its pod spec and
    /// schedule it, or feed the resolution failure into the retry policy.
    fn launch_attempt(&mut self, task: &str, step: &mut SchedulerStep) {
        let graph = Arc::clone(&self.graph);
        let Some(node) = graph.node(task) else {
            warn!(task, "node in run state not present in graph");
            return;
        };
        let Some(run) = self.run.as_mut() else {
            return;
        };

        let attempt = run.begin_attempt(task);
        let run_id = run.run_id();

        match PodSpec::from_node(node, graph.dag_id(), run_id, attempt) {
            Ok(spec) => {
                if attempt > 1 {
                    info!(task, run_id, attempt, "re-submitting node after failure");
                } else {
                    info!(task, run_id, "dependencies satisfied; dispatching node");
                }
                step.newly_scheduled.push(ScheduledTask {
                    task: task.to_string(),
                    run_id,
                    attempt,
                    spec,
                });
            }
            Err(e) => {
                warn!(task, run_id, attempt, error = %e, "could not build pod spec");
                self.fail_attempt(task, e.to_string(), step);
            }
        }
    }

    /// Record a failed attempt: schedule a retry if the policy allows it,
    /// otherwise fail the node and skip everything downstream of it.
    fn fail_attempt(&mut self, task: &str, reason: String, step: &mut SchedulerStep) {
        let graph = Arc::clone(&self.graph);
        let Some(node) = graph.node(task) else {
            return;
        };
        let Some(run) = self.run.as_mut() else {
            return;
        };

        run.set_failure(task, reason.clone());
        let attempts = run.record(task).map_or(0, |r| r.attempts);
        let run_id = run.run_id();

        if node.retry.allows_retry(attempts) {
            let delay = node.retry.backoff_for(attempts.saturating_sub(1));
            warn!(
                task,
                run_id,
                attempt = attempts,
                max_retries = node.retry.max_retries,
                backoff_ms = delay.as_millis() as u64,
                reason = %reason,
                "attempt failed; retrying after backoff"
            );
            run.set_handle(task, None);
            step.retries.push(PendingRetry {
                task: task.to_string(),
                run_id,
                attempt: attempts,
                delay,
            });
            return;
        }

        if let Err(e) = run.transition(task, NodeStatus::Failed) {
            warn!(task, error = %e, "could not mark node failed");
            return;
        }
        warn!(
            task,
            run_id,
            attempts,
            reason = %reason,
            "node failed permanently; skipping its descendants"
        );
        step.newly_failed.push(task.to_string());

        for desc in graph.descendants_of(task) {
            if run.status_of(desc) == Some(NodeStatus::Pending)
                && run.transition(desc, NodeStatus::Skipped).is_ok()
            {
                run.set_failure(desc, format!("upstream node '{task}' failed"));
                debug!(task = desc, upstream = task, "marked Skipped");
                step.newly_skipped.push(desc.to_string());
            }
        }
    }

    /// Returns `true` if this call transitioned the scheduler from running
    /// to idle.
    fn maybe_finish_run(&mut self) -> bool {
        if self.finished {
            return false;
        }
        let Some(run) = self.run.as_ref() else {
            return false;
        };

        if run.is_finished() {
            info!(
                run_id = run.run_id(),
                status = ?run.overall_status(),
                "scheduler: all nodes terminal; run finished"
            );
            self.finished = true;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dag::{RetryPolicy, RunStatus, TaskNode};
    use crate::secrets::SecretRef;

    fn composer_graph(pi_retries: u32) -> Arc<DependencyGraph> {
        let mut g = DependencyGraph::new("composer_sample_kubernetes_pod");
        g.add_node(
            TaskNode::builder("pi", "perl")
                .cmds(["perl"])
                .arguments(["-Mbignum=bpi", "-wle", "print bpi(2000)"])
                .retry(RetryPolicy::retries(pi_retries).with_backoff(
                    Duration::from_secs(1),
                    Duration::from_secs(4),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
        g.add_node(TaskNode::builder("passing-task", "python:3.6").build().unwrap())
            .unwrap();
        g.add_node(TaskNode::builder("failing-task", "ubuntu:latest").build().unwrap())
            .unwrap();
        g.add_edges("pi", &["passing-task", "failing-task"]).unwrap();
        Arc::new(g)
    }

    #[test]
    fn new_run_dispatches_only_roots() {
        let mut s = Scheduler::new(composer_graph(0), 4);
        let step = s.start_new_run();

        assert_eq!(step.scheduled_ids(), vec!["pi"]);
        assert_eq!(step.newly_scheduled[0].attempt, 1);
        assert_eq!(s.current_run_id(), Some(1));
    }

    #[test]
    fn success_releases_both_successors_in_lexical_order() {
        let mut s = Scheduler::new(composer_graph(0), 4);
        s.start_new_run();

        let step = s.step_completion("pi", 1, 1, TaskOutcome::Success);
        assert_eq!(step.scheduled_ids(), vec!["failing-task", "passing-task"]);
        assert!(!step.run_just_finished);
    }

    #[test]
    fn permanent_failure_skips_descendants() {
        let mut s = Scheduler::new(composer_graph(0), 4);
        s.start_new_run();

        let step = s.step_completion("pi", 1, 1, TaskOutcome::Failed("exit code 1".into()));
        assert_eq!(step.newly_failed, vec!["pi"]);
        assert_eq!(step.newly_skipped, vec!["failing-task", "passing-task"]);
        assert!(step.newly_scheduled.is_empty());
        assert!(step.run_just_finished);

        let run = s.run_state().unwrap();
        assert_eq!(run.overall_status(), RunStatus::Failed);
        assert_eq!(run.record("passing-task").unwrap().attempts, 0);
        assert!(s.is_idle());
    }

    #[test]
    fn failed_attempt_is_retried_with_backoff() {
        let mut s = Scheduler::new(composer_graph(2), 4);
        s.start_new_run();

        let step = s.step_completion("pi", 1, 1, TaskOutcome::Failed("boom".into()));
        assert!(step.newly_failed.is_empty());
        assert_eq!(
            step.retries,
            vec![PendingRetry {
                task: "pi".into(),
                run_id: 1,
                attempt: 1,
                delay: Duration::from_secs(1),
            }]
        );
        assert_eq!(s.run_state().unwrap().status_of("pi"), Some(NodeStatus::Running));

        let step = s.step_retry_due("pi", 1, 1);
        assert_eq!(step.scheduled_ids(), vec!["pi"]);
        assert_eq!(step.newly_scheduled[0].attempt, 2);

        let step = s.step_completion("pi", 1, 2, TaskOutcome::Failed("boom".into()));
        assert_eq!(step.retries[0].delay, Duration::from_secs(2));
        s.step_retry_due("pi", 1, 2);

        let step = s.step_completion("pi", 1, 3, TaskOutcome::Failed("boom".into()));
        assert!(step.retries.is_empty());
        assert_eq!(step.newly_failed, vec!["pi"]);
        assert_eq!(s.run_state().unwrap().record("pi").unwrap().attempts, 3);
    }

    #[test]
    fn stale_completions_are_ignored() {
        let mut s = Scheduler::new(composer_graph(1), 4);
        s.start_new_run();

        let step = s.step_completion("pi", 99, 1, TaskOutcome::Success);
        assert!(step.newly_scheduled.is_empty());
        let step = s.step_completion("pi", 1, 5, TaskOutcome::Success);
        assert!(step.newly_scheduled.is_empty());
        assert_eq!(s.run_state().unwrap().status_of("pi"), Some(NodeStatus::Running));
    }

    #[test]
    fn concurrency_limit_bounds_dispatch() {
        let mut g = DependencyGraph::new("fan-out");
        for id in ["a", "b", "c"] {
            g.add_node(TaskNode::builder(id, "busybox").build().unwrap()).unwrap();
        }
        let mut s = Scheduler::new(Arc::new(g), 2);

        let step = s.start_new_run();
        assert_eq!(step.scheduled_ids(), vec!["a", "b"]);

        let step = s.step_completion("b", 1, 1, TaskOutcome::Success);
        assert_eq!(step.scheduled_ids(), vec!["c"]);
    }

    #[test]
    fn unresolvable_secret_fails_the_node() {
        let mut g = DependencyGraph::new("d");
        g.add_node(
            TaskNode::builder("needs-secret", "busybox")
                .secret(SecretRef::env("SQL_CONN", "airflow-secrets", ""))
                .build()
                .unwrap(),
        )
        .unwrap();
        let mut s = Scheduler::new(Arc::new(g), 1);

        let step = s.start_new_run();
        assert!(step.newly_scheduled.is_empty());
        assert_eq!(step.newly_failed, vec!["needs-secret"]);
        assert!(step.run_just_finished);

        let record = s.run_state().unwrap().record("needs-secret").unwrap().clone();
        assert!(record.failure.unwrap().contains("Unresolved secret"));
    }

    #[test]
    fn cancel_skips_pending_and_stops_running() {
        let mut s = Scheduler::new(composer_graph(0), 4);
        s.start_new_run();
        s.step_launched("pi", 1, 1, PodHandle::new("pi-1"));

        let step = s.step_cancel();
        assert_eq!(step.newly_skipped, vec!["failing-task", "passing-task"]);
        assert_eq!(step.to_stop, vec!["pi"]);
        assert!(step.run_just_finished);

        let run = s.run_state().unwrap();
        assert_eq!(run.overall_status(), RunStatus::Cancelled);
        assert_eq!(run.record("pi").unwrap().handle, Some(PodHandle::new("pi-1")));

        let again = s.step_cancel();
        assert!(again.to_stop.is_empty());
    }

    #[test]
    fn empty_graph_finishes_immediately() {
        let mut s = Scheduler::new(Arc::new(DependencyGraph::new("empty")), 1);
        let step = s.start_new_run();
        assert!(step.run_just_finished);
        assert_eq!(s.run_state().unwrap().overall_status(), RunStatus::Succeeded);
    }
}
