use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use poddag::dag::{DependencyGraph, NodeStatus, RunStatus, Scheduler, TaskNode};
use poddag::engine::TaskOutcome;
use poddag::errors::PoddagError;
use proptest::prelude::*;

/// Random acyclic graph: node `i` may only depend on nodes `0..i`.
fn dag_strategy(max_nodes: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_nodes).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), n).prop_map(
            |raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, deps)| {
                        if i == 0 {
                            return Vec::new();
                        }
                        let set: BTreeSet<usize> = deps.into_iter().map(|d| d % i).collect();
                        set.into_iter().collect()
                    })
                    .collect()
            },
        )
    })
}

fn name(i: usize) -> String {
    format!("task_{i:02}")
}

fn build_graph(deps: &[Vec<usize>]) -> DependencyGraph {
    let mut g = DependencyGraph::new("prop");
    for i in 0..deps.len() {
        g.add_node(TaskNode::builder(name(i), "busybox").build().unwrap())
            .unwrap();
    }
    for (i, preds) in deps.iter().enumerate() {
        for &p in preds {
            g.add_edge(&name(p), &name(i)).unwrap();
        }
    }
    g
}

/// Drive a full run synchronously, completing attempts in dispatch order.
/// Returns the dispatch order and the scheduler.
fn simulate(
    graph: Arc<DependencyGraph>,
    limit: usize,
    failing: &BTreeSet<String>,
) -> (Vec<String>, Scheduler) {
    let mut scheduler = Scheduler::new(graph, limit);
    let mut in_flight: VecDeque<(String, u64, u32)> = VecDeque::new();
    let mut order = Vec::new();

    let step = scheduler.start_new_run();
    for t in step.newly_scheduled {
        order.push(t.task.clone());
        in_flight.push_back((t.task, t.run_id, t.attempt));
    }

    let mut steps = 0;
    while let Some((task, run_id, attempt)) = in_flight.pop_front() {
        steps += 1;
        assert!(steps < 1_000, "simulation did not converge");

        let running = scheduler.run_state().unwrap().running_count();
        assert!(running <= limit, "{running} running with limit {limit}");

        let outcome = if failing.contains(&task) {
            TaskOutcome::Failed("scripted".into())
        } else {
            TaskOutcome::Success
        };
        let step = scheduler.step_completion(&task, run_id, attempt, outcome);
        for t in step.newly_scheduled {
            order.push(t.task.clone());
            in_flight.push_back((t.task, t.run_id, t.attempt));
        }
    }

    (order, scheduler)
}

proptest! {
    #[test]
    fn roots_are_exactly_the_initially_dispatched_nodes(deps in dag_strategy(12)) {
        let graph = Arc::new(build_graph(&deps));
        let mut scheduler = Scheduler::new(Arc::clone(&graph), usize::MAX);
        let step = scheduler.start_new_run();

        let dispatched: Vec<&str> = step.scheduled_ids();
        prop_assert_eq!(dispatched, graph.roots());
    }

    #[test]
    fn closing_a_cycle_is_rejected_and_leaves_the_graph_unchanged(
        deps in dag_strategy(10),
        pick in any::<usize>(),
    ) {
        let mut graph = build_graph(&deps);
        let edges_before = graph.edge_count();

        // Any node that has a predecessor can be pointed back at it.
        let with_preds: Vec<usize> = (0..deps.len()).filter(|&i| !deps[i].is_empty()).collect();
        prop_assume!(!with_preds.is_empty());
        let child = with_preds[pick % with_preds.len()];
        let parent = deps[child][0];

        let err = graph.add_edge(&name(child), &name(parent)).unwrap_err();
        let is_cycle = matches!(err, PoddagError::Cycle { .. });
        prop_assert!(is_cycle);
        prop_assert_eq!(graph.edge_count(), edges_before);
        prop_assert!(!graph.successors_of(&name(child)).contains(&name(parent).as_str()));
    }

    #[test]
    fn failures_skip_exactly_the_unreachable_descendants(
        deps in dag_strategy(12),
        failing_idx in proptest::collection::btree_set(0..12usize, 0..4),
        limit in 1..4usize,
    ) {
        let graph = Arc::new(build_graph(&deps));
        let failing: BTreeSet<String> = failing_idx
            .into_iter()
            .filter(|&i| i < deps.len())
            .map(name)
            .collect();

        let (order, scheduler) = simulate(Arc::clone(&graph), limit, &failing);
        let run = scheduler.run_state().unwrap();

        prop_assert!(run.is_finished());

        for i in 0..deps.len() {
            let id = name(i);
            let status = run.status_of(&id).unwrap();
            let preds_ok = graph
                .predecessors_of(&id)
                .iter()
                .all(|p| run.status_of(p) == Some(NodeStatus::Succeeded));

            match status {
                NodeStatus::Succeeded => {
                    prop_assert!(preds_ok);
                    prop_assert!(!failing.contains(&id));
                }
                NodeStatus::Failed => prop_assert!(failing.contains(&id)),
                NodeStatus::Skipped => {
                    prop_assert!(!preds_ok);
                    prop_assert!(!order.contains(&id));
                    prop_assert_eq!(run.record(&id).unwrap().attempts, 0);
                }
                other => prop_assert!(false, "non-terminal status {:?}", other),
            }
        }

        // The topologically first failing node always gets to run.
        let expected = if failing.is_empty() { RunStatus::Succeeded } else { RunStatus::Failed };
        prop_assert_eq!(run.overall_status(), expected);
    }

    #[test]
    fn dispatch_order_is_deterministic(
        deps in dag_strategy(12),
        failing_idx in proptest::collection::btree_set(0..12usize, 0..3),
        limit in 1..4usize,
    ) {
        let graph = Arc::new(build_graph(&deps));
        let failing: BTreeSet<String> = failing_idx.into_iter().map(name).collect();

        let (first, _) = simulate(Arc::clone(&graph), limit, &failing);
        let (second, _) = simulate(graph, limit, &failing);
        prop_assert_eq!(first, second);
    }
}
