//! Multi-worker searches over one shared tree: structural invariants must
//! hold once every worker has joined.

use std::collections::HashSet;
use std::sync::Arc;

use arbor_core::fifteen::Fifteen;
use arbor_core::{GameState, SearchLimits, SearchSettings};
use arbor_eval::{Evaluator, InputShape, UniformEvaluator};
use arbor_tree::{Node, TranspositionIndex};
use arbor_search::{expand_root, run_parallel, run_search_thread, SearchWorker};

fn uniform_net() -> Arc<dyn Evaluator> {
    Arc::new(UniformEvaluator::new(
        InputShape {
            planes: 3,
            height: 3,
            width: 3,
        },
        Fifteen::POLICY_LEN,
    ))
}

fn build_workers(
    threads: usize,
    settings: SearchSettings,
    limits: SearchLimits,
) -> (Vec<SearchWorker<Fifteen>>, Arc<Node<Fifteen>>) {
    let pos = Fifteen::new();
    let index = Arc::new(TranspositionIndex::new());
    let net = uniform_net();
    let root = index.allocate_root(&pos, &settings);
    expand_root(&root, &pos, net.as_ref(), &settings);

    let workers = (0..threads)
        .map(|t| {
            let mut worker =
                SearchWorker::new(vec![net.clone()], settings, index.clone(), 0xA5A5 + t as u64)
                    .unwrap();
            worker.set_root_node(root.clone());
            worker.set_root_state(pos);
            worker.set_search_limits(limits);
            worker
        })
        .collect();
    (workers, root)
}

/// Walk the tree (a DAG under transpositions) and check the structural
/// invariants at every reachable node.
fn check_tree(root: &Arc<Node<Fifteen>>) {
    let mut seen: HashSet<*const Node<Fifteen>> = HashSet::new();
    let mut stack = vec![root.clone()];

    while let Some(node) = stack.pop() {
        if !seen.insert(Arc::as_ptr(&node)) {
            continue;
        }
        let edges = node.lock();

        // All in-flight virtual loss was reverted.
        assert_eq!(edges.virtual_loss_sum(), 0);
        assert!(edges.no_visit_idx() <= edges.len());

        let mut edge_visit_sum: u64 = 0;
        for idx in 0..edges.len() {
            edge_visit_sum += edges.real_visits(idx) as u64;
            if let Some(child) = edges.child(idx) {
                // An attached child was expanded by exactly one worker and
                // is observable by all of them.
                assert!(child.has_nn_results() || child.is_terminal());
                stack.push(child.clone());
            } else {
                assert_eq!(edges.real_visits(idx), 0);
            }
        }
        // Backups touch the parent and one of its edges together.
        assert!(
            edge_visit_sum <= node.visits() as u64,
            "edge visits {} exceed node visits {}",
            edge_visit_sum,
            node.visits()
        );
    }
}

#[test]
fn four_workers_share_one_tree() {
    let settings = SearchSettings {
        batch_size: 8,
        ..SearchSettings::default()
    };
    let limits = SearchLimits {
        nodes: 600,
        simulations: 0,
        nodes_limit: 0,
    };
    let (mut workers, root) = build_workers(4, settings, limits);

    run_parallel(&mut workers);

    assert!(workers.iter().all(|w| !w.is_running()));
    assert!(workers[0].index().node_count() >= 600);
    check_tree(&root);
    // Every worker contributed simulations.
    assert!(root.visits() > 600 / 2);
}

#[test]
fn stop_signal_halts_workers() {
    let settings = SearchSettings {
        batch_size: 4,
        ..SearchSettings::default()
    };
    // Unbounded limits: only the stop signal ends the search.
    let (mut workers, root) = build_workers(2, settings, SearchLimits::default());
    let signals: Vec<_> = workers.iter().map(|w| w.stop_signal()).collect();

    std::thread::scope(|scope| {
        let handle = scope.spawn(|| run_parallel(&mut workers));
        // Wait until both drivers report running, then flip them off.
        while !signals
            .iter()
            .all(|s| s.load(std::sync::atomic::Ordering::Relaxed))
        {
            std::thread::yield_now();
        }
        for signal in &signals {
            signal.store(false, std::sync::atomic::Ordering::Relaxed);
        }
        handle.join().unwrap();
    });

    check_tree(&root);
}

#[test]
fn racing_workers_agree_on_expanded_children() {
    // Tiny batches and many threads maximize same-edge races; afterwards
    // every parent slot must hold one child shared by all observers.
    let settings = SearchSettings {
        batch_size: 2,
        ..SearchSettings::default()
    };
    let limits = SearchLimits {
        nodes: 300,
        simulations: 0,
        nodes_limit: 0,
    };
    let (mut workers, root) = build_workers(8, settings, limits);
    run_parallel(&mut workers);

    assert!(workers.iter().all(|w| !w.is_running()));
    check_tree(&root);
}

#[test]
fn driver_runs_a_single_worker_to_its_limit() {
    let settings = SearchSettings {
        batch_size: 16,
        ..SearchSettings::default()
    };
    let limits = SearchLimits {
        nodes: 0,
        simulations: 400,
        nodes_limit: 0,
    };
    let (mut workers, root) = build_workers(1, settings, limits);
    run_search_thread(&mut workers[0]);
    assert!(root.visits() >= 400);
    check_tree(&root);
}
