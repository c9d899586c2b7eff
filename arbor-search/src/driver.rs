//! The driver loop and the scoped parallel runner.

use arbor_core::GameState;
use tracing::debug;

use crate::worker::SearchWorker;

/// Run one worker until it is stopped from outside, a search limit trips,
/// or the root is proven. The current iteration always completes, backups
/// included, before the loop exits.
pub fn run_search_thread<S: GameState>(worker: &mut SearchWorker<S>) {
    worker.set_is_running(true);
    worker.reset_stats();
    while worker.is_running() && worker.nodes_limits_ok() && worker.is_root_node_unsolved() {
        worker.thread_iteration();
    }
    worker.set_is_running(false);
    debug!(
        max_depth = worker.max_depth(),
        avg_depth = worker.avg_depth(),
        tb_hits = worker.tb_hits(),
        "search thread finished"
    );
}

/// Drive several workers over their shared tree, one OS thread each, and
/// join them all. Callers keep each worker's stop signal to cancel early.
pub fn run_parallel<S: GameState>(workers: &mut [SearchWorker<S>]) {
    std::thread::scope(|scope| {
        for worker in workers.iter_mut() {
            scope.spawn(move || run_search_thread(worker));
        }
    });
}
