//! arbor-search: parallel batched-MCTS workers.
//!
//! Each worker repeatedly collects leaves from the shared tree under
//! virtual loss, evaluates them as one mini-batch, and backs the results up
//! along the recorded trajectories. The driver loops a worker until it is
//! stopped, a search limit trips, or the root is proven.

pub mod driver;
pub mod fixed_vector;
pub mod worker;

pub use driver::{run_parallel, run_search_thread};
pub use fixed_vector::FixedVector;
pub use worker::{
    expand_root, DescentKind, NodeDescription, SearchStats, SearchWorker, WorkerError,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_nonempty() {
        assert!(!VERSION.is_empty());
    }
}
