//! arbor-tree: the shared search tree.
//!
//! Nodes are reference-counted and uniquely owned by their parents; the
//! process-wide transposition index holds weak handles only, so dropping the
//! root frees the whole tree. Per-node edge state sits behind a mutex, while
//! the flags other workers poll without a lock are atomics.

pub mod backup;
pub mod node;
pub mod transposition;

pub use backup::{backup_collision, backup_value, transposition_backup_value, Trajectory};
pub use node::{ChildIdx, Edges, Node, NodeType};
pub use transposition::TranspositionIndex;

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
