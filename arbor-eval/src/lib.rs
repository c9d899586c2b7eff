//! arbor-eval: the neural-network evaluator boundary.
//!
//! Workers talk to inference through the [`Evaluator`] capability trait and
//! nothing else; real backends (ONNX, TensorRT, a remote batch server) live
//! behind it, and the baseline evaluators here keep the search testable
//! without any of them.

pub mod evaluator;
pub mod stubs;

pub use evaluator::{Evaluator, InputShape};
pub use stubs::{CountingEvaluator, ScriptedEvaluator, UniformEvaluator};

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
