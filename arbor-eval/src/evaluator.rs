//! The batch inference contract.

use arbor_core::GamePhase;

/// Input geometry of one encoded position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub planes: usize,
    pub height: usize,
    pub width: usize,
}

impl InputShape {
    /// Floats per position.
    #[inline]
    pub fn values_per_position(&self) -> usize {
        self.planes * self.height * self.width
    }
}

/// A neural network handle serving batched predictions.
///
/// `predict` is infallible by contract: the buffers are caller-owned,
/// pre-sized at worker construction, and a backend that cannot answer is a
/// configuration bug, not a runtime condition. Implementations must be
/// callable from several worker threads at once.
pub trait Evaluator: Send + Sync {
    fn input_shape(&self) -> InputShape;

    /// Length of the raw policy vector per position.
    fn policy_len(&self) -> usize;

    /// Whether policy outputs are indexed directly by action id rather than
    /// by the game's dense spatial layout.
    fn is_policy_map(&self) -> bool;

    /// Input encoding revision understood by this network.
    fn version(&self) -> u32 {
        0
    }

    /// Floats of auxiliary output per position (0 for plain value/policy
    /// heads).
    fn auxiliary_len(&self) -> usize {
        0
    }

    /// Game phase this network is specialized for. Phase-routed setups give
    /// each network a distinct phase; single-network setups ignore it.
    fn phase(&self) -> GamePhase {
        GamePhase(0)
    }

    /// Evaluate `batch` positions from `input` (length
    /// `batch * values_per_position`), writing one value per position into
    /// `values` and `batch * policy_len` logits into `policy`.
    /// `auxiliary` receives `batch * auxiliary_len` floats.
    fn predict(&self, batch: usize, input: &[f32], values: &mut [f32], policy: &mut [f32], auxiliary: &mut [f32]);
}
