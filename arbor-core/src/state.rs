//! The `GameState` adaptor contract.
//!
//! The search layers are generic over an opaque game position. Everything
//! rule-specific (move generation, legality, encoding, phase classification)
//! lives behind this trait; the worker only invokes the operations below.

use rand::RngCore;

use crate::action::{Action, SideToMove};
use crate::config::GamePhaseDefinition;
use crate::phase::GamePhase;

/// Exact outcome of a tablebase probe, from the point of view of the side to
/// move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TablebaseOutcome {
    Win,
    Draw,
    Loss,
}

impl TablebaseOutcome {
    /// Scalar value in [-1, 1] from the side to move's point of view.
    #[inline]
    pub fn value(self) -> f32 {
        match self {
            TablebaseOutcome::Win => 1.0,
            TablebaseOutcome::Draw => 0.0,
            TablebaseOutcome::Loss => -1.0,
        }
    }
}

/// A clonable game position.
///
/// Values returned by [`terminal_value`](GameState::terminal_value) and
/// [`random_rollout`](GameState::random_rollout) are always from the point
/// of view of the side to move at that position.
pub trait GameState: Clone + Send + Sync + 'static {
    /// Number of floats one encoded position occupies.
    const PLANE_VALUES: usize;
    /// Length of the raw policy vector produced by an evaluator.
    const POLICY_LEN: usize;

    /// Legal actions at this position, in the game's canonical order.
    fn legal_actions(&self) -> Vec<Action>;

    /// Apply `action` in place. `action` must be legal.
    fn do_action(&mut self, action: Action);

    fn side_to_move(&self) -> SideToMove;

    /// Stable position hash used by the transposition index. Two positions
    /// with equal hashes are treated as the same position.
    fn hash_key(&self) -> u64;

    /// `Some(value)` when the game is over at this position, `None`
    /// otherwise. The value is from the side to move's point of view, so a
    /// position where the side to move has been mated yields `Some(-1.0)`.
    fn terminal_value(&self) -> Option<f32>;

    /// True if playing `action` attacks the opponent with an immediate
    /// threat (the check analog of the game).
    fn gives_check(&self, action: Action) -> bool;

    /// Whether the policy head output must be mirrored for `side`.
    fn mirror_policy(&self, side: SideToMove) -> bool;

    /// Encode the position into `out` (length `PLANE_VALUES`). `mirror`
    /// selects the canonical (side-to-move-relative) orientation; the
    /// search always encodes canonically, and policy-output mirroring is
    /// governed by [`mirror_policy`](GameState::mirror_policy) alone.
    /// `version` selects the evaluator's input revision.
    fn encode_state_planes(&self, mirror: bool, out: &mut [f32], version: u32);

    /// Index of `action` in the raw policy vector. `policy_map` selects the
    /// direct action-index layout; otherwise the game's dense layout is
    /// used (identical for games without a spatial policy head).
    fn policy_index(action: Action, mirror: bool, policy_map: bool) -> usize;

    /// Classify the position into one of `num_phases` phases.
    fn game_phase(&self, num_phases: usize, def: GamePhaseDefinition) -> GamePhase;

    /// Play uniformly random actions to the end of the game and return the
    /// outcome from this position's side to move's point of view.
    fn random_rollout(&self, rng: &mut dyn RngCore) -> f32;

    /// Probe an endgame tablebase. The default adaptor has none.
    fn probe_tablebase(&self) -> Option<TablebaseOutcome> {
        None
    }
}
