//! Built-in reference game: pick-fifteen.
//!
//! Two players alternately claim digits 1..=9; whoever first holds three
//! digits summing to exactly 15 wins, and a full board is a draw (the game
//! is isomorphic to tic-tac-toe via the 3x3 magic square). Distinct pick
//! orders reach identical positions, which makes the game a convenient
//! transposition workbench, and a pick that sets up an immediate winning
//! threat doubles as the "gives check" analog.

use rand::RngCore;

use crate::action::{Action, SideToMove};
use crate::config::GamePhaseDefinition;
use crate::phase::GamePhase;
use crate::state::GameState;

/// Number of claimable digits.
pub const NUM_DIGITS: usize = 9;

const ALL_DIGITS: u16 = (1 << NUM_DIGITS) - 1;

/// All triples of distinct digits summing to 15, as bitmasks (bit d-1 set
/// for digit d). These are the eight lines of the 3x3 magic square.
const WIN_TRIPLES: [u16; 8] = [
    mask3(1, 5, 9),
    mask3(1, 6, 8),
    mask3(2, 4, 9),
    mask3(2, 5, 8),
    mask3(2, 6, 7),
    mask3(3, 4, 8),
    mask3(3, 5, 7),
    mask3(4, 5, 6),
];

const fn mask3(a: u16, b: u16, c: u16) -> u16 {
    (1 << (a - 1)) | (1 << (b - 1)) | (1 << (c - 1))
}

fn holds_win(claimed: u16) -> bool {
    WIN_TRIPLES.iter().any(|&t| claimed & t == t)
}

/// A pick-fifteen position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fifteen {
    /// Claimed digits per player, bit d-1 for digit d.
    claimed: [u16; 2],
    to_move: SideToMove,
}

impl Fifteen {
    pub fn new() -> Self {
        Self {
            claimed: [0, 0],
            to_move: SideToMove::First,
        }
    }

    /// Build a position from explicit claim masks. Test helper.
    pub fn from_masks(first: u16, second: u16, to_move: SideToMove) -> Self {
        debug_assert_eq!(first & second, 0);
        Self {
            claimed: [first, second],
            to_move,
        }
    }

    fn occupied(&self) -> u16 {
        self.claimed[0] | self.claimed[1]
    }

    fn ply(&self) -> u32 {
        self.occupied().count_ones()
    }

    /// True if claiming `digit_bit` leaves the mover one free digit away
    /// from completing a triple.
    fn creates_threat(&self, digit_bit: u16) -> bool {
        let mine = self.claimed[self.to_move.index()] | digit_bit;
        let free = ALL_DIGITS & !(self.occupied() | digit_bit);
        WIN_TRIPLES.iter().any(|&t| {
            let held = mine & t;
            held.count_ones() == 2 && (t & !held & free) != 0
        })
    }
}

impl Default for Fifteen {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState for Fifteen {
    const PLANE_VALUES: usize = 3 * NUM_DIGITS;
    const POLICY_LEN: usize = NUM_DIGITS;

    fn legal_actions(&self) -> Vec<Action> {
        let occupied = self.occupied();
        (0..NUM_DIGITS as u16)
            .filter(|d| occupied & (1 << d) == 0)
            .map(Action)
            .collect()
    }

    fn do_action(&mut self, action: Action) {
        let bit = 1u16 << action.0;
        debug_assert_eq!(self.occupied() & bit, 0, "digit already claimed");
        debug_assert!(self.terminal_value().is_none(), "game is over");
        self.claimed[self.to_move.index()] |= bit;
        self.to_move = self.to_move.flip();
    }

    fn side_to_move(&self) -> SideToMove {
        self.to_move
    }

    fn hash_key(&self) -> u64 {
        (self.claimed[0] as u64)
            | ((self.claimed[1] as u64) << 9)
            | ((self.to_move.index() as u64) << 18)
    }

    fn terminal_value(&self) -> Option<f32> {
        // Only the player who just moved can have completed a triple.
        if holds_win(self.claimed[self.to_move.flip().index()]) {
            return Some(-1.0);
        }
        if self.occupied() == ALL_DIGITS {
            return Some(0.0);
        }
        None
    }

    fn gives_check(&self, action: Action) -> bool {
        let bit = 1u16 << action.0;
        // A winning pick ends the game, it does not threaten.
        if holds_win(self.claimed[self.to_move.index()] | bit) {
            return false;
        }
        self.creates_threat(bit)
    }

    fn mirror_policy(&self, _side: SideToMove) -> bool {
        false
    }

    fn encode_state_planes(&self, _mirror: bool, out: &mut [f32], _version: u32) {
        assert_eq!(out.len(), Self::PLANE_VALUES);
        let mine = self.claimed[self.to_move.index()];
        let theirs = self.claimed[self.to_move.flip().index()];
        for d in 0..NUM_DIGITS {
            out[d] = ((mine >> d) & 1) as f32;
            out[NUM_DIGITS + d] = ((theirs >> d) & 1) as f32;
            out[2 * NUM_DIGITS + d] = self.to_move.index() as f32;
        }
    }

    fn policy_index(action: Action, _mirror: bool, _policy_map: bool) -> usize {
        action.index()
    }

    fn game_phase(&self, num_phases: usize, def: GamePhaseDefinition) -> GamePhase {
        debug_assert!(num_phases > 0);
        match def {
            GamePhaseDefinition::MoveCount => {
                let idx = (self.ply() as usize * num_phases / NUM_DIGITS).min(num_phases - 1);
                GamePhase(idx as u8)
            }
        }
    }

    fn random_rollout(&self, rng: &mut dyn RngCore) -> f32 {
        let mut pos = *self;
        loop {
            if let Some(value) = pos.terminal_value() {
                return if pos.to_move == self.to_move {
                    value
                } else {
                    -value
                };
            }
            let actions = pos.legal_actions();
            let pick = (rng.next_u32() as usize) % actions.len();
            pos.do_action(actions[pick]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn play(picks: &[u16]) -> Fifteen {
        let mut pos = Fifteen::new();
        for &digit in picks {
            pos.do_action(Action(digit - 1));
        }
        pos
    }

    #[test]
    fn win_is_detected_for_the_mover() {
        // First claims 2, 4, 9 (sum 15); Second claims 1, 3.
        let pos = play(&[2, 1, 4, 3, 9]);
        // Second is to move and has lost.
        assert_eq!(pos.side_to_move(), SideToMove::Second);
        assert_eq!(pos.terminal_value(), Some(-1.0));
    }

    #[test]
    fn full_board_without_win_is_a_draw() {
        // First: {2, 3, 6, 8, 9}, Second: {1, 4, 5, 7}; no triple sums to 15.
        let pos = play(&[2, 7, 6, 5, 9, 1, 3, 4, 8]);
        assert_eq!(pos.occupied(), ALL_DIGITS);
        assert!(!holds_win(pos.claimed[0]));
        assert!(!holds_win(pos.claimed[1]));
        assert_eq!(pos.terminal_value(), Some(0.0));
    }

    #[test]
    fn transposed_pick_orders_share_a_hash() {
        let a = play(&[1, 2, 3]);
        let b = play(&[3, 2, 1]);
        assert_eq!(a.hash_key(), b.hash_key());
        assert_ne!(a.hash_key(), play(&[1, 2, 4]).hash_key());
    }

    #[test]
    fn check_is_a_threat_but_not_a_win() {
        // First holds 2; picking 4 threatens 9 (2+4+9 = 15).
        let pos = play(&[2, 1]);
        assert!(pos.gives_check(Action(4 - 1)));
        // Picking 3 threatens nothing yet.
        assert!(!pos.gives_check(Action(3 - 1)));
        // First holds 2 and 4 with 9 free: picking 9 wins, so it is not check.
        let pos = play(&[2, 1, 4, 3]);
        assert!(!pos.gives_check(Action(9 - 1)));
    }

    #[test]
    fn phases_follow_move_count() {
        let opening = Fifteen::new();
        assert_eq!(
            opening.game_phase(3, GamePhaseDefinition::MoveCount),
            GamePhase(0)
        );
        let middlegame = play(&[1, 2, 3, 4]);
        assert_eq!(
            middlegame.game_phase(3, GamePhaseDefinition::MoveCount),
            GamePhase(1)
        );
        let endgame = play(&[1, 2, 3, 4, 6, 8, 7]);
        assert_eq!(
            endgame.game_phase(3, GamePhaseDefinition::MoveCount),
            GamePhase(2)
        );
    }

    #[test]
    fn rollout_returns_a_valid_outcome() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let pos = Fifteen::new();
        for _ in 0..50 {
            let z = pos.random_rollout(&mut rng);
            assert!(z == -1.0 || z == 0.0 || z == 1.0);
        }
    }

    #[test]
    fn encode_marks_mover_digits() {
        let pos = play(&[5, 1]);
        let mut planes = [0.0f32; Fifteen::PLANE_VALUES];
        pos.encode_state_planes(false, &mut planes, 0);
        // First (to move again) holds digit 5.
        assert_eq!(planes[4], 1.0);
        // Opponent plane holds digit 1.
        assert_eq!(planes[NUM_DIGITS], 1.0);
    }
}
