//! Game-phase classification used to route batches to specialized networks.

/// A game phase index in `0..num_phases`.
///
/// Phases are ordered; ties in phase-majority votes are broken by this
/// ordering, so `GamePhase(0)` wins against `GamePhase(1)` at equal counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GamePhase(pub u8);

impl GamePhase {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for GamePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "phase{}", self.0)
    }
}
