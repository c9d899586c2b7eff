//! Action and side-to-move primitives shared by every crate in the workspace.

/// A game action, encoded as a dense index into the game's action space.
///
/// The meaning of the index is owned entirely by the `GameState`
/// implementation; the search layers only move these around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Action(pub u16);

impl Action {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Side to move at a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SideToMove {
    First,
    Second,
}

impl SideToMove {
    #[inline]
    pub fn flip(self) -> SideToMove {
        match self {
            SideToMove::First => SideToMove::Second,
            SideToMove::Second => SideToMove::First,
        }
    }

    /// 0 for `First`, 1 for `Second`.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            SideToMove::First => 0,
            SideToMove::Second => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_is_involutive() {
        assert_eq!(SideToMove::First.flip(), SideToMove::Second);
        assert_eq!(SideToMove::Second.flip().flip(), SideToMove::Second);
    }
}
