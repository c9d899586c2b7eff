//! arbor-core: game adaptor traits, actions, phases, and search configuration.

pub mod action;
pub mod config;
pub mod fifteen;
pub mod phase;
pub mod state;

pub use action::{Action, SideToMove};
pub use config::{
    GamePhaseDefinition, LeafEvaluation, SearchLimits, SearchPlayerMode, SearchSettings,
    SettingsError,
};
pub use phase::GamePhase;
pub use state::{GameState, TablebaseOutcome};

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
