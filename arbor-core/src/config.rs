//! Search configuration: immutable per-search settings and per-`go` limits.
//!
//! Settings are plain data, loadable from YAML, and validated once at worker
//! construction. The hot path never re-checks them.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid settings: {msg}")]
    Invalid { msg: &'static str },
}

/// One-player or two-player (zero-sum, value-flipping) search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPlayerMode {
    SinglePlayer,
    TwoPlayer,
}

/// How a fresh leaf gets its value estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafEvaluation {
    /// Batched neural-network prediction.
    Network,
    /// Uniform random playout to the end of the game.
    Rollout,
}

/// How positions are classified into phases for network routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhaseDefinition {
    /// Split the game by move count into equal segments.
    MoveCount,
}

/// Immutable settings shared by all workers of one search.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Mini-batch capacity per worker.
    pub batch_size: usize,
    /// Virtual-loss weight applied to in-flight edges.
    pub virtual_loss: f32,
    /// PUCT exploration coefficient.
    pub c_puct: f32,
    /// Run the epsilon-greedy exploration prelude once every N descents on
    /// average. 0 disables it.
    pub epsilon_greedy_counter: u32,
    /// Run the check-preferring exploration prelude once every N descents on
    /// average. 0 disables it.
    pub epsilon_checks_counter: u32,
    /// Temperature applied to fresh priors (`p^(1/T)`, renormalized).
    pub node_policy_temperature: f32,
    /// Floor for check-move priors, as a fraction of the largest prior.
    pub check_enhance_factor: f32,
    pub use_transposition_table: bool,
    /// Propagate proven win/loss/draw outcomes through node types.
    pub mcts_solver: bool,
    pub search_player_mode: SearchPlayerMode,
    pub leaf_evaluation: LeafEvaluation,
    /// Keep a state snapshot on every node instead of replaying actions
    /// from the root during expansion. Costs memory per node.
    pub store_states: bool,
    /// Tablebase-aware node kinds and value mixing.
    pub tablebase_support: bool,
    pub game_phase_definition: GamePhaseDefinition,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            batch_size: 16,
            virtual_loss: 1.0,
            c_puct: 2.5,
            epsilon_greedy_counter: 0,
            epsilon_checks_counter: 0,
            node_policy_temperature: 1.0,
            check_enhance_factor: 0.5,
            use_transposition_table: true,
            mcts_solver: false,
            search_player_mode: SearchPlayerMode::TwoPlayer,
            leaf_evaluation: LeafEvaluation::Network,
            store_states: false,
            tablebase_support: false,
            game_phase_definition: GamePhaseDefinition::MoveCount,
        }
    }
}

impl SearchSettings {
    /// Load settings from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, SettingsError> {
        let settings: SearchSettings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.batch_size == 0 {
            return Err(SettingsError::Invalid {
                msg: "batch_size must be > 0",
            });
        }
        if !(self.c_puct.is_finite() && self.c_puct > 0.0) {
            return Err(SettingsError::Invalid {
                msg: "c_puct must be finite and > 0",
            });
        }
        if !(self.virtual_loss.is_finite() && self.virtual_loss >= 0.0) {
            return Err(SettingsError::Invalid {
                msg: "virtual_loss must be finite and >= 0",
            });
        }
        if !(self.node_policy_temperature.is_finite() && self.node_policy_temperature > 0.0) {
            return Err(SettingsError::Invalid {
                msg: "node_policy_temperature must be finite and > 0",
            });
        }
        if !(0.0..=1.0).contains(&self.check_enhance_factor) {
            return Err(SettingsError::Invalid {
                msg: "check_enhance_factor must be in [0, 1]",
            });
        }
        Ok(())
    }

    /// Terminal descents tolerated per mini-batch before evaluation is
    /// forced. Single-player searches flush after the first terminal.
    pub fn terminal_node_cache(&self) -> usize {
        match self.search_player_mode {
            SearchPlayerMode::SinglePlayer => 1,
            SearchPlayerMode::TwoPlayer => self.batch_size * 2,
        }
    }

    /// Whether backed-up values flip sign between plies.
    #[inline]
    pub fn flips_value(&self) -> bool {
        self.search_player_mode == SearchPlayerMode::TwoPlayer
    }
}

/// Per-`go` stop conditions. A value of 0 means unbounded.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchLimits {
    /// Cap on allocated tree nodes.
    pub nodes: u64,
    /// Cap on root simulations (visits added during this search).
    pub simulations: u64,
    /// Secondary hard cap on allocated tree nodes.
    pub nodes_limit: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SearchSettings::default().validate().unwrap();
    }

    #[test]
    fn parse_yaml_applies_defaults() {
        let settings = SearchSettings::from_yaml(
            r#"
batch_size: 8
virtual_loss: 3.0
search_player_mode: single_player
"#,
        )
        .unwrap();
        assert_eq!(settings.batch_size, 8);
        assert_eq!(settings.virtual_loss, 3.0);
        assert_eq!(settings.search_player_mode, SearchPlayerMode::SinglePlayer);
        // Untouched fields fall back to defaults.
        assert!(settings.use_transposition_table);
        assert_eq!(settings.node_policy_temperature, 1.0);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let result = SearchSettings::from_yaml("batch_size: 0");
        assert!(matches!(result, Err(SettingsError::Invalid { .. })));
    }

    #[test]
    fn terminal_node_cache_depends_on_player_mode() {
        let mut settings = SearchSettings {
            batch_size: 8,
            ..SearchSettings::default()
        };
        assert_eq!(settings.terminal_node_cache(), 16);
        settings.search_player_mode = SearchPlayerMode::SinglePlayer;
        assert_eq!(settings.terminal_node_cache(), 1);
    }

    #[test]
    fn invalid_yaml_fails() {
        assert!(SearchSettings::from_yaml("batch_size: {{{").is_err());
    }
}
