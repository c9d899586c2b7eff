//! Value and collision backup along recorded trajectories.
//!
//! A trajectory is the ordered list of `(parent, child_idx)` edges one
//! descent walked from the root to a leaf. Backup replays it in reverse,
//! updating edge statistics and undoing the virtual loss the descent
//! applied. Every descent outcome ends in exactly one of these routines, so
//! the net virtual-loss change per iteration is zero.

use std::sync::Arc;

use arbor_core::{GameState, SearchSettings};

use crate::node::{ChildIdx, Edges, Node, NodeType};

/// Edges walked by one descent, root first.
pub type Trajectory<S> = Vec<(Arc<Node<S>>, ChildIdx)>;

/// Back up `value` (from the leaf's side to move) along `trajectory`.
///
/// Each edge gains one visit and the value expressed in its parent's point
/// of view; in two-player mode the sign flips at every ply. With
/// `solve_for_terminal` set, proven outcomes additionally propagate through
/// node types so the driver can stop once the root is decided.
pub fn backup_value<S: GameState>(
    value: f32,
    settings: &SearchSettings,
    trajectory: &[(Arc<Node<S>>, ChildIdx)],
    solve_for_terminal: bool,
) {
    let Some((last_parent, last_idx)) = trajectory.last() else {
        return;
    };

    // The leaf itself holds no trajectory entry; count its visit here.
    let leaf = last_parent
        .lock()
        .child(*last_idx)
        .cloned()
        .expect("backed-up edge has no child");
    leaf.increment_visits();

    let mut v = value;
    for (parent, idx) in trajectory.iter().rev() {
        if settings.flips_value() {
            v = -v;
        }
        let mut edges = parent.lock();
        edges.backup_update(*idx, v);
        parent.increment_visits();
        if solve_for_terminal {
            try_solve_parent(parent, &mut edges, *idx, settings);
        }
    }
}

/// Undo the virtual loss of a descent that ended in a collision. No visit
/// or value changes.
pub fn backup_collision<S: GameState>(
    _settings: &SearchSettings,
    trajectory: &[(Arc<Node<S>>, ChildIdx)],
) {
    for (parent, idx) in trajectory.iter().rev() {
        parent.lock().revert_virtual_loss(*idx);
    }
}

/// Fused backup value for a transposition stop: the single value which moves
/// the edge mean onto the shared node's estimate.
///
/// `transpos_q` is the edge mean in the parent's point of view over
/// `transpos_visits` backups; `next_value` is the shared node's value from
/// its own side to move. The result is expressed from the leaf's side to
/// move so it feeds the ordinary backup path.
pub fn transposition_backup_value(
    transpos_visits: u32,
    transpos_q: f32,
    next_value: f32,
    settings: &SearchSettings,
) -> f32 {
    let flip = settings.flips_value();
    let target = if flip { -next_value } else { next_value };
    let tv = transpos_visits as f32;
    let fused_parent_pov = (tv + 1.0) * target - tv * transpos_q;
    if flip {
        -fused_parent_pov
    } else {
        fused_parent_pov
    }
}

/// Solver propagation at one backup step: derive the parent's node type
/// from the child that was just updated.
fn try_solve_parent<S: GameState>(
    parent: &Node<S>,
    edges: &mut Edges<S>,
    idx: ChildIdx,
    settings: &SearchSettings,
) {
    if parent.node_type().is_solved() {
        return;
    }
    let child_type = match edges.child(idx) {
        Some(child) => child.node_type(),
        None => return,
    };
    if !child_type.is_solved() {
        return;
    }
    let tablebase = settings.tablebase_support && child_type.is_tablebase_kind();

    // In two-player mode a child loss is a parent win; in single-player the
    // outcome carries straight up.
    let winning_child = if settings.flips_value() {
        matches!(child_type, NodeType::SolvedLoss | NodeType::TablebaseLoss)
    } else {
        matches!(child_type, NodeType::SolvedWin | NodeType::TablebaseWin)
    };
    if winning_child {
        solve(parent, NodeType::from_value(1.0, tablebase));
        return;
    }

    // Losses and draws only become certain once every child is solved.
    if !edges.is_fully_expanded() {
        return;
    }
    let mut best: f32 = -1.0;
    for i in 0..edges.len() {
        let Some(child) = edges.child(i) else { return };
        let Some(child_value) = child.node_type().exact_value() else {
            return;
        };
        let from_parent = if settings.flips_value() {
            -child_value
        } else {
            child_value
        };
        best = best.max(from_parent);
    }
    solve(parent, NodeType::from_value(best, tablebase));
}

fn solve<S: GameState>(parent: &Node<S>, node_type: NodeType) {
    parent.set_node_type(node_type);
    if let Some(exact) = node_type.exact_value() {
        parent.set_value(exact);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::fifteen::Fifteen;
    use arbor_core::{Action, SearchPlayerMode};

    fn expanded(pos: &Fifteen, settings: &SearchSettings) -> Arc<Node<Fifteen>> {
        let node = Arc::new(Node::from_state(pos, settings));
        node.lock()
            .set_probabilities(&vec![0.0; Fifteen::POLICY_LEN], false, true);
        node.enable_has_nn_results();
        node
    }

    fn attach(
        parent: &Arc<Node<Fifteen>>,
        parent_pos: &Fifteen,
        digit: u16,
        settings: &SearchSettings,
    ) -> (Arc<Node<Fifteen>>, ChildIdx, Fifteen) {
        let mut edges = parent.lock();
        let idx = (0..edges.len())
            .find(|&i| edges.action(i) == Action(digit - 1))
            .unwrap();
        let mut pos = *parent_pos;
        pos.do_action(Action(digit - 1));
        let child = Arc::new(Node::from_state(&pos, settings));
        edges.set_child(idx, child.clone());
        (child, idx, pos)
    }

    #[test]
    fn backup_flips_signs_and_clears_virtual_loss() {
        let settings = SearchSettings::default();
        let root_pos = Fifteen::new();
        let root = expanded(&root_pos, &settings);
        let (child, root_idx, child_pos) = attach(&root, &root_pos, 5, &settings);
        child
            .lock()
            .set_probabilities(&vec![0.0; Fifteen::POLICY_LEN], false, true);
        let (grandchild, child_idx, _) = attach(&child, &child_pos, 1, &settings);

        let trajectory: Trajectory<Fifteen> =
            vec![(root.clone(), root_idx), (child.clone(), child_idx)];
        for (parent, idx) in &trajectory {
            parent.lock().apply_virtual_loss(*idx);
        }

        // Leaf value +1 for the leaf's side to move (First again at depth 2).
        backup_value(1.0, &settings, &trajectory, false);

        let child_edges = child.lock();
        assert_eq!(child_edges.real_visits(child_idx), 1);
        // One flip: the deepest edge sees the leaf value from its parent.
        assert_eq!(child_edges.q_value(child_idx), -1.0);
        assert_eq!(child_edges.virtual_loss_sum(), 0);
        drop(child_edges);

        let root_edges = root.lock();
        assert_eq!(root_edges.real_visits(root_idx), 1);
        // Two flips back to the root's point of view.
        assert_eq!(root_edges.q_value(root_idx), 1.0);
        assert_eq!(root_edges.virtual_loss_sum(), 0);
        drop(root_edges);

        assert_eq!(grandchild.visits(), 1);
        assert_eq!(child.visits(), 1);
        assert_eq!(root.visits(), 1);
    }

    #[test]
    fn single_player_backup_does_not_flip() {
        let settings = SearchSettings {
            search_player_mode: SearchPlayerMode::SinglePlayer,
            ..SearchSettings::default()
        };
        let root_pos = Fifteen::new();
        let root = expanded(&root_pos, &settings);
        let (_, idx, _) = attach(&root, &root_pos, 1, &settings);
        let trajectory: Trajectory<Fifteen> = vec![(root.clone(), idx)];
        root.lock().apply_virtual_loss(idx);

        backup_value(0.25, &settings, &trajectory, false);
        assert_eq!(root.lock().q_value(idx), 0.25);
    }

    #[test]
    fn collision_backup_touches_only_virtual_loss() {
        let settings = SearchSettings::default();
        let root_pos = Fifteen::new();
        let root = expanded(&root_pos, &settings);
        let (_, idx, _) = attach(&root, &root_pos, 1, &settings);
        let trajectory: Trajectory<Fifteen> = vec![(root.clone(), idx)];
        root.lock().apply_virtual_loss(idx);

        backup_collision(&settings, &trajectory);
        let edges = root.lock();
        assert_eq!(edges.virtual_loss_sum(), 0);
        assert_eq!(edges.real_visits(idx), 0);
        assert_eq!(edges.q_value(idx), 0.0);
        assert_eq!(root.visits(), 0);
    }

    #[test]
    fn fused_transposition_value_moves_edge_mean_onto_target() {
        let settings = SearchSettings::default();
        // Edge mean 0.2 over 3 backups; shared node says 0.5 for its side.
        let fused = transposition_backup_value(3, 0.2, 0.5, &settings);
        // Applying the fused value must land the edge mean on -0.5
        // (the shared node's value seen from the parent).
        let new_mean = (3.0 * 0.2 + -fused) / 4.0;
        assert!((new_mean - (-0.5)).abs() < 1e-6);
    }

    #[test]
    fn solver_marks_parent_won_after_terminal_loss_backup() {
        let settings = SearchSettings {
            mcts_solver: true,
            ..SearchSettings::default()
        };
        // First holds 2, 4; Second holds 1, 3; 9 completes 15 for First.
        let mut pos = Fifteen::new();
        for digit in [2u16, 1, 4, 3] {
            pos.do_action(Action(digit - 1));
        }
        let parent = expanded(&pos, &settings);
        let (terminal, idx, _) = attach(&parent, &pos, 9, &settings);
        assert_eq!(terminal.node_type(), NodeType::SolvedLoss);

        let trajectory: Trajectory<Fifteen> = vec![(parent.clone(), idx)];
        parent.lock().apply_virtual_loss(idx);
        backup_value(terminal.value(), &settings, &trajectory, true);

        assert_eq!(parent.node_type(), NodeType::SolvedWin);
        assert_eq!(parent.value(), 1.0);
    }
}
