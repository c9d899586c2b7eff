//! Tree nodes and per-edge statistics.
//!
//! A `Node` splits its state along the concurrency boundary: everything a
//! descent mutates (children slots, priors, edge visits, virtual loss) lives
//! in `Edges` behind the node mutex; flags that other workers poll while
//! holding only the parent's lock (`has_nn_results`, terminal and
//! transposition markers, node type) are atomics. Priors and the value are
//! published before the `has_nn_results` release store, so an acquire load
//! of the flag makes them visible.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use arbor_core::{Action, GameState, SearchSettings, SideToMove};
use parking_lot::{Mutex, MutexGuard};

/// Index of a child slot within its parent.
pub type ChildIdx = usize;

/// Solver state of a node, from the node's own side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    Unsolved = 0,
    SolvedWin = 1,
    SolvedLoss = 2,
    SolvedDraw = 3,
    TablebaseWin = 4,
    TablebaseLoss = 5,
    TablebaseDraw = 6,
}

impl NodeType {
    fn from_u8(raw: u8) -> NodeType {
        match raw {
            0 => NodeType::Unsolved,
            1 => NodeType::SolvedWin,
            2 => NodeType::SolvedLoss,
            3 => NodeType::SolvedDraw,
            4 => NodeType::TablebaseWin,
            5 => NodeType::TablebaseLoss,
            6 => NodeType::TablebaseDraw,
            _ => unreachable!("invalid node type tag"),
        }
    }

    #[inline]
    pub fn is_solved(self) -> bool {
        self != NodeType::Unsolved
    }

    #[inline]
    pub fn is_tablebase_kind(self) -> bool {
        matches!(
            self,
            NodeType::TablebaseWin | NodeType::TablebaseLoss | NodeType::TablebaseDraw
        )
    }

    /// Exact value of a solved node, `None` for `Unsolved`.
    pub fn exact_value(self) -> Option<f32> {
        match self {
            NodeType::Unsolved => None,
            NodeType::SolvedWin | NodeType::TablebaseWin => Some(1.0),
            NodeType::SolvedLoss | NodeType::TablebaseLoss => Some(-1.0),
            NodeType::SolvedDraw | NodeType::TablebaseDraw => Some(0.0),
        }
    }

    pub(crate) fn from_value(value: f32, tablebase: bool) -> NodeType {
        if value > 0.0 {
            if tablebase {
                NodeType::TablebaseWin
            } else {
                NodeType::SolvedWin
            }
        } else if value < 0.0 {
            if tablebase {
                NodeType::TablebaseLoss
            } else {
                NodeType::SolvedLoss
            }
        } else if tablebase {
            NodeType::TablebaseDraw
        } else {
            NodeType::SolvedDraw
        }
    }
}

/// Mutable per-edge state, guarded by the node mutex.
pub struct Edges<S: GameState> {
    actions: Box<[Action]>,
    /// True for actions that give check. Empty when the settings never
    /// consult check information.
    checks: Box<[bool]>,
    priors: Box<[f32]>,
    children: Box<[Option<Arc<Node<S>>>]>,
    visits: Box<[u32]>,
    /// Summed backed-up values per edge, from the parent's point of view.
    q_sums: Box<[f32]>,
    virtual_loss: Box<[u32]>,
    vloss_sum: u32,
    /// Children below this cursor have been visited at least once.
    no_visit_idx: usize,
}

impl<S: GameState> Edges<S> {
    fn new(actions: Vec<Action>, checks: Vec<bool>) -> Self {
        let k = actions.len();
        Edges {
            actions: actions.into_boxed_slice(),
            checks: checks.into_boxed_slice(),
            priors: vec![0.0; k].into_boxed_slice(),
            children: vec![None; k].into_boxed_slice(),
            visits: vec![0; k].into_boxed_slice(),
            q_sums: vec![0.0; k].into_boxed_slice(),
            virtual_loss: vec![0; k].into_boxed_slice(),
            vloss_sum: 0,
            no_visit_idx: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    #[inline]
    pub fn action(&self, idx: ChildIdx) -> Action {
        self.actions[idx]
    }

    #[inline]
    pub fn child(&self, idx: ChildIdx) -> Option<&Arc<Node<S>>> {
        self.children[idx].as_ref()
    }

    pub(crate) fn set_child(&mut self, idx: ChildIdx, child: Arc<Node<S>>) {
        debug_assert!(self.children[idx].is_none(), "child slot written twice");
        self.children[idx] = Some(child);
    }

    #[inline]
    pub fn prior(&self, idx: ChildIdx) -> f32 {
        self.priors[idx]
    }

    #[inline]
    pub fn real_visits(&self, idx: ChildIdx) -> u32 {
        self.visits[idx]
    }

    #[inline]
    pub fn no_visit_idx(&self) -> usize {
        self.no_visit_idx
    }

    /// Advance the visited-children cursor. Monotonic, clamped to the child
    /// count.
    pub fn increment_no_visit_idx(&mut self) {
        self.no_visit_idx = (self.no_visit_idx + 1).min(self.len());
    }

    pub(crate) fn advance_no_visit_idx_to(&mut self, idx: usize) {
        self.no_visit_idx = self.no_visit_idx.max(idx).min(self.len());
    }

    #[inline]
    pub fn is_fully_expanded(&self) -> bool {
        self.no_visit_idx == self.len()
    }

    /// Mean backed-up value of an edge, from the parent's point of view.
    pub fn q_value(&self, idx: ChildIdx) -> f32 {
        let n = self.visits[idx];
        if n == 0 {
            0.0
        } else {
            self.q_sums[idx] / n as f32
        }
    }

    /// Edge estimate used to decide whether a transposition descent can stop
    /// here. `NaN` when the edge has never been backed up.
    pub fn transposition_q_value(&self, idx: ChildIdx, real_visits: u32) -> f32 {
        if real_visits == 0 {
            f32::NAN
        } else {
            self.q_sums[idx] / real_visits as f32
        }
    }

    pub fn apply_virtual_loss(&mut self, idx: ChildIdx) {
        self.virtual_loss[idx] += 1;
        self.vloss_sum += 1;
    }

    pub fn revert_virtual_loss(&mut self, idx: ChildIdx) {
        debug_assert!(self.virtual_loss[idx] > 0, "virtual loss underflow");
        self.virtual_loss[idx] -= 1;
        self.vloss_sum -= 1;
    }

    /// Total virtual loss currently applied to this node's edges.
    pub fn virtual_loss_sum(&self) -> u32 {
        self.vloss_sum
    }

    /// Record one backed-up value at an edge and undo its virtual loss.
    pub(crate) fn backup_update(&mut self, idx: ChildIdx, value: f32) {
        self.visits[idx] += 1;
        self.q_sums[idx] += value;
        self.revert_virtual_loss(idx);
    }

    /// PUCT selection over the visited children plus the first unvisited
    /// one. Children are prior-sorted when the priors are bound, so the
    /// first unvisited child is always the strongest remaining candidate.
    ///
    /// With the solver active, solved children are skipped while an unsolved
    /// candidate remains; their outcome reaches the parent through backup,
    /// not through re-selection.
    pub fn select_child(
        &self,
        parent_visits: u32,
        settings: &SearchSettings,
    ) -> ChildIdx {
        let end = (self.no_visit_idx + 1).min(self.len());
        debug_assert!(end > 0, "select_child on a node without children");

        let n_sum_eff = parent_visits.saturating_add(self.vloss_sum);
        let sqrt_sum = (n_sum_eff as f32).sqrt();

        let mut best_idx: Option<ChildIdx> = None;
        let mut best_score = f32::NEG_INFINITY;
        let mut best_any_idx = 0;
        let mut best_any_score = f32::NEG_INFINITY;

        for idx in 0..end {
            let n = self.visits[idx];
            let vl = self.virtual_loss[idx];
            let n_eff = n + vl;
            let q = if n_eff == 0 {
                0.0
            } else {
                (self.q_sums[idx] - vl as f32 * settings.virtual_loss) / n_eff as f32
            };
            let u = settings.c_puct * self.priors[idx] * sqrt_sum / (1.0 + n_eff as f32);
            let score = q + u;

            if score > best_any_score {
                best_any_score = score;
                best_any_idx = idx;
            }
            let solved = settings.mcts_solver
                && self.children[idx]
                    .as_ref()
                    .map(|c| c.node_type().is_solved())
                    .unwrap_or(false);
            if !solved && score > best_score {
                best_score = score;
                best_idx = Some(idx);
            }
        }

        best_idx.unwrap_or(best_any_idx)
    }

    /// Bind a raw policy head output as priors: gather the logit of each
    /// legal action, apply a masked softmax, then sort children by prior so
    /// the widening cursor walks strongest-first.
    ///
    /// Must run before any child slot is filled.
    pub fn set_probabilities(&mut self, raw_policy: &[f32], mirror: bool, policy_map: bool) {
        debug_assert!(self.children.iter().all(Option::is_none));

        let mut max = f32::NEG_INFINITY;
        for (i, &action) in self.actions.iter().enumerate() {
            let logit = raw_policy[S::policy_index(action, mirror, policy_map)];
            self.priors[i] = logit;
            if logit.is_finite() {
                max = max.max(logit);
            }
        }
        if !max.is_finite() {
            self.uniform_priors();
            return;
        }

        let mut sum = 0.0f32;
        for p in self.priors.iter_mut() {
            let z = (*p - max).exp();
            *p = if z.is_finite() { z } else { 0.0 };
            sum += *p;
        }
        if !(sum.is_finite() && sum > 0.0) {
            self.uniform_priors();
            return;
        }
        for p in self.priors.iter_mut() {
            *p /= sum;
        }
        self.sort_by_prior();
    }

    /// Raise check-move priors to a floor relative to the strongest prior.
    pub fn enhance_moves(&mut self, settings: &SearchSettings) {
        if self.checks.is_empty() || settings.check_enhance_factor <= 0.0 {
            return;
        }
        let max_prior = self.priors.iter().cloned().fold(0.0f32, f32::max);
        let floor = settings.check_enhance_factor * max_prior;
        let mut changed = false;
        for (i, &is_check) in self.checks.iter().enumerate() {
            if is_check && self.priors[i] < floor {
                self.priors[i] = floor;
                changed = true;
            }
        }
        if changed {
            self.normalize_priors();
            self.sort_by_prior();
        }
    }

    /// Sharpen or flatten the priors with `p^(1/T)` and renormalize.
    pub fn apply_temperature_to_prior_policy(&mut self, temperature: f32) {
        if temperature == 1.0 {
            return;
        }
        debug_assert!(temperature > 0.0);
        let inv_t = 1.0 / temperature;
        for p in self.priors.iter_mut() {
            *p = p.max(0.0).powf(inv_t);
        }
        self.normalize_priors();
        self.sort_by_prior();
    }

    fn uniform_priors(&mut self) {
        let u = 1.0 / self.len().max(1) as f32;
        self.priors.iter_mut().for_each(|p| *p = u);
    }

    fn normalize_priors(&mut self) {
        let sum: f32 = self.priors.iter().sum();
        if sum.is_finite() && sum > 0.0 {
            for p in self.priors.iter_mut() {
                *p /= sum;
            }
        } else {
            self.uniform_priors();
        }
    }

    fn sort_by_prior(&mut self) {
        let k = self.len();
        let mut order: Vec<usize> = (0..k).collect();
        order.sort_by(|&a, &b| self.priors[b].partial_cmp(&self.priors[a]).unwrap());

        let actions = self.actions.clone();
        let priors = self.priors.clone();
        for (dst, &src) in order.iter().enumerate() {
            self.actions[dst] = actions[src];
            self.priors[dst] = priors[src];
        }
        if !self.checks.is_empty() {
            let checks = self.checks.clone();
            for (dst, &src) in order.iter().enumerate() {
                self.checks[dst] = checks[src];
            }
        }
    }

    /// First check-giving action at or past the widening cursor, advancing
    /// the cursor past it. `None` when no unexplored check remains.
    pub fn first_unexplored_check(&mut self) -> Option<ChildIdx> {
        for idx in self.no_visit_idx..self.len() {
            if self.checks.get(idx).copied().unwrap_or(false) {
                self.advance_no_visit_idx_to(idx + 1);
                return Some(idx);
            }
        }
        None
    }
}

/// A node in the shared search tree.
pub struct Node<S: GameState> {
    hash: u64,
    side: SideToMove,
    num_children: usize,
    is_terminal: bool,
    is_tablebase: bool,
    /// Present when `store_states` is configured; spares the root replay
    /// during expansion.
    stored_state: Option<S>,

    visits: AtomicU32,
    value_bits: AtomicU32,
    node_type: AtomicU8,
    has_nn_results: AtomicBool,
    is_transposition: AtomicBool,
    inspected: AtomicBool,

    edges: Mutex<Edges<S>>,
}

impl<S: GameState> Node<S> {
    /// Build a node from a position. Legal actions, terminal status, and the
    /// optional tablebase probe are resolved here, once.
    pub fn from_state(state: &S, settings: &SearchSettings) -> Node<S> {
        let terminal_value = state.terminal_value();
        let is_terminal = terminal_value.is_some();

        let actions = if is_terminal {
            Vec::new()
        } else {
            state.legal_actions()
        };
        let wants_checks =
            settings.epsilon_checks_counter > 0 || settings.check_enhance_factor > 0.0;
        let checks = if wants_checks && !is_terminal {
            actions.iter().map(|&a| state.gives_check(a)).collect()
        } else {
            Vec::new()
        };

        let mut value = terminal_value.unwrap_or(0.0);
        let mut is_tablebase = false;
        let mut node_type = match terminal_value {
            Some(v) => NodeType::from_value(v, false),
            None => NodeType::Unsolved,
        };
        if settings.tablebase_support && !is_terminal {
            if let Some(outcome) = state.probe_tablebase() {
                is_tablebase = true;
                value = outcome.value();
                node_type = NodeType::from_value(outcome.value(), true);
            }
        }

        Node {
            hash: state.hash_key(),
            side: state.side_to_move(),
            num_children: actions.len(),
            is_terminal,
            is_tablebase,
            stored_state: settings.store_states.then(|| state.clone()),
            visits: AtomicU32::new(0),
            value_bits: AtomicU32::new(value.to_bits()),
            node_type: AtomicU8::new(node_type as u8),
            has_nn_results: AtomicBool::new(false),
            is_transposition: AtomicBool::new(false),
            inspected: AtomicBool::new(false),
            edges: Mutex::new(Edges::new(actions, checks)),
        }
    }

    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, Edges<S>> {
        self.edges.lock()
    }

    #[inline]
    pub fn hash_key(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub fn side_to_move(&self) -> SideToMove {
        self.side
    }

    #[inline]
    pub fn number_child_nodes(&self) -> usize {
        self.num_children
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.is_terminal
    }

    #[inline]
    pub fn is_tablebase(&self) -> bool {
        self.is_tablebase
    }

    #[inline]
    pub fn stored_state(&self) -> Option<&S> {
        self.stored_state.as_ref()
    }

    #[inline]
    pub fn visits(&self) -> u32 {
        self.visits.load(Ordering::Relaxed)
    }

    pub fn increment_visits(&self) {
        self.visits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn value(&self) -> f32 {
        f32::from_bits(self.value_bits.load(Ordering::Relaxed))
    }

    pub fn set_value(&self, value: f32) {
        self.value_bits.store(value.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn node_type(&self) -> NodeType {
        NodeType::from_u8(self.node_type.load(Ordering::Relaxed))
    }

    pub(crate) fn set_node_type(&self, node_type: NodeType) {
        self.node_type.store(node_type as u8, Ordering::Relaxed);
    }

    /// Acquire-load: a true result makes the node's priors and value
    /// visible.
    #[inline]
    pub fn has_nn_results(&self) -> bool {
        self.has_nn_results.load(Ordering::Acquire)
    }

    /// Release-store; call only after priors and value are written.
    pub fn enable_has_nn_results(&self) {
        self.has_nn_results.store(true, Ordering::Release);
    }

    /// Whether the node has been expanded (priors bound or exact outcome
    /// known).
    #[inline]
    pub fn is_playout_node(&self) -> bool {
        self.has_nn_results() || self.is_terminal
    }

    #[inline]
    pub fn is_transposition(&self) -> bool {
        self.is_transposition.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_transposition(&self) {
        self.is_transposition.store(true, Ordering::Relaxed);
    }

    /// Whether the fused transposition estimate is usable as a backup value:
    /// the edge must have real backups and the shared node must know more
    /// than this edge contributed.
    pub fn is_transposition_return(&self, transpos_q: f32, transpos_visits: u32) -> bool {
        transpos_q.is_finite() && transpos_visits > 0 && self.visits() as u64 > transpos_visits as u64
    }

    #[inline]
    pub fn was_inspected(&self) -> bool {
        self.inspected.load(Ordering::Relaxed)
    }

    pub fn set_as_inspected(&self) {
        self.inspected.store(true, Ordering::Relaxed);
    }
}
