//! The search worker.
//!
//! One `thread_iteration` collects leaves until the mini-batch is bounded
//! by one of four conditions (fresh leaves, collisions, transposition
//! values, cached terminals), evaluates the fresh leaves in one network
//! call routed by majority game phase, then backs everything up. Terminal
//! leaves are backed up immediately during collection; collisions only
//! revert their virtual loss.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arbor_core::{
    Action, GamePhase, GameState, LeafEvaluation, SearchLimits, SearchSettings, SettingsError,
    SideToMove,
};
use arbor_eval::Evaluator;
use arbor_tree::{
    backup_collision, backup_value, transposition_backup_value, ChildIdx, Edges, Node, NodeType,
    Trajectory, TranspositionIndex,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::trace;

use crate::fixed_vector::FixedVector;

/// Classification of one descent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescentKind {
    NewNode,
    Terminal,
    Collision,
    Transposition,
}

/// Filled by [`SearchWorker::get_new_child_to_evaluate`] for each descent.
#[derive(Debug, Clone, Copy)]
pub struct NodeDescription {
    pub kind: DescentKind,
    pub depth: usize,
}

impl Default for NodeDescription {
    fn default() -> Self {
        Self {
            kind: DescentKind::NewNode,
            depth: 0,
        }
    }
}

/// Worker construction errors.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("invalid worker setup: {msg}")]
    Setup { msg: &'static str },
}

/// Per-worker counters, reset at every driver start.
#[derive(Debug, Default, Clone)]
pub struct SearchStats {
    pub depth_sum: u64,
    pub depth_max: usize,
    pub tb_hits: u64,
    pub terminals: u64,
    pub collisions: u64,
    pub transpositions: u64,
    pub visits_pre_search: u32,
}

/// A search worker owning its batch buffers and PRNG, sharing the tree and
/// transposition index with its siblings.
pub struct SearchWorker<S: GameState> {
    nets: Vec<Arc<dyn Evaluator>>,
    settings: SearchSettings,
    index: Arc<TranspositionIndex<S>>,
    rng: ChaCha8Rng,

    root_node: Option<Arc<Node<S>>>,
    root_state: Option<S>,
    search_limits: SearchLimits,
    is_running: Arc<AtomicBool>,

    new_nodes: FixedVector<Arc<Node<S>>>,
    new_node_side_to_move: FixedVector<SideToMove>,
    transposition_values: FixedVector<f32>,
    trajectory_buffer: Trajectory<S>,
    actions_buffer: Vec<Action>,
    new_trajectories: Vec<Trajectory<S>>,
    collision_trajectories: Vec<Trajectory<S>>,
    transposition_trajectories: Vec<Trajectory<S>>,

    input_planes: Vec<f32>,
    value_outputs: Vec<f32>,
    prob_outputs: Vec<f32>,
    auxiliary_outputs: Vec<f32>,
    pub(crate) phase_counts: BTreeMap<GamePhase, usize>,
    phase_to_net: BTreeMap<GamePhase, usize>,

    terminal_node_cache: usize,
    stats: SearchStats,
}

const TRAJECTORY_RESERVE: usize = 128;

impl<S: GameState> SearchWorker<S> {
    /// Build a worker over `nets` (one per routed game phase) and the shared
    /// transposition index. `seed` fixes the worker-local PRNG.
    pub fn new(
        nets: Vec<Arc<dyn Evaluator>>,
        settings: SearchSettings,
        index: Arc<TranspositionIndex<S>>,
        seed: u64,
    ) -> Result<Self, WorkerError> {
        settings.validate()?;
        let front = nets.first().ok_or(WorkerError::Setup {
            msg: "at least one network is required",
        })?;
        let stride = front.input_shape().values_per_position();
        let policy_len = front.policy_len();
        let auxiliary_len = front.auxiliary_len();
        if stride != S::PLANE_VALUES {
            return Err(WorkerError::Setup {
                msg: "network input shape does not match the game encoding",
            });
        }
        if policy_len != S::POLICY_LEN {
            return Err(WorkerError::Setup {
                msg: "network policy length does not match the game action space",
            });
        }
        if nets.iter().any(|n| {
            n.input_shape().values_per_position() != stride
                || n.policy_len() != policy_len
                || n.auxiliary_len() != auxiliary_len
        }) {
            return Err(WorkerError::Setup {
                msg: "all networks must share one input and output geometry",
            });
        }
        let phase_to_net: BTreeMap<GamePhase, usize> = nets
            .iter()
            .enumerate()
            .map(|(i, n)| (n.phase(), i))
            .collect();
        // Routed setups classify positions into phases 0..n, so the
        // networks must cover exactly those.
        if nets.len() > 1
            && (0..nets.len()).any(|i| !phase_to_net.contains_key(&GamePhase(i as u8)))
        {
            return Err(WorkerError::Setup {
                msg: "networks must cover each game phase exactly once",
            });
        }

        let batch = settings.batch_size;
        Ok(Self {
            terminal_node_cache: settings.terminal_node_cache(),
            new_nodes: FixedVector::new(batch),
            new_node_side_to_move: FixedVector::new(batch),
            transposition_values: FixedVector::new(batch * 2),
            trajectory_buffer: Vec::with_capacity(TRAJECTORY_RESERVE),
            actions_buffer: Vec::with_capacity(TRAJECTORY_RESERVE),
            new_trajectories: Vec::new(),
            collision_trajectories: Vec::new(),
            transposition_trajectories: Vec::new(),
            input_planes: vec![0.0; batch * stride],
            value_outputs: vec![0.0; batch],
            prob_outputs: vec![0.0; batch * policy_len],
            auxiliary_outputs: vec![0.0; batch * auxiliary_len],
            phase_counts: BTreeMap::new(),
            phase_to_net,
            rng: ChaCha8Rng::seed_from_u64(seed),
            nets,
            settings,
            index,
            root_node: None,
            root_state: None,
            search_limits: SearchLimits::default(),
            is_running: Arc::new(AtomicBool::new(false)),
            stats: SearchStats::default(),
        })
    }

    pub fn set_root_node(&mut self, root: Arc<Node<S>>) {
        self.stats.visits_pre_search = root.visits();
        self.root_node = Some(root);
    }

    pub fn set_root_state(&mut self, state: S) {
        self.root_state = Some(state);
    }

    pub fn set_search_limits(&mut self, limits: SearchLimits) {
        self.search_limits = limits;
    }

    pub fn root_node(&self) -> Option<&Arc<Node<S>>> {
        self.root_node.as_ref()
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn index(&self) -> &Arc<TranspositionIndex<S>> {
        &self.index
    }

    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    /// Shared flag flipped by [`stop`](Self::stop); cloned by orchestrators
    /// that stop workers from another thread.
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        self.is_running.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    pub fn set_is_running(&self, value: bool) {
        self.is_running.store(value, Ordering::Relaxed);
    }

    /// Request the driver loop to exit after the current iteration.
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::Relaxed);
    }

    pub fn reset_stats(&mut self) {
        self.stats = SearchStats {
            visits_pre_search: self.stats.visits_pre_search,
            ..SearchStats::default()
        };
    }

    pub fn max_depth(&self) -> usize {
        self.stats.depth_max
    }

    pub fn tb_hits(&self) -> u64 {
        self.stats.tb_hits
    }

    /// Mean descent depth over the simulations this worker contributed.
    pub fn avg_depth(&self) -> usize {
        let root_visits = self.root_node.as_ref().map(|r| r.visits()).unwrap_or(0);
        let new_visits = root_visits.saturating_sub(self.stats.visits_pre_search);
        if new_visits == 0 {
            return 0;
        }
        (self.stats.depth_sum as f64 / new_visits as f64 + 0.5) as usize
    }

    /// All three node/simulation caps hold (0 means unbounded).
    pub fn nodes_limits_ok(&self) -> bool {
        let limits = &self.search_limits;
        let node_count = self.index.node_count();
        let root_visits = self.root_node.as_ref().map(|r| r.visits()).unwrap_or(0) as u64;
        (limits.nodes == 0 || node_count < limits.nodes)
            && (limits.simulations == 0 || root_visits < limits.simulations)
            && (limits.nodes_limit == 0 || node_count < limits.nodes_limit)
    }

    /// True while the root's outcome is not proven. With tablebase support
    /// the tablebase kinds still count as searchable.
    pub fn is_root_node_unsolved(&self) -> bool {
        let Some(root) = self.root_node.as_ref() else {
            return false;
        };
        let node_type = root.node_type();
        if self.settings.tablebase_support {
            node_type == NodeType::Unsolved || node_type.is_tablebase_kind()
        } else {
            node_type == NodeType::Unsolved
        }
    }

    /// One full worker cycle: collect a mini-batch, evaluate it, back up
    /// values and collisions.
    pub fn thread_iteration(&mut self) {
        self.create_mini_batch();
        if self.settings.leaf_evaluation == LeafEvaluation::Network && !self.new_nodes.is_empty()
        {
            let net_idx = self.select_nn_index();
            let net = self.nets[net_idx].clone();
            let batch = self.new_nodes.len();
            let stride = net.input_shape().values_per_position();
            let policy_len = net.policy_len();
            let auxiliary_len = net.auxiliary_len();
            net.predict(
                batch,
                &self.input_planes[..batch * stride],
                &mut self.value_outputs[..batch],
                &mut self.prob_outputs[..batch * policy_len],
                &mut self.auxiliary_outputs[..batch * auxiliary_len],
            );
            self.set_nn_results_to_child_nodes();
        }
        trace!(
            new = self.new_nodes.len(),
            collisions = self.collision_trajectories.len(),
            transpositions = self.transposition_trajectories.len(),
            "mini-batch complete"
        );
        self.backup_value_outputs();
        self.backup_collisions();
    }

    /// Collect leaves until one of the four assembly bounds trips.
    pub fn create_mini_batch(&mut self) {
        let mut description = NodeDescription::default();
        let mut num_terminal_nodes = 0usize;

        while !self.new_nodes.is_full()
            && self.collision_trajectories.len() != self.settings.batch_size
            && !self.transposition_values.is_full()
            && num_terminal_nodes < self.terminal_node_cache
        {
            self.trajectory_buffer.clear();
            self.actions_buffer.clear();
            let new_node = self.get_new_child_to_evaluate(&mut description);
            self.stats.depth_sum += description.depth as u64;
            self.stats.depth_max = self.stats.depth_max.max(description.depth);

            match description.kind {
                DescentKind::Terminal => {
                    num_terminal_nodes += 1;
                    self.stats.terminals += 1;
                    backup_value(
                        new_node.value(),
                        &self.settings,
                        &self.trajectory_buffer,
                        self.settings.mcts_solver,
                    );
                }
                DescentKind::Collision => {
                    self.stats.collisions += 1;
                    self.collision_trajectories.push(self.trajectory_buffer.clone());
                }
                DescentKind::Transposition => {
                    self.stats.transpositions += 1;
                    self.transposition_trajectories
                        .push(self.trajectory_buffer.clone());
                }
                DescentKind::NewNode => {
                    self.new_nodes.add_element(new_node);
                    self.new_trajectories.push(self.trajectory_buffer.clone());
                }
            }
        }
    }

    /// Walk from the root to a leaf that must join the batch, applying
    /// virtual loss along the way and recording the trajectory.
    pub fn get_new_child_to_evaluate(&mut self, description: &mut NodeDescription) -> Arc<Node<S>> {
        description.depth = 0;
        let root = self
            .root_node
            .clone()
            .expect("root node must be set before searching");
        let mut current = root.clone();
        let mut child_idx: Option<ChildIdx> = None;

        // Exploration prelude: drop to a random depth along the greedy path
        // and pick either a random child or an unexplored check.
        let greedy = self.settings.epsilon_greedy_counter;
        let checks = self.settings.epsilon_checks_counter;
        if greedy > 0 && root.is_playout_node() && self.rng.gen_range(0..greedy) == 0 {
            current = self.get_starting_node(current, description);
            let mut edges = current.lock();
            child_idx = random_playout(&mut self.rng, &mut edges);
        } else if checks > 0 && root.is_playout_node() && self.rng.gen_range(0..checks) == 0 {
            current = self.get_starting_node(current, description);
            child_idx = self.select_enhanced_move(&current);
            if child_idx.is_none() {
                let mut edges = current.lock();
                child_idx = random_playout(&mut self.rng, &mut edges);
            }
        }

        loop {
            let mut edges = current.lock();
            let idx = match child_idx.take() {
                Some(idx) => idx,
                None => edges.select_child(current.visits(), &self.settings),
            };
            edges.apply_virtual_loss(idx);
            self.trajectory_buffer.push((current.clone(), idx));
            description.depth += 1;

            let next = edges.child(idx).cloned();
            let Some(next) = next else {
                // Expand: rebuild the parent position, play the chosen
                // action, and attach the child under the parent lock.
                let mut new_state = if self.settings.store_states {
                    current
                        .stored_state()
                        .expect("store_states is set but the node has no snapshot")
                        .clone()
                } else {
                    let mut state = self
                        .root_state
                        .clone()
                        .expect("root state must be set before searching");
                    assert_eq!(self.actions_buffer.len(), description.depth - 1);
                    for &action in &self.actions_buffer {
                        state.do_action(action);
                    }
                    state
                };
                new_state.do_action(edges.action(idx));
                edges.increment_no_visit_idx();
                let (new_node, transposition) =
                    self.index
                        .add_new_node_to_tree(&mut edges, &new_state, idx, &self.settings);
                drop(edges);

                if new_node.is_terminal() {
                    description.kind = DescentKind::Terminal;
                } else if transposition {
                    self.transposition_values.add_element(new_node.value());
                    description.kind = DescentKind::Transposition;
                } else {
                    description.kind = DescentKind::NewNode;
                    self.register_new_leaf(&new_node, &new_state);
                }
                return new_node;
            };

            if next.is_terminal() {
                description.kind = DescentKind::Terminal;
                return next;
            }
            if !next.has_nn_results() {
                description.kind = DescentKind::Collision;
                return next;
            }
            if self.settings.use_transposition_table && next.is_transposition() {
                let transpos_visits = edges.real_visits(idx);
                let transpos_q = edges.transposition_q_value(idx, transpos_visits);
                if next.is_transposition_return(transpos_q, transpos_visits) {
                    let backup = transposition_backup_value(
                        transpos_visits,
                        transpos_q,
                        next.value(),
                        &self.settings,
                    );
                    self.transposition_values.add_element(backup);
                    description.kind = DescentKind::Transposition;
                    return next;
                }
            }

            let action = edges.action(idx);
            drop(edges);
            if !self.settings.store_states {
                self.actions_buffer.push(action);
            }
            current = next;
        }
    }

    /// Prepare a freshly allocated leaf for evaluation: rollout leaves are
    /// finished on the spot, network leaves are encoded into the batch.
    fn register_new_leaf(&mut self, new_node: &Arc<Node<S>>, new_state: &S) {
        match self.settings.leaf_evaluation {
            LeafEvaluation::Rollout => {
                let value = new_state.random_rollout(&mut self.rng);
                new_node.set_value(value);
                new_node.enable_has_nn_results();
            }
            LeafEvaluation::Network => {
                let stride = S::PLANE_VALUES;
                let offset = self.new_nodes.len() * stride;
                let side = new_state.side_to_move();
                // Board planes are always encoded in the canonical
                // orientation; `mirror_policy` only reinterprets the policy
                // output when the results are bound.
                new_state.encode_state_planes(
                    true,
                    &mut self.input_planes[offset..offset + stride],
                    self.nets[0].version(),
                );
                let phase = new_state
                    .game_phase(self.nets.len(), self.settings.game_phase_definition);
                *self.phase_counts.entry(phase).or_insert(0) += 1;
                self.new_node_side_to_move.add_element(side);
            }
        }
    }

    /// Walk greedily down the tree to a random depth (geometric-ish,
    /// favoring shallow nodes) and return the node reached. Stops early at
    /// missing, unexpanded, rarely visited, or solved children.
    fn get_starting_node(
        &mut self,
        mut current: Arc<Node<S>>,
        description: &mut NodeDescription,
    ) -> Arc<Node<S>> {
        let depth = random_depth(&mut self.rng);
        for _ in 0..depth {
            let edges = current.lock();
            let idx = edges.select_child(current.visits(), &self.settings);
            let next = edges.child(idx).cloned();
            let action = edges.action(idx);
            drop(edges);

            let usable = match &next {
                Some(next) => {
                    next.is_playout_node()
                        && next.visits() >= self.settings.epsilon_greedy_counter
                        && next.node_type() == NodeType::Unsolved
                }
                None => false,
            };
            if !usable {
                break;
            }
            if !self.settings.store_states {
                self.actions_buffer.push(action);
            }
            current = next.expect("checked above");
            description.depth += 1;
        }
        current
    }

    /// Pick the first unexplored check-giving child, at most once per node.
    fn select_enhanced_move(&self, node: &Arc<Node<S>>) -> Option<ChildIdx> {
        if node.is_playout_node() && !node.was_inspected() && !node.is_terminal() {
            let mut edges = node.lock();
            if let Some(idx) = edges.first_unexplored_check() {
                return Some(idx);
            }
            drop(edges);
            node.set_as_inspected();
        }
        None
    }

    /// Network index for this batch: the single network, or the one serving
    /// the majority phase among the fresh leaves. Clears the phase counts.
    pub(crate) fn select_nn_index(&mut self) -> usize {
        if self.nets.len() == 1 {
            self.phase_counts.clear();
            return 0;
        }
        let mut majority: Option<(GamePhase, usize)> = None;
        for (&phase, &count) in &self.phase_counts {
            // Strict comparison: equal counts keep the earlier phase.
            if majority.map_or(true, |(_, best)| count > best) {
                majority = Some((phase, count));
            }
        }
        self.phase_counts.clear();
        let (phase, _) = majority.expect("phase routing over an empty batch");
        *self
            .phase_to_net
            .get(&phase)
            .expect("no network configured for the majority phase")
    }

    /// Bind the prediction outputs to the fresh leaves: priors (mirrored,
    /// enhanced, tempered), value (tablebase-mixed), then publish.
    fn set_nn_results_to_child_nodes(&mut self) {
        let policy_len = self.nets[0].policy_len();
        let is_policy_map = self.nets[0].is_policy_map();
        let root_is_tablebase = self
            .root_node
            .as_ref()
            .map(|r| r.is_tablebase())
            .unwrap_or(false);

        for batch_idx in 0..self.new_nodes.len() {
            let node = self.new_nodes.get_element(batch_idx).clone();
            let side = *self.new_node_side_to_move.get_element(batch_idx);
            let mirror = self
                .root_state
                .as_ref()
                .expect("root state must be set before searching")
                .mirror_policy(side);
            let policy = &self.prob_outputs[batch_idx * policy_len..(batch_idx + 1) * policy_len];

            let mut edges = node.lock();
            edges.set_probabilities(policy, mirror, is_policy_map);
            edges.enhance_moves(&self.settings);
            edges.apply_temperature_to_prior_policy(self.settings.node_policy_temperature);
            drop(edges);

            self.assign_value(&node, self.value_outputs[batch_idx], root_is_tablebase);
            node.enable_has_nn_results();
        }
    }

    fn assign_value(&mut self, node: &Node<S>, nn_value: f32, root_is_tablebase: bool) {
        if self.settings.tablebase_support && node.is_tablebase() {
            self.stats.tb_hits += 1;
            // Average the tablebase entry with the network for non-draws so
            // move ordering inside won positions stays informed.
            if node.value() != 0.0 && root_is_tablebase {
                node.set_value(0.5 * (nn_value + node.value()));
            }
            return;
        }
        node.set_value(nn_value);
    }

    /// Back up fresh-leaf values and fused transposition values, then reset
    /// the batch buffers.
    fn backup_value_outputs(&mut self) {
        for (idx, trajectory) in self.new_trajectories.iter().enumerate() {
            let node = self.new_nodes.get_element(idx);
            let solve_for_terminal = self.settings.tablebase_support
                && self.settings.mcts_solver
                && node.is_tablebase();
            backup_value(node.value(), &self.settings, trajectory, solve_for_terminal);
        }
        self.new_nodes.reset_idx();
        self.new_node_side_to_move.reset_idx();
        self.new_trajectories.clear();

        for (idx, trajectory) in self.transposition_trajectories.iter().enumerate() {
            backup_value(
                *self.transposition_values.get_element(idx),
                &self.settings,
                trajectory,
                false,
            );
        }
        self.transposition_values.reset_idx();
        self.transposition_trajectories.clear();
    }

    /// Revert virtual loss along every collision trajectory.
    fn backup_collisions(&mut self) {
        for trajectory in &self.collision_trajectories {
            backup_collision(&self.settings, trajectory);
        }
        self.collision_trajectories.clear();
    }
}

/// Random child pick for the exploration prelude. On a fully expanded node
/// a uniformly random child is taken unless it is already solved; on a
/// widening node the next unvisited child is taken and the cursor advances.
fn random_playout<S: GameState>(rng: &mut ChaCha8Rng, edges: &mut Edges<S>) -> Option<ChildIdx> {
    if edges.is_fully_expanded() {
        let idx = rng.gen_range(0..edges.len());
        match edges.child(idx) {
            None => Some(idx),
            Some(child) if !child.is_playout_node() => Some(idx),
            Some(child) if child.node_type() == NodeType::Unsolved => Some(idx),
            Some(_) => None,
        }
    } else {
        let idx = edges.no_visit_idx().min(edges.len() - 1);
        edges.increment_no_visit_idx();
        Some(idx)
    }
}

/// Random prelude depth: `P(0) = 1/2`, `P(k) = 2^-(k+1)`.
pub(crate) fn random_depth(rng: &mut ChaCha8Rng) -> usize {
    let r: f64 = rng.gen::<f64>();
    let r = r.max(f64::MIN_POSITIVE);
    (-r.log2() - 1.0).ceil().max(0.0) as usize
}

/// Expand a root node in place: evaluate the root position once and publish
/// priors and value, giving the root its initial visit. The orchestrator
/// runs this before handing the root to workers.
pub fn expand_root<S: GameState>(
    root: &Arc<Node<S>>,
    state: &S,
    net: &dyn Evaluator,
    settings: &SearchSettings,
) {
    if root.has_nn_results() {
        return;
    }
    let stride = net.input_shape().values_per_position();
    let mut input = vec![0.0; stride];
    // Canonical board orientation; the policy mirror below is a separate
    // concern and depends on the side to move.
    state.encode_state_planes(true, &mut input, net.version());

    let mut value = [0.0f32];
    let mut policy = vec![0.0; net.policy_len()];
    let mut auxiliary = vec![0.0; net.auxiliary_len()];
    net.predict(1, &input, &mut value, &mut policy, &mut auxiliary);

    let policy_mirror = state.mirror_policy(state.side_to_move());
    let mut edges = root.lock();
    edges.set_probabilities(&policy, policy_mirror, net.is_policy_map());
    edges.enhance_moves(settings);
    edges.apply_temperature_to_prior_policy(settings.node_policy_temperature);
    drop(edges);

    root.set_value(value[0]);
    root.enable_has_nn_results();
    root.increment_visits();
}
