//! Baseline evaluators: uniform priors, scripted outputs, and a counting
//! wrapper for routing assertions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arbor_core::GamePhase;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::evaluator::{Evaluator, InputShape};

/// Zero logits and zero value: uniform priors over legal actions after the
/// masked softmax, neutral evaluation.
pub struct UniformEvaluator {
    shape: InputShape,
    policy_len: usize,
    phase: GamePhase,
}

impl UniformEvaluator {
    pub fn new(shape: InputShape, policy_len: usize) -> Self {
        Self {
            shape,
            policy_len,
            phase: GamePhase(0),
        }
    }

    pub fn with_phase(mut self, phase: GamePhase) -> Self {
        self.phase = phase;
        self
    }
}

impl Evaluator for UniformEvaluator {
    fn input_shape(&self) -> InputShape {
        self.shape
    }

    fn policy_len(&self) -> usize {
        self.policy_len
    }

    fn is_policy_map(&self) -> bool {
        true
    }

    fn phase(&self) -> GamePhase {
        self.phase
    }

    fn predict(
        &self,
        batch: usize,
        input: &[f32],
        values: &mut [f32],
        policy: &mut [f32],
        _auxiliary: &mut [f32],
    ) {
        assert_eq!(input.len(), batch * self.shape.values_per_position());
        values[..batch].fill(0.0);
        policy[..batch * self.policy_len].fill(0.0);
    }
}

/// Evaluator with per-position outputs scripted by position hash, falling
/// back to uniform for unknown positions. The worker encodes positions into
/// planes, so scripted entries are keyed by a caller-chosen plane digest.
pub struct ScriptedEvaluator {
    shape: InputShape,
    policy_len: usize,
    phase: GamePhase,
    entries: Mutex<FxHashMap<u64, (Vec<f32>, f32)>>,
    /// Digest function over one position's input planes.
    digest: fn(&[f32]) -> u64,
}

impl ScriptedEvaluator {
    pub fn new(shape: InputShape, policy_len: usize, digest: fn(&[f32]) -> u64) -> Self {
        Self {
            shape,
            policy_len,
            phase: GamePhase(0),
            entries: Mutex::new(FxHashMap::default()),
            digest,
        }
    }

    pub fn with_phase(mut self, phase: GamePhase) -> Self {
        self.phase = phase;
        self
    }

    /// Script `(policy_logits, value)` for the position whose planes digest
    /// to `key`.
    pub fn script(&self, key: u64, policy_logits: Vec<f32>, value: f32) {
        assert_eq!(policy_logits.len(), self.policy_len);
        self.entries.lock().insert(key, (policy_logits, value));
    }
}

impl Evaluator for ScriptedEvaluator {
    fn input_shape(&self) -> InputShape {
        self.shape
    }

    fn policy_len(&self) -> usize {
        self.policy_len
    }

    fn is_policy_map(&self) -> bool {
        true
    }

    fn phase(&self) -> GamePhase {
        self.phase
    }

    fn predict(
        &self,
        batch: usize,
        input: &[f32],
        values: &mut [f32],
        policy: &mut [f32],
        _auxiliary: &mut [f32],
    ) {
        let stride = self.shape.values_per_position();
        let entries = self.entries.lock();
        for b in 0..batch {
            let key = (self.digest)(&input[b * stride..(b + 1) * stride]);
            match entries.get(&key) {
                Some((logits, value)) => {
                    policy[b * self.policy_len..(b + 1) * self.policy_len]
                        .copy_from_slice(logits);
                    values[b] = *value;
                }
                None => {
                    policy[b * self.policy_len..(b + 1) * self.policy_len].fill(0.0);
                    values[b] = 0.0;
                }
            }
        }
    }
}

/// Wraps another evaluator and counts `predict` calls and positions.
pub struct CountingEvaluator {
    inner: Arc<dyn Evaluator>,
    calls: AtomicUsize,
    positions: AtomicUsize,
}

impl CountingEvaluator {
    pub fn new(inner: Arc<dyn Evaluator>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            positions: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn positions(&self) -> usize {
        self.positions.load(Ordering::Relaxed)
    }
}

impl Evaluator for CountingEvaluator {
    fn input_shape(&self) -> InputShape {
        self.inner.input_shape()
    }

    fn policy_len(&self) -> usize {
        self.inner.policy_len()
    }

    fn is_policy_map(&self) -> bool {
        self.inner.is_policy_map()
    }

    fn version(&self) -> u32 {
        self.inner.version()
    }

    fn auxiliary_len(&self) -> usize {
        self.inner.auxiliary_len()
    }

    fn phase(&self) -> GamePhase {
        self.inner.phase()
    }

    fn predict(
        &self,
        batch: usize,
        input: &[f32],
        values: &mut [f32],
        policy: &mut [f32],
        auxiliary: &mut [f32],
    ) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.positions.fetch_add(batch, Ordering::Relaxed);
        self.inner.predict(batch, input, values, policy, auxiliary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> InputShape {
        InputShape {
            planes: 3,
            height: 3,
            width: 3,
        }
    }

    fn digest(planes: &[f32]) -> u64 {
        planes
            .iter()
            .enumerate()
            .filter(|(_, &v)| v != 0.0)
            .map(|(i, _)| 1u64 << (i as u64 % 63))
            .fold(0, |acc, bit| acc ^ bit)
    }

    #[test]
    fn uniform_evaluator_writes_zeroes() {
        let net = UniformEvaluator::new(shape(), 9);
        let input = vec![0.5; 2 * shape().values_per_position()];
        let mut values = vec![9.0; 2];
        let mut policy = vec![9.0; 18];
        net.predict(2, &input, &mut values, &mut policy, &mut []);
        assert!(values.iter().all(|&v| v == 0.0));
        assert!(policy.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn scripted_evaluator_matches_by_digest() {
        let net = ScriptedEvaluator::new(shape(), 9, digest);
        let mut planes = vec![0.0; shape().values_per_position()];
        planes[4] = 1.0;
        let mut logits = vec![0.0; 9];
        logits[2] = 3.0;
        net.script(digest(&planes), logits, 0.75);

        let mut values = vec![0.0; 1];
        let mut policy = vec![0.0; 9];
        net.predict(1, &planes, &mut values, &mut policy, &mut []);
        assert_eq!(values[0], 0.75);
        assert_eq!(policy[2], 3.0);
    }

    #[test]
    fn counting_evaluator_tracks_batches() {
        let net = CountingEvaluator::new(Arc::new(UniformEvaluator::new(shape(), 9)));
        let input = vec![0.0; 3 * shape().values_per_position()];
        let mut values = vec![0.0; 3];
        let mut policy = vec![0.0; 27];
        net.predict(3, &input, &mut values, &mut policy, &mut []);
        net.predict(3, &input, &mut values, &mut policy, &mut []);
        assert_eq!(net.calls(), 2);
        assert_eq!(net.positions(), 6);
    }
}
