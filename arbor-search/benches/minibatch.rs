//! Mini-batch assembly and backup throughput on the built-in game.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use arbor_core::fifteen::Fifteen;
use arbor_core::{GameState, SearchSettings};
use arbor_eval::{Evaluator, InputShape, UniformEvaluator};
use arbor_search::{expand_root, SearchWorker};
use arbor_tree::TranspositionIndex;

fn fresh_worker(batch_size: usize) -> SearchWorker<Fifteen> {
    let settings = SearchSettings {
        batch_size,
        ..SearchSettings::default()
    };
    let net: Arc<dyn Evaluator> = Arc::new(UniformEvaluator::new(
        InputShape {
            planes: 3,
            height: 3,
            width: 3,
        },
        Fifteen::POLICY_LEN,
    ));
    let pos = Fifteen::new();
    let index = Arc::new(TranspositionIndex::new());
    let root = index.allocate_root(&pos, &settings);
    expand_root(&root, &pos, net.as_ref(), &settings);
    let mut worker = SearchWorker::new(vec![net], settings, index, 7).unwrap();
    worker.set_root_node(root);
    worker.set_root_state(pos);
    worker
}

fn bench_thread_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("thread_iteration");
    for &batch_size in &[1usize, 8, 32] {
        group.bench_function(format!("batch_{batch_size}"), |b| {
            b.iter_batched(
                || fresh_worker(batch_size),
                |mut worker| {
                    for _ in 0..16 {
                        worker.thread_iteration();
                    }
                    worker
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_thread_iteration);
criterion_main!(benches);
