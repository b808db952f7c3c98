//! Criterion benchmarks for the annealing cores.
//!
//! Uses a synthetic banded sparse system with a known nonnegative solution
//! to measure per-iteration cost independent of any real inversion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::Rng;
use std::sync::Arc;
use u_annealing::completion::{IterationCompletion, SubCompletion};
use u_annealing::data::{csc_from_triplets, ConstraintData, InversionProblem};
use u_annealing::random::create_rng;
use u_annealing::sa::{Annealer, PerturbationFunction, SaConfig, SerialAnnealer};
use u_annealing::threaded::{ThreadedAnnealer, ThreadedConfig};

// ===========================================================================
// Banded system: each row touches `band` consecutive columns
// ===========================================================================

fn banded_problem(cols: usize, rows: usize, band: usize) -> Arc<InversionProblem> {
    let mut rng = create_rng(42);
    let truth: Vec<f64> = (0..cols).map(|_| rng.random_range(0.0..1.0)).collect();
    let mut triplets = Vec::with_capacity(rows * band);
    for r in 0..rows {
        let first = r * cols / rows;
        for c in first..(first + band).min(cols) {
            triplets.push((r, c, rng.random_range(0.5..1.5)));
        }
    }
    let a = csc_from_triplets(rows, cols, &triplets).unwrap();
    let d = ConstraintData::new(a.clone(), vec![0.0; rows])
        .unwrap()
        .misfit(&truth);
    let eq = ConstraintData::new(a, d).unwrap();
    Arc::new(InversionProblem::new(eq, vec![0.0; cols]).unwrap())
}

fn sa_config() -> SaConfig {
    SaConfig::default()
        .with_perturbation(PerturbationFunction::Uniform { width: 0.01 })
        .with_seed(42)
}

fn bench_serial(c: &mut Criterion) {
    let mut group = c.benchmark_group("serial_iterate");
    group.sample_size(10);

    for &cols in &[100, 1_000, 10_000] {
        let problem = banded_problem(cols, cols * 2, 8);
        group.bench_with_input(BenchmarkId::from_parameter(cols), &problem, |b, p| {
            b.iter(|| {
                let mut sa = SerialAnnealer::new(Arc::clone(p), sa_config()).unwrap();
                let start = sa.initial_state();
                let end = sa.iterate(&start, &IterationCompletion::new(10_000)).unwrap();
                black_box(end)
            })
        });
    }
    group.finish();
}

fn bench_threaded(c: &mut Criterion) {
    let mut group = c.benchmark_group("threaded_rounds");
    group.sample_size(10);

    let problem = banded_problem(1_000, 2_000, 8);
    for &threads in &[1, 2, 4] {
        let config = ThreadedConfig::default()
            .with_threads(threads)
            .with_sub_completion(SubCompletion::Iterations(2_000))
            .with_seed(42);
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &(Arc::clone(&problem), config),
            |b, (p, cfg)| {
                b.iter(|| {
                    let mut tsa =
                        ThreadedAnnealer::new(Arc::clone(p), sa_config(), cfg.clone()).unwrap();
                    let start = tsa.initial_state();
                    let end = tsa.iterate(&start, &IterationCompletion::new(10_000)).unwrap();
                    black_box(end)
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_serial, bench_threaded);
criterion_main!(benches);
