//! Cross-validation engine benchmarks
//!
//! Benchmarks for the training hot path:
//! - Fold construction from group labels
//! - Mean fold RMSE per model family (one search trial)
//! - Pareto front extraction over trial scores
//!
//! Toyota Way: Measure before optimizing (Genchi Genbutsu)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use trueno_ml::cancel::CancellationToken;
use trueno_ml::model::{Matrix, ModelFamily, ModelParams};
use trueno_ml::search::pareto::pareto_front;
use trueno_ml::search::Direction;
use trueno_ml::validation::{auto_groups, leave_one_group_out, CrossValidator};

/// Create a two-feature regression problem with `n` rows
#[allow(clippy::cast_precision_loss)]
fn create_problem(n: usize) -> (Matrix, Vec<f64>, Vec<String>) {
    let a: Vec<f64> = (0..n).map(|i| (i % 97) as f64 / 97.0).collect();
    let b: Vec<f64> = (0..n).map(|i| (i % 13) as f64 / 13.0).collect();
    let y: Vec<f64> = a.iter().zip(&b).map(|(a, b)| 3.0 * a - 2.0 * b + a * b).collect();
    let groups = auto_groups(n, 5, 42);
    (Matrix::from_columns(&[a, b], n).unwrap(), y, groups)
}

/// Benchmark fold construction
fn bench_fold_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("leave_one_group_out");

    for size in [1_000, 10_000, 100_000].iter() {
        let groups = auto_groups(*size, 10, 42);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let folds = leave_one_group_out(&groups);
                black_box(folds);
            });
        });
    }

    group.finish();
}

/// Benchmark one search trial (parallel folds) per family
fn bench_mean_fold_rmse(c: &mut Criterion) {
    let mut group = c.benchmark_group("mean_fold_rmse");
    group.sample_size(10);

    let (x, y, groups) = create_problem(500);
    let cv = CrossValidator::new(&x, &y, &groups).unwrap();
    let cancel = CancellationToken::new();
    let params = ModelParams::new();

    for family in [ModelFamily::Gbr, ModelFamily::RandomForest, ModelFamily::XgBoost] {
        group.bench_with_input(BenchmarkId::from_parameter(family), &family, |b, family| {
            b.iter(|| {
                let score = cv.mean_fold_rmse(*family, &params, &cancel).unwrap();
                black_box(score);
            });
        });
    }

    group.finish();
}

/// Benchmark Pareto front extraction
#[allow(clippy::cast_precision_loss)]
fn bench_pareto_front(c: &mut Criterion) {
    let mut group = c.benchmark_group("pareto_front");
    let directions = [Direction::Maximize, Direction::Minimize];

    for size in [100, 1_000].iter() {
        let points: Vec<Vec<f64>> = (0..*size)
            .map(|i| {
                let t = i as f64 / *size as f64;
                vec![(t * 7.0).sin(), (t * 3.0).cos()]
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let front = pareto_front(&points, &directions);
                black_box(front);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_fold_construction,
    bench_mean_fold_rmse,
    bench_pareto_front
);
criterion_main!(benches);
