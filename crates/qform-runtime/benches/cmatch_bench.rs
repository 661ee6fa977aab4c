//! Benchmarks for visibility passes over large match matrices.
//!
//! Measures the cost of a full first pass (every index queued), a repeat
//! pass (every field elided by the cache), and a pass where a small share
//! of indexes flip.
//!
//! Run with: cargo bench -p qform-runtime --bench cmatch_bench

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::collections::BTreeSet;
use std::hint::black_box;

use qform_core::{Bucket, BucketData, ClassMatch, FieldRegistry, MatchMatrix};
use qform_runtime::{PassContext, VisibilityResolver};

const ROWS: usize = 8;

// ============================================================================
// Setup helpers
// ============================================================================

fn field_name(i: usize) -> String {
    format!("field_{i:05}")
}

/// A bucket with `n` fields of `ROWS` values each.
fn setup_bucket(n: usize) -> Bucket {
    let data: BucketData = (0..n)
        .map(|i| (field_name(i), vec!["value".to_string(); ROWS]))
        .collect();
    Bucket::from_committed(data)
}

/// A matrix over `n` fields; every `flip_every`-th field hides index 0.
fn setup_matrix(n: usize, flip_every: usize) -> MatchMatrix {
    (0..n)
        .map(|i| {
            let mut indexes = vec![true; ROWS];
            if flip_every > 0 && i % flip_every == 0 {
                indexes[0] = false;
            }
            (field_name(i), ClassMatch::per_index(indexes))
        })
        .collect()
}

fn run_pass(
    resolver: &mut VisibilityResolver,
    bucket: &Bucket,
    active: &BTreeSet<String>,
    fields: &FieldRegistry,
    matrix: MatchMatrix,
) -> usize {
    let rendered = |_: &str| -> Option<usize> { None };
    let cx = PassContext {
        active,
        bucket,
        fields,
        na_value: "N/A",
        rendered: &rendered,
    };
    resolver.handle_class_match(matrix, false, &cx).queue.len()
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_cmatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("cmatch_pass");
    let fields = FieldRegistry::new();

    for n in [100, 1_000, 10_000] {
        let bucket = setup_bucket(n);
        let active: BTreeSet<String> = (0..n).map(field_name).collect();
        let baseline = setup_matrix(n, 0);
        let flipped = setup_matrix(n, 10);

        group.bench_with_input(BenchmarkId::new("first_pass", n), &n, |b, _| {
            b.iter(|| {
                let mut resolver = VisibilityResolver::new();
                black_box(run_pass(
                    &mut resolver,
                    &bucket,
                    &active,
                    &fields,
                    baseline.clone(),
                ))
            });
        });

        group.bench_with_input(BenchmarkId::new("repeat_pass", n), &n, |b, _| {
            let mut resolver = VisibilityResolver::new();
            run_pass(&mut resolver, &bucket, &active, &fields, baseline.clone());
            b.iter(|| {
                black_box(run_pass(
                    &mut resolver,
                    &bucket,
                    &active,
                    &fields,
                    baseline.clone(),
                ))
            });
        });

        group.bench_with_input(BenchmarkId::new("ten_percent_flip", n), &n, |b, _| {
            let mut resolver = VisibilityResolver::new();
            let mut toggle = false;
            run_pass(&mut resolver, &bucket, &active, &fields, baseline.clone());
            b.iter(|| {
                toggle = !toggle;
                let matrix = if toggle { flipped.clone() } else { baseline.clone() };
                black_box(run_pass(&mut resolver, &bucket, &active, &fields, matrix))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cmatch);
criterion_main!(benches);
