//! Benchmarks for Flexvol selection and capacity planning

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use qtree_pool_operator::domain::ports::PoolAttributes;
use qtree_pool_operator::economy::naming::{deleted_qtree_name, flexvol_prefix};
use qtree_pool_operator::economy::{
    optimal_flexvol_size, EconomyMetrics, PoolSelector, QuotaConfig, QuotaManager, VolumeDefaults,
};
use qtree_pool_operator::SimulatedArray;
use std::sync::Arc;

fn bench_capacity(c: &mut Criterion) {
    let mut group = c.benchmark_group("capacity");
    group.throughput(Throughput::Elements(1));

    group.bench_function("optimal_flexvol_size", |b| {
        b.iter(|| optimal_flexvol_size(black_box(30 << 30), black_box(1 << 30), black_box(10)));
    });

    group.bench_function("deleted_qtree_name", |b| {
        let long_name = "q".repeat(60);
        b.iter(|| deleted_qtree_name(black_box(&long_name), black_box("a1b2c3")));
    });

    group.finish();
}

fn bench_selection(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");

    let mut group = c.benchmark_group("pool_selection");
    group.throughput(Throughput::Elements(1));

    for flexvols in [1usize, 10, 100] {
        let prefix = flexvol_prefix("bench");
        let array = Arc::new(SimulatedArray::new());
        let attributes = PoolAttributes::default();
        for i in 0..flexvols {
            let name = format!("{}{:04}", prefix, i);
            array.seed_flexvol(&name, attributes.clone());
            array.seed_qtrees(&name, 100);
        }

        let quotas = QuotaManager::new(array.clone(), &QuotaConfig::default());
        let selector = PoolSelector::new(
            array.clone(),
            quotas,
            prefix,
            200,
            VolumeDefaults::default(),
            Arc::new(EconomyMetrics::new()),
        );

        group.bench_with_input(
            BenchmarkId::new("get_flexvol_for_qtree", flexvols),
            &attributes,
            |b, attributes| {
                b.iter(|| runtime.block_on(selector.get_flexvol_for_qtree(black_box(attributes))));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_capacity, bench_selection);
criterion_main!(benches);
