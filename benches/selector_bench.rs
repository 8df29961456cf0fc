//! Benchmarks for `wa_template::selector::RandomSelector`.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use wa_core::random::SeededRandomSource;
use wa_core::template::Block;
use wa_template::selector::RandomSelector;

fn make_blocks(count: usize, options_per_block: usize) -> Vec<Block> {
    (0..count)
        .map(|i| Block {
            index: i,
            start_offset: i * 10,
            end_offset: i * 10 + 5,
            options: (0..options_per_block).map(|o| format!("opt{i}-{o}")).collect(),
        })
        .collect()
}

fn bench_select_one_by_block_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_one_by_block_count");
    let source = SeededRandomSource::new(42);
    let selector = RandomSelector;

    for blocks in [1, 5, 20, 50] {
        let data = make_blocks(blocks, 3);
        group.bench_with_input(BenchmarkId::from_parameter(blocks), &data, |b, data| {
            b.iter(|| selector.select_one(black_box(data), &source));
        });
    }

    group.finish();
}

fn bench_select_one_by_option_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_one_by_option_count");
    let source = SeededRandomSource::new(42);
    let selector = RandomSelector;

    for options in [2, 10, 50] {
        let data = make_blocks(5, options);
        group.bench_with_input(BenchmarkId::from_parameter(options), &data, |b, data| {
            b.iter(|| selector.select_one(black_box(data), &source));
        });
    }

    group.finish();
}

fn bench_select_many(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_many_by_preview_count");
    let source = SeededRandomSource::new(7);
    let selector = RandomSelector;
    let blocks = make_blocks(4, 5);

    for count in [1, 5, 10] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| selector.select_many(black_box(&blocks), &source, count));
        });
    }

    group.finish();
}

fn bench_test_distribution(c: &mut Criterion) {
    let source = SeededRandomSource::new(123);
    let selector = RandomSelector;
    let blocks = make_blocks(1, 4);

    c.bench_function("test_distribution_5000_iterations", |b| {
        b.iter(|| selector.test_distribution(black_box(&blocks), &source, 5_000));
    });
}

criterion_group!(
    benches,
    bench_select_one_by_block_count,
    bench_select_one_by_option_count,
    bench_select_many,
    bench_test_distribution
);
criterion_main!(benches);
