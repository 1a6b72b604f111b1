#![allow(
    clippy::string_slice,
    clippy::tests_outside_test_module,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    reason = "benchmark"
)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use futures::executor::block_on;
use macrojsp::{MacroRequest, Transpiler, parse};

mod utils;

fn macrojsp_benchmark(c: &mut Criterion) {
    // Generate 50 chained pattern macros
    let macros = utils::generate_random_macros(50);
    let requests: Vec<MacroRequest> = macros
        .iter()
        .map(|(name, _)| MacroRequest::new(utils::SITE, name))
        .collect();

    let transpiler = Transpiler::builder(utils::content_model(&macros)).build();

    let mut group = c.benchmark_group("Macro Compilation");
    group.sample_size(50);

    group.bench_function("parse", |b| {
        b.iter(|| {
            for (_, source) in &macros {
                black_box(parse(source).unwrap());
            }
        });
    });

    // The parse cache is warm after the first iteration.
    group.bench_function("transform_batch", |b| {
        b.iter(|| {
            for result in block_on(transpiler.transform_batch(&requests)) {
                black_box(result.unwrap());
            }
        });
    });

    group.finish();
}

criterion_group!(benches, macrojsp_benchmark);
criterion_main!(benches);
