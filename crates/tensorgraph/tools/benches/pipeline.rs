// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Compilation and dispatch benchmarks on the sample transformer block

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tensorgraph_compiler::{ExecutionDispatcher, ModelCompiler, OptimizationConfig};
use tensorgraph_core::BackendRegistry;
use tensorgraph_tools::{TransformerBlockSpec, build_transformer_block};

fn bench_compile_levels(c: &mut Criterion) {
    let sample = build_transformer_block(TransformerBlockSpec::default()).unwrap();

    let mut group = c.benchmark_group("compile");
    for level in 0..=3u8 {
        group.bench_with_input(BenchmarkId::from_parameter(level), &level, |b, &level| {
            b.iter(|| {
                let mut graph = sample.graph.clone();
                let mut compiler = ModelCompiler::with_level(level);
                compiler.compile(black_box(&mut graph)).unwrap()
            })
        });
    }
    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let sample = build_transformer_block(TransformerBlockSpec::default()).unwrap();
    let dispatcher = ExecutionDispatcher::new(BackendRegistry::reference_cpu(), OptimizationConfig::default());
    let mut optimized = sample.graph.clone();
    dispatcher.prepare(&mut optimized).unwrap();

    let mut group = c.benchmark_group("dispatch");
    group.bench_function("reference", |b| b.iter(|| dispatcher.run(black_box(&sample.graph), sample.inputs()).unwrap()));
    group.bench_function("optimized", |b| b.iter(|| dispatcher.run(black_box(&optimized), sample.inputs()).unwrap()));
    group.finish();
}

criterion_group!(pipeline_benches, bench_compile_levels, bench_dispatch);
criterion_main!(pipeline_benches);
