//! Benchmarks for definition loading and plan resolution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pipewright::core::Trigger;
use pipewright::pipeline::DescriptorStore;
use pipewright::plan::resolve;
use std::fmt::Write;

fn large_definition(stages: usize, jobs_per_stage: usize) -> String {
    let mut source = String::from("name: bench\nstages:\n");
    for s in 0..stages {
        let _ = writeln!(source, "  - stage{s}");
    }
    source.push_str("jobs:\n");
    for s in 0..stages {
        for j in 0..jobs_per_stage {
            let _ = writeln!(source, "  - name: job{s}_{j}");
            let _ = writeln!(source, "    stage: stage{s}");
            let _ = writeln!(source, "    script: make target{j}");
            if j % 3 == 0 {
                source.push_str("    only: [main, \"release/*\"]\n");
            }
            if j == 0 {
                let _ = writeln!(source, "    cache: {{ key: \"s{s}-$CI_COMMIT_REF_SLUG\", paths: [out/] }}");
            } else if s > 0 && j == 1 {
                let _ = writeln!(
                    source,
                    "    cache: {{ key: \"s{}-$CI_COMMIT_REF_SLUG\", paths: [out/], policy: pull }}",
                    s - 1
                );
            }
        }
    }
    source
}

fn plan_benchmark(c: &mut Criterion) {
    let source = large_definition(10, 20);

    c.bench_function("load_definition", |b| {
        b.iter(|| {
            let store = DescriptorStore::new();
            black_box(store.load_str(black_box(&source)))
        });
    });

    let definition = match DescriptorStore::new().load_str(&source) {
        Ok(definition) => definition,
        Err(e) => panic!("benchmark definition is invalid: {e}"),
    };
    let trigger = Trigger::branch("main", "4f2a9c1d0b7e");

    c.bench_function("resolve_plan", |b| {
        b.iter(|| black_box(resolve(black_box(&definition), black_box(&trigger))));
    });
}

criterion_group!(benches, plan_benchmark);
criterion_main!(benches);
