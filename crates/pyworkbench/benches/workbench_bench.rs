// crates/pyworkbench/benches/workbench_bench.rs
//
// Three Criterion benchmark groups over the non-VM hot paths:
//   extract   — function-name extraction from a synthetic source module
//   coverage  — global coverage over a synthetic workspace snapshot
//   staging   — snapshot staging into a fresh sandbox root

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pyworkbench::{extract_function_names, global_coverage, SandboxBridge, WorkspaceSnapshot};

fn synthetic_source(functions: usize) -> String {
    let mut source = String::new();
    for i in 0..functions {
        source.push_str(&format!("def fn_{i}(a, b):\n    return a + b + {i}\n\n"));
    }
    source
}

fn synthetic_snapshot(modules: usize, functions_per_module: usize) -> WorkspaceSnapshot {
    let mut snapshot = WorkspaceSnapshot::new();
    for m in 0..modules {
        let mut source = String::new();
        let mut test = String::from("import pytest\n\n");
        for f in 0..functions_per_module {
            source.push_str(&format!("def fn_{m}_{f}(x):\n    return x * {f}\n\n"));
            // Reference every other function so coverage work is non-trivial.
            if f % 2 == 0 {
                test.push_str(&format!(
                    "def test_fn_{m}_{f}():\n    assert fn_{m}_{f}(2) == {}\n\n",
                    2 * f
                ));
            }
        }
        snapshot.insert(format!("src/mod_{m}.py"), source);
        snapshot.insert(format!("tests/test_mod_{m}.py"), test);
    }
    snapshot
}

fn bench_extract(c: &mut Criterion) {
    let source = synthetic_source(200);
    c.bench_function("extract_function_names_200_defs", |b| {
        b.iter(|| extract_function_names(black_box(&source)))
    });
}

fn bench_coverage(c: &mut Criterion) {
    let snapshot = synthetic_snapshot(10, 20);
    c.bench_function("global_coverage_10x20", |b| {
        b.iter(|| global_coverage(black_box(&snapshot)))
    });
}

fn bench_staging(c: &mut Criterion) {
    let snapshot = synthetic_snapshot(10, 20);
    c.bench_function("stage_snapshot_20_files", |b| {
        b.iter(|| {
            let bridge = SandboxBridge::new().expect("sandbox root");
            for (path, content) in &snapshot {
                bridge.stage(path, content).expect("stage");
            }
            black_box(bridge.root().to_path_buf())
        })
    });
}

criterion_group!(benches, bench_extract, bench_coverage, bench_staging);
criterion_main!(benches);
