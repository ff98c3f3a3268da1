//! Step engine benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rstchart_core::{ActionRegistry, Executor, Model};
use std::sync::Arc;

fn order_chart() -> serde_json::Value {
    serde_json::json!({
        "name": "order",
        "datamodel": {"amount": 500, "retries": 0},
        "states": [
            {"id": "created", "transitions": [{"event": "start", "target": "processing"}]},
            {"id": "processing", "transitions": [
                {"event": "complete", "cond": "amount <= 1000", "target": "completed"},
                {"event": "fail", "target": "failed"}
            ]},
            {"id": "failed", "transitions": [{"event": "retry", "target": "processing", "actions": [
                {"type": "assign", "location": "retries", "expr": "retries + 1"}
            ]}]},
            {"id": "completed", "transitions": [{"event": "reset", "target": "created"}]}
        ]
    })
}

/// A chain of `n` compound states, each holding one leaf.
fn deep_chart(n: usize) -> serde_json::Value {
    let states: Vec<_> = (0..n)
        .map(|i| {
            serde_json::json!({
                "id": format!("group_{}", i),
                "transitions": [{"event": "next", "target": format!("leaf_{}", (i + 1) % n)}],
                "states": [{"id": format!("leaf_{}", i)}]
            })
        })
        .collect();
    serde_json::json!({"states": states})
}

fn build(doc: &serde_json::Value) -> Arc<Model> {
    Arc::new(Model::from_json(doc, &ActionRegistry::new()).unwrap())
}

fn bench_build_model(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_build_model");
    let registry = ActionRegistry::new();

    let simple = order_chart();
    group.bench_function("simple", |b| {
        b.iter(|| black_box(Model::from_json(&simple, &registry).unwrap()))
    });

    let complex = deep_chart(20);
    group.bench_function("complex", |b| {
        b.iter(|| black_box(Model::from_json(&complex, &registry).unwrap()))
    });

    group.finish();
}

fn bench_start(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_start");
    let model = build(&order_chart());

    group.throughput(Throughput::Elements(1));
    group.bench_function("start", |b| {
        b.iter(|| {
            let mut executor = Executor::new(model.clone());
            black_box(executor.start().unwrap())
        });
    });

    group.finish();
}

fn bench_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_submit");
    let model = build(&order_chart());

    group.throughput(Throughput::Elements(1));
    group.bench_function("cycle", |b| {
        let mut executor = Executor::new(model.clone());
        executor.start().unwrap();
        let events = ["start", "fail", "retry", "complete", "reset"];
        let mut i = events.len() - 1;
        b.iter(|| {
            i = (i + 1) % events.len();
            black_box(executor.submit(events[i]).unwrap())
        });
    });

    group.bench_function("unmatched", |b| {
        let mut executor = Executor::new(model.clone());
        executor.start().unwrap();
        b.iter(|| black_box(executor.submit("nothing").unwrap()));
    });

    group.finish();
}

fn bench_submit_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_throughput");
    group.sample_size(20);

    for depth in [10, 100] {
        let model = build(&deep_chart(depth));
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("events", depth), &depth, |b, &size| {
            let mut executor = Executor::new(model.clone());
            executor.start().unwrap();
            b.iter(|| {
                for _ in 0..size {
                    let _ = executor.submit("next");
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_build_model,
    bench_start,
    bench_submit,
    bench_submit_throughput,
);

criterion_main!(benches);
