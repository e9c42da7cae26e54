use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tether::{parse, BindingEngine, CompiledBinding, DynamicObject, ObjectModel, ObjectTree, Value};

const QUERY: &str = "Source1 + Source2 == Threshold ? 'ok {x,3}' : Nested?.Value ?? 0";

fn seeded_engine() -> (BindingEngine, Arc<DynamicObject>, Arc<DynamicObject>) {
    let engine = BindingEngine::new(Arc::new(ObjectModel::new()), Arc::new(ObjectTree));
    let view = DynamicObject::new("Demo.View");
    let vm = DynamicObject::new("Demo.ViewModel");
    vm.set("x", Value::Int32(20));
    vm.set("y", Value::Int32(3));
    (engine, view, vm)
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_expression", |b| {
        b.iter(|| parse(black_box(QUERY)).unwrap())
    });
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile_expression", |b| {
        b.iter(|| CompiledBinding::from_source(black_box(QUERY)).unwrap())
    });
}

fn bench_invoke_compiled(c: &mut Criterion) {
    let (engine, _, vm) = seeded_engine();
    let ctx = engine.context(Value::Null, vm.value());
    let compiled = CompiledBinding::from_source("x / 2 - 10 + y * 3").unwrap();

    c.bench_function("invoke_compiled_expression", |b| {
        b.iter(|| compiled.invoke(black_box(&ctx), &[]).unwrap())
    });
}

fn bench_live_update(c: &mut Criterion) {
    let (engine, view, vm) = seeded_engine();
    let _live = engine
        .bind("Text x/2-10", &view.value(), &vm.value())
        .unwrap();

    let mut n = 0i32;
    c.bench_function("live_binding_source_update", |b| {
        b.iter(|| {
            n = n.wrapping_add(2);
            vm.set("x", Value::Int32(black_box(n)));
        })
    });
}

criterion_group!(
    hot_paths,
    bench_parse,
    bench_compile,
    bench_invoke_compiled,
    bench_live_update
);
criterion_main!(hot_paths);
