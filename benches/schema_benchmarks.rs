#![allow(dead_code)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use slotted::{
    plugin_fn, Component, ComponentKey, ComponentRegistry, Name, OwnerHierarchy, OwnerType,
    SchemaCompiler,
};

// ---------------------------------------------------------------------------
// Helper component types
// ---------------------------------------------------------------------------

struct Stat(u64);
impl Component for Stat {}

struct Args {
    seed: u64,
}

// ---------------------------------------------------------------------------
// Fixture: a compiler with a linear dependency chain of N components
// ---------------------------------------------------------------------------

fn chain_compiler(n: usize) -> (SchemaCompiler<Args>, OwnerType, ComponentKey<Stat>) {
    let mut h = OwnerHierarchy::new();
    let entity = h.register_root("entity");

    let registry = ComponentRegistry::new();
    let keys: Vec<ComponentKey<Stat>> = (0..n)
        .map(|i| {
            registry
                .get_or_create::<Stat>(Name::new("bench", &format!("stat{i}")).unwrap())
                .unwrap()
        })
        .collect();

    let first = keys[0].clone();
    let compiler = SchemaCompiler::<Args>::new(
        Arc::new(h),
        vec![plugin_fn(move |c| {
            for (i, key) in keys.iter().enumerate() {
                let deps = if i == 0 {
                    vec![]
                } else {
                    vec![keys[i - 1].untyped().clone()]
                };
                let prev = (i > 0).then(|| keys[i - 1].clone());
                c.register_for(entity, key, &deps, move |ctx| {
                    let base = match &prev {
                        Some(p) => ctx.get(p).unwrap().0,
                        None => ctx.args().seed,
                    };
                    Some(Stat(base + 1))
                })?;
            }
            Ok(())
        })],
        "running a benchmark",
    );
    (compiler, entity, first)
}

// ---------------------------------------------------------------------------
// First-use compilation
// ---------------------------------------------------------------------------

fn bench_compile_chain_16(c: &mut Criterion) {
    c.bench_function("compile_chain_16", |b| {
        b.iter_batched(
            || chain_compiler(16),
            |(compiler, entity, _)| {
                black_box(compiler.factory_for(entity).unwrap());
            },
            BatchSize::SmallInput,
        );
    });
}

// ---------------------------------------------------------------------------
// Warmed-up paths
// ---------------------------------------------------------------------------

fn bench_cached_factory_lookup(c: &mut Criterion) {
    let (compiler, entity, _) = chain_compiler(16);
    compiler.factory_for(entity).unwrap();

    c.bench_function("cached_factory_lookup", |b| {
        b.iter(|| black_box(compiler.factory_for(entity).unwrap()));
    });
}

fn bench_create_container_16(c: &mut Criterion) {
    let (compiler, entity, _) = chain_compiler(16);
    let factory = compiler.factory_for(entity).unwrap();

    c.bench_function("create_container_16", |b| {
        b.iter(|| black_box(factory.create(&Args { seed: 1 }).unwrap()));
    });
}

fn bench_component_access(c: &mut Criterion) {
    let (compiler, entity, first) = chain_compiler(16);
    let container = compiler.build_container(entity, &Args { seed: 1 }).unwrap();

    c.bench_function("component_access", |b| {
        b.iter(|| black_box(container.get(&first).unwrap().0));
    });
}

criterion_group!(
    benches,
    bench_compile_chain_16,
    bench_cached_factory_lookup,
    bench_create_container_16,
    bench_component_access
);
criterion_main!(benches);
