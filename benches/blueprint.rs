use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ferrous_blueprint::*;
use std::sync::Arc;
use std::time::Duration;

// ===== Fixtures =====

struct Payload {
    data: Vec<u64>,
}

fn container(scope: Scope) -> Container {
    let classes = ClassRegistry::new().with_class(
        ClassDef::new("Payload").constructor([], |_args: &Args| {
            Ok(Instance::new(Payload { data: (0..64).collect() }))
        }),
    );
    let container = Container::builder()
        .name("bench")
        .source(Blueprint::new().with_component(BeanMetadata::new("payload", "Payload").scope(scope)))
        .backend(classes)
        .registry(Arc::new(ServiceRegistry::new()))
        .grace_period(false)
        .publish_container(false)
        .build()
        .unwrap();
    container.start().unwrap();
    container.await_active(Duration::from_secs(5)).unwrap();
    container
}

// ===== Object graph =====

fn bench_singleton_hit(c: &mut Criterion) {
    let container = container(Scope::Singleton);
    c.bench_function("singleton_hit", |b| {
        b.iter(|| {
            let payload = container.get::<Payload>("payload").unwrap();
            black_box(payload.data.len());
        })
    });
    container.destroy();
}

fn bench_prototype_create(c: &mut Criterion) {
    let container = container(Scope::Prototype);
    c.bench_function("prototype_create", |b| {
        b.iter(|| black_box(container.create("payload").unwrap()))
    });
    container.destroy();
}

// ===== Conversion =====

fn bench_conversion(c: &mut Criterion) {
    let converter = Converter::new();
    let mut group = c.benchmark_group("convert_list_i32");
    for size in [1usize, 16, 256] {
        let input = Value::List((0..size).map(|i| Value::str(i.to_string())).collect());
        let target = TypeSpec::list(TypeSpec::I32);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| black_box(converter.convert(input, &target).unwrap()))
        });
    }
    group.finish();
}

// ===== Filters =====

fn bench_filter(c: &mut Criterion) {
    let text = "(&(objectClass=Handler)(|(region=eu)(region=us))(!(service.ranking<=0)))";
    c.bench_function("filter_parse", |b| b.iter(|| black_box(Filter::parse(black_box(text)).unwrap())));

    let filter = Filter::parse(text).unwrap();
    let mut properties = Properties::new();
    properties.insert("objectClass".to_string(), Value::List(vec![Value::str("Handler")]));
    properties.insert("region".to_string(), Value::str("eu"));
    properties.insert("service.ranking".to_string(), Value::Int(5));
    c.bench_function("filter_match", |b| b.iter(|| black_box(filter.matches(&properties))));
}

criterion_group!(
    benches,
    bench_singleton_hit,
    bench_prototype_create,
    bench_conversion,
    bench_filter
);
criterion_main!(benches);
