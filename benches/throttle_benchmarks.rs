use api_throttle::rate_limit::{
    smoothing, ConsumptionEngine, CounterSnapshot, InMemoryCounterStore, PrefixClassifier,
    Profile, ProfileRegistry, RouteRule,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;

fn profile(name: &str, max_points: u32, smoothing: bool) -> Profile {
    Profile {
        name: name.to_string(),
        max_points,
        window_secs: 60,
        smoothing,
        block_duration_secs: None,
    }
}

fn benchmark_consume(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = Arc::new(InMemoryCounterStore::new());
    let registry = Arc::new(
        ProfileRegistry::new(vec![
            profile("api", u32::MAX, false),
            profile("smooth", u32::MAX, true),
        ])
        .unwrap(),
    );
    let engine = ConsumptionEngine::new(store, registry);

    let mut group = c.benchmark_group("consume");
    for name in ["api", "smooth"] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &name, |b, name| {
            b.to_async(&runtime)
                .iter(|| async { black_box(engine.consume(name, "10.0.0.1").await.unwrap()) })
        });
    }
    group.finish();
}

fn benchmark_many_identities(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = Arc::new(InMemoryCounterStore::new());
    let registry = Arc::new(ProfileRegistry::new(vec![profile("api", 100, false)]).unwrap());
    let engine = ConsumptionEngine::new(store, registry);
    let identities: Vec<String> = (0..1024).map(|i| format!("10.0.{}.{}", i / 256, i % 256)).collect();

    c.bench_function("consume_many_identities", |b| {
        let mut next = 0usize;
        b.to_async(&runtime).iter(|| {
            next = (next + 1) % identities.len();
            let identity = &identities[next];
            let engine = &engine;
            async move { black_box(engine.consume("api", identity).await.unwrap()) }
        })
    });
}

fn benchmark_smoothing_delay(c: &mut Criterion) {
    let profile = profile("smooth", 30, true);
    let snapshot = CounterSnapshot {
        count: 17,
        ttl: Duration::from_secs(41),
    };

    c.bench_function("smoothing_delay", |b| {
        b.iter(|| black_box(smoothing::delay_for(&profile, &snapshot)))
    });
}

fn benchmark_route_classification(c: &mut Criterion) {
    let rules = (0..50)
        .map(|i| RouteRule {
            prefix: format!("/api/v1/service{}", i),
            profile: "api".to_string(),
        })
        .chain(std::iter::once(RouteRule {
            prefix: "/api/auth".to_string(),
            profile: "auth".to_string(),
        }))
        .collect();
    let classifier = PrefixClassifier::new(rules, Some("global".to_string()));

    c.bench_function("route_classification", |b| {
        b.iter(|| black_box(classifier.profile_for("/api/v1/service42/orders/17")))
    });
}

criterion_group!(
    benches,
    benchmark_consume,
    benchmark_many_identities,
    benchmark_smoothing_delay,
    benchmark_route_classification
);
criterion_main!(benches);
