use criterion::{black_box, criterion_group, criterion_main, Criterion};
use secops_pipeline::core::enforcement::{IsolationRule, RateLimitRule};
use secops_pipeline::core::{EnforcementEngine, MitigationSet};

fn loaded_engine() -> EnforcementEngine {
    let mut set = MitigationSet::default();
    for i in 0..50 {
        set.blocked_ips.insert(format!("10.0.0.{}", i));
    }
    for i in 0..20 {
        set.isolated_endpoints.push(IsolationRule {
            route: "/data/export".to_string(),
            ip: Some(format!("10.1.0.{}", i)),
            user_id: None,
        });
    }
    for i in 0..20 {
        set.rate_limits.push(RateLimitRule {
            key: None,
            ip: Some(format!("10.2.0.{}", i)),
            user_id: None,
            route: "/auth/login".to_string(),
            limit_rps: 1000.0,
        });
    }
    let mut engine = EnforcementEngine::new();
    engine.apply(set, 0);
    engine
}

fn gate_benchmark(c: &mut Criterion) {
    c.bench_function("gate_allow", |b| {
        let mut engine = loaded_engine();
        let mut now = 0u64;
        b.iter(|| {
            now += 1;
            black_box(engine.gate("192.168.1.1", Some("u1"), "/data/item/1", now))
        })
    });

    c.bench_function("gate_blocked_ip", |b| {
        let mut engine = loaded_engine();
        b.iter(|| black_box(engine.gate("10.0.0.7", None, "/auth/login", 0)))
    });

    c.bench_function("gate_rate_limited", |b| {
        let mut engine = loaded_engine();
        let mut now = 0u64;
        b.iter(|| {
            now += 1;
            black_box(engine.gate("10.2.0.7", None, "/auth/login", now))
        })
    });
}

criterion_group!(benches, gate_benchmark);
criterion_main!(benches);
