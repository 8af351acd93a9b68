//! Criterion benchmarks for [`ServerAddress`] parsing.
//!
//! Address parsing runs once per server start, so this is not a hot path;
//! the benchmark exists to catch accidental quadratic behaviour in the
//! scheme and TCP grammar checks.
//!
//! Run with:
//! ```bash
//! cargo bench --package netpool-core --bench address_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use netpool_core::{ServerAddress, ServerOptions};

/// Benchmarks parsing of each supported scheme.
fn bench_parse_schemes(c: &mut Criterion) {
    let inputs = [
        ("tcp_v4", "tcp://127.0.0.1:7878"),
        ("tcp_v6", "tcp://[::1]:7878"),
        ("ssl", "ssl://0.0.0.0:8443"),
        ("local", "local:///run/netpool/control.sock"),
    ];
    let mut group = c.benchmark_group("server_address_parse");

    for (label, uri) in inputs {
        group.bench_with_input(BenchmarkId::from_parameter(label), &uri, |b, uri| {
            b.iter(|| ServerAddress::parse(black_box(uri)))
        });
    }

    group.finish();
}

/// Benchmarks the rejection path for malformed addresses.
fn bench_parse_invalid(c: &mut Criterion) {
    c.bench_function("server_address_parse_invalid", |b| {
        b.iter(|| ServerAddress::parse(black_box("tcp://not-an-address:/")))
    });
}

/// Benchmarks option validation.
fn bench_validate_options(c: &mut Criterion) {
    let opts = ServerOptions::default()
        .with_min_workers(4)
        .with_max_workers(64)
        .with_max_pending_connections(128);
    c.bench_function("server_options_validate", |b| {
        b.iter(|| black_box(&opts).validate())
    });
}

criterion_group!(
    benches,
    bench_parse_schemes,
    bench_parse_invalid,
    bench_validate_options,
);
criterion_main!(benches);
