//! Benchmarks for selection filtering, route set building and reconcile planning.

use awsrangeroute::prefixes::{Prefix, PrefixSet, Selector};
use awsrangeroute::routes::{desired_routes, CustomRange};
use awsrangeroute::routing::plan;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ipnet::IpNet;
use std::hint::black_box;
use std::str::FromStr;

const REGIONS: usize = 30;
const SERVICES: usize = 12;

/// Feed-shaped prefixes spread over a fixed set of regions and services
fn generate_prefixes(count: usize) -> Vec<Prefix> {
    (0..count)
        .map(|i| Prefix {
            network: IpNet::from_str(&format!(
                "{}.{}.{}.0/24",
                3 + (i / 65536) % 200,
                (i / 256) % 256,
                i % 256
            ))
            .unwrap(),
            is_v6: false,
            region: format!("region-{}", i % REGIONS),
            service: format!("SERVICE{}", i % SERVICES),
        })
        .collect()
}

fn selectors(list: &[&str]) -> Vec<Selector> {
    list.iter().map(|s| s.parse().unwrap()).collect()
}

fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");

    for size in [1000, 10000, 50000] {
        let set = PrefixSet::from_prefixes(generate_prefixes(size));
        let first = selectors(&["region-1:*", "*:SERVICE3", "region-7:SERVICE7"]);
        let second = selectors(&["region-2:*", "*:SERVICE4"]);

        group.bench_with_input(BenchmarkId::new("cache_hit", size), &set, |b, set| {
            set.filter(&first);
            b.iter(|| black_box(set.filter(&first)));
        });

        // Alternating lists defeat the single-entry cache
        group.bench_with_input(BenchmarkId::new("cache_miss", size), &set, |b, set| {
            let mut flip = false;
            b.iter(|| {
                flip = !flip;
                black_box(set.filter(if flip { &first } else { &second }))
            });
        });
    }

    group.finish();
}

fn bench_desired_routes(c: &mut Criterion) {
    let mut group = c.benchmark_group("desired_routes");

    for size in [1000, 10000, 50000] {
        let prefixes = generate_prefixes(size);
        let customs: Vec<CustomRange> = (0..100)
            .map(|i| format!("10.{}.0.0/16", i).parse().unwrap())
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &prefixes, |b, prefixes| {
            b.iter(|| black_box(desired_routes(&customs, prefixes)));
        });
    }

    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");

    for size in [1000, 10000, 50000] {
        let desired = desired_routes(&[], &generate_prefixes(size));
        // Half of the table already matches, the rest is stale
        let existing: Vec<IpNet> = desired
            .iter()
            .step_by(2)
            .copied()
            .chain(
                (0..size / 2).map(|i| IpNet::from_str(&format!("172.16.{}.{}/32", i / 256 % 256, i % 256)).unwrap()),
            )
            .collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(size),
            &(existing, desired),
            |b, (existing, desired)| {
                b.iter(|| black_box(plan(existing, desired)));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_filter, bench_desired_routes, bench_plan);
criterion_main!(benches);
