//! Performance benchmarks for modircd core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use modircd_core::utils::string::{normalize_ban_mask, wildcard_match};
use modircd_core::*;

fn populated_xlines(count: usize) -> XLineManager {
    let mut xlines = XLineManager::new();
    for i in 0..count {
        let mask = format!("*@10.{}.{}.*", i / 256, i % 256);
        let duration = if i % 2 == 0 { 0 } else { 3600 + i as u64 };
        xlines.add(XLineClass::GLine, duration, "bench", "benchmark", &mask, 1_700_000_000);
    }
    xlines
}

fn benchmark_wildcard_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("wildcard_match");

    let cases = [
        ("*@*.example.com", "alice@host.example.com"),
        ("*!*@10.0.*.*", "bob!bob@10.0.42.7"),
        ("Serv?*", "ServBot"),
        ("*a*b*c*d*", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaab"),
    ];

    for (pattern, text) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(pattern), &(pattern, text), |b, (p, t)| {
            b.iter(|| wildcard_match(black_box(p), black_box(t)))
        });
    }

    group.bench_function("normalize_ban_mask", |b| {
        b.iter(|| normalize_ban_mask(black_box("user@host.example.com")))
    });

    group.finish();
}

fn benchmark_xline_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("xline_check");

    for count in [10usize, 100, 1000] {
        let xlines = populated_xlines(count);
        let subject = XLineSubject {
            nick: "alice",
            ident: "alice",
            host: "host.example.com",
            ip: "192.168.1.1",
        };
        group.bench_with_input(BenchmarkId::new("miss", count), &xlines, |b, xlines| {
            b.iter(|| xlines.check(black_box(&subject), ApplyMask::ALL, false).is_some())
        });

        let caught = XLineSubject {
            nick: "bob",
            ident: "bob",
            host: "bob.example.org",
            ip: "10.0.3.9",
        };
        group.bench_with_input(BenchmarkId::new("hit", count), &xlines, |b, xlines| {
            b.iter(|| xlines.check(black_box(&caught), ApplyMask::GLINES, false).is_some())
        });
    }

    group.finish();
}

fn benchmark_xline_expiry(c: &mut Criterion) {
    let mut group = c.benchmark_group("xline_expiry");

    for count in [100usize, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || populated_xlines(count),
                |mut xlines| xlines.expire(black_box(1_700_000_000 + 3600 + count as i64 / 2)),
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn benchmark_mode_processing(c: &mut Criterion) {
    let mut group = c.benchmark_group("mode_processing");

    let config: Config = "[server]\nname = \"irc.bench\"\n"
        .parse()
        .unwrap_or_default();
    let mut server = Server::new(config, ModuleCatalog::new());
    let mut ids = Vec::new();
    for i in 0..20 {
        let (client, rx) = Client::channel(format!("10.0.0.{}:40000", i));
        // Replies are discarded
        drop(rx);
        if let Ok(id) = server.add_client(client, &format!("10.0.0.{}", i), "bench.example.com") {
            server.register_user(id, &format!("user{}", i), "bench", "Bench");
            server.join_channel(id, "#bench", None);
            ids.push(id);
        }
    }
    let op = ids[0];
    let targets: Vec<String> = (1..4).map(|i| format!("user{}", i)).collect();

    group.bench_function("flags", |b| {
        b.iter(|| {
            server.process_mode(Some(op), "#bench", black_box("+mnt"), &[]);
            server.process_mode(Some(op), "#bench", black_box("-mnt"), &[]);
        })
    });

    group.bench_function("prefixes", |b| {
        b.iter(|| {
            server.process_mode(Some(op), "#bench", black_box("+vvv"), &targets);
            server.process_mode(Some(op), "#bench", black_box("-vvv"), &targets);
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_wildcard_match,
    benchmark_xline_check,
    benchmark_xline_expiry,
    benchmark_mode_processing
);

criterion_main!(benches);
