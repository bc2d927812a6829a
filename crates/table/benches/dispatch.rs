//! Dispatch hot-path benchmarks
//!
//! Destinations point at a closed loopback port; the bench measures the
//! table pipeline (tokenize, blacklist, rewrite, match, enqueue), not
//! socket throughput.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use spindle_matcher::Matcher;
use spindle_rewriter::Rewriter;
use spindle_route::{Destination, DestinationConfig, SendAllMatch};
use spindle_table::Table;

async fn build_table() -> Arc<Table> {
    let table = Table::new("spool");
    table
        .add_blacklist(Matcher::new("junk.", "", "").unwrap())
        .await;
    table
        .add_rewriter(Rewriter::new("prod.", "p.", 1).unwrap())
        .await;

    let dest = Destination::spawn(DestinationConfig::new("127.0.0.1:1"), "spool").unwrap();
    let route = SendAllMatch::new("main", Matcher::new("p.", "", "").unwrap(), vec![dest]).unwrap();
    table.add_route(route).await;
    table
}

fn bench_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let table = rt.block_on(build_table());

    c.bench_function("dispatch_routed", |b| {
        b.iter(|| {
            rt.block_on(table.dispatch(black_box(b"prod.service.api.requests 42 1700000000")))
        })
    });

    c.bench_function("dispatch_blacklisted", |b| {
        b.iter(|| rt.block_on(table.dispatch(black_box(b"junk.service.noise 1 1700000000"))))
    });

    c.bench_function("dispatch_unroutable", |b| {
        b.iter(|| rt.block_on(table.dispatch(black_box(b"other.service.metric 1 1700000000"))))
    });
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
