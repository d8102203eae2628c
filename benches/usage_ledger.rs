//! Benchmark for the usage ledger and allocation path

use block_device_plugin::config::DevicePluginConfig;
use block_device_plugin::hardware::{
    apply_exclude_filters, ContainerRequest, DeviceAllocator, UsageLedger,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;

fn devices(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("/dev/dm-{}", i)).collect()
}

fn bench_reserve(c: &mut Criterion) {
    let mut group = c.benchmark_group("usage_ledger");
    group.throughput(Throughput::Elements(1));

    let available = devices(64);

    group.bench_function("reserve_single_container", |b| {
        let ledger = UsageLedger::new();
        b.iter(|| {
            let _ = ledger.reserve(1, black_box(&available), u32::MAX);
        });
    });

    group.bench_function("reserve_full_ledger", |b| {
        let ledger = UsageLedger::new();
        for device in &available {
            ledger.set_usage(device.as_str(), 1);
        }
        b.iter(|| {
            let _ = ledger.reserve(black_box(1), &available, 1);
        });
    });

    group.finish();
}

fn bench_allocate_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocator");
    group.throughput(Throughput::Elements(8));

    let available = devices(16);
    let config = DevicePluginConfig {
        upper_limit: 1_000_000,
        permissions: "rw".into(),
        ..Default::default()
    };
    let requests = vec![ContainerRequest::default(); 8];

    group.bench_function("allocate_8_containers", |b| {
        let allocator = DeviceAllocator::new(Arc::new(UsageLedger::new()));
        b.iter(|| {
            let _ = allocator.allocate(black_box(&requests), &available, &config);
        });
    });

    group.finish();
}

fn bench_concurrent_reserve(c: &mut Criterion) {
    let mut group = c.benchmark_group("usage_ledger");
    group.throughput(Throughput::Elements(100));

    let available = Arc::new(devices(32));
    let rt = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("concurrent_100_reservations", |b| {
        b.iter(|| {
            let ledger = Arc::new(UsageLedger::new());
            rt.block_on(async {
                let mut handles = Vec::new();
                for _ in 0..100 {
                    let ledger = ledger.clone();
                    let available = available.clone();
                    handles.push(tokio::spawn(async move {
                        let _ = ledger.reserve(1, &available, 4);
                    }));
                }
                for handle in handles {
                    let _ = handle.await;
                }
            });
        });
    });

    group.finish();
}

fn bench_exclude_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");

    let all = devices(256);
    let excludes: Vec<String> = vec!["/dev/dm-1*".into(), "/dev/dm-2?".into()];

    group.bench_function("exclude_256_devices", |b| {
        b.iter(|| apply_exclude_filters(black_box(all.clone()), &excludes));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_reserve,
    bench_allocate_batch,
    bench_concurrent_reserve,
    bench_exclude_filter,
);
criterion_main!(benches);
