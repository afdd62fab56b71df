use assetkeep::testing::{LocalRegistry, TestAsset};
use assetkeep::{AssetHandle, Category, Group};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use keepcache::GroupedCache;

fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("add");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1000));

    group.bench_function("add_1000_handles", |b| {
        let registry = LocalRegistry::new();
        let handles: Vec<_> = (0..1000)
            .map(|i| {
                let g = Group::ALL[i % Group::ALL.len()];
                let c = Category::ALL[(i / 5) % Category::ALL.len()];
                AssetHandle::create(&registry, g, c, None).unwrap()
            })
            .collect();

        b.iter(|| {
            let mut cache = GroupedCache::new();
            for h in &handles {
                cache.add(h.group(), h.category(), h.clone());
            }
            black_box(cache.len());
        });
    });

    group.finish();
}

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");
    group.sample_size(50);

    group.bench_function("sweep_1000_live_handles", |b| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let registry = LocalRegistry::new();
        registry.loader().insert("tex", TestAsset::texture("tex"));

        let mut cache = GroupedCache::new();
        for i in 0..1000 {
            let g = Group::ALL[i % Group::ALL.len()];
            let h = AssetHandle::create(&registry, g, Category::Texture, None).unwrap();
            runtime.block_on(h.try_load::<TestAsset>("tex")).unwrap();
            h.enable_auto_release();
            cache.add(g, Category::Texture, h);
        }

        // Nothing is stale: measures the scan cost of a steady-state tick
        b.iter(|| black_box(cache.auto_release().len()));
    });

    group.finish();
}

criterion_group!(benches, bench_add, bench_sweep);
criterion_main!(benches);
