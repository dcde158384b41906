//! Benchmarks for the authorization decision path.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use warden_core::authz::{
    EffectivePermissionResolver, GrantRequest, Guard, GuardFactory, OverrideStore,
    PermissionCatalog, Principal, RoleName,
};

fn setup(cache: bool) -> (tokio::runtime::Runtime, Arc<EffectivePermissionResolver>) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let principals: Vec<String> = (0..100).map(|i| i.to_string()).collect();
    let mut store = OverrideStore::in_memory(Arc::new(PermissionCatalog::default()), principals);
    if cache {
        store = store.with_cache(chrono::Duration::seconds(30));
    }
    let store = Arc::new(store);
    rt.block_on(async {
        for perm in ["user:read:any", "booking:read:any", "address:update:any"] {
            store.grant(GrantRequest::new("42", perm, "0")).await.unwrap();
        }
    });
    (rt, Arc::new(EffectivePermissionResolver::new(store)))
}

fn bench_catalog_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalog_lookup");
    let catalog = PermissionCatalog::default();
    let role = RoleName::new("customer");
    group.bench_function("role_grants_hit", |b| { b.iter(|| black_box(catalog.role_grants(&role, "booking:create"))); });
    group.bench_function("role_grants_miss", |b| { b.iter(|| black_box(catalog.role_grants(&role, "user:delete:any"))); });
    group.bench_function("permissions_for_role", |b| { b.iter(|| black_box(catalog.permissions_for_role(&role))); });
    group.finish();
}

fn bench_has_permission(c: &mut Criterion) {
    let mut group = c.benchmark_group("has_permission");
    for cache in [false, true] {
        let (rt, resolver) = setup(cache);
        let principal = Principal::new("42", "customer");
        let label = if cache { "cached" } else { "uncached" };
        group.bench_with_input(BenchmarkId::new("role_default", label), &principal, |b, p| {
            b.iter(|| rt.block_on(async { black_box(resolver.has_permission(Some(p), "booking:create").await) }));
        });
        group.bench_with_input(BenchmarkId::new("override", label), &principal, |b, p| {
            b.iter(|| rt.block_on(async { black_box(resolver.has_permission(Some(p), "user:read:any").await) }));
        });
    }
    group.finish();
}

fn bench_guard_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("guard_check");
    let (rt, resolver) = setup(false);
    let factory = GuardFactory::new(resolver);
    let single = factory.require_permission("booking:create");
    let all = factory.require_all(["booking:create", "booking:read", "user:read"]);
    let principal = Principal::new("42", "customer");
    group.bench_function("require_permission", |b| {
        b.iter(|| rt.block_on(async { black_box(Guard::<()>::check(&single, Some(&principal), &()).await) }));
    });
    group.bench_function("require_all_3", |b| {
        b.iter(|| rt.block_on(async { black_box(Guard::<()>::check(&all, Some(&principal), &()).await) }));
    });
    group.finish();
}

criterion_group!(benches, bench_catalog_lookup, bench_has_permission, bench_guard_check);
criterion_main!(benches);
