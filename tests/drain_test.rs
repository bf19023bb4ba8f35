//! Integration tests for the drain coordinator
//!
//! Several pools share one page supplier with a hard page budget; draining
//! must move pages from idle pools to pools that need them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use slab_pool_allocator::{
    AllocError, CacheOps, DrainCoordinator, GetFlags, HeapPageSupplier, Pool, PoolCache, PoolConfig,
    SingleCpu,
};

const PAGE_SIZE: usize = 0x1000;

fn idle_config(name: &str, size: usize) -> PoolConfig {
    PoolConfig::new(name, size).with_inactive_time(Duration::ZERO)
}

#[test]
fn test_drain_moves_pages_between_pools() {
    let supplier = Arc::new(HeapPageSupplier::with_limit(PAGE_SIZE, 2));
    let coordinator = DrainCoordinator::new();

    let idle = Arc::new(Pool::new(idle_config("idle", 1024), supplier.clone()).unwrap());
    let busy = Arc::new(Pool::new(idle_config("busy", 1024), supplier.clone()).unwrap());
    let _r1 = coordinator.register(&idle);
    let _r2 = coordinator.register(&busy);

    let items: Vec<_> = (0..8).map(|_| idle.get(GetFlags::NOWAIT).unwrap()).collect();
    for item in items {
        idle.put(item);
    }
    assert_eq!(supplier.in_use_pages(), 2);
    assert_eq!(busy.get(GetFlags::NOWAIT), Err(AllocError::NoMemory));

    let report = coordinator.drain().unwrap();
    assert_eq!(report.name, "idle");
    assert!(report.reclaimed);
    assert_eq!(supplier.in_use_pages(), 0);

    let item = busy.get(GetFlags::NOWAIT).unwrap();
    busy.put(item);
}

#[test]
fn test_drain_hook_calls_coordinator() {
    let supplier = Arc::new(HeapPageSupplier::with_limit(PAGE_SIZE, 1));
    let coordinator = Arc::new(DrainCoordinator::new());

    let idle = Arc::new(Pool::new(idle_config("holder", 2048), supplier.clone()).unwrap());
    let reg = coordinator.register(&idle);
    let item = idle.get(GetFlags::NOWAIT).unwrap();
    idle.put(item);

    let hook_runs = Arc::new(AtomicUsize::new(0));
    let needy = Pool::new(PoolConfig::new("needy", 2048), supplier.clone()).unwrap();
    {
        let coordinator = coordinator.clone();
        let hook_runs = hook_runs.clone();
        needy.set_drain_hook(move |_| {
            hook_runs.fetch_add(1, Ordering::Relaxed);
            coordinator.drain();
        });
    }

    // The supplier is out of pages; the hook frees the idle one and the
    // allocation is retried.
    let item = needy.get(GetFlags::NOWAIT).unwrap();
    assert_eq!(hook_runs.load(Ordering::Relaxed), 1);
    assert_eq!(idle.stats().n_pages, 0);
    needy.put(item);
    drop(reg);
}

#[test]
fn test_drain_walks_caches_and_pools() {
    let supplier = Arc::new(HeapPageSupplier::with_page_size(PAGE_SIZE));
    let coordinator = DrainCoordinator::new();

    let cache = Arc::new(
        PoolCache::new(idle_config("b-cache", 64), supplier.clone(), CacheOps::new(), Arc::new(SingleCpu))
            .unwrap(),
    );
    let pool = Arc::new(Pool::new(idle_config("a-pool", 64), supplier.clone()).unwrap());
    let _r1 = coordinator.register(&cache);
    let _r2 = coordinator.register(&pool);

    let items: Vec<_> = (0..20).map(|_| cache.get(GetFlags::NOWAIT).unwrap()).collect();
    for item in items {
        cache.put(item);
    }
    let item = pool.get(GetFlags::NOWAIT).unwrap();
    pool.put(item);
    assert_eq!(supplier.in_use_pages(), 2);

    let names: Vec<_> = (0..2).map(|_| coordinator.drain().unwrap().name).collect();
    assert_eq!(names, ["a-pool", "b-cache"]);
    assert_eq!(cache.pool().stats().n_out, 0);
    assert_eq!(supplier.in_use_pages(), 0);
    assert_eq!(coordinator.drain(), None);

    let listing = coordinator.snapshot_all();
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[1].cache.unwrap().nfull, 0);
    assert_eq!(listing[0].pool.npagefree, 1);
}
