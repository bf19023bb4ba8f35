//! Integration tests for pools
//!
//! Exercises pools through the public API only, with the heap-backed page
//! supplier standing in for the kernel page allocator.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use slab_pool_allocator::{AllocError, GetFlags, HeapPageSupplier, Pool, PoolConfig, PoolFlags};

const PAGE_SIZE: usize = 0x1000;

fn supplier() -> Arc<HeapPageSupplier> {
    Arc::new(HeapPageSupplier::with_page_size(PAGE_SIZE))
}

/// Small deterministic generator for churn tests.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

#[test]
fn test_single_page_lists() {
    let pool = Pool::new(PoolConfig::new("sixty-four", 64), supplier()).unwrap();
    assert_eq!(pool.items_per_page(), 64);

    let mut items: Vec<_> = (0..64).map(|_| pool.get(GetFlags::NOWAIT).unwrap()).collect();
    assert_eq!(pool.page_lists(), (0, 0, 1));
    assert_eq!(pool.stats().n_pages, 1);

    let freed = items.pop().unwrap();
    let page = freed.as_ptr() as usize & !(PAGE_SIZE - 1);
    pool.put(freed);
    assert_eq!(pool.page_lists(), (0, 1, 0));
    assert_eq!(pool.current_page(), Some(page));

    for item in items {
        pool.put(item);
    }
    assert!(pool.check().is_ok());
}

#[test]
fn test_sizes_and_modes() {
    for &size in &[8, 24, 100, 500, 1000, 4000] {
        for flags in [PoolFlags::empty(), PoolFlags::NOTOUCH, PoolFlags::REDZONE] {
            let pool = Pool::new(PoolConfig::new("sweep", size).with_flags(flags), supplier()).unwrap();
            let count = pool.items_per_page() * 3 + 1;
            let mut addrs: Vec<usize> = (0..count)
                .map(|_| pool.get(GetFlags::NOWAIT).unwrap().as_ptr() as usize)
                .collect();
            for &addr in &addrs {
                unsafe { std::ptr::write_bytes(addr as *mut u8, 0x77, size) };
            }
            assert!(pool.check().is_ok(), "size {} flags {:?}", size, flags);

            addrs.sort_unstable();
            assert!(addrs.windows(2).all(|w| w[1] - w[0] >= size));
            for addr in addrs {
                pool.put(NonNull::new(addr as *mut u8).unwrap());
            }
            let stats = pool.stats();
            assert_eq!(stats.n_out, 0);
            assert_eq!(stats.n_items, stats.n_pages * stats.items_per_page);
        }
    }
}

#[test]
fn test_random_churn_keeps_invariants() {
    let pool = Pool::new(PoolConfig::new("churn", 200).with_flags(PoolFlags::REDZONE), supplier()).unwrap();
    let mut rng = Lcg(7);
    let mut live = Vec::new();
    for round in 0..5000 {
        if live.is_empty() || rng.next() % 3 != 0 {
            live.push(pool.get(GetFlags::NOWAIT).unwrap());
        } else {
            let victim = rng.next() as usize % live.len();
            pool.put(live.swap_remove(victim));
        }
        if round % 500 == 0 {
            assert!(pool.check().is_ok());
            assert_eq!(pool.stats().n_out, live.len());
        }
    }
    for item in live {
        pool.put(item);
    }
    assert!(pool.check().is_ok());
}

#[test]
fn test_blocking_get_waits_for_put() {
    let pool = Pool::new(PoolConfig::new("limited", 64), supplier()).unwrap();
    pool.set_hard_limit(1, None, Duration::ZERO);
    let held = pool.get(GetFlags::NOWAIT).unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        let waiter = s.spawn(|| {
            let item = pool.get(GetFlags::WAITOK).unwrap();
            done.store(true, Ordering::SeqCst);
            item.as_ptr() as usize
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));
        pool.put(held);

        let addr = waiter.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        pool.put(NonNull::new(addr as *mut u8).unwrap());
    });
    assert_eq!(pool.stats().n_out, 0);
}

#[test]
fn test_blocking_get_waits_for_supplier() {
    let supplier = Arc::new(HeapPageSupplier::with_limit(PAGE_SIZE, 1));
    let config = PoolConfig::new("first", 2048).with_inactive_time(Duration::ZERO);
    let first = Pool::new(config, supplier.clone()).unwrap();
    let second = Pool::new(PoolConfig::new("second", 2048), supplier.clone()).unwrap();

    let item = first.get(GetFlags::NOWAIT).unwrap();
    first.put(item);
    assert_eq!(second.get(GetFlags::NOWAIT), Err(AllocError::NoMemory));

    thread::scope(|s| {
        let waiter = s.spawn(|| second.get(GetFlags::WAITOK).map(|item| item.as_ptr() as usize));
        thread::sleep(Duration::from_millis(50));
        assert!(first.reclaim());

        let addr = waiter.join().unwrap().unwrap();
        second.put(NonNull::new(addr as *mut u8).unwrap());
    });
    assert_eq!(supplier.in_use_pages(), 1);
}

#[test]
fn test_reclaim_floor_with_all_pages_idle() {
    let config = PoolConfig::new("floor", 1024).with_inactive_time(Duration::ZERO);
    let supplier = supplier();
    let pool = Pool::new(config, supplier.clone()).unwrap();
    pool.set_low_watermark(8);
    assert_eq!(pool.stats().min_pages, 2);

    let items: Vec<_> = (0..40).map(|_| pool.get(GetFlags::NOWAIT).unwrap()).collect();
    for item in items {
        pool.put(item);
    }
    assert!(pool.stats().n_pages > 2);

    pool.reclaim();
    let stats = pool.stats();
    assert!(stats.n_pages >= 2);
    assert!(stats.n_items >= 8);
    assert_eq!(supplier.in_use_pages(), stats.n_pages);
}

#[test]
fn test_concurrent_get_put() {
    let pool = Pool::new(PoolConfig::new("shared", 96).with_flags(PoolFlags::REDZONE), supplier()).unwrap();
    thread::scope(|s| {
        for t in 0..4u8 {
            let pool = &pool;
            s.spawn(move || {
                let mut held = Vec::new();
                for i in 0..2000 {
                    let item = pool.get(GetFlags::NOWAIT).unwrap();
                    unsafe { std::ptr::write_bytes(item.as_ptr(), t, 96) };
                    held.push(item);
                    if i % 4 == 3 {
                        for item in held.drain(..) {
                            assert_eq!(unsafe { *item.as_ptr() }, t);
                            pool.put(item);
                        }
                    }
                }
                for item in held {
                    pool.put(item);
                }
            });
        }
    });
    assert_eq!(pool.stats().n_out, 0);
    assert!(pool.check().is_ok());
}

#[test]
fn test_invalid_configurations() {
    assert_eq!(
        Pool::new(PoolConfig::new("huge", PAGE_SIZE + 1), supplier()).unwrap_err(),
        AllocError::InvalidParam
    );
    assert_eq!(
        Pool::new(PoolConfig::new("odd", 64).with_align(12), supplier()).unwrap_err(),
        AllocError::InvalidParam
    );
    assert_eq!(
        Pool::new(PoolConfig::new("zero", 0), supplier()).unwrap_err(),
        AllocError::InvalidParam
    );
    assert_eq!(
        Pool::new(PoolConfig::new("overflow", usize::MAX), supplier()).unwrap_err(),
        AllocError::InvalidParam
    );
}
