//! Returning idle memory to the page supplier.
//!
//! Pools and pool caches register with a [`DrainCoordinator`]. Each call to
//! [`DrainCoordinator::drain`] picks the next registered target that owns
//! pages, in name order, and reclaims it; a pool cache is invalidated
//! before its pool is reclaimed. Repeated calls walk all targets without
//! any single call scanning them all.

use std::sync::{Arc, Weak};

use kspin::SpinNoIrq;

#[cfg(feature = "log")]
use log::debug;

use crate::cache::PoolCache;
use crate::context;
use crate::pool::Pool;
use crate::stats::PoolSnapshot;

/// Something the coordinator can reclaim memory from.
pub trait Drainable: Send + Sync {
    fn name(&self) -> &str;

    /// Pages currently owned.
    fn page_count(&self) -> usize;

    /// Release idle memory; returns whether any page was freed.
    fn reclaim(&self) -> bool;

    fn snapshot(&self) -> PoolSnapshot;
}

impl Drainable for Pool {
    fn name(&self) -> &str {
        Pool::name(self)
    }

    fn page_count(&self) -> usize {
        self.stats().n_pages
    }

    fn reclaim(&self) -> bool {
        Pool::reclaim(self)
    }

    fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            name: self.name().to_string(),
            size: self.item_size(),
            pool: self.stats(),
            cache: None,
        }
    }
}

impl Drainable for PoolCache {
    fn name(&self) -> &str {
        PoolCache::name(self)
    }

    fn page_count(&self) -> usize {
        self.pool().stats().n_pages
    }

    fn reclaim(&self) -> bool {
        PoolCache::reclaim(self)
    }

    fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            name: self.name().to_string(),
            size: self.pool().item_size(),
            pool: self.pool().stats(),
            cache: Some(self.stats()),
        }
    }
}

/// Outcome of one [`DrainCoordinator::drain`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Name of the target that was reclaimed
    pub name: String,
    /// Whether any page went back to the supplier
    pub reclaimed: bool,
}

struct Entry {
    id: u64,
    name: String,
    target: Weak<dyn Drainable>,
}

struct Registry {
    /// Sorted by name
    entries: Vec<Entry>,
    /// Position of the next target to try
    cursor: usize,
    next_id: u64,
}

impl Registry {
    /// Forget targets that have been dropped.
    fn prune(&mut self) {
        self.entries.retain(|entry| entry.target.strong_count() > 0);
    }
}

/// Registry of drainable pools with a round-robin cursor.
pub struct DrainCoordinator {
    registry: SpinNoIrq<Registry>,
}

static GLOBAL: DrainCoordinator = DrainCoordinator::new();

impl DrainCoordinator {
    pub const fn new() -> Self {
        Self {
            registry: SpinNoIrq::new(Registry {
                entries: Vec::new(),
                cursor: 0,
                next_id: 0,
            }),
        }
    }

    /// The process-wide coordinator.
    pub fn global() -> &'static DrainCoordinator {
        &GLOBAL
    }

    /// Add `target`; it stays registered until the returned guard is
    /// dropped or the target itself is dropped.
    pub fn register<T>(&self, target: &Arc<T>) -> Registration<'_>
    where
        T: Drainable + 'static,
    {
        let weak: Weak<T> = Arc::downgrade(target);
        let weak: Weak<dyn Drainable> = weak;
        let name = target.name().to_string();

        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        let pos = registry.entries.partition_point(|entry| entry.name <= name);
        if pos < registry.cursor {
            registry.cursor += 1;
        }
        registry.entries.insert(pos, Entry { id, name, target: weak });
        Registration {
            coordinator: self,
            id,
        }
    }

    /// Number of live registered targets.
    pub fn len(&self) -> usize {
        let mut registry = self.registry.lock();
        registry.prune();
        registry.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reclaim the next target that owns pages.
    ///
    /// Returns `None` when no registered target owns any page.
    ///
    /// # Panics
    ///
    /// Panics from a context that may not sleep.
    pub fn drain(&self) -> Option<DrainReport> {
        context::assert_sleepable("pool drain", "*");

        let (start, candidates) = {
            let mut registry = self.registry.lock();
            registry.prune();
            let n = registry.entries.len();
            if n == 0 {
                return None;
            }
            let start = registry.cursor % n;
            let candidates: Vec<Weak<dyn Drainable>> = (0..n)
                .map(|i| registry.entries[(start + i) % n].target.clone())
                .collect();
            (start, candidates)
        };

        for (i, weak) in candidates.into_iter().enumerate() {
            let Some(target) = weak.upgrade() else {
                continue;
            };
            if target.page_count() == 0 {
                continue;
            }
            self.registry.lock().cursor = start + i + 1;

            let reclaimed = target.reclaim();
            debug!("drain: '{}' reclaimed: {}", target.name(), reclaimed);
            return Some(DrainReport {
                name: target.name().to_string(),
                reclaimed,
            });
        }
        None
    }

    /// Snapshots of every live target, in name order.
    pub fn snapshot_all(&self) -> Vec<PoolSnapshot> {
        let targets: Vec<Arc<dyn Drainable>> = {
            let registry = self.registry.lock();
            registry
                .entries
                .iter()
                .filter_map(|entry| entry.target.upgrade())
                .collect()
        };
        targets.iter().map(|target| target.snapshot()).collect()
    }

    fn unregister(&self, id: u64) {
        let mut registry = self.registry.lock();
        if let Some(pos) = registry.entries.iter().position(|entry| entry.id == id) {
            registry.entries.remove(pos);
            if pos < registry.cursor {
                registry.cursor -= 1;
            }
        }
    }
}

impl Default for DrainCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a target registered; unregisters on drop.
#[must_use = "the target is unregistered as soon as the guard is dropped"]
pub struct Registration<'a> {
    coordinator: &'a DrainCoordinator,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.coordinator.unregister(self.id);
    }
}

impl core::fmt::Debug for Registration<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}
