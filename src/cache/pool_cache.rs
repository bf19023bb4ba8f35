//! The pool cache: per-CPU groups over global group lists over a pool.
//!
//! Lock order is the per-CPU slot first, then the global lists. Neither is
//! held while calling into the pool or running a constructor or destructor.

use core::mem;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use kspin::SpinNoIrq;
use parking_lot::{Mutex, MutexGuard};

#[cfg(feature = "log")]
use log::{debug, trace};

use super::cache_group::{CacheGroup, CachedObject};
use super::{CacheOps, GroupSize};
use crate::context;
use crate::cpu::CpuTopology;
use crate::pool::{GetFlags, ItemInfo, ItemState, Pool, PoolConfig};
use crate::stats::CacheStats;
use crate::{AddrTranslator, AllocError, AllocResult, PageSupplier};

/// The two groups of one CPU.
///
/// `None` stands for the shared sentinel group, which is empty to `get`
/// and full to `put`.
#[derive(Default)]
struct CpuCache {
    current: Option<Box<CacheGroup>>,
    previous: Option<Box<CacheGroup>>,
}

impl CpuCache {
    fn take_all(&mut self) -> impl Iterator<Item = Box<CacheGroup>> {
        [self.current.take(), self.previous.take()].into_iter().flatten()
    }
}

struct CpuSlot {
    cache: SpinNoIrq<CpuCache>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CpuSlot {
    fn new() -> Self {
        Self {
            cache: SpinNoIrq::new(CpuCache::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

#[derive(Default)]
struct GlobalGroups {
    full: Vec<Box<CacheGroup>>,
    empty: Vec<Box<CacheGroup>>,
    partial: Vec<Box<CacheGroup>>,
}

impl GlobalGroups {
    /// File a group on the list matching its fill level.
    fn file(&mut self, group: Box<CacheGroup>) {
        if group.is_full() {
            self.full.push(group);
        } else if group.is_empty() {
            self.empty.push(group);
        } else {
            self.partial.push(group);
        }
    }

    fn groups(&self) -> impl Iterator<Item = &CacheGroup> {
        self.full
            .iter()
            .chain(&self.empty)
            .chain(&self.partial)
            .map(|group| &**group)
    }
}

/// A [`Pool`] with per-CPU caches of constructed objects.
///
/// Objects come back from `get` already constructed; the destructor only
/// runs when an object leaves the cache for the pool, so a constructed
/// object may be handed out many times.
pub struct PoolCache {
    pool: Pool,
    ops: CacheOps,
    group_size: GroupSize,
    topology: Arc<dyn CpuTopology>,
    cpus: Box<[CpuSlot]>,
    global: Mutex<GlobalGroups>,
    caching: AtomicBool,
    translator: SpinNoIrq<Option<Arc<dyn AddrTranslator>>>,

    contended: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    nfull: AtomicUsize,
    npart: AtomicUsize,
    nempty: AtomicUsize,
}

impl PoolCache {
    /// Create a pool and a cache in front of it, with one cache slot per
    /// CPU of `topology`.
    pub fn new(
        config: PoolConfig,
        supplier: Arc<dyn PageSupplier>,
        ops: CacheOps,
        topology: Arc<dyn CpuTopology>,
    ) -> AllocResult<Self> {
        let group_size = GroupSize::for_flags(config.flags);
        let pool = Pool::new(config, supplier)?;
        let ncpu = topology.cpu_count();
        if ncpu == 0 {
            return Err(AllocError::InvalidParam);
        }
        debug!(
            "pool cache '{}': {} CPUs, {} objects per group",
            pool.name(),
            ncpu,
            group_size.capacity()
        );

        Ok(Self {
            pool,
            ops,
            group_size,
            topology,
            cpus: (0..ncpu).map(|_| CpuSlot::new()).collect(),
            global: Mutex::new(GlobalGroups::default()),
            caching: AtomicBool::new(true),
            translator: SpinNoIrq::new(None),
            contended: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            nfull: AtomicUsize::new(0),
            npart: AtomicUsize::new(0),
            nempty: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        self.pool.name()
    }

    /// The wrapped pool, for watermarks, limits and statistics.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn group_size(&self) -> GroupSize {
        self.group_size
    }

    /// Record physical addresses of objects fetched from the pool.
    pub fn set_addr_translator(&self, translator: Arc<dyn AddrTranslator>) {
        *self.translator.lock() = Some(translator);
    }

    /// With caching off, `put` never sets up new groups and hands objects
    /// back to the pool once the existing groups are full.
    pub fn set_caching_enabled(&self, enabled: bool) {
        self.caching.store(enabled, Ordering::Relaxed);
    }

    /// Allocate a constructed object.
    ///
    /// # Panics
    ///
    /// Panics when called above the pool's IPL, or with `WAITOK` from a
    /// context that may not sleep.
    pub fn get(&self, flags: GetFlags) -> AllocResult<NonNull<u8>> {
        self.get_paddr(flags).map(|(object, _)| object)
    }

    /// Allocate a constructed object along with its physical address, if
    /// an address translator is installed.
    pub fn get_paddr(&self, flags: GetFlags) -> AllocResult<(NonNull<u8>, Option<usize>)> {
        context::assert_ipl(self.pool.ipl(), self.name());
        if flags.can_wait() {
            context::assert_sleepable("pool cache get", self.name());
        }

        loop {
            let slot = self.slot();
            let mut guard = slot.cache.lock();
            let cc = &mut *guard;

            if let Some(object) = cc.current.as_mut().and_then(|group| group.pop()) {
                slot.hits.fetch_add(1, Ordering::Relaxed);
                drop(guard);
                let item = object.object();
                self.pool.fill_redzone(item);
                return Ok((item, object.pa));
            }

            // The previous group may still hold objects.
            if cc.previous.as_ref().is_some_and(|group| !group.is_empty()) {
                mem::swap(&mut cc.current, &mut cc.previous);
                continue;
            }

            slot.misses.fetch_add(1, Ordering::Relaxed);
            if !self.get_slow(cc) {
                break;
            }
        }

        let object = self.pool.get(flags)?;
        if let Err(err) = self.ops.construct(object, flags) {
            self.pool.put(object);
            return Err(err);
        }
        let pa = self.translate(object);
        Ok((object, pa))
    }

    /// Return an object obtained from this cache.
    ///
    /// # Panics
    ///
    /// Panics on a damaged redzone or when called above the pool's IPL.
    pub fn put(&self, object: NonNull<u8>) {
        self.put_paddr(object, None);
    }

    /// Return an object, remembering its physical address for the next
    /// `get_paddr`.
    pub fn put_paddr(&self, object: NonNull<u8>, pa: Option<usize>) {
        context::assert_ipl(self.pool.ipl(), self.name());
        self.pool.check_redzone(object);
        let object = CachedObject::new(object, pa);

        loop {
            let slot = self.slot();
            let mut guard = slot.cache.lock();
            let cc = &mut *guard;

            if let Some(Ok(())) = cc.current.as_mut().map(|group| group.push(object)) {
                slot.hits.fetch_add(1, Ordering::Relaxed);
                return;
            }

            // The previous group may still have room.
            if cc.previous.as_ref().is_some_and(|group| !group.is_full()) {
                mem::swap(&mut cc.current, &mut cc.previous);
                continue;
            }

            slot.misses.fetch_add(1, Ordering::Relaxed);
            if !self.put_slow(cc) {
                break;
            }
        }

        self.destruct(object);
    }

    /// Empty the cache: move every CPU's groups to the global lists, then
    /// destruct every cached object and give it back to the pool.
    ///
    /// # Panics
    ///
    /// Panics from a context that may not sleep.
    pub fn invalidate(&self) {
        context::assert_sleepable("pool cache invalidate", self.name());
        if self.cpus.len() < 2 {
            self.transfer(0);
        } else {
            self.topology.for_each_cpu(&|cpu| self.transfer(cpu));
        }

        let groups = {
            let mut global = self.global.lock();
            let GlobalGroups {
                full,
                empty,
                partial,
            } = mem::take(&mut *global);
            self.publish(&global);
            full.into_iter().chain(empty).chain(partial)
        };

        let mut count = 0;
        for mut group in groups {
            count += group.len();
            for object in group.drain() {
                self.destruct(object);
            }
        }
        trace!("pool cache '{}': invalidated {} objects", self.name(), count);
    }

    /// Invalidate the cache, then release idle pages of the pool.
    pub fn reclaim(&self) -> bool {
        self.invalidate();
        self.pool.reclaim()
    }

    /// Counter snapshot; takes no locks.
    pub fn stats(&self) -> CacheStats {
        let (cpu_hits, cpu_misses) = self.cpus.iter().fold((0, 0), |(hits, misses), slot| {
            (
                hits + slot.hits.load(Ordering::Relaxed),
                misses + slot.misses.load(Ordering::Relaxed),
            )
        });
        CacheStats {
            nfull: self.nfull.load(Ordering::Relaxed),
            npart: self.npart.load(Ordering::Relaxed),
            nempty: self.nempty.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            cpu_hits,
            cpu_misses,
        }
    }

    /// Like [`Pool::locate`], but tells cached objects from allocated ones.
    pub fn locate(&self, addr: usize) -> Option<ItemInfo> {
        let mut info = self.pool.locate(addr)?;
        if info.state != ItemState::Allocated {
            return Some(info);
        }

        for (cpu, slot) in self.cpus.iter().enumerate() {
            let cc = slot.cache.lock();
            let cached = [&cc.current, &cc.previous]
                .into_iter()
                .flatten()
                .any(|group| group.contains(info.item));
            if cached {
                info.state = ItemState::CachedCpu(cpu);
                return Some(info);
            }
        }
        if self.global.lock().groups().any(|group| group.contains(info.item)) {
            info.state = ItemState::CachedGlobal;
        }
        Some(info)
    }

    fn slot(&self) -> &CpuSlot {
        &self.cpus[self.topology.current_cpu() % self.cpus.len()]
    }

    fn lock_global(&self) -> MutexGuard<'_, GlobalGroups> {
        match self.global.try_lock() {
            Some(global) => global,
            None => {
                self.contended.fetch_add(1, Ordering::Relaxed);
                self.global.lock()
            }
        }
    }

    /// Install a full group from the global list. Returns `false` if there
    /// is none and the caller must go to the pool.
    fn get_slow(&self, cc: &mut CpuCache) -> bool {
        let mut global = self.lock_global();
        let Some(full) = global.full.pop() else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        if let Some(empty) = cc.current.replace(full) {
            global.empty.push(empty);
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.publish(&global);
        true
    }

    /// Install an empty group, moving the full current one to the global
    /// list. Returns `false` if no group can be had and the caller must
    /// give the object to the pool.
    fn put_slow(&self, cc: &mut CpuCache) -> bool {
        let mut global = self.lock_global();
        let group = match global.empty.pop() {
            Some(group) => group,
            None if self.caching.load(Ordering::Relaxed) => CacheGroup::new(self.group_size),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        if cc.previous.is_none() {
            cc.previous = Some(group);
        } else if let Some(full) = cc.current.replace(group) {
            global.full.push(full);
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.publish(&global);
        true
    }

    /// Move the groups of `cpu` to the global lists.
    fn transfer(&self, cpu: usize) {
        let mut cc = self.cpus[cpu].cache.lock();
        let mut global = self.global.lock();
        for group in cc.take_all() {
            global.file(group);
        }
        self.publish(&global);
    }

    fn destruct(&self, object: CachedObject) {
        let object = object.object();
        self.ops.destruct(object);
        self.pool.put(object);
    }

    fn translate(&self, object: NonNull<u8>) -> Option<usize> {
        let translator = self.translator.lock().clone()?;
        translator.virt_to_phys(object.as_ptr() as usize)
    }

    fn publish(&self, global: &GlobalGroups) {
        self.nfull.store(global.full.len(), Ordering::Relaxed);
        self.npart.store(global.partial.len(), Ordering::Relaxed);
        self.nempty.store(global.empty.len(), Ordering::Relaxed);
    }
}

impl Drop for PoolCache {
    fn drop(&mut self) {
        let mut groups: Vec<Box<CacheGroup>> = Vec::new();
        for slot in self.cpus.iter_mut() {
            groups.extend(slot.cache.get_mut().take_all());
        }
        let global = mem::take(self.global.get_mut());
        groups.extend(global.full.into_iter().chain(global.empty).chain(global.partial));

        for mut group in groups {
            for object in group.drain() {
                self.destruct(object);
            }
        }
    }
}

impl core::fmt::Debug for PoolCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolCache")
            .field("pool", &self.pool)
            .field("group_size", &self.group_size)
            .field("cpus", &self.cpus.len())
            .field("stats", &self.stats())
            .finish()
    }
}
