//! The pool: page lists, item allocation, watermarks and the hard limit.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use kspin::SpinNoIrq;
use parking_lot::{Condvar, Mutex, MutexGuard};

#[cfg(feature = "log")]
use log::{debug, error, trace, warn};

use super::geometry::Geometry;
use super::page_header::{PageHeader, PageList};
use super::page_index::PageIndex;
use super::page_list::{PageArena, PageQueue};
use super::{GetFlags, ItemInfo, ItemState, PoolConfig, PoolFlags};
use crate::context::{self, Ipl};
use crate::stats::PoolStats;
use crate::{is_aligned, AllocError, AllocResult, PageSupplier};

/// Callback run when the pool is short of memory; it should return items.
pub(crate) type DrainHook = Arc<dyn Fn(GetFlags) + Send + Sync>;

/// Throttle for the hard-limit warning: one message per period, or every
/// message when the period is zero.
struct WarningRate(Option<DefaultDirectRateLimiter>);

impl WarningRate {
    fn new(ratecap: Duration) -> Self {
        Self(Quota::with_period(ratecap).map(RateLimiter::direct))
    }

    fn allow(&self) -> bool {
        self.0.as_ref().map_or(true, |limiter| limiter.check().is_ok())
    }
}

/// State protected by the pool lock.
struct PoolInner {
    arena: PageArena,
    empty: PageQueue,
    partial: PageQueue,
    full: PageQueue,
    /// Page the next item comes from; never a full page
    curpage: Option<u32>,
    index: PageIndex,
    cur_color: usize,

    n_items: usize,
    n_out: usize,
    n_pages: usize,
    n_idle: usize,
    hiwat: usize,

    min_items: usize,
    min_pages: usize,
    max_pages: usize,
    hard_limit: usize,
    limit_warning: Option<String>,
    limit_rate: WarningRate,
    /// Someone sleeps on the condition variable
    wanted: bool,

    nget: u64,
    nfail: u64,
    nput: u64,
    npagealloc: u64,
    npagefree: u64,
}

impl PoolInner {
    fn new() -> Self {
        Self {
            arena: PageArena::new(),
            empty: PageQueue::new(PageList::Empty),
            partial: PageQueue::new(PageList::Partial),
            full: PageQueue::new(PageList::Full),
            curpage: None,
            index: PageIndex::new(),
            cur_color: 0,
            n_items: 0,
            n_out: 0,
            n_pages: 0,
            n_idle: 0,
            hiwat: 0,
            min_items: 0,
            min_pages: 0,
            max_pages: usize::MAX,
            hard_limit: usize::MAX,
            limit_warning: None,
            limit_rate: WarningRate::new(Duration::ZERO),
            wanted: false,
            nget: 0,
            nfail: 0,
            nput: 0,
            npagealloc: 0,
            npagefree: 0,
        }
    }

    fn unlink(&mut self, id: u32) {
        let list = self.arena[id].list;
        let Self {
            arena,
            empty,
            partial,
            full,
            ..
        } = self;
        let queue = match list {
            PageList::Empty => empty,
            PageList::Partial => partial,
            PageList::Full => full,
        };
        queue.remove(arena, id);
    }

    fn link(&mut self, id: u32, list: PageList) {
        let Self {
            arena,
            empty,
            partial,
            full,
            ..
        } = self;
        let queue = match list {
            PageList::Empty => empty,
            PageList::Partial => partial,
            PageList::Full => full,
        };
        queue.push_front(arena, id);
    }

    fn move_page(&mut self, id: u32, to: PageList) {
        self.unlink(id);
        self.link(id, to);
    }

    /// Prefer partially used pages over idle ones.
    fn update_curpage(&mut self) {
        self.curpage = self.partial.front().or_else(|| self.empty.front());
    }

    /// Add a fresh page to the empty list.
    fn prime_page(&mut self, geo: &Geometry, name: &str, page: usize) {
        if !geo.noalign && !is_aligned(page, geo.page_size) {
            error!("pool '{}': supplier returned unaligned page {:#x}", name, page);
            panic!("pool '{}': unaligned page {:#x}", name, page);
        }

        let off = self.cur_color;
        self.cur_color = geo.next_color(off);

        let id = self.arena.insert(PageHeader::new(page, off, geo));
        self.index.attach(geo, page, id);
        self.link(id, PageList::Empty);

        self.n_idle += 1;
        self.n_items += geo.items_per_page;
        if self.curpage.is_none() {
            self.curpage = Some(id);
        }
        self.n_pages += 1;
        self.hiwat = self.hiwat.max(self.n_pages);
        self.npagealloc += 1;
        trace!("pool '{}': page {:#x} added, colour {}", name, page, off);
    }

    /// Take one item from page `id`.
    fn take_item(&mut self, geo: &Geometry, name: &str, id: u32) -> usize {
        if self.n_items == 0 {
            error!("pool '{}': curpage set, but no items", name);
            panic!("pool '{}': nitems inconsistent", name);
        }

        let header = &mut self.arena[id];
        let addr = header.take(geo, name);
        let nmissing = header.nmissing;

        self.n_items -= 1;
        self.n_out += 1;
        if nmissing == 1 {
            // Previously empty; it already is the current page.
            self.n_idle -= 1;
            self.move_page(id, PageList::Partial);
        }
        if nmissing == geo.items_per_page {
            self.move_page(id, PageList::Full);
            self.update_curpage();
        }
        addr
    }

    /// Return an item, handing back the page if it should be released.
    fn put_item(&mut self, geo: &Geometry, name: &str, addr: usize) -> Option<usize> {
        if self.n_out == 0 {
            error!("pool '{}': putting with none out", name);
            panic!("pool '{}': put of {:#x} with no items out", name, addr);
        }
        let Some(id) = self.index.find(geo, &self.arena, addr) else {
            error!("pool '{}': no page for {:#x}", name, addr);
            panic!("pool '{}': page header missing for {:#x}", name, addr);
        };

        let header = &mut self.arena[id];
        header.give(addr, geo, name);
        let nmissing = header.nmissing;

        self.nput += 1;
        self.n_items += 1;
        self.n_out -= 1;

        if self.curpage.is_none() {
            self.curpage = Some(id);
        }

        if nmissing == 0 {
            self.n_idle += 1;
            if self.n_pages > self.min_pages && self.n_pages > self.max_pages {
                return Some(self.remove_page(geo, id));
            }
            self.move_page(id, PageList::Empty);
            self.arena[id].time = Instant::now();
            self.update_curpage();
        } else if nmissing == geo.items_per_page - 1 {
            // Refill this page before fragmenting others.
            self.move_page(id, PageList::Partial);
            self.curpage = Some(id);
        }
        None
    }

    /// Detach an empty page, returning its address for release.
    fn remove_page(&mut self, geo: &Geometry, id: u32) -> usize {
        if self.arena[id].nmissing == 0 {
            self.n_idle -= 1;
        }
        self.n_items -= geo.items_per_page;
        self.unlink(id);
        let header = self.arena.remove(id);
        self.index.detach(geo, header.page);
        self.n_pages -= 1;
        self.npagefree += 1;
        self.update_curpage();
        header.page
    }

    /// Describe the first broken invariant, if any.
    fn check(&self, geo: &Geometry) -> Result<(), String> {
        let mut missing = 0;
        for (id, header) in self.arena.iter() {
            header.check(geo)?;
            if header.list == PageList::Full && self.curpage == Some(id) {
                return Err(format!("page {:#x}: full page is current", header.page));
            }
            missing += header.nmissing;
        }

        for queue in [&self.empty, &self.partial, &self.full] {
            for id in queue.ids(&self.arena) {
                let header = &self.arena[id];
                let expected = match header.nmissing {
                    0 => PageList::Empty,
                    n if n == geo.items_per_page => PageList::Full,
                    _ => PageList::Partial,
                };
                if header.list != expected {
                    return Err(format!("page {:#x}: linked on the wrong list", header.page));
                }
            }
        }

        let linked = self.empty.len() + self.partial.len() + self.full.len();
        if linked != self.n_pages || self.arena.len() != self.n_pages {
            return Err(format!(
                "{} pages linked, {} headers, {} counted",
                linked,
                self.arena.len(),
                self.n_pages
            ));
        }
        if missing != self.n_out || missing + self.n_items != self.n_pages * geo.items_per_page {
            return Err(format!(
                "{} missing, {} out, {} free in {} pages",
                missing, self.n_out, self.n_items, self.n_pages
            ));
        }
        if (self.n_items == 0) != self.curpage.is_none() {
            return Err(format!("{} free items but curpage {:?}", self.n_items, self.curpage));
        }
        if self.n_idle != self.empty.len() {
            return Err(format!("{} idle pages, {} on the empty list", self.n_idle, self.empty.len()));
        }
        if !geo.noalign && geo.is_inline() && self.index.len() != 0 {
            return Err(format!("{} pages indexed with inline tags", self.index.len()));
        }
        Ok(())
    }
}

/// Counters mirrored out of the lock for `stats`.
#[derive(Default)]
struct Counters {
    n_items: AtomicUsize,
    n_out: AtomicUsize,
    n_pages: AtomicUsize,
    n_idle: AtomicUsize,
    hiwat: AtomicUsize,
    min_items: AtomicUsize,
    min_pages: AtomicUsize,
    max_pages: AtomicUsize,
    hard_limit: AtomicUsize,
    nget: AtomicU64,
    nfail: AtomicU64,
    nput: AtomicU64,
    npagealloc: AtomicU64,
    npagefree: AtomicU64,
}

/// A pool of fixed-size items.
///
/// Items are handed out as raw pointers to `requested_size()` bytes aligned
/// as configured. `get` and `put` may be called concurrently; both take the
/// pool lock for a short, bounded time unless the caller asked to wait.
pub struct Pool {
    name: String,
    geo: Geometry,
    flags: PoolFlags,
    ipl: Ipl,
    inactive_time: Duration,
    supplier: Arc<dyn PageSupplier>,
    inner: Mutex<PoolInner>,
    cv: Condvar,
    drain_hook: SpinNoIrq<Option<DrainHook>>,
    counters: Counters,
}

impl Pool {
    /// Create a pool carving pages from `supplier`.
    ///
    /// Fails with [`AllocError::InvalidParam`] if the item does not fit in a
    /// page or the alignment is not a power of two.
    pub fn new(config: PoolConfig, supplier: Arc<dyn PageSupplier>) -> AllocResult<Self> {
        let geo = Geometry::new(&config, supplier.page_size())?;
        debug!(
            "pool '{}': {} items of {} bytes per {:#x} page, {:?}, colour up to {}",
            config.name,
            geo.items_per_page,
            geo.size,
            geo.page_size,
            geo.placement,
            geo.max_color
        );

        let pool = Self {
            name: config.name,
            geo,
            flags: config.flags,
            ipl: config.ipl,
            inactive_time: config.inactive_time,
            supplier,
            inner: Mutex::new(PoolInner::new()),
            cv: Condvar::new(),
            drain_hook: SpinNoIrq::new(None),
            counters: Counters::default(),
        };
        pool.publish(&pool.inner.lock());
        Ok(pool)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> PoolFlags {
        self.flags
    }

    pub fn ipl(&self) -> Ipl {
        self.ipl
    }

    /// Item stride, including padding and redzone.
    pub fn item_size(&self) -> usize {
        self.geo.size
    }

    /// Size the pool was created for.
    pub fn requested_size(&self) -> usize {
        self.geo.req_size
    }

    pub fn items_per_page(&self) -> usize {
        self.geo.items_per_page
    }

    pub fn page_size(&self) -> usize {
        self.geo.page_size
    }

    /// Whether items carry a redzone.
    pub fn has_redzone(&self) -> bool {
        self.geo.redzone.is_some()
    }

    /// Whether page headers are found through an in-page tag.
    pub fn has_inline_headers(&self) -> bool {
        self.geo.is_inline()
    }

    /// Allocate one item.
    ///
    /// At the hard limit the drain hook runs once; then a `WAITOK` request
    /// sleeps until an item is returned, anything else fails with
    /// [`AllocError::LimitReached`]. If the supplier has no page the request
    /// fails with [`AllocError::NoMemory`] (or sleeps inside the supplier
    /// with `WAITOK`).
    ///
    /// # Panics
    ///
    /// Panics when called above the pool's IPL, or with `WAITOK` from a
    /// context that may not sleep.
    pub fn get(&self, flags: GetFlags) -> AllocResult<NonNull<u8>> {
        context::assert_ipl(self.ipl, &self.name);
        if flags.can_wait() {
            context::assert_sleepable("pool get", &self.name);
        }

        let mut inner = self.inner.lock();
        let addr = loop {
            if inner.n_out >= inner.hard_limit {
                if let Some(hook) = self.drain_hook() {
                    MutexGuard::unlocked(&mut inner, || hook(flags));
                    if inner.n_out < inner.hard_limit {
                        continue;
                    }
                }

                if flags.can_wait() && !flags.contains(GetFlags::LIMITFAIL) {
                    inner.wanted = true;
                    self.cv.wait(&mut inner);
                    continue;
                }

                let inner = &mut *inner;
                if let Some(warning) = &inner.limit_warning {
                    if inner.limit_rate.allow() {
                        warn!("{}", warning);
                    }
                }
                inner.nfail += 1;
                self.publish(inner);
                return Err(AllocError::LimitReached);
            }

            let Some(id) = inner.curpage else {
                // The supplier may sleep; do not hold the pool lock.
                let page = match MutexGuard::unlocked(&mut inner, || self.alloc_page(flags)) {
                    Ok(page) => page,
                    Err(err) => {
                        if inner.curpage.is_some() {
                            continue;
                        }
                        inner.nfail += 1;
                        self.publish(&inner);
                        return Err(err);
                    }
                };
                if inner.curpage.is_some() {
                    // Items came back while the lock was dropped.
                    MutexGuard::unlocked(&mut inner, || self.release_page(page));
                    continue;
                }
                inner.prime_page(&self.geo, &self.name, page);
                continue;
            };

            break inner.take_item(&self.geo, &self.name, id);
        };
        inner.nget += 1;

        if inner.n_items < inner.min_items {
            // Best effort; the caller already has its item.
            let _ = self.catchup(&mut inner);
        }
        self.publish(&inner);
        drop(inner);

        if let Some(redzone) = self.geo.redzone {
            redzone.fill(addr);
        }
        NonNull::new(addr as *mut u8).ok_or(AllocError::NoMemory)
    }

    /// Return an item obtained from [`Pool::get`].
    ///
    /// # Panics
    ///
    /// Panics on a double free, a pointer this pool did not hand out, a
    /// damaged redzone, or when called above the pool's IPL.
    pub fn put(&self, item: NonNull<u8>) {
        context::assert_ipl(self.ipl, &self.name);
        let addr = item.as_ptr() as usize;
        if let Some(redzone) = self.geo.redzone {
            redzone.check(addr, &self.name);
        }

        let mut inner = self.inner.lock();
        let released = inner.put_item(&self.geo, &self.name, addr);
        if inner.wanted {
            inner.wanted = false;
            self.cv.notify_all();
        }
        self.publish(&inner);
        drop(inner);

        if let Some(page) = released {
            self.release_page(page);
        }
    }

    /// Release empty pages that have been idle for the inactive time.
    ///
    /// Never goes below the minimum page count or the low watermark.
    /// Returns whether any page was released; `false` also when the pool
    /// lock was busy.
    ///
    /// # Panics
    ///
    /// Panics from a context that may not sleep.
    pub fn reclaim(&self) -> bool {
        context::assert_sleepable("pool reclaim", &self.name);
        if let Some(hook) = self.drain_hook() {
            hook(GetFlags::NOWAIT);
        }

        let Some(mut inner) = self.inner.try_lock() else {
            return false;
        };
        let now = Instant::now();
        let ipp = self.geo.items_per_page;
        let mut released = Vec::new();
        for id in inner.empty.ids(&inner.arena) {
            if inner.n_pages <= inner.min_pages {
                break;
            }
            if now.duration_since(inner.arena[id].time) < self.inactive_time {
                continue;
            }
            if inner.n_items - ipp < inner.min_items {
                break;
            }
            released.push(inner.remove_page(&self.geo, id));
        }
        self.publish(&inner);
        drop(inner);

        for &page in &released {
            self.release_page(page);
        }
        if !released.is_empty() {
            debug!("pool '{}': reclaimed {} pages", self.name, released.len());
        }
        !released.is_empty()
    }

    /// Add pages for at least `n` more items and keep them as a minimum.
    pub fn prime(&self, n: usize) -> AllocResult {
        let mut inner = self.inner.lock();
        let mut result = Ok(());
        for _ in 0..n.div_ceil(self.geo.items_per_page) {
            if let Err(err) = self.grow(&mut inner, GetFlags::NOWAIT) {
                result = Err(err);
                break;
            }
            inner.min_pages += 1;
        }
        if inner.min_pages >= inner.max_pages {
            inner.max_pages = inner.min_pages + 1;
        }
        self.publish(&inner);
        result
    }

    /// Keep at least `n` free items, growing now if needed.
    pub fn set_low_watermark(&self, n: usize) {
        let mut inner = self.inner.lock();
        inner.min_items = n;
        inner.min_pages = n.div_ceil(self.geo.items_per_page);
        if inner.n_items < inner.min_items {
            let _ = self.catchup(&mut inner);
        }
        self.publish(&inner);
    }

    /// Release pages that become empty once the pool holds more than
    /// enough pages for `n` items.
    pub fn set_high_watermark(&self, n: usize) {
        let mut inner = self.inner.lock();
        inner.max_pages = n.div_ceil(self.geo.items_per_page);
        self.publish(&inner);
    }

    /// Allow at most `n` items out at once.
    ///
    /// `warning` is logged, at most once per `ratecap`, whenever a request
    /// fails at the limit. Also sets the high watermark to `n`.
    pub fn set_hard_limit(&self, n: usize, warning: Option<&str>, ratecap: Duration) {
        let mut inner = self.inner.lock();
        inner.hard_limit = n;
        inner.limit_warning = warning.map(String::from);
        inner.limit_rate = WarningRate::new(ratecap);
        inner.max_pages = n.div_ceil(self.geo.items_per_page);
        self.publish(&inner);
    }

    /// Install the callback run when the pool is short of items.
    ///
    /// # Panics
    ///
    /// Panics if a hook is already installed.
    pub fn set_drain_hook<F>(&self, hook: F)
    where
        F: Fn(GetFlags) + Send + Sync + 'static,
    {
        let mut slot = self.drain_hook.lock();
        if slot.is_some() {
            panic!("pool '{}': drain hook already set", self.name);
        }
        *slot = Some(Arc::new(hook));
    }

    /// Counter snapshot; does not take the pool lock.
    pub fn stats(&self) -> PoolStats {
        let c = &self.counters;
        PoolStats {
            items_per_page: self.geo.items_per_page,
            n_items: c.n_items.load(Ordering::Relaxed),
            n_out: c.n_out.load(Ordering::Relaxed),
            n_pages: c.n_pages.load(Ordering::Relaxed),
            n_idle: c.n_idle.load(Ordering::Relaxed),
            hiwat: c.hiwat.load(Ordering::Relaxed),
            min_items: c.min_items.load(Ordering::Relaxed),
            min_pages: c.min_pages.load(Ordering::Relaxed),
            max_pages: c.max_pages.load(Ordering::Relaxed),
            hard_limit: c.hard_limit.load(Ordering::Relaxed),
            nget: c.nget.load(Ordering::Relaxed),
            nfail: c.nfail.load(Ordering::Relaxed),
            nput: c.nput.load(Ordering::Relaxed),
            npagealloc: c.npagealloc.load(Ordering::Relaxed),
            npagefree: c.npagefree.load(Ordering::Relaxed),
        }
    }

    /// Page counts per list: (empty, partial, full).
    pub fn page_lists(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock();
        (inner.empty.len(), inner.partial.len(), inner.full.len())
    }

    /// Base of the page the next item will come from.
    pub fn current_page(&self) -> Option<usize> {
        let inner = self.inner.lock();
        inner.curpage.map(|id| inner.arena[id].page)
    }

    /// Verify every page and counter, logging and returning the first
    /// inconsistency found.
    pub fn check(&self) -> Result<(), String> {
        let inner = self.inner.lock();
        inner.check(&self.geo).map_err(|msg| {
            error!("pool '{}': {}", self.name, msg);
            format!("pool '{}': {}", self.name, msg)
        })
    }

    /// Find the item containing `addr`.
    ///
    /// Only pages of this pool are inspected, so any address may be passed.
    pub fn locate(&self, addr: usize) -> Option<ItemInfo> {
        let inner = self.inner.lock();
        let page_size = self.geo.page_size;
        let (_, header) = inner
            .arena
            .iter()
            .find(|(_, h)| h.page <= addr && addr < h.page + page_size)?;
        let index = self.geo.item_containing(header.page, header.off, addr)?;
        let item = self.geo.item_addr(header.page, header.off, index);
        let state = if header.is_free(index, &self.geo) {
            ItemState::Free
        } else {
            ItemState::Allocated
        };
        Some(ItemInfo {
            item,
            offset: addr - item,
            page: header.page,
            state,
        })
    }

    /// Release all pages and tear the pool down.
    ///
    /// # Panics
    ///
    /// Panics from a context that may not sleep, or if items are still out.
    pub fn destroy(self) {
        context::assert_sleepable("pool destroy", &self.name);
        let n_out = self.inner.lock().n_out;
        if n_out != 0 {
            error!("pool '{}': destroy with {} items still out", self.name, n_out);
            panic!("pool '{}' busy: {} items still out", self.name, n_out);
        }
        debug!("pool '{}': destroyed", self.name);
    }

    pub(crate) fn fill_redzone(&self, item: NonNull<u8>) {
        if let Some(redzone) = self.geo.redzone {
            redzone.fill(item.as_ptr() as usize);
        }
    }

    pub(crate) fn check_redzone(&self, item: NonNull<u8>) {
        if let Some(redzone) = self.geo.redzone {
            redzone.check(item.as_ptr() as usize, &self.name);
        }
    }

    fn drain_hook(&self) -> Option<DrainHook> {
        self.drain_hook.lock().clone()
    }

    /// Get a page from the supplier, running the drain hook and retrying
    /// once if a non-blocking request fails.
    fn alloc_page(&self, flags: GetFlags) -> AllocResult<usize> {
        let size = self.geo.page_size;
        match self.supplier.alloc_pages(size, flags.can_wait()) {
            Err(AllocError::NoMemory) if !flags.can_wait() => match self.drain_hook() {
                Some(hook) => {
                    hook(flags);
                    self.supplier.alloc_pages(size, false)
                }
                None => Err(AllocError::NoMemory),
            },
            result => result,
        }
    }

    fn release_page(&self, page: usize) {
        trace!("pool '{}': page {:#x} released", self.name, page);
        self.supplier.free_pages(page, self.geo.page_size);
    }

    /// Add one page; drops the lock while talking to the supplier.
    fn grow(&self, inner: &mut MutexGuard<'_, PoolInner>, flags: GetFlags) -> AllocResult {
        let page = MutexGuard::unlocked(inner, || self.alloc_page(flags))?;
        inner.prime_page(&self.geo, &self.name, page);
        Ok(())
    }

    /// Grow until the low watermark is met; never waits.
    fn catchup(&self, inner: &mut MutexGuard<'_, PoolInner>) -> AllocResult {
        while inner.n_items < inner.min_items {
            self.grow(inner, GetFlags::NOWAIT)?;
        }
        Ok(())
    }

    fn publish(&self, inner: &PoolInner) {
        let c = &self.counters;
        c.n_items.store(inner.n_items, Ordering::Relaxed);
        c.n_out.store(inner.n_out, Ordering::Relaxed);
        c.n_pages.store(inner.n_pages, Ordering::Relaxed);
        c.n_idle.store(inner.n_idle, Ordering::Relaxed);
        c.hiwat.store(inner.hiwat, Ordering::Relaxed);
        c.min_items.store(inner.min_items, Ordering::Relaxed);
        c.min_pages.store(inner.min_pages, Ordering::Relaxed);
        c.max_pages.store(inner.max_pages, Ordering::Relaxed);
        c.hard_limit.store(inner.hard_limit, Ordering::Relaxed);
        c.nget.store(inner.nget, Ordering::Relaxed);
        c.nfail.store(inner.nfail, Ordering::Relaxed);
        c.nput.store(inner.nput, Ordering::Relaxed);
        c.npagealloc.store(inner.npagealloc, Ordering::Relaxed);
        c.npagefree.store(inner.npagefree, Ordering::Relaxed);
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.n_out != 0 {
            if std::thread::panicking() {
                return;
            }
            error!("pool '{}': {} items still out", self.name, inner.n_out);
            panic!("pool '{}': dropped with {} items still out", self.name, inner.n_out);
        }
        for id in inner.empty.ids(&inner.arena) {
            let page = inner.remove_page(&self.geo, id);
            trace!("pool '{}': page {:#x} released", self.name, page);
            self.supplier.free_pages(page, self.geo.page_size);
        }
    }
}

impl core::fmt::Debug for Pool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("item_size", &self.geo.size)
            .field("items_per_page", &self.geo.items_per_page)
            .field("stats", &self.stats())
            .finish()
    }
}
