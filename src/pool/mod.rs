//! Fixed-size object pools.
//!
//! A [`Pool`] carves pages obtained from a [`PageSupplier`](crate::PageSupplier)
//! into equal-size items. Each page is tracked by a [`page_header::PageHeader`]
//! on one of three lists (empty, partial, full); a freed item is matched with
//! its page through the page index or a tag stored at the end of the page.

mod geometry;
mod page_header;
mod page_index;
mod page_list;
mod pool_allocator;
mod redzone;

use core::time::Duration;

use bitflags::bitflags;

use crate::context::Ipl;

pub use pool_allocator::Pool;

/// How long an empty page must sit idle before `reclaim` may release it.
pub const DEFAULT_INACTIVE_TIME: Duration = Duration::from_secs(10);

bitflags! {
    /// Pool creation options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PoolFlags: u32 {
        /// The allocator must never write to item memory, e.g. because a
        /// device may DMA into free items. Free items are tracked in a
        /// per-page bitmap and redzones are disabled.
        const NOTOUCH = 1 << 0;
        /// Pages from the supplier are not page aligned; lookups go
        /// through the page index.
        const NOALIGN = 1 << 1;
        /// Always keep the page tag inside the page.
        const PHINPAGE = 1 << 2;
        /// Use large cache groups when wrapped in a pool cache.
        const LARGECACHE = 1 << 3;
        /// Guard each item with a redzone after the requested size.
        const REDZONE = 1 << 4;
    }
}

bitflags! {
    /// Allocation options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GetFlags: u32 {
        /// Sleep until the request can be satisfied.
        const WAITOK = 1 << 0;
        /// With `WAITOK`, fail instead of sleeping at the hard limit.
        const LIMITFAIL = 1 << 1;
    }
}

impl GetFlags {
    /// Fail immediately when memory is not available.
    pub const NOWAIT: Self = Self::empty();

    pub(crate) fn can_wait(self) -> bool {
        self.contains(GetFlags::WAITOK)
    }
}

/// Pool creation parameters.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub name: String,
    /// Size requested by the caller
    pub item_size: usize,
    /// Item alignment; zero selects pointer alignment
    pub align: usize,
    /// Offset inside the item at which `align` applies
    pub item_offset: usize,
    pub flags: PoolFlags,
    /// Highest level `get`/`put` may be called from
    pub ipl: Ipl,
    pub inactive_time: Duration,
}

impl PoolConfig {
    pub fn new(name: impl Into<String>, item_size: usize) -> Self {
        Self {
            name: name.into(),
            item_size,
            align: 0,
            item_offset: 0,
            flags: PoolFlags::empty(),
            ipl: Ipl::None,
            inactive_time: DEFAULT_INACTIVE_TIME,
        }
    }

    pub fn with_align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    pub fn with_item_offset(mut self, item_offset: usize) -> Self {
        self.item_offset = item_offset;
        self
    }

    pub fn with_flags(mut self, flags: PoolFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_ipl(mut self, ipl: Ipl) -> Self {
        self.ipl = ipl;
        self
    }

    pub fn with_inactive_time(mut self, inactive_time: Duration) -> Self {
        self.inactive_time = inactive_time;
        self
    }
}

/// Where an item found by `locate` currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// On its page's free list
    Free,
    /// Handed out to a caller
    Allocated,
    /// Held by a global cache group
    CachedGlobal,
    /// Held by the given CPU's cache groups
    CachedCpu(usize),
}

/// Result of an address lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemInfo {
    /// Start of the item containing the address
    pub item: usize,
    /// Offset of the address inside the item
    pub offset: usize,
    /// Base of the page holding the item
    pub page: usize,
    pub state: ItemState,
}
