//! Per-page bookkeeping.
//!
//! Free items are either threaded through the items themselves, each
//! carrying a [`FreeItem`] record, or, for pools that must not touch item
//! memory, tracked in a bitmap where a set bit marks a free item.

use core::mem::size_of;
use std::time::Instant;

#[cfg(feature = "log")]
use log::error;

use super::geometry::Geometry;

/// Written into `FreeItem::magic` of every free item.
const FREE_ITEM_MAGIC: usize = 0xdead_beef;

/// Record stored at the start of every free item.
#[repr(C)]
#[derive(Clone, Copy)]
struct FreeItem {
    magic: usize,
    /// Next free item on the same page, zero at the end
    next: usize,
}

/// Smallest item an intrusive free list can handle.
pub(crate) const FREE_ITEM_SIZE: usize = size_of::<FreeItem>();

fn write_free_item(addr: usize, next: Option<usize>) {
    let rec = FreeItem {
        magic: FREE_ITEM_MAGIC,
        next: next.unwrap_or(0),
    };
    // SAFETY: `addr` is a free item of at least FREE_ITEM_SIZE bytes owned by the pool.
    unsafe { (addr as *mut FreeItem).write_unaligned(rec) };
}

fn read_free_item(addr: usize) -> FreeItem {
    // SAFETY: as in `write_free_item`.
    unsafe { (addr as *const FreeItem).read_unaligned() }
}

/// Walk an intrusive free list starting at `head`.
fn free_list(head: Option<usize>) -> impl Iterator<Item = usize> {
    core::iter::successors(head, |&addr| {
        let next = read_free_item(addr).next;
        (next != 0).then_some(next)
    })
}

/// Which page list a header is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PageList {
    Empty,
    Partial,
    Full,
}

/// Free-item tracking for one page.
#[derive(Debug)]
pub(crate) enum FreeItems {
    Intrusive { head: Option<usize> },
    Bitmap(Box<[u64]>),
}

/// Metadata for one page of a pool.
#[derive(Debug)]
pub(crate) struct PageHeader {
    pub page: usize,
    /// When the page last became empty
    pub time: Instant,
    /// Items handed out from this page
    pub nmissing: usize,
    /// Colour offset of the first item
    pub off: usize,
    pub list: PageList,
    pub prev: Option<u32>,
    pub next: Option<u32>,
    pub items: FreeItems,
}

impl PageHeader {
    /// Header for a fresh page with every item free.
    pub fn new(page: usize, off: usize, geo: &Geometry) -> Self {
        let n = geo.items_per_page;
        let items = if geo.notouch {
            let mut words = vec![u64::MAX; n.div_ceil(64)].into_boxed_slice();
            if n % 64 != 0 {
                if let Some(last) = words.last_mut() {
                    *last = (1u64 << (n % 64)) - 1;
                }
            }
            FreeItems::Bitmap(words)
        } else {
            // Thread back to front so the lowest address is handed out first.
            let mut head = None;
            for index in (0..n).rev() {
                let addr = geo.item_addr(page, off, index);
                write_free_item(addr, head);
                head = Some(addr);
            }
            FreeItems::Intrusive { head }
        };
        Self {
            page,
            time: Instant::now(),
            nmissing: 0,
            off,
            list: PageList::Empty,
            prev: None,
            next: None,
            items,
        }
    }

    /// Take one free item.
    ///
    /// # Panics
    ///
    /// Panics if the page has no free item or the free list was corrupted.
    pub fn take(&mut self, geo: &Geometry, pool: &str) -> usize {
        let (page, off) = (self.page, self.off);
        let addr = match &mut self.items {
            FreeItems::Intrusive { head } => {
                let Some(addr) = *head else {
                    panic!("pool '{}': page {:#x} empty", pool, page);
                };
                let rec = read_free_item(addr);
                if rec.magic != FREE_ITEM_MAGIC {
                    error!("pool '{}': bad magic {:#x} at {:#x}", pool, rec.magic, addr);
                    panic!(
                        "pool '{}': free list modified: magic={:#x}; page {:#x}; item addr {:#x}",
                        pool, rec.magic, page, addr
                    );
                }
                *head = (rec.next != 0).then_some(rec.next);
                addr
            }
            FreeItems::Bitmap(words) => {
                let Some((word_idx, word)) = words.iter_mut().enumerate().find(|(_, w)| **w != 0)
                else {
                    panic!("pool '{}': page {:#x} empty", pool, page);
                };
                let bit = word.trailing_zeros() as usize;
                *word &= !(1u64 << bit);
                geo.item_addr(page, off, word_idx * 64 + bit)
            }
        };
        self.nmissing += 1;
        addr
    }

    /// Return the item at `addr` to this page.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not an item boundary of this page, if nothing is
    /// out, or (bitmap pages) if the item is already free.
    pub fn give(&mut self, addr: usize, geo: &Geometry, pool: &str) {
        let Some(index) = geo.item_index(self.page, self.off, addr) else {
            error!("pool '{}': {:#x} is not an item of page {:#x}", pool, addr, self.page);
            panic!("pool '{}': bogus item address {:#x}", pool, addr);
        };
        if self.nmissing == 0 {
            panic!("pool '{}': double free of {:#x} (page {:#x} has nothing out)", pool, addr, self.page);
        }
        match &mut self.items {
            FreeItems::Intrusive { head } => {
                write_free_item(addr, *head);
                *head = Some(addr);
            }
            FreeItems::Bitmap(words) => {
                let mask = 1u64 << (index % 64);
                let word = &mut words[index / 64];
                if *word & mask != 0 {
                    panic!("pool '{}': double free of {:#x}", pool, addr);
                }
                *word |= mask;
            }
        }
        self.nmissing -= 1;
    }

    /// Whether the item at `index` is free.
    pub fn is_free(&self, index: usize, geo: &Geometry) -> bool {
        match &self.items {
            FreeItems::Intrusive { head } => {
                let target = geo.item_addr(self.page, self.off, index);
                free_list(*head).any(|addr| addr == target)
            }
            FreeItems::Bitmap(words) => words[index / 64] & (1u64 << (index % 64)) != 0,
        }
    }

    /// Verify the free items of this page, returning a description of the
    /// first problem found.
    pub fn check(&self, geo: &Geometry) -> Result<(), String> {
        let free = match &self.items {
            FreeItems::Intrusive { head } => {
                let mut count = 0;
                for addr in free_list(*head) {
                    if count >= geo.items_per_page {
                        return Err(format!("page {:#x}: free list loops", self.page));
                    }
                    if geo.item_index(self.page, self.off, addr).is_none() {
                        return Err(format!(
                            "page {:#x}: free item {:#x} outside the page",
                            self.page, addr
                        ));
                    }
                    let magic = read_free_item(addr).magic;
                    if magic != FREE_ITEM_MAGIC {
                        return Err(format!(
                            "page {:#x}: free item {:#x} has magic {:#x}",
                            self.page, addr, magic
                        ));
                    }
                    count += 1;
                }
                count
            }
            FreeItems::Bitmap(words) => words.iter().map(|w| w.count_ones() as usize).sum(),
        };
        if free + self.nmissing != geo.items_per_page {
            return Err(format!(
                "page {:#x}: {} free + {} missing != {} per page",
                self.page, free, self.nmissing, geo.items_per_page
            ));
        }
        let expected = match self.nmissing {
            0 => PageList::Empty,
            n if n == geo.items_per_page => PageList::Full,
            _ => PageList::Partial,
        };
        if self.list != expected {
            return Err(format!(
                "page {:#x}: on {:?} list with {} missing",
                self.page, self.list, self.nmissing
            ));
        }
        Ok(())
    }
}
