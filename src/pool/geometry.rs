//! Page layout of a pool: item size, items per page, header placement and
//! colouring.

use core::mem::size_of;

#[cfg(feature = "log")]
use log::info;

use super::page_header::FREE_ITEM_SIZE;
use super::page_index::{Placement, PAGE_TAG_SIZE};
use super::redzone::{Redzone, REDZONE_SIZE};
use super::{PoolConfig, PoolFlags};
use crate::{align_down, align_up, roundup, AllocError, AllocResult};

/// Default item alignment.
pub(crate) const MIN_ALIGN: usize = size_of::<usize>();

/// Fixed layout shared by every page of a pool.
#[derive(Debug, Clone)]
pub(crate) struct Geometry {
    pub page_size: usize,
    /// Item stride, including padding and redzone
    pub size: usize,
    /// Size the caller asked for
    pub req_size: usize,
    pub align: usize,
    /// Bytes skipped at the start of each page so that items land at the
    /// configured offset from an aligned address
    pub reserve: usize,
    pub items_per_page: usize,
    pub placement: Placement,
    /// Largest colour offset handed to a page
    pub max_color: usize,
    pub redzone: Option<Redzone>,
    pub notouch: bool,
    pub noalign: bool,
}

impl Geometry {
    pub fn new(config: &PoolConfig, page_size: usize) -> AllocResult<Self> {
        let flags = config.flags;
        let notouch = flags.contains(PoolFlags::NOTOUCH);
        let noalign = flags.contains(PoolFlags::NOALIGN);

        if !page_size.is_power_of_two() || page_size < 2 * PAGE_TAG_SIZE {
            return Err(AllocError::InvalidParam);
        }
        if config.item_size == 0 || config.item_size > page_size {
            return Err(AllocError::InvalidParam);
        }
        // A page tag can only be found by masking an aligned page.
        if noalign && flags.contains(PoolFlags::PHINPAGE) {
            return Err(AllocError::InvalidParam);
        }

        let align = match config.align {
            0 => MIN_ALIGN,
            a if a.is_power_of_two() => a,
            _ => return Err(AllocError::InvalidParam),
        };

        let mut size = config.item_size;
        if !notouch {
            size = size.max(FREE_ITEM_SIZE);
        }
        size = roundup(size, align);
        if size > page_size {
            return Err(AllocError::InvalidParam);
        }

        let redzone = if flags.contains(PoolFlags::REDZONE) && !notouch {
            if size - config.item_size >= REDZONE_SIZE {
                Some(Redzone::new(config.item_size))
            } else {
                let extended = roundup(size + REDZONE_SIZE, align);
                if extended <= page_size {
                    size = extended;
                    Some(Redzone::new(config.item_size))
                } else {
                    info!("pool redzone disabled for '{}'", config.name);
                    None
                }
            }
        } else {
            None
        };

        let item_offset = config.item_offset % align;
        let reserve = (align - item_offset) % align;
        let trysize = page_size - reserve;
        let phsize = align_up(PAGE_TAG_SIZE, MIN_ALIGN);

        let inline = flags.contains(PoolFlags::PHINPAGE)
            || (!notouch
                && !noalign
                && (size < (page_size / 16).min(phsize << 3)
                    || trysize / size == trysize.saturating_sub(phsize) / size));

        let (placement, usable) = if inline {
            let tag_offset = page_size - phsize;
            (Placement::Inline { tag_offset }, tag_offset)
        } else {
            (Placement::OffPage, page_size)
        };

        let items_per_page = usable.saturating_sub(reserve) / size;
        if items_per_page == 0 || items_per_page > u32::MAX as usize {
            return Err(AllocError::InvalidParam);
        }

        let slack = usable - reserve - items_per_page * size;
        let max_color = align_down(slack, align);

        Ok(Self {
            page_size,
            size,
            req_size: config.item_size,
            align,
            reserve,
            items_per_page,
            placement,
            max_color,
            redzone,
            notouch,
            noalign,
        })
    }

    /// Colour offset to use after `color`.
    pub fn next_color(&self, color: usize) -> usize {
        let next = color + self.align;
        if next > self.max_color {
            0
        } else {
            next
        }
    }

    /// Address of item `index` on a page coloured with `off`.
    pub fn item_addr(&self, page: usize, off: usize, index: usize) -> usize {
        page + off + self.reserve + index * self.size
    }

    /// Index of the item starting at `addr`, if `addr` is an item boundary.
    pub fn item_index(&self, page: usize, off: usize, addr: usize) -> Option<usize> {
        let first = self.item_addr(page, off, 0);
        let delta = addr.checked_sub(first)?;
        if delta % self.size != 0 {
            return None;
        }
        let index = delta / self.size;
        (index < self.items_per_page).then_some(index)
    }

    /// Index of the item containing `addr`, if any.
    pub fn item_containing(&self, page: usize, off: usize, addr: usize) -> Option<usize> {
        let delta = addr.checked_sub(self.item_addr(page, off, 0))?;
        let index = delta / self.size;
        (index < self.items_per_page).then_some(index)
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.placement, Placement::Inline { .. })
    }
}
