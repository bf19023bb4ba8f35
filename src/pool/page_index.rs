//! Finding the page header of an item.
//!
//! Pages with room to spare carry a small tag at a fixed offset that names
//! their header slot, so an item's header is found by masking the item
//! address down to its page. All other pages are kept in an index ordered
//! by page address.

use core::mem::size_of;
use std::collections::BTreeMap;

use super::geometry::Geometry;
use super::page_list::PageArena;

const PAGE_TAG_MAGIC: u32 = 0x5054_4147;

/// Tag stored inside pages with inline placement.
#[repr(C)]
#[derive(Clone, Copy)]
struct PageTag {
    magic: u32,
    slot: u32,
}

pub(crate) const PAGE_TAG_SIZE: usize = size_of::<PageTag>();

/// Where the header of a page can be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// A tag at `tag_offset` inside the page names the header slot
    Inline { tag_offset: usize },
    /// Looked up in the page index
    OffPage,
}

/// Address-ordered map from page base to header slot.
#[derive(Debug, Default)]
pub(crate) struct PageIndex {
    pages: BTreeMap<usize, u32>,
}

impl PageIndex {
    pub const fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
        }
    }

    /// Attach a freshly added page.
    pub fn attach(&mut self, geo: &Geometry, page: usize, slot: u32) {
        match geo.placement {
            Placement::Inline { tag_offset } => {
                let tag = PageTag {
                    magic: PAGE_TAG_MAGIC,
                    slot,
                };
                // SAFETY: the tag area is past the last item of a page the pool owns.
                unsafe { ((page + tag_offset) as *mut PageTag).write_unaligned(tag) };
            }
            Placement::OffPage => {
                self.pages.insert(page, slot);
            }
        }
    }

    /// Detach a page that is about to be released.
    pub fn detach(&mut self, geo: &Geometry, page: usize) {
        match geo.placement {
            Placement::Inline { tag_offset } => {
                let tag = PageTag { magic: 0, slot: 0 };
                // SAFETY: as in `attach`; the page is still owned.
                unsafe { ((page + tag_offset) as *mut PageTag).write_unaligned(tag) };
            }
            Placement::OffPage => {
                self.pages.remove(&page);
            }
        }
    }

    /// Header slot of the page holding `addr`.
    ///
    /// For inline placement the masked page is read, so `addr` must lie in
    /// mapped memory; callers pass addresses they claim came from the pool.
    pub fn find(&self, geo: &Geometry, arena: &PageArena, addr: usize) -> Option<u32> {
        let slot = if geo.noalign {
            let (&page, &slot) = self.pages.range(..=addr).next_back()?;
            if addr >= page + geo.page_size {
                return None;
            }
            slot
        } else {
            let page = addr & !(geo.page_size - 1);
            match geo.placement {
                Placement::Inline { tag_offset } => {
                    // SAFETY: see above.
                    let tag = unsafe { ((page + tag_offset) as *const PageTag).read_unaligned() };
                    if tag.magic != PAGE_TAG_MAGIC {
                        return None;
                    }
                    tag.slot
                }
                Placement::OffPage => *self.pages.get(&page)?,
            }
        };
        let header = arena.get(slot)?;
        (header.page <= addr && addr < header.page + geo.page_size).then_some(slot)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }
}
