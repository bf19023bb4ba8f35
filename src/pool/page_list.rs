//! Page header storage and the empty/partial/full page lists.
//!
//! Headers live in an arena and are addressed by slot number; the lists are
//! doubly linked through the `prev`/`next` slots of each header.

use core::ops::{Index, IndexMut};

use super::page_header::{PageHeader, PageList};

/// Slot storage for page headers.
#[derive(Debug, Default)]
pub(crate) struct PageArena {
    slots: Vec<Option<PageHeader>>,
    vacant: Vec<u32>,
}

impl PageArena {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
        }
    }

    /// Store `header`, returning its slot.
    pub fn insert(&mut self, header: PageHeader) -> u32 {
        match self.vacant.pop() {
            Some(id) => {
                self.slots[id as usize] = Some(header);
                id
            }
            None => {
                self.slots.push(Some(header));
                (self.slots.len() - 1) as u32
            }
        }
    }

    /// Remove and return the header in slot `id`.
    pub fn remove(&mut self, id: u32) -> PageHeader {
        match self.slots.get_mut(id as usize).and_then(Option::take) {
            Some(header) => {
                self.vacant.push(id);
                header
            }
            None => panic!("page slot {} is vacant", id),
        }
    }

    pub fn get(&self, id: u32) -> Option<&PageHeader> {
        self.slots.get(id as usize)?.as_ref()
    }

    /// Occupied slots with their headers.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &PageHeader)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|h| (id as u32, h)))
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.vacant.len()
    }
}

impl Index<u32> for PageArena {
    type Output = PageHeader;

    fn index(&self, id: u32) -> &PageHeader {
        match self.get(id) {
            Some(header) => header,
            None => panic!("page slot {} is vacant", id),
        }
    }
}

impl IndexMut<u32> for PageArena {
    fn index_mut(&mut self, id: u32) -> &mut PageHeader {
        match self.slots.get_mut(id as usize).and_then(Option::as_mut) {
            Some(header) => header,
            None => panic!("page slot {} is vacant", id),
        }
    }
}

/// One of the three page lists.
#[derive(Debug)]
pub(crate) struct PageQueue {
    kind: PageList,
    head: Option<u32>,
    len: usize,
}

impl PageQueue {
    pub const fn new(kind: PageList) -> Self {
        Self {
            kind,
            head: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn front(&self) -> Option<u32> {
        self.head
    }

    pub fn push_front(&mut self, arena: &mut PageArena, id: u32) {
        let old_head = self.head;
        {
            let node = &mut arena[id];
            node.list = self.kind;
            node.prev = None;
            node.next = old_head;
        }

        if let Some(head) = old_head {
            arena[head].prev = Some(id);
        }

        self.head = Some(id);
        self.len += 1;
    }

    pub fn remove(&mut self, arena: &mut PageArena, id: u32) {
        let (prev, next) = {
            let node = &arena[id];
            assert_eq!(node.list, self.kind, "page {:#x} is not on this list", node.page);
            (node.prev, node.next)
        };

        match prev {
            Some(prev_id) => arena[prev_id].next = next,
            None => self.head = next,
        }
        if let Some(next_id) = next {
            arena[next_id].prev = prev;
        }

        let node = &mut arena[id];
        node.prev = None;
        node.next = None;
        self.len = self.len.saturating_sub(1);
    }

    /// Slots on this list, front to back.
    pub fn ids(&self, arena: &PageArena) -> Vec<u32> {
        let mut ids = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = arena[id].next;
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::geometry::Geometry;
    use crate::pool::{PoolConfig, PoolFlags};

    // Bitmap headers never touch the page, so fake addresses are fine.
    fn header(page: usize) -> PageHeader {
        let config = PoolConfig::new("t", 64).with_flags(PoolFlags::NOTOUCH);
        let geo = Geometry::new(&config, 4096).unwrap();
        PageHeader::new(page, 0, &geo)
    }

    #[test]
    fn test_arena_reuses_slots() {
        let mut arena = PageArena::new();
        let a = arena.insert(header(0x1000));
        let b = arena.insert(header(0x2000));
        assert_eq!((a, b), (0, 1));
        assert_eq!(arena.remove(a).page, 0x1000);
        assert!(arena.get(a).is_none());
        let c = arena.insert(header(0x3000));
        assert_eq!(c, a);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.iter().count(), 2);
    }

    #[test]
    #[should_panic(expected = "vacant")]
    fn test_arena_vacant_index() {
        let arena = PageArena::new();
        let _ = &arena[3];
    }

    #[test]
    fn test_queue_push_remove() {
        let mut arena = PageArena::new();
        let ids: Vec<u32> = (1..=3).map(|i| arena.insert(header(i * 0x1000))).collect();
        let mut queue = PageQueue::new(PageList::Partial);
        for &id in &ids {
            queue.push_front(&mut arena, id);
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.front(), Some(ids[2]));
        assert_eq!(queue.ids(&arena), vec![ids[2], ids[1], ids[0]]);
        assert_eq!(arena[ids[0]].list, PageList::Partial);

        queue.remove(&mut arena, ids[1]);
        assert_eq!(queue.ids(&arena), vec![ids[2], ids[0]]);
        queue.remove(&mut arena, ids[2]);
        queue.remove(&mut arena, ids[0]);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.front(), None);
    }
}
