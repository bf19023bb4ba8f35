//! Fixed-capacity groups of cached objects.

use core::ptr::NonNull;

use super::GroupSize;

/// An object held by a cache, with its physical address if known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CachedObject {
    va: usize,
    pub pa: Option<usize>,
}

impl CachedObject {
    pub fn new(object: NonNull<u8>, pa: Option<usize>) -> Self {
        Self {
            va: object.as_ptr() as usize,
            pa,
        }
    }

    pub fn addr(&self) -> usize {
        self.va
    }

    pub fn object(&self) -> NonNull<u8> {
        // SAFETY: `va` was taken from a `NonNull` in `new`.
        unsafe { NonNull::new_unchecked(self.va as *mut u8) }
    }
}

/// A stack of up to `capacity` objects moved between caches as a unit.
#[derive(Debug)]
pub(crate) struct CacheGroup {
    avail: usize,
    objects: Box<[Option<CachedObject>]>,
}

impl CacheGroup {
    pub fn new(size: GroupSize) -> Box<Self> {
        Box::new(Self {
            avail: 0,
            objects: vec![None; size.capacity()].into_boxed_slice(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.objects.len()
    }

    pub fn len(&self) -> usize {
        self.avail
    }

    pub fn is_empty(&self) -> bool {
        self.avail == 0
    }

    pub fn is_full(&self) -> bool {
        self.avail == self.capacity()
    }

    pub fn pop(&mut self) -> Option<CachedObject> {
        if self.avail == 0 {
            return None;
        }
        self.avail -= 1;
        self.objects[self.avail].take()
    }

    /// Add `object`, handing it back if the group is full.
    pub fn push(&mut self, object: CachedObject) -> Result<(), CachedObject> {
        if self.is_full() {
            return Err(object);
        }
        self.objects[self.avail] = Some(object);
        self.avail += 1;
        Ok(())
    }

    /// Remove every object.
    pub fn drain(&mut self) -> impl Iterator<Item = CachedObject> + '_ {
        let n = core::mem::take(&mut self.avail);
        self.objects[..n].iter_mut().filter_map(Option::take)
    }

    /// Whether the object starting at `addr` is held here.
    pub fn contains(&self, addr: usize) -> bool {
        self.objects[..self.avail]
            .iter()
            .flatten()
            .any(|object| object.addr() == addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(addr: usize) -> CachedObject {
        CachedObject::new(NonNull::new(addr as *mut u8).unwrap(), None)
    }

    #[test]
    fn test_push_pop_lifo() {
        let mut group = CacheGroup::new(GroupSize::Normal);
        assert_eq!(group.capacity(), 16);
        assert!(group.is_empty());
        assert_eq!(group.pop(), None);

        group.push(object(0x100)).unwrap();
        group.push(object(0x200)).unwrap();
        assert_eq!(group.len(), 2);
        assert!(group.contains(0x100));
        assert!(!group.contains(0x300));
        assert_eq!(group.pop().map(|o| o.addr()), Some(0x200));
        assert_eq!(group.pop().map(|o| o.addr()), Some(0x100));
        assert!(!group.contains(0x100));
    }

    #[test]
    fn test_full_group_rejects() {
        let mut group = CacheGroup::new(GroupSize::Normal);
        for i in 1..=16 {
            group.push(object(i * 0x40)).unwrap();
        }
        assert!(group.is_full());
        assert_eq!(group.push(object(0x4000)), Err(object(0x4000)));
        assert_eq!(group.len(), 16);
    }

    #[test]
    fn test_drain_empties() {
        let mut group = CacheGroup::new(GroupSize::Large);
        for i in 1..=5 {
            group.push(CachedObject::new(NonNull::new((i * 0x40) as *mut u8).unwrap(), Some(i))).unwrap();
        }
        let drained: Vec<_> = group.drain().map(|o| (o.addr(), o.pa)).collect();
        assert_eq!(drained.len(), 5);
        assert_eq!(drained[0], (0x40, Some(1)));
        assert!(group.is_empty());
        assert_eq!(group.drain().count(), 0);
    }
}
