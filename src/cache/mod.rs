//! Per-CPU object caches.
//!
//! A [`PoolCache`] sits in front of one [`Pool`](crate::Pool) and keeps
//! constructed objects in fixed-size groups. Each CPU owns two groups; whole
//! groups move between the CPUs and a set of global lists, so the pool lock
//! is only taken when the cache as a whole runs dry or overflows.

mod cache_group;
mod pool_cache;

use core::fmt;
use core::ptr::NonNull;

use crate::pool::{GetFlags, PoolFlags};
use crate::AllocResult;

pub use pool_cache::PoolCache;

/// Object constructor; runs once per object taken from the pool.
pub type Constructor = dyn Fn(NonNull<u8>, GetFlags) -> AllocResult + Send + Sync;

/// Object destructor; runs once per object given back to the pool.
pub type Destructor = dyn Fn(NonNull<u8>) + Send + Sync;

/// Capacity class of the cache groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupSize {
    Normal,
    /// Selected by [`PoolFlags::LARGECACHE`]
    Large,
}

impl GroupSize {
    /// Objects per group.
    pub const fn capacity(self) -> usize {
        match self {
            GroupSize::Normal => 16,
            GroupSize::Large => 64,
        }
    }

    pub(crate) fn for_flags(flags: PoolFlags) -> Self {
        if flags.contains(PoolFlags::LARGECACHE) {
            GroupSize::Large
        } else {
            GroupSize::Normal
        }
    }
}

/// Constructor and destructor of a pool cache.
#[derive(Default)]
pub struct CacheOps {
    ctor: Option<Box<Constructor>>,
    dtor: Option<Box<Destructor>>,
}

impl CacheOps {
    /// No constructor and no destructor.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ctor<F>(mut self, ctor: F) -> Self
    where
        F: Fn(NonNull<u8>, GetFlags) -> AllocResult + Send + Sync + 'static,
    {
        self.ctor = Some(Box::new(ctor));
        self
    }

    pub fn with_dtor<F>(mut self, dtor: F) -> Self
    where
        F: Fn(NonNull<u8>) + Send + Sync + 'static,
    {
        self.dtor = Some(Box::new(dtor));
        self
    }

    pub(crate) fn construct(&self, object: NonNull<u8>, flags: GetFlags) -> AllocResult {
        match &self.ctor {
            Some(ctor) => ctor(object, flags),
            None => Ok(()),
        }
    }

    pub(crate) fn destruct(&self, object: NonNull<u8>) {
        if let Some(dtor) = &self.dtor {
            dtor(object);
        }
    }
}

impl fmt::Debug for CacheOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOps")
            .field("ctor", &self.ctor.is_some())
            .field("dtor", &self.dtor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AllocError;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_group_size() {
        assert_eq!(GroupSize::for_flags(PoolFlags::empty()), GroupSize::Normal);
        assert_eq!(GroupSize::for_flags(PoolFlags::LARGECACHE | PoolFlags::REDZONE), GroupSize::Large);
        assert_eq!(GroupSize::Normal.capacity(), 16);
        assert_eq!(GroupSize::Large.capacity(), 64);
    }

    #[test]
    fn test_ops_run_callbacks() {
        let dtors = Arc::new(AtomicUsize::new(0));
        let ops = {
            let dtors = dtors.clone();
            CacheOps::new()
                .with_ctor(|_, flags| {
                    if flags.contains(GetFlags::WAITOK) {
                        Ok(())
                    } else {
                        Err(AllocError::ConstructorFailed)
                    }
                })
                .with_dtor(move |_| {
                    dtors.fetch_add(1, Ordering::Relaxed);
                })
        };
        let mut word = 0u64;
        let object = NonNull::from(&mut word).cast::<u8>();
        assert_eq!(ops.construct(object, GetFlags::WAITOK), Ok(()));
        assert_eq!(ops.construct(object, GetFlags::NOWAIT), Err(AllocError::ConstructorFailed));
        ops.destruct(object);
        assert_eq!(dtors.load(Ordering::Relaxed), 1);
        assert_eq!(format!("{:?}", ops), "CacheOps { ctor: true, dtor: true }");
    }

    #[test]
    fn test_empty_ops() {
        let ops = CacheOps::new();
        let mut word = 0u64;
        let object = NonNull::from(&mut word).cast::<u8>();
        assert_eq!(ops.construct(object, GetFlags::NOWAIT), Ok(()));
        ops.destruct(object);
    }
}
