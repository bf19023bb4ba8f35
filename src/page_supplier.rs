//! Host-heap page supplier.
//!
//! Backs pools with page-aligned blocks from the global allocator so the
//! crate can run outside a kernel. An optional page limit makes memory
//! pressure reproducible.

use std::alloc::{alloc, dealloc, Layout};
use std::collections::BTreeSet;

use parking_lot::{Condvar, Mutex};

#[cfg(feature = "log")]
use log::{error, trace};

use crate::{AllocError, AllocResult, PageSupplier, DEFAULT_PAGE_SIZE};

struct SupplierState {
    outstanding: BTreeSet<usize>,
    limit: Option<usize>,
}

/// A [`PageSupplier`] that carves pages out of the host heap.
pub struct HeapPageSupplier {
    page_size: usize,
    state: Mutex<SupplierState>,
    freed: Condvar,
}

impl HeapPageSupplier {
    /// A supplier of `DEFAULT_PAGE_SIZE` pages without a limit.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// A supplier of `page_size` pages without a limit.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is not a power of two.
    pub fn with_page_size(page_size: usize) -> Self {
        assert!(
            page_size.is_power_of_two(),
            "page size {:#x} is not a power of two",
            page_size
        );
        Self {
            page_size,
            state: Mutex::new(SupplierState {
                outstanding: BTreeSet::new(),
                limit: None,
            }),
            freed: Condvar::new(),
        }
    }

    /// A supplier that hands out at most `limit` pages at a time.
    pub fn with_limit(page_size: usize, limit: usize) -> Self {
        let supplier = Self::with_page_size(page_size);
        supplier.set_limit(Some(limit));
        supplier
    }

    /// Change the page limit. Raising it wakes blocked allocations.
    pub fn set_limit(&self, limit: Option<usize>) {
        self.state.lock().limit = limit;
        self.freed.notify_all();
    }

    /// Number of pages handed out and not yet returned.
    pub fn in_use_pages(&self) -> usize {
        self.state.lock().outstanding.len()
    }

    fn layout(&self, size: usize) -> AllocResult<Layout> {
        Layout::from_size_align(size, self.page_size).map_err(|_| AllocError::InvalidParam)
    }
}

impl Default for HeapPageSupplier {
    fn default() -> Self {
        Self::new()
    }
}

impl PageSupplier for HeapPageSupplier {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn alloc_pages(&self, size: usize, blocking: bool) -> AllocResult<usize> {
        if size == 0 || size % self.page_size != 0 {
            return Err(AllocError::InvalidParam);
        }
        let layout = self.layout(size)?;
        let pages = size / self.page_size;

        let mut state = self.state.lock();
        loop {
            let fits = match state.limit {
                Some(limit) => state.outstanding.len() + pages <= limit,
                None => true,
            };
            if fits {
                break;
            }
            if !blocking {
                return Err(AllocError::NoMemory);
            }
            self.freed.wait(&mut state);
        }

        // SAFETY: the layout has a non-zero size.
        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            return Err(AllocError::NoMemory);
        }
        let addr = ptr as usize;
        state.outstanding.insert(addr);
        trace!("heap supplier: page {:#x} out ({} in use)", addr, state.outstanding.len());
        Ok(addr)
    }

    fn free_pages(&self, addr: usize, size: usize) {
        let mut state = self.state.lock();
        if !state.outstanding.remove(&addr) {
            error!("heap supplier: free of unknown page {:#x}", addr);
            panic!("heap supplier: page {:#x} was not allocated here", addr);
        }
        drop(state);

        match self.layout(size) {
            // SAFETY: `addr` came from `alloc_pages` with the same layout.
            Ok(layout) => unsafe { dealloc(addr as *mut u8, layout) },
            Err(_) => panic!("heap supplier: bad size {:#x} for page {:#x}", size, addr),
        }
        self.freed.notify_all();
    }
}

impl Drop for HeapPageSupplier {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.outstanding.is_empty() {
            error!(
                "heap supplier dropped with {} pages outstanding",
                state.outstanding.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const PAGE_SIZE: usize = 0x1000;

    #[test]
    fn test_alloc_is_page_aligned() {
        let supplier = HeapPageSupplier::new();
        let a = supplier.alloc_pages(PAGE_SIZE, false).unwrap();
        let b = supplier.alloc_pages(PAGE_SIZE, false).unwrap();
        assert_eq!(a % PAGE_SIZE, 0);
        assert_eq!(b % PAGE_SIZE, 0);
        assert_ne!(a, b);
        assert_eq!(supplier.in_use_pages(), 2);

        supplier.free_pages(a, PAGE_SIZE);
        supplier.free_pages(b, PAGE_SIZE);
        assert_eq!(supplier.in_use_pages(), 0);
    }

    #[test]
    fn test_bad_size() {
        let supplier = HeapPageSupplier::new();
        assert_eq!(supplier.alloc_pages(0, false), Err(AllocError::InvalidParam));
        assert_eq!(supplier.alloc_pages(100, false), Err(AllocError::InvalidParam));
    }

    #[test]
    fn test_limit_nonblocking() {
        let supplier = HeapPageSupplier::with_limit(PAGE_SIZE, 1);
        let a = supplier.alloc_pages(PAGE_SIZE, false).unwrap();
        assert_eq!(supplier.alloc_pages(PAGE_SIZE, false), Err(AllocError::NoMemory));
        supplier.free_pages(a, PAGE_SIZE);
        let b = supplier.alloc_pages(PAGE_SIZE, false).unwrap();
        supplier.free_pages(b, PAGE_SIZE);
    }

    #[test]
    fn test_limit_blocking_waits_for_free() {
        let supplier = Arc::new(HeapPageSupplier::with_limit(PAGE_SIZE, 1));
        let a = supplier.alloc_pages(PAGE_SIZE, false).unwrap();

        let waiter = {
            let supplier = supplier.clone();
            thread::spawn(move || supplier.alloc_pages(PAGE_SIZE, true).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        supplier.free_pages(a, PAGE_SIZE);

        let b = waiter.join().unwrap();
        supplier.free_pages(b, PAGE_SIZE);
        assert_eq!(supplier.in_use_pages(), 0);
    }

    #[test]
    #[should_panic(expected = "was not allocated here")]
    fn test_unknown_free() {
        let supplier = HeapPageSupplier::new();
        supplier.free_pages(0x1000, PAGE_SIZE);
    }
}
