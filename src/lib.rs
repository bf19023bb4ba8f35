//! Fixed-size object pool allocator
//!
//! This crate implements a slab allocator for objects of one fixed size,
//! featuring:
//! - Page-granular pools with empty/partial/full page lists and colouring
//! - Inline or off-page page headers, with an address-ordered page index
//! - Per-CPU pool caches that move objects in whole groups
//! - Redzone guards that catch writes past the requested object size
//! - A drain coordinator that hands idle pages back to the page supplier

use core::fmt;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops that still
// type-check their arguments, so values kept only for logging stay used
#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! info {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}

/// Default page size for pools whose supplier does not say otherwise
pub const DEFAULT_PAGE_SIZE: usize = 0x1000;

/// The error type used for allocation.
///
/// Only recoverable conditions are reported this way. Caller-contract
/// violations (double free, foreign pointers, blocking from interrupt
/// context) panic instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Invalid pool geometry (e.g. item larger than a page, bad alignment).
    InvalidParam,
    /// The page supplier could not provide another page.
    NoMemory,
    /// The pool's hard limit of outstanding items has been reached.
    LimitReached,
    /// The cache constructor refused the object.
    ConstructorFailed,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::InvalidParam => f.write_str("invalid pool parameter"),
            AllocError::NoMemory => f.write_str("out of memory"),
            AllocError::LimitReached => f.write_str("pool hard limit reached"),
            AllocError::ConstructorFailed => f.write_str("object constructor failed"),
        }
    }
}

impl std::error::Error for AllocError {}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

/// Source of the page-sized extents a pool is carved from.
///
/// Every extent handed out must be `page_size()` bytes long and, unless the
/// pool is created with [`PoolFlags::NOALIGN`], aligned to `page_size()`.
pub trait PageSupplier: Send + Sync {
    /// The size of one page handed out by this supplier.
    fn page_size(&self) -> usize;

    /// Allocate one extent of `size` bytes.
    ///
    /// With `blocking` set the supplier may sleep until memory is available;
    /// otherwise it must fail immediately with [`AllocError::NoMemory`].
    fn alloc_pages(&self, size: usize, blocking: bool) -> AllocResult<usize>;

    /// Return an extent previously obtained from `alloc_pages`.
    fn free_pages(&self, addr: usize, size: usize);
}

/// Translates virtual addresses of cached objects to physical addresses.
pub trait AddrTranslator: Send + Sync {
    /// Physical address backing `va`, if it is mapped.
    fn virt_to_phys(&self, va: usize) -> Option<usize>;
}

#[inline]
const fn align_down(pos: usize, align: usize) -> usize {
    pos & !(align - 1)
}

#[inline]
const fn align_up(pos: usize, align: usize) -> usize {
    (pos + align - 1) & !(align - 1)
}

/// Rounds `pos` up to a multiple of `align`, which need not be a power of two.
#[inline]
const fn roundup(pos: usize, align: usize) -> usize {
    pos.div_ceil(align) * align
}

/// Checks whether the address has the demanded alignment.
///
/// Equivalent to `addr % align == 0`, but the alignment must be a power of two.
#[inline]
const fn is_aligned(base_addr: usize, align: usize) -> bool {
    base_addr & (align - 1) == 0
}

pub mod context;
pub use context::{Ipl, SplGuard};

pub mod cpu;
pub use cpu::{CpuTopology, HostCpus, SingleCpu};

pub mod page_supplier;
pub use page_supplier::HeapPageSupplier;

pub mod stats;
pub use stats::{CacheStats, PoolSnapshot, PoolStats};

pub mod pool;
pub use pool::{GetFlags, ItemInfo, ItemState, Pool, PoolConfig, PoolFlags};

pub mod cache;
pub use cache::{CacheOps, GroupSize, PoolCache};

pub mod drain;
pub use drain::{DrainCoordinator, DrainReport, Drainable, Registration};
