//! Statistics snapshots for pools and pool caches.
//!
//! Counters are published through relaxed atomics so they can be read
//! without the pool lock; a snapshot is consistent per field, not across
//! fields.

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Items per page
    pub items_per_page: usize,
    /// Free items held in pages
    pub n_items: usize,
    /// Items handed out and not yet returned
    pub n_out: usize,
    /// Pages currently owned
    pub n_pages: usize,
    /// Pages with no items in use
    pub n_idle: usize,
    /// High-water mark of `n_pages`
    pub hiwat: usize,
    pub min_items: usize,
    pub min_pages: usize,
    pub max_pages: usize,
    pub hard_limit: usize,
    /// Successful gets
    pub nget: u64,
    /// Failed gets
    pub nfail: u64,
    /// Puts
    pub nput: u64,
    /// Pages obtained from the supplier
    pub npagealloc: u64,
    /// Pages returned to the supplier
    pub npagefree: u64,
}

/// Pool cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Groups on the global full list
    pub nfull: usize,
    /// Groups on the global partial list
    pub npart: usize,
    /// Groups on the global empty list
    pub nempty: usize,
    /// Slow-path lock acquisitions that found the lock held
    pub contended: u64,
    /// Slow-path requests satisfied from the global lists
    pub hits: u64,
    /// Slow-path requests that fell through to the pool
    pub misses: u64,
    /// Requests satisfied from a per-CPU group
    pub cpu_hits: u64,
    /// Requests that missed the per-CPU groups
    pub cpu_misses: u64,
}

/// One line of the registry listing
#[derive(Debug, Clone, Default)]
pub struct PoolSnapshot {
    pub name: String,
    /// Item size after padding
    pub size: usize,
    pub pool: PoolStats,
    /// Present when the entry is a pool cache
    pub cache: Option<CacheStats>,
}
