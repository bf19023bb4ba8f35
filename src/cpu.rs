//! CPU enumeration and cross-calls.
//!
//! Pool caches keep one cache slot per CPU and need to run code on every
//! CPU when they are invalidated. The kernel provides this through a
//! [`CpuTopology`]; [`HostCpus`] models it with threads for hosted builds.

use core::cell::Cell;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Per-CPU enumeration and synchronous remote execution.
pub trait CpuTopology: Send + Sync {
    /// Number of CPUs; per-CPU indices are `0..cpu_count()`.
    fn cpu_count(&self) -> usize;

    /// Index of the CPU the caller is running on.
    fn current_cpu(&self) -> usize;

    /// Run `f` on every CPU, passing that CPU's index.
    ///
    /// While `f` runs on a CPU, `current_cpu()` called from `f` returns that
    /// CPU's index. Does not return until `f` has finished on all CPUs.
    fn for_each_cpu(&self, f: &(dyn Fn(usize) + Sync));
}

/// A uniprocessor topology: everything runs on CPU 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleCpu;

impl CpuTopology for SingleCpu {
    fn cpu_count(&self) -> usize {
        1
    }

    fn current_cpu(&self) -> usize {
        0
    }

    fn for_each_cpu(&self, f: &(dyn Fn(usize) + Sync)) {
        f(0);
    }
}

std::thread_local! {
    /// CPU the thread is bound to, set by `pin_current_thread` or a cross-call.
    static PINNED_CPU: Cell<Option<usize>> = const { Cell::new(None) };
    /// Round-robin placement for threads that were never pinned.
    static HOME_CPU: Cell<Option<usize>> = const { Cell::new(None) };
}

static NEXT_HOME: AtomicUsize = AtomicUsize::new(0);

/// Threads standing in for CPUs.
///
/// Unpinned threads are spread round-robin over the virtual CPUs; several
/// threads may share one, which the per-CPU locks of the pool cache
/// tolerate. Cross-calls spawn one scoped thread per CPU, pin it, and join
/// them all before returning.
#[derive(Debug, Clone, Copy)]
pub struct HostCpus {
    ncpu: usize,
}

impl HostCpus {
    /// A topology with `ncpu` virtual CPUs.
    ///
    /// # Panics
    ///
    /// Panics if `ncpu` is zero.
    pub fn new(ncpu: usize) -> Self {
        assert!(ncpu > 0, "a topology needs at least one CPU");
        Self { ncpu }
    }

    /// Bind the calling thread to `cpu` until `unpin_current_thread`.
    pub fn pin_current_thread(cpu: usize) {
        PINNED_CPU.with(|c| c.set(Some(cpu)));
    }

    /// Undo `pin_current_thread`.
    pub fn unpin_current_thread() {
        PINNED_CPU.with(|c| c.set(None));
    }
}

impl CpuTopology for HostCpus {
    fn cpu_count(&self) -> usize {
        self.ncpu
    }

    fn current_cpu(&self) -> usize {
        let cpu = PINNED_CPU.with(Cell::get).unwrap_or_else(|| {
            HOME_CPU.with(|home| match home.get() {
                Some(cpu) => cpu,
                None => {
                    let cpu = NEXT_HOME.fetch_add(1, Ordering::Relaxed);
                    home.set(Some(cpu));
                    cpu
                }
            })
        });
        cpu % self.ncpu
    }

    fn for_each_cpu(&self, f: &(dyn Fn(usize) + Sync)) {
        std::thread::scope(|s| {
            for cpu in 0..self.ncpu {
                s.spawn(move || {
                    HostCpus::pin_current_thread(cpu);
                    f(cpu);
                });
            }
        });
    }
}
