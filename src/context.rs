//! Execution context tracking.
//!
//! Every thread runs at an interrupt priority level. Pools declare the
//! highest level they may be used from; blocking operations are only legal
//! at [`Ipl::None`].

use core::cell::Cell;

#[cfg(feature = "log")]
use log::error;

/// Interrupt priority level, from least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Ipl {
    /// Ordinary thread context; may sleep.
    #[default]
    None,
    SoftClock,
    SoftNet,
    SoftSerial,
    /// Virtual-memory level, the usual choice for pools shared with drivers.
    Vm,
    Sched,
    High,
}

std::thread_local! {
    static CURRENT_IPL: Cell<Ipl> = const { Cell::new(Ipl::None) };
}

/// The level the calling thread currently runs at.
pub fn current_ipl() -> Ipl {
    CURRENT_IPL.with(Cell::get)
}

/// Whether the calling thread may block.
pub fn is_sleepable() -> bool {
    current_ipl() == Ipl::None
}

/// Raise the calling thread to at least `ipl` until the guard is dropped.
pub fn raise(ipl: Ipl) -> SplGuard {
    let saved = current_ipl();
    CURRENT_IPL.with(|c| c.set(saved.max(ipl)));
    SplGuard { saved }
}

/// Restores the previous level on drop.
#[derive(Debug)]
#[must_use = "the level is restored as soon as the guard is dropped"]
pub struct SplGuard {
    saved: Ipl,
}

impl Drop for SplGuard {
    fn drop(&mut self) {
        CURRENT_IPL.with(|c| c.set(self.saved));
    }
}

/// Panics if the caller may not block.
pub(crate) fn assert_sleepable(what: &str, name: &str) {
    let ipl = current_ipl();
    if ipl != Ipl::None {
        error!("{}: '{}' called at {:?}", what, name, ipl);
        panic!("{}: pool '{}' used from non-sleepable context {:?}", what, name, ipl);
    }
}

/// Panics if the caller runs above the level the pool was declared for.
pub(crate) fn assert_ipl(declared: Ipl, name: &str) {
    let ipl = current_ipl();
    if ipl > declared {
        error!("pool '{}' is {:?}, but called at {:?}", name, declared, ipl);
        panic!(
            "pool '{}' is {:?}, but called from context {:?}",
            name, declared, ipl
        );
    }
}
