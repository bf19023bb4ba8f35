//! Overflow guards placed right after the requested part of an item.

#[cfg(feature = "log")]
use log::error;

/// Number of guard bytes.
pub(crate) const REDZONE_SIZE: usize = 2;

#[cfg(target_pointer_width = "64")]
const PRIME: usize = 0x9e37_ffff_fffc_0000;
#[cfg(not(target_pointer_width = "64"))]
const PRIME: usize = 0x9e37_79b1;

/// Used instead of a zero first byte so that a stray string terminator is
/// always caught.
const STATIC_BYTE: u8 = 0xFE;

fn pattern(addr: usize) -> u8 {
    (addr.wrapping_mul(PRIME) >> ((core::mem::size_of::<usize>() - 1) * 8)) as u8
}

fn expected(addr: usize, first: bool) -> u8 {
    match pattern(addr) {
        0 if first => STATIC_BYTE,
        pat => pat,
    }
}

/// Guard bytes at a fixed offset into every item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Redzone {
    offset: usize,
}

impl Redzone {
    /// A guard starting `offset` bytes into the item.
    pub const fn new(offset: usize) -> Self {
        Self { offset }
    }

    /// Write the pattern for the item at `item`.
    pub fn fill(&self, item: usize) {
        let start = item + self.offset;
        for (i, cp) in (start..start + REDZONE_SIZE).enumerate() {
            // SAFETY: the pool sized every item to hold the guard bytes.
            unsafe { (cp as *mut u8).write(expected(cp, i == 0)) };
        }
    }

    /// Verify the pattern for the item at `item`.
    ///
    /// # Panics
    ///
    /// Panics if any guard byte was overwritten.
    pub fn check(&self, item: usize, pool: &str) {
        let start = item + self.offset;
        for (i, cp) in (start..start + REDZONE_SIZE).enumerate() {
            // SAFETY: as in `fill`.
            let found = unsafe { (cp as *const u8).read() };
            let want = expected(cp, i == 0);
            if found != want {
                error!("pool '{}': redzone at {:#x} overwritten", pool, cp);
                panic!(
                    "pool '{}': redzone violation at {:#x}: {:#04x} != {:#04x}",
                    pool, cp, found, want
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_byte_never_zero() {
        for addr in 0..0x10000usize {
            assert_ne!(expected(addr * 7, true), 0);
        }
    }

    #[test]
    fn test_fill_then_check() {
        let mut buf = [0u8; 32];
        let item = buf.as_mut_ptr() as usize;
        let rz = Redzone::new(20);
        rz.fill(item);
        // Writes inside the requested size are fine.
        buf[..20].fill(0xAA);
        rz.check(buf.as_ptr() as usize, "buf");
    }

    #[test]
    #[should_panic(expected = "redzone violation")]
    fn test_overflow_detected() {
        let mut buf = [0u8; 32];
        let item = buf.as_mut_ptr() as usize;
        let rz = Redzone::new(20);
        rz.fill(item);
        buf[20] = !buf[20];
        rz.check(buf.as_ptr() as usize, "buf");
    }
}
