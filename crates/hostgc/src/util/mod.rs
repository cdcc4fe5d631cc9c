//! Util Module - Shared Utilities
//!
//! Concurrency primitives used across the collector plus small address
//! arithmetic helpers.

pub mod atomic;
pub mod index_generator;
pub mod task;

pub use atomic::{AtomicEntryFlag, ParallelWorkItem};
pub use index_generator::IndexGenerator;
pub use task::SingleThreadedHandle;

/// Round `value` up to a multiple of `alignment` (a power of two)
#[inline]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Check whether `value` is a multiple of `alignment` (a power of two)
#[inline]
pub const fn is_aligned(value: usize, alignment: usize) -> bool {
    value & (alignment - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 16), 32);
        assert!(is_aligned(1 << 17, 1 << 17));
        assert!(!is_aligned(24, 16));
    }
}
