//! Atomic Primitives
//!
//! - [`AtomicEntryFlag`]: cheap, false-positive tolerant "is anyone inside"
//!   check used before expensive precise checks.
//! - [`ParallelWorkItem`]: single-winner claim of a unit of work.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

/// Counter-based entry flag
///
/// `enter`/`exit` maintain a relaxed counter of active scopes.
/// `might_be_entered` can be stale in both directions on other threads, so it
/// only ever gates a precise check.
///
/// # Examples
///
/// ```rust
/// use hostgc::util::AtomicEntryFlag;
///
/// static FLAG: AtomicEntryFlag = AtomicEntryFlag::new();
///
/// assert!(!FLAG.might_be_entered());
/// FLAG.enter();
/// assert!(FLAG.might_be_entered());
/// FLAG.exit();
/// assert!(!FLAG.might_be_entered());
/// ```
#[derive(Debug)]
pub struct AtomicEntryFlag {
    entries: AtomicI32,
}

impl AtomicEntryFlag {
    /// Create a flag with no active entries
    pub const fn new() -> Self {
        Self {
            entries: AtomicI32::new(0),
        }
    }

    /// Record one more active scope
    #[inline]
    pub fn enter(&self) {
        self.entries.fetch_add(1, Ordering::Relaxed);
    }

    /// Leave a scope previously entered
    #[inline]
    pub fn exit(&self) {
        let previous = self.entries.fetch_sub(1, Ordering::Relaxed);
        gc_dcheck!(previous > 0, "AtomicEntryFlag exited more often than entered");
    }

    /// True iff some scope may currently be entered
    #[inline]
    pub fn might_be_entered(&self) -> bool {
        self.entries.load(Ordering::Relaxed) != 0
    }
}

impl Default for AtomicEntryFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of work that exactly one worker may claim
#[derive(Debug, Default)]
pub struct ParallelWorkItem {
    acquired: AtomicBool,
}

impl ParallelWorkItem {
    /// Create an unclaimed item
    pub const fn new() -> Self {
        Self {
            acquired: AtomicBool::new(false),
        }
    }

    /// Claim the item
    ///
    /// Returns `true` for exactly one caller across all threads.
    #[inline]
    pub fn try_acquire(&self) -> bool {
        self.acquired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Whether some worker already claimed the item
    #[inline]
    pub fn is_acquired(&self) -> bool {
        self.acquired.load(Ordering::Acquire)
    }
}

/// Atomic fetch-sub saturating at zero
///
/// Returns the previous value.
pub fn saturating_sub(atomic: &AtomicUsize, value: usize) -> usize {
    let mut current = atomic.load(Ordering::Relaxed);

    loop {
        let new_value = current.saturating_sub(value);

        match atomic.compare_exchange_weak(current, new_value, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return current,
            Err(actual) => current = actual,
        }
    }
}
