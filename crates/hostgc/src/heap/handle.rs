//! Heap handle and phase queries
//!
//! Phases advance `Idle -> Marking -> AtomicPause -> Sweeping -> Idle`. Only
//! the collector facade changes them; embedders read them through
//! [`HeapState`] or the [`HeapHandle`] it borrows.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Collector phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[repr(u8)]
pub enum HeapPhase {
    Idle = 0,
    Marking = 1,
    AtomicPause = 2,
    Sweeping = 3,
}

impl HeapPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => HeapPhase::Marking,
            2 => HeapPhase::AtomicPause,
            3 => HeapPhase::Sweeping,
            _ => HeapPhase::Idle,
        }
    }

    fn can_advance_to(self, next: HeapPhase) -> bool {
        matches!(
            (self, next),
            (HeapPhase::Idle, HeapPhase::Marking)
                | (HeapPhase::Marking, HeapPhase::AtomicPause)
                | (HeapPhase::AtomicPause, HeapPhase::Sweeping)
                | (HeapPhase::Sweeping, HeapPhase::Idle)
        )
    }
}

/// Read-only view of a heap's collection state
#[derive(Debug)]
pub struct HeapHandle {
    phase: AtomicU8,
    incremental_marking: AtomicBool,
    sweeping_on_owning_thread: AtomicBool,
    young_generation: bool,
}

impl HeapHandle {
    pub(crate) fn new(young_generation: bool) -> Self {
        Self {
            phase: AtomicU8::new(HeapPhase::Idle as u8),
            incremental_marking: AtomicBool::new(false),
            sweeping_on_owning_thread: AtomicBool::new(false),
            young_generation,
        }
    }

    #[inline]
    pub fn phase(&self) -> HeapPhase {
        HeapPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Whether incremental or concurrent marking is running outside the pause
    ///
    /// The write barrier checks this after the global entry flag.
    #[inline]
    pub fn is_incremental_marking_in_progress(&self) -> bool {
        self.incremental_marking.load(Ordering::Acquire)
    }

    /// Configured at heap creation; no generational collection is performed
    #[inline]
    pub fn is_young_generation_enabled(&self) -> bool {
        self.young_generation
    }

    pub(crate) fn set_phase(&self, next: HeapPhase) {
        let current = self.phase();
        crate::gc_dcheck!(
            current.can_advance_to(next),
            "illegal phase transition {:?} -> {:?}",
            current,
            next
        );
        self.phase.store(next as u8, Ordering::Release);
    }

    pub(crate) fn set_incremental_marking(&self, value: bool) {
        self.incremental_marking.store(value, Ordering::Release);
    }

    pub(crate) fn set_sweeping_on_owning_thread(&self, value: bool) {
        self.sweeping_on_owning_thread.store(value, Ordering::Release);
    }
}

/// Phase queries on a heap handle
pub struct HeapState;

impl HeapState {
    /// Marking or its atomic pause is in progress
    pub fn is_marking(handle: &HeapHandle) -> bool {
        matches!(handle.phase(), HeapPhase::Marking | HeapPhase::AtomicPause)
    }

    /// Sweeping has started and not yet completed
    pub fn is_sweeping(handle: &HeapHandle) -> bool {
        handle.phase() == HeapPhase::Sweeping
    }

    /// The owning thread is inside a sweep step and may be running finalizers
    pub fn is_sweeping_on_owning_thread(handle: &HeapHandle) -> bool {
        handle.sweeping_on_owning_thread.load(Ordering::Acquire)
    }

    /// The mutator is stopped for the final marking pause
    pub fn is_in_atomic_pause(handle: &HeapHandle) -> bool {
        handle.phase() == HeapPhase::AtomicPause
    }

    /// Any collection phase other than idle
    pub fn is_in_gc(handle: &HeapHandle) -> bool {
        handle.phase() != HeapPhase::Idle
    }
}
