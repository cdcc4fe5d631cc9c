//! Stats Module - heap counters and per-cycle summaries
//!
//! - [`ProcessHeapStatistics`]: two counters shared by every heap that was
//!   handed the same instance. Injected through `HeapOptions::statistics`.
//! - [`CycleStats`]: what the last collection did, serializable for logging.
//! - [`GcTimer`]: phase timing.

pub mod timer;

pub use timer::GcTimer;

use crate::util::atomic::saturating_sub;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Allocation counters aggregated over all heaps sharing this instance
///
/// # Examples
///
/// ```rust
/// use hostgc::{GarbageCollected, GarbageCollector, HeapOptions, ProcessHeapStatistics, Trace, Visitor};
/// use std::sync::Arc;
///
/// struct Leaf(u64);
/// impl Trace for Leaf {
///     fn trace(&self, _visitor: &mut dyn Visitor) {}
/// }
/// impl GarbageCollected for Leaf {}
///
/// let stats = Arc::new(ProcessHeapStatistics::new());
/// let gc = GarbageCollector::new(HeapOptions {
///     statistics: Some(Arc::clone(&stats)),
///     ..Default::default()
/// })
/// .unwrap();
/// gc.make_garbage_collected(Leaf(0)).unwrap();
/// assert!(stats.total_allocated_object_size() >= 8);
/// assert!(stats.total_allocated_space() >= stats.total_allocated_object_size());
/// ```
#[derive(Debug, Default)]
pub struct ProcessHeapStatistics {
    total_allocated_object_size: AtomicUsize,
    total_allocated_space: AtomicUsize,
}

impl ProcessHeapStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of page memory currently mapped
    pub fn total_allocated_space(&self) -> usize {
        self.total_allocated_space.load(Ordering::Relaxed)
    }

    /// Bytes of live-or-unswept objects, headers included
    pub fn total_allocated_object_size(&self) -> usize {
        self.total_allocated_object_size.load(Ordering::Relaxed)
    }

    pub(crate) fn increase_allocated_space(&self, bytes: usize) {
        self.total_allocated_space.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn decrease_allocated_space(&self, bytes: usize) {
        saturating_sub(&self.total_allocated_space, bytes);
    }

    pub(crate) fn increase_allocated_object_size(&self, bytes: usize) {
        self.total_allocated_object_size.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn decrease_allocated_object_size(&self, bytes: usize) {
        saturating_sub(&self.total_allocated_object_size, bytes);
    }
}

/// Summary of one collection cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleStats {
    /// Epoch the cycle ran under
    pub epoch: u64,
    /// Bytes marked live, headers included
    pub marked_bytes: usize,
    /// Ephemeron resolver passes until no pass made progress
    pub ephemeron_passes: usize,
    /// Weak callbacks invoked
    pub weak_callbacks: usize,
    /// Weak roots reset to the sentinel
    pub weak_roots_cleared: usize,
    /// Objects checked by the marking verifier, 0 when disabled
    pub verified_objects: usize,
    /// Dead objects whose prefinalizer ran in the atomic pause
    pub prefinalized_objects: usize,
    pub moved_objects: usize,
    pub moved_bytes: usize,
    /// Slots rewritten by the compactor
    pub updated_slots: usize,
    /// Bytes reclaimed by the sweeper
    pub swept_bytes: usize,
    pub finalized_objects: usize,
    pub freed_pages: usize,
    /// Mutator pause of the atomic phase
    pub atomic_pause_us: u64,
    /// Start of marking to end of sweeping
    pub total_duration_ms: f64,
}
