//! GC Core Module - collection cycle management
//!
//! [`GarbageCollector`] owns one heap and drives its cycles from the owning
//! (mutator) thread:
//!
//! ```text
//! Idle ──start──> Marking ──atomic pause──> Sweeping ──finish──> Idle
//!                  │  steps: safepoints,        │  steps: allocation,
//!                  │  allocation, tasks         │  explicit completion
//!                  └─ concurrent markers        └─ concurrent sweepers
//! ```
//!
//! The atomic pause rescans roots, drains to the marking fixpoint, resolves
//! ephemerons, processes weak references and, for precise collections that
//! asked for it, compacts.

use crate::barrier;
use crate::config::{GcConfig, HeapOptions, MarkingType, StackState, SweepingType};
use crate::error::{GcError, Result};
use crate::heap::sweeper::Sweeper;
use crate::heap::{Heap, HeapHandle, SpaceKind};
use crate::logging::{GcEvent, GcLogger, LOG_TARGET};
use crate::marker::{Marker, StackScanner};
use crate::object::gc_info::{GarbageCollected, GcInfoTable};
use crate::object::header::{ObjectHeader, ALLOCATION_GRANULARITY};
use crate::object::member::GcPtr;
use crate::relocate::{Compactor, MoveListener};
use crate::stats::timer::{Deadline, GcTimer};
use crate::stats::{CycleStats, ProcessHeapStatistics};
use crate::util::SingleThreadedHandle;
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

struct MarkingCycle {
    marker: Marker,
    epoch: u64,
    task: SingleThreadedHandle,
    timer: GcTimer,
}

struct SweepingCycle {
    sweeper: Sweeper,
    stats: CycleStats,
    timer: GcTimer,
}

enum Cycle {
    Idle,
    Marking(MarkingCycle),
    Sweeping(SweepingCycle),
}

/// Incremental marking work posted to the embedder's task loop
///
/// Each [`run`](IncrementalMarkingTask::run) performs one marking step and
/// finalizes the cycle once marking is done. The task is cancelled when the
/// cycle reaches its atomic pause through any other path and when the heap
/// is torn down; a cancelled task does nothing.
#[derive(Debug, Clone)]
pub struct IncrementalMarkingTask {
    handle: SingleThreadedHandle,
    stack_state: StackState,
}

impl IncrementalMarkingTask {
    pub fn handle(&self) -> &SingleThreadedHandle {
        &self.handle
    }

    /// Run one step; true when this run finished the marking phase
    pub fn run(&self, gc: &GarbageCollector) -> bool {
        if !self.handle.is_active() {
            return false;
        }
        gc.marking_step(self.stack_state)
    }
}

/// Owner of one managed heap
///
/// Not thread-safe: one mutator thread owns the collector. Marking and
/// sweeping use their own worker threads internally.
///
/// # Examples
///
/// ```rust
/// use hostgc::{GarbageCollected, GarbageCollector, GcConfig, HeapOptions, Trace, Visitor};
///
/// struct Leaf(u64);
/// impl Trace for Leaf {
///     fn trace(&self, _visitor: &mut dyn Visitor) {}
/// }
/// impl GarbageCollected for Leaf {}
///
/// let gc = GarbageCollector::new(HeapOptions::default()).unwrap();
/// gc.make_garbage_collected(Leaf(1)).unwrap();
/// gc.collect_garbage(GcConfig::precise_atomic());
/// assert_eq!(gc.epoch(), 1);
/// assert_eq!(gc.heap().allocated_object_size(), 0);
/// ```
pub struct GarbageCollector {
    heap: Arc<Heap>,
    cycle: RefCell<Cycle>,
    epoch: Cell<u64>,
    stack_scanner: RefCell<Option<Box<dyn StackScanner>>>,
    stack_state_override: Cell<Option<StackState>>,
    last_cycle: RefCell<Option<CycleStats>>,
    next_trigger: Cell<usize>,
    allocated_since_step: Cell<usize>,
}

impl GarbageCollector {
    /// Create a collector with its own heap
    ///
    /// # Errors
    /// `Configuration` when `options` fail validation.
    pub fn new(options: HeapOptions) -> Result<Self> {
        let next_trigger = options.min_gc_trigger_bytes;
        let heap = Arc::new(Heap::new(options)?);
        log::debug!(target: LOG_TARGET, "heap created: {:?}", heap.options());
        Ok(Self {
            heap,
            cycle: RefCell::new(Cycle::Idle),
            epoch: Cell::new(0),
            stack_scanner: RefCell::new(None),
            stack_state_override: Cell::new(None),
            last_cycle: RefCell::new(None),
            next_trigger: Cell::new(next_trigger),
            allocated_since_step: Cell::new(0),
        })
    }

    #[inline]
    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    /// Read-only collection state for embedders
    #[inline]
    pub fn heap_handle(&self) -> &HeapHandle {
        self.heap.handle()
    }

    /// Hear about every object a compacting collection moves
    pub fn add_move_listener(&self, listener: Arc<dyn MoveListener>) {
        self.heap.add_move_listener(listener);
    }

    /// Unregister a listener added with [`add_move_listener`](Self::add_move_listener)
    pub fn remove_move_listener(&self, listener: &Arc<dyn MoveListener>) -> bool {
        self.heap.remove_move_listener(listener)
    }

    #[inline]
    pub fn logger(&self) -> &Arc<GcLogger> {
        self.heap.logger()
    }

    #[inline]
    pub fn statistics(&self) -> &Arc<ProcessHeapStatistics> {
        self.heap.statistics()
    }

    /// Completed `collect_garbage` calls plus started incremental collections
    pub fn epoch(&self) -> u64 {
        self.epoch.get()
    }

    /// Summary of the last fully swept cycle
    pub fn last_cycle_stats(&self) -> Option<CycleStats> {
        self.last_cycle.borrow().clone()
    }

    /// Install the source of conservative roots
    pub fn set_stack_scanner(&self, scanner: impl StackScanner + 'static) {
        *self.stack_scanner.borrow_mut() = Some(Box::new(scanner));
    }

    /// Force the stack state of every atomic pause; `None` restores the callers' states
    pub fn override_stack_state_for_testing(&self, stack_state: Option<StackState>) {
        self.stack_state_override.set(stack_state);
    }

    fn effective_stack_state(&self, requested: StackState) -> StackState {
        self.stack_state_override.get().unwrap_or(requested)
    }

    // === Allocation ===

    /// Allocate `value` on the managed heap
    ///
    /// # Errors
    /// - `OutOfMemory` when the heap limit is reached; collect and retry.
    /// - `InvalidArgument` for types aligned beyond 16 bytes.
    pub fn make_garbage_collected<T: GarbageCollected>(&self, value: T) -> Result<GcPtr<T>> {
        self.make_garbage_collected_with_additional_bytes(value, 0)
    }

    /// Allocate `value` followed by `additional_bytes` zeroed trailing bytes
    pub fn make_garbage_collected_with_additional_bytes<T: GarbageCollected>(
        &self,
        value: T,
        additional_bytes: usize,
    ) -> Result<GcPtr<T>> {
        if std::mem::align_of::<T>() > ALLOCATION_GRANULARITY {
            return Err(GcError::InvalidArgument(format!(
                "{} requires alignment {} above {}",
                std::any::type_name::<T>(),
                std::mem::align_of::<T>(),
                ALLOCATION_GRANULARITY
            )));
        }
        let size = std::mem::size_of::<T>().checked_add(additional_bytes).ok_or_else(|| {
            GcError::InvalidArgument(format!("{} additional bytes overflow", additional_bytes))
        })?;
        crate::gc_check!(!self.heap.prefinalizers().is_running(), "allocation from a prefinalizer");
        let index = GcInfoTable::global().index_of::<T>()?;
        self.before_allocation(size);

        let kind = if T::COMPACTABLE {
            SpaceKind::Compactable
        } else {
            SpaceKind::Regular
        };
        let payload = self.heap.allocate(size, index, kind)?;
        // SAFETY: fresh, zeroed payload of at least size_of::<T>() bytes, aligned to 16.
        unsafe {
            std::ptr::write(payload.as_ptr() as *mut T, value);
            ObjectHeader::from_payload(payload.as_ptr()).mark_fully_constructed();
            if T::HAS_PRE_FINALIZER {
                self.heap.prefinalizers().register(payload.as_ptr() as usize);
            }
            Ok(GcPtr::from_raw(payload.cast::<T>()))
        }
    }

    fn before_allocation(&self, size: usize) {
        let since = self.allocated_since_step.get() + size;
        if since >= self.heap.options().marking_step_allocation_bytes {
            self.allocated_since_step.set(0);
            self.allocation_step();
        } else {
            self.allocated_since_step.set(since);
        }

        let options = self.heap.options();
        if options.automatic_gc
            && matches!(*self.cycle.borrow(), Cycle::Idle)
            && self.heap.allocated_object_size() >= self.next_trigger.get()
        {
            log::debug!(
                target: LOG_TARGET,
                "allocation limit {} reached, starting incremental collection",
                self.next_trigger.get()
            );
            self.start_incremental_garbage_collection(GcConfig {
                stack_state: StackState::MayContainHeapPointers,
                marking_type: MarkingType::IncrementalAndConcurrent,
                sweeping_type: SweepingType::IncrementalAndConcurrent,
                compaction: false,
            });
        }
    }

    /// Marking or sweeping step paid for by allocation; never finalizes marking
    fn allocation_step(&self) {
        let deadline = self.step_deadline();
        let sweeping_done = match &mut *self.cycle.borrow_mut() {
            Cycle::Marking(cycle) => {
                cycle.marker.advance(deadline);
                false
            },
            Cycle::Sweeping(cycle) => cycle.sweeper.advance(deadline),
            Cycle::Idle => false,
        };
        if sweeping_done {
            self.finish_sweeping();
        }
    }

    fn step_deadline(&self) -> Deadline {
        Deadline::after(Duration::from_millis(self.heap.options().incremental_step_ms))
    }

    // === Collections ===

    /// Run a full collection before returning
    ///
    /// An incremental cycle in progress is finalized with this call's stack
    /// state; otherwise a new cycle runs atomically. Sweeping completes
    /// before returning only for `SweepingType::Atomic`.
    pub fn collect_garbage(&self, config: GcConfig) {
        let config = config.limited_to(self.heap.options());
        self.finish_sweeping();

        let cycle = match self.take_marking() {
            Some(cycle) => cycle,
            None => self.start_marking(
                GcConfig {
                    marking_type: MarkingType::Atomic,
                    ..config
                },
                self.epoch.get() + 1,
            ),
        };
        self.finalize_marking(cycle, self.effective_stack_state(config.stack_state), config.sweeping_type);
        self.epoch.set(self.epoch.get() + 1);
    }

    /// Start incremental (and possibly concurrent) marking
    ///
    /// Returns false when marking is already running. A heap that only
    /// supports atomic marking collects right away instead.
    pub fn start_incremental_garbage_collection(&self, config: GcConfig) -> bool {
        let config = config.limited_to(self.heap.options());
        if matches!(*self.cycle.borrow(), Cycle::Marking(_)) {
            return false;
        }
        if config.marking_type == MarkingType::Atomic {
            self.collect_garbage(config);
            return true;
        }
        self.finish_sweeping();

        let epoch = self.epoch.get() + 1;
        self.epoch.set(epoch);
        let cycle = self.start_marking(config, epoch);
        *self.cycle.borrow_mut() = Cycle::Marking(cycle);
        true
    }

    /// Task to post for the running incremental cycle
    pub fn incremental_marking_task(&self) -> Option<IncrementalMarkingTask> {
        match &*self.cycle.borrow() {
            Cycle::Marking(cycle) if cycle.task.is_active() => Some(IncrementalMarkingTask {
                handle: cycle.task.clone(),
                stack_state: StackState::NoHeapPointers,
            }),
            _ => None,
        }
    }

    /// Embedder safepoint: step incremental marking, finalize it when done
    ///
    /// Cheap when no heap in the process is marking.
    pub fn safepoint(&self, stack_state: StackState) {
        if !barrier::is_any_incremental_marking_in_progress() {
            return;
        }
        self.marking_step(stack_state);
    }

    /// One marking step with the default deadline; true when it finished marking
    pub fn advance_incremental_marking(&self, stack_state: StackState) -> bool {
        self.marking_step(stack_state)
    }

    /// Finish a running incremental cycle now
    pub fn finalize_incremental_garbage_collection_if_running(&self, stack_state: StackState) {
        if let Some(cycle) = self.take_marking() {
            let sweeping_type = cycle.marker.config().sweeping_type;
            self.finalize_marking(cycle, self.effective_stack_state(stack_state), sweeping_type);
        }
    }

    /// Complete a lazy or concurrent sweep, if one is running
    pub fn finish_sweeping_if_running(&self) {
        self.finish_sweeping();
    }

    fn marking_step(&self, stack_state: StackState) -> bool {
        let deadline = self.step_deadline();
        let done = match &mut *self.cycle.borrow_mut() {
            Cycle::Marking(cycle) => cycle.marker.advance(deadline),
            _ => return false,
        };
        if done {
            self.finalize_incremental_garbage_collection_if_running(stack_state);
        }
        done
    }

    fn take_marking(&self) -> Option<MarkingCycle> {
        let mut cycle = self.cycle.borrow_mut();
        match std::mem::replace(&mut *cycle, Cycle::Idle) {
            Cycle::Marking(marking) => Some(marking),
            other => {
                *cycle = other;
                None
            },
        }
    }

    fn start_marking(&self, config: GcConfig, epoch: u64) -> MarkingCycle {
        self.heap.logger().log(GcEvent::CycleStarted {
            epoch,
            marking: format!("{:?}", config.marking_type),
            sweeping: format!("{:?}", config.sweeping_type),
            stack_state: format!("{:?}", config.stack_state),
        });
        MarkingCycle {
            marker: Marker::start(Arc::clone(&self.heap), config, epoch),
            epoch,
            task: SingleThreadedHandle::new(),
            timer: GcTimer::new(),
        }
    }

    /// Atomic pause: marking fixpoint, weakness, compaction; then sweeping starts
    fn finalize_marking(&self, cycle: MarkingCycle, stack_state: StackState, sweeping_type: SweepingType) {
        let MarkingCycle {
            marker,
            epoch,
            task,
            timer,
        } = cycle;
        task.cancel();
        let logger = self.heap.logger();
        logger.log(GcEvent::PhaseCompleted {
            epoch,
            phase: "marking".to_string(),
            duration_us: timer.elapsed_us(),
        });

        let pause = GcTimer::new();
        let result = {
            let scanner = self.stack_scanner.borrow();
            marker.finish_atomic(stack_state, scanner.as_deref())
        };
        let mut stats = CycleStats {
            epoch,
            marked_bytes: result.marked_bytes,
            ephemeron_passes: result.ephemeron_passes,
            weak_callbacks: result.weak_callbacks,
            weak_roots_cleared: result.weak_roots_cleared,
            verified_objects: result.verified_objects,
            ..Default::default()
        };

        stats.prefinalized_objects = self.heap.prefinalizers().run_dead();
        if stats.prefinalized_objects > 0 {
            log::debug!(target: LOG_TARGET, "epoch {}: {} prefinalizers ran", epoch, stats.prefinalized_objects);
        }

        if let Some(compaction) = result.compaction {
            let compacted = Compactor::new(&self.heap).compact(&compaction);
            stats.moved_objects = compacted.moved_objects;
            stats.moved_bytes = compacted.moved_bytes;
            stats.updated_slots = compacted.updated_slots;
            self.heap.prefinalizers().update_moved();
            logger.log(GcEvent::CompactionFinished {
                epoch,
                moved_objects: compacted.moved_objects,
                moved_bytes: compacted.moved_bytes,
            });
        }

        stats.atomic_pause_us = pause.elapsed_us();
        logger.log(GcEvent::PhaseCompleted {
            epoch,
            phase: "atomic pause".to_string(),
            duration_us: stats.atomic_pause_us,
        });

        let sweeper = Sweeper::start(Arc::clone(&self.heap), sweeping_type, epoch);
        *self.cycle.borrow_mut() = Cycle::Sweeping(SweepingCycle {
            sweeper,
            stats,
            timer,
        });
        if sweeping_type == SweepingType::Atomic {
            self.finish_sweeping();
        }
    }

    fn finish_sweeping(&self) {
        let sweeping = {
            let mut cycle = self.cycle.borrow_mut();
            match std::mem::replace(&mut *cycle, Cycle::Idle) {
                Cycle::Sweeping(sweeping) => sweeping,
                other => {
                    *cycle = other;
                    return;
                },
            }
        };
        let SweepingCycle {
            sweeper,
            mut stats,
            timer,
        } = sweeping;
        let swept = sweeper.finish();
        stats.swept_bytes = swept.swept_bytes;
        stats.finalized_objects = swept.finalized_objects;
        stats.freed_pages = swept.freed_pages;
        stats.total_duration_ms = timer.elapsed_ms();

        let live_bytes = self.heap.allocated_object_size();
        let options = self.heap.options();
        let grown = (live_bytes as f64 * options.heap_growing_factor) as usize;
        self.next_trigger.set(grown.max(options.min_gc_trigger_bytes));

        self.heap.logger().log(GcEvent::CycleFinished {
            epoch: stats.epoch,
            duration_ms: stats.total_duration_ms,
            live_bytes,
        });
        *self.last_cycle.borrow_mut() = Some(stats);
    }

    // === Explicit management ===

    /// Reclaim `object` immediately; see [`crate::explicit::free_unreferenced_object`]
    pub fn free_unreferenced_object<T: GarbageCollected>(&self, object: GcPtr<T>) {
        crate::explicit::free_unreferenced_object(self.heap_handle(), object);
    }

    /// Resize `object` in place; see [`crate::explicit::resize`]
    pub fn resize<T: GarbageCollected>(&self, object: GcPtr<T>, additional_bytes: usize) -> bool {
        crate::explicit::resize(object, additional_bytes)
    }

    /// Header of a managed object, for diagnostics and tests
    pub fn header_of<T>(&self, object: GcPtr<T>) -> &ObjectHeader {
        let payload: NonNull<u8> = object.erased();
        // SAFETY: GcPtr always points to a payload of this or another live heap.
        unsafe { ObjectHeader::from_payload(payload.as_ptr()) }
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        match std::mem::replace(self.cycle.get_mut(), Cycle::Idle) {
            Cycle::Marking(cycle) => {
                cycle.task.cancel();
                cycle.marker.cancel();
            },
            Cycle::Sweeping(cycle) => {
                cycle.sweeper.finish();
            },
            Cycle::Idle => {},
        }
        self.heap.teardown();
    }
}

impl std::fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("epoch", &self.epoch.get())
            .field("heap", &self.heap)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{HeapPhase, HeapState};
    use crate::marker::Visitor;
    use crate::object::gc_info::Trace;
    use crate::object::persistent::Persistent;

    struct Leaf(u64);
    impl Trace for Leaf {
        fn trace(&self, _visitor: &mut dyn Visitor) {}
    }
    impl GarbageCollected for Leaf {}

    #[repr(align(32))]
    struct OverAligned;
    impl Trace for OverAligned {
        fn trace(&self, _visitor: &mut dyn Visitor) {}
    }
    impl GarbageCollected for OverAligned {}

    fn gc() -> GarbageCollector {
        GarbageCollector::new(HeapOptions::default()).unwrap()
    }

    #[test]
    fn test_invalid_options_rejected() {
        let err = GarbageCollector::new(HeapOptions {
            heap_growing_factor: 0.1,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, GcError::Configuration(_)));
    }

    #[test]
    fn test_over_aligned_type_rejected() {
        let gc = gc();
        let err = gc.make_garbage_collected(OverAligned).unwrap_err();
        assert!(matches!(err, GcError::InvalidArgument(_)));
    }

    #[test]
    fn test_epoch_counts_calls() {
        let gc = gc();
        assert_eq!(gc.epoch(), 0);
        gc.collect_garbage(GcConfig::precise_atomic());
        assert_eq!(gc.epoch(), 1);

        assert!(gc.start_incremental_garbage_collection(GcConfig::precise_incremental()));
        assert_eq!(gc.epoch(), 2);
        assert!(!gc.start_incremental_garbage_collection(GcConfig::precise_incremental()));
        assert_eq!(gc.epoch(), 2);

        gc.collect_garbage(GcConfig::precise_atomic());
        assert_eq!(gc.epoch(), 3);
        assert_eq!(gc.heap_handle().phase(), HeapPhase::Idle);
    }

    #[test]
    fn test_incremental_cycle_through_task() {
        let gc = gc();
        let root = Persistent::new(&gc, Some(gc.make_garbage_collected(Leaf(9)).unwrap()));
        gc.make_garbage_collected(Leaf(1)).unwrap();

        gc.start_incremental_garbage_collection(GcConfig::precise_incremental());
        assert!(HeapState::is_marking(gc.heap_handle()));
        assert!(gc.heap_handle().is_incremental_marking_in_progress());
        let task = gc.incremental_marking_task().unwrap();

        let mut runs = 0;
        while !task.run(&gc) {
            runs += 1;
            assert!(runs < 1000, "marking never finished");
        }
        assert!(!task.handle().is_active());
        assert!(!task.run(&gc));
        assert!(!gc.heap_handle().is_incremental_marking_in_progress());

        gc.finish_sweeping_if_running();
        let stats = gc.last_cycle_stats().unwrap();
        assert_eq!(stats.epoch, 1);
        assert_eq!(stats.finalized_objects, 1);
        assert_eq!(root.get().unwrap().0, 9);
    }

    #[test]
    fn test_atomic_pause_cancels_task() {
        let gc = gc();
        gc.start_incremental_garbage_collection(GcConfig::precise_incremental());
        let task = gc.incremental_marking_task().unwrap();
        gc.collect_garbage(GcConfig::precise_atomic());
        assert!(task.handle().is_canceled());
        assert!(gc.incremental_marking_task().is_none());
    }

    #[test]
    fn test_automatic_trigger_starts_marking() {
        let gc = GarbageCollector::new(HeapOptions {
            automatic_gc: true,
            min_gc_trigger_bytes: 1024,
            ..Default::default()
        })
        .unwrap();
        for i in 0..64 {
            gc.make_garbage_collected(Leaf(i)).unwrap();
        }
        assert!(gc.epoch() >= 1);
        gc.finalize_incremental_garbage_collection_if_running(StackState::NoHeapPointers);
        gc.finish_sweeping_if_running();
        assert_eq!(gc.heap_handle().phase(), HeapPhase::Idle);
    }

    #[test]
    fn test_drop_mid_marking_runs_finalizers() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Counted;
        impl Trace for Counted {
            fn trace(&self, _visitor: &mut dyn Visitor) {}
        }
        impl GarbageCollected for Counted {}
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let gc = GarbageCollector::new(HeapOptions {
            marker_threads: 2,
            ..Default::default()
        })
        .unwrap();
        for _ in 0..8 {
            gc.make_garbage_collected(Counted).unwrap();
        }
        gc.start_incremental_garbage_collection(GcConfig::precise_incremental_concurrent());
        drop(gc);
        assert_eq!(DROPS.load(Ordering::Relaxed), 8);
    }
}
