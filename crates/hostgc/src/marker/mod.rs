//! Marker Module - incremental and concurrent tri-color marking
//!
//! Marking Phases:
//! 1. Start - publish the worklists to the write barrier, mark persistent
//!    roots, optionally spawn concurrent markers
//! 2. Incremental steps - the mutator drains with a deadline and runs
//!    ephemeron passes; concurrent markers drain in the background
//! 3. Atomic pause - stop markers, rescan roots and the conservative stack,
//!    drain to the fixpoint, verify, process weak references
//!
//! Roots Types:
//! - Persistent handles (strong, pinned)
//! - Conservative stack words (interior pointers resolved, pinned)
//! - Write barrier re-marks and retraces

pub(crate) mod concurrent;
pub(crate) mod ephemeron;
pub mod liveness;
pub(crate) mod marking_state;
pub mod progress;
pub mod stack_scan;
pub(crate) mod verifier;
pub mod visitor;
pub mod worklist;

pub use liveness::LivenessBroker;
pub use marking_state::MarkingWorklists;
pub use progress::{MarkingProgressTracker, CHUNK_SIZE};
pub use stack_scan::{RangeStackScanner, StackScanner};
pub use visitor::{Visitor, WeakCallback};

use crate::barrier::MARKING_FLAG;
use crate::config::{GcConfig, MarkingType, StackState};
use crate::heap::{Heap, HeapPhase};
use crate::logging::{GcEvent, LOG_TARGET};
use crate::object::header::ObjectHeader;
use crate::relocate::CompactionWorklists;
use crate::stats::timer::Deadline;
use concurrent::ConcurrentMarker;
use ephemeron::EphemeronResolver;
use marking_state::MarkingState;
use std::sync::Arc;

/// Outcome of a completed marking phase
#[derive(Debug, Default)]
pub(crate) struct MarkingResult {
    pub marked_bytes: usize,
    pub ephemeron_passes: usize,
    pub weak_callbacks: usize,
    pub weak_roots_cleared: usize,
    pub verified_objects: usize,
    /// Slots to relocate, when this cycle compacts
    pub compaction: Option<Arc<CompactionWorklists>>,
}

/// Drives one marking cycle of a heap from the mutator thread
pub(crate) struct Marker {
    heap: Arc<Heap>,
    config: GcConfig,
    epoch: u64,
    worklists: Arc<MarkingWorklists>,
    state: MarkingState,
    ephemerons: EphemeronResolver,
    concurrent: Option<ConcurrentMarker>,
    entered_flag: bool,
}

impl Marker {
    /// Enter the marking phase and mark the persistent roots
    pub fn start(heap: Arc<Heap>, config: GcConfig, epoch: u64) -> Self {
        let compaction = config.compaction.then(|| Arc::new(CompactionWorklists::new()));
        let worklists = Arc::new(MarkingWorklists::new(compaction));
        heap.set_marking_worklists(Some(Arc::clone(&worklists)));
        heap.handle().set_phase(HeapPhase::Marking);

        let entered_flag = config.marking_type != MarkingType::Atomic;
        if entered_flag {
            heap.handle().set_incremental_marking(true);
            MARKING_FLAG.enter();
        }

        let mut marker = Self {
            state: MarkingState::new(Arc::clone(&worklists)),
            ephemerons: EphemeronResolver::new(),
            concurrent: None,
            heap,
            config,
            epoch,
            worklists,
            entered_flag,
        };
        marker.visit_roots();

        if config.marking_type == MarkingType::IncrementalAndConcurrent {
            marker.state.publish();
            marker.concurrent = Some(ConcurrentMarker::start(
                &marker.worklists,
                marker.heap.options().marker_threads,
            ));
        }
        log::trace!(target: LOG_TARGET, "marking started for epoch {}", epoch);
        marker
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    fn visit_roots(&mut self) {
        let state = &mut self.state;
        self.heap.persistents().for_each_object(|object| state.mark_pinned(object));
        // Weak roots are not recorded slots; their targets must stay put.
        self.heap.weak_persistents().for_each_object(|object| {
            // SAFETY: weak roots hold payloads of this heap until cleared.
            unsafe { ObjectHeader::from_payload(object.as_ptr()) }.pin();
        });
    }

    /// Bytes marked so far by every marker that published
    pub fn marked_bytes(&self) -> usize {
        self.worklists.marked_bytes()
    }

    /// One incremental step; true when no marking work was left
    ///
    /// A true result is advisory: concurrent markers and the write barrier
    /// can still produce work until the atomic pause.
    pub fn advance(&mut self, deadline: Deadline) -> bool {
        if !self.state.drain(deadline) {
            self.state.publish();
            return false;
        }
        self.state.publish();
        let progressed = self.ephemerons.process(&mut self.state);
        self.state.publish();
        let done = !progressed && self.worklists.is_tracing_work_empty() && self.state.is_tracing_work_empty();
        log::trace!(
            target: LOG_TARGET,
            "marking step for epoch {}: done={}, pending ephemerons={}",
            self.epoch,
            done,
            self.ephemerons.pending()
        );
        done
    }

    /// Run the atomic pause up to and including weak processing
    pub fn finish_atomic(
        mut self,
        stack_state: StackState,
        scanner: Option<&dyn StackScanner>,
    ) -> MarkingResult {
        let handle = self.heap.handle();
        handle.set_phase(HeapPhase::AtomicPause);
        self.leave_incremental();

        if let Some(concurrent) = self.concurrent.take() {
            let slices = concurrent.join();
            log::trace!(target: LOG_TARGET, "concurrent markers ran {} slices", slices);
        }

        self.heap.retire_labs();
        self.visit_roots();
        if stack_state == StackState::MayContainHeapPointers {
            if let Some(scanner) = scanner {
                let heap = Arc::clone(&self.heap);
                let state = &mut self.state;
                scanner.scan(&mut |word| {
                    if let Some(header) = heap.find_object_conservatively(word) {
                        header.pin();
                        state.mark_and_push(header);
                    }
                });
            }
        }

        self.drain_to_fixpoint();

        let verified_objects = if self.heap.options().verify_marking {
            verifier::verify_marking(&self.heap)
        } else {
            0
        };

        self.heap.logger().log(GcEvent::MarkingFinished {
            epoch: self.epoch,
            marked_bytes: self.worklists.marked_bytes(),
            ephemeron_passes: self.ephemerons.passes(),
        });

        let (weak_callbacks, weak_roots_cleared) = self.process_weakness();
        self.heap.set_marking_worklists(None);

        let compaction = match self.worklists.compaction() {
            Some(compaction) if stack_state == StackState::NoHeapPointers => Some(Arc::clone(compaction)),
            Some(compaction) => {
                log::debug!(target: LOG_TARGET, "compaction skipped: stack may hold heap pointers");
                compaction.clear_for_testing();
                None
            },
            None => None,
        };

        MarkingResult {
            marked_bytes: self.worklists.marked_bytes(),
            ephemeron_passes: self.ephemerons.passes(),
            weak_callbacks,
            weak_roots_cleared,
            verified_objects,
            compaction,
        }
    }

    fn drain_to_fixpoint(&mut self) {
        loop {
            self.state.process_not_fully_constructed();
            self.state.drain(Deadline::Unlimited);
            self.state.publish();
            let progressed = self.ephemerons.process(&mut self.state);
            self.state.publish();
            if !progressed && self.worklists.is_tracing_work_empty() && self.state.is_tracing_work_empty() {
                return;
            }
        }
    }

    fn process_weakness(&mut self) -> (usize, usize) {
        let broker = LivenessBroker::new();
        let mut callbacks = 0;
        for item in self.worklists.weak_callbacks.drain() {
            (item.callback)(&broker, item.parameter as *const ());
            callbacks += 1;
        }
        let cleared = self.heap.weak_persistents().clear_dead(|object| {
            // SAFETY: weak roots hold payloads of this heap until cleared.
            unsafe { ObjectHeader::from_payload(object.as_ptr()) }.is_marked()
        });
        self.heap.logger().log(GcEvent::WeakProcessed {
            epoch: self.epoch,
            callbacks,
            weak_roots_cleared: cleared,
        });
        (callbacks, cleared)
    }

    fn leave_incremental(&mut self) {
        if self.entered_flag {
            self.heap.handle().set_incremental_marking(false);
            MARKING_FLAG.exit();
            self.entered_flag = false;
        }
    }

    /// Abandon the cycle; marks stay set and the caller must not sweep
    pub fn cancel(mut self) {
        self.leave_incremental();
        if let Some(concurrent) = self.concurrent.take() {
            concurrent.join();
        }
        self.worklists.clear();
        self.heap.set_marking_worklists(None);
        self.heap.logger().log(GcEvent::TaskCancelled {
            task: format!("marking of epoch {}", self.epoch),
        });
    }
}

impl Drop for Marker {
    fn drop(&mut self) {
        self.leave_incremental();
    }
}
