//! Marking State - shared worklists and the per-thread marking visitor
//!
//! Colors:
//! - White: not reached (mark bits clear)
//! - Gray: reached, queued on a worklist, not yet traced
//! - Black: traced
//!
//! Exactly one thread wins the white-to-gray transition of an object and owns
//! pushing it. Retraced objects stay black and are traced again in full.

use crate::heap::BasePage;
use crate::marker::progress::MarkingProgressTracker;
use crate::marker::visitor::{Visitor, WeakCallback};
use crate::marker::worklist::{Local, Worklist};
use crate::object::gc_info::GcInfoTable;
use crate::object::header::ObjectHeader;
use crate::object::member::RawMember;
use crate::relocate::{CompactionWorklists, MovableReference};
use crate::stats::timer::Deadline;
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Items processed between two deadline checks
pub const DEADLINE_CHECK_INTERVAL: usize = 150;

/// Header of a marked object, movable between marker threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HeaderRef(NonNull<ObjectHeader>);

// SAFETY: headers are only mutated through atomics; pages stay mapped for the
// whole marking cycle.
unsafe impl Send for HeaderRef {}
unsafe impl Sync for HeaderRef {}

impl HeaderRef {
    pub fn new(header: &ObjectHeader) -> Self {
        Self(NonNull::from(header))
    }

    #[inline]
    pub fn get<'a>(self) -> &'a ObjectHeader {
        // SAFETY: see the Send impl.
        unsafe { self.0.as_ref() }
    }
}

/// Pair deferred because its key was not marked when it was traced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EphemeronItem {
    pub key_slot: usize,
    pub value_slot: usize,
}

impl EphemeronItem {
    pub fn key(&self) -> &RawMember {
        // SAFETY: slots live in marked objects, which stay put until compaction.
        unsafe { &*(self.key_slot as *const RawMember) }
    }

    pub fn value(&self) -> &RawMember {
        // SAFETY: as above.
        unsafe { &*(self.value_slot as *const RawMember) }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct WeakCallbackItem {
    pub callback: WeakCallback,
    pub parameter: usize,
}

/// Worklists of one marking cycle, shared by markers and the write barrier
#[derive(Debug)]
pub struct MarkingWorklists {
    pub(crate) marking: Arc<Worklist<HeaderRef>>,
    pub(crate) write_barrier: Arc<Worklist<HeaderRef>>,
    pub(crate) retrace: Arc<Worklist<HeaderRef>>,
    pub(crate) discovered_ephemerons: Arc<Worklist<EphemeronItem>>,
    pub(crate) weak_callbacks: Arc<Worklist<WeakCallbackItem>>,
    pub(crate) not_fully_constructed: Mutex<Vec<HeaderRef>>,
    compaction: Option<Arc<CompactionWorklists>>,
    marked_bytes: AtomicUsize,
}

impl MarkingWorklists {
    pub(crate) fn new(compaction: Option<Arc<CompactionWorklists>>) -> Self {
        Self {
            marking: Arc::new(Worklist::new()),
            write_barrier: Arc::new(Worklist::new()),
            retrace: Arc::new(Worklist::new()),
            discovered_ephemerons: Arc::new(Worklist::new()),
            weak_callbacks: Arc::new(Worklist::new()),
            not_fully_constructed: Mutex::new(Vec::new()),
            compaction,
            marked_bytes: AtomicUsize::new(0),
        }
    }

    /// Slots are recorded for the compactor in this cycle
    pub fn is_compacting(&self) -> bool {
        self.compaction.is_some()
    }

    pub fn compaction(&self) -> Option<&Arc<CompactionWorklists>> {
        self.compaction.as_ref()
    }

    /// Bytes marked so far, published counts only
    pub fn marked_bytes(&self) -> usize {
        self.marked_bytes.load(Ordering::Relaxed)
    }

    /// No published tracing work is left
    pub(crate) fn is_tracing_work_empty(&self) -> bool {
        self.marking.is_empty()
            && self.write_barrier.is_empty()
            && self.retrace.is_empty()
            && self.not_fully_constructed.lock().is_empty()
    }

    // === Write barrier entry points ===

    /// Mark `header` from the barrier, queueing it if this call won
    pub(crate) fn mark_from_barrier(&self, header: &ObjectHeader) -> bool {
        if !header.try_mark() {
            return false;
        }
        self.marked_bytes.fetch_add(header.size(), Ordering::Relaxed);
        if header.is_in_construction() {
            self.not_fully_constructed.lock().push(HeaderRef::new(header));
        } else {
            prepare_chunked_tracing(header);
            self.write_barrier.push_single(HeaderRef::new(header));
        }
        true
    }

    /// Queue an already marked object for another full trace
    pub(crate) fn retrace_from_barrier(&self, header: &ObjectHeader) {
        self.retrace.push_single(HeaderRef::new(header));
    }

    /// Queue a pair whose key was rewritten
    pub(crate) fn push_ephemeron(&self, key_slot: usize, value_slot: usize) {
        self.discovered_ephemerons.push_single(EphemeronItem { key_slot, value_slot });
    }

    /// Record a slot for the compactor if its target may move
    pub(crate) fn record_slot_from_barrier(&self, slot: &RawMember, header: &ObjectHeader) {
        match &self.compaction {
            Some(compaction) if is_movable(header) => compaction.push(MovableReference(slot.address())),
            _ => header.pin(),
        }
    }

    /// Drop all pending work; used when a cycle is abandoned
    pub(crate) fn clear(&self) {
        self.marking.clear();
        self.write_barrier.clear();
        self.retrace.clear();
        self.discovered_ephemerons.clear();
        self.weak_callbacks.clear();
        self.not_fully_constructed.lock().clear();
        if let Some(compaction) = &self.compaction {
            compaction.clear_for_testing();
        }
    }
}

/// Object may be relocated by the compactor
#[inline]
pub(crate) fn is_movable(header: &ObjectHeader) -> bool {
    // SAFETY: marked objects live on mapped pages.
    !header.is_large_object() && unsafe { BasePage::from_payload(header.payload()) }.is_compactable()
}

/// Arm the chunk cursor of a large chunked object; called by the marking winner
fn prepare_chunked_tracing(header: &ObjectHeader) {
    if !header.is_large_object() {
        return;
    }
    if GcInfoTable::global().get(header.gc_info_index()).trace_chunk.is_none() {
        return;
    }
    // SAFETY: large object payloads start in the first page-sized span of their page.
    let page = unsafe { BasePage::from_payload(header.payload()) };
    page.progress().enable(header.payload_size());
    page.reset_traced_chunks();
}

/// Per-thread marking visitor
pub(crate) struct MarkingState {
    shared: Arc<MarkingWorklists>,
    marking: Local<HeaderRef>,
    write_barrier: Local<HeaderRef>,
    retrace: Local<HeaderRef>,
    ephemerons: Local<EphemeronItem>,
    weak_callbacks: Local<WeakCallbackItem>,
    movable_slots: Option<Local<MovableReference>>,
    marked_bytes: usize,
}

impl MarkingState {
    pub fn new(shared: Arc<MarkingWorklists>) -> Self {
        Self {
            marking: Local::new(Arc::clone(&shared.marking)),
            write_barrier: Local::new(Arc::clone(&shared.write_barrier)),
            retrace: Local::new(Arc::clone(&shared.retrace)),
            ephemerons: Local::new(Arc::clone(&shared.discovered_ephemerons)),
            weak_callbacks: Local::new(Arc::clone(&shared.weak_callbacks)),
            movable_slots: shared.compaction().map(|c| c.local()),
            marked_bytes: 0,
            shared,
        }
    }

    pub fn shared(&self) -> &Arc<MarkingWorklists> {
        &self.shared
    }

    /// White to gray; the winner queues the object
    pub fn mark_and_push(&mut self, header: &ObjectHeader) -> bool {
        if !header.try_mark() {
            return false;
        }
        self.marked_bytes += header.size();
        if header.is_in_construction() {
            self.shared.not_fully_constructed.lock().push(HeaderRef::new(header));
        } else {
            prepare_chunked_tracing(header);
            self.marking.push(HeaderRef::new(header));
        }
        true
    }

    /// Mark and pin the object at `payload`
    pub fn mark_pinned(&mut self, payload: NonNull<u8>) {
        // SAFETY: visited references point at live payloads.
        let header = unsafe { ObjectHeader::from_payload(payload.as_ptr()) };
        header.pin();
        self.mark_and_push(header);
    }

    /// Process items until everything visible is drained or `deadline` passes
    ///
    /// Returns true iff this thread saw no work left.
    pub fn drain(&mut self, deadline: Deadline) -> bool {
        let mut processed = 0usize;
        loop {
            if let Some(item) = self.marking.pop().or_else(|| self.write_barrier.pop()) {
                self.process(item.get());
            } else if let Some(item) = self.retrace.pop() {
                self.retrace_object(item.get());
            } else {
                return true;
            }
            processed += 1;
            if processed % DEADLINE_CHECK_INTERVAL == 0 && deadline.is_reached() {
                return false;
            }
        }
    }

    /// Trace a gray object, or one chunk of a chunked large object
    fn process(&mut self, header: &ObjectHeader) {
        let info = GcInfoTable::global().get(header.gc_info_index());
        let payload = header.payload() as *const u8;
        if let (Some(trace_chunk), true) = (info.trace_chunk, header.is_large_object()) {
            // SAFETY: large object payloads start in the first span of their page.
            let page = unsafe { BasePage::from_payload(payload) };
            let progress = page.progress();
            let chunk = progress.get_next_chunk_to_mark();
            if chunk + 1 < progress.total_number_of_chunks() {
                self.marking.push(HeaderRef::new(header));
            }
            let range = MarkingProgressTracker::chunk_range(chunk, header.payload_size());
            // SAFETY: fully constructed object of the registered type.
            unsafe { trace_chunk(payload, self, range) };
            if page.chunk_traced() {
                header.mark_black();
            }
            return;
        }
        // SAFETY: fully constructed object of the registered type.
        unsafe { (info.trace)(payload, self) };
        header.mark_black();
    }

    fn retrace_object(&mut self, header: &ObjectHeader) {
        if header.is_in_construction() {
            return;
        }
        let info = GcInfoTable::global().get(header.gc_info_index());
        // SAFETY: fully constructed object of the registered type.
        unsafe { (info.trace)(header.payload(), self) };
    }

    /// Trace objects that were still under construction when discovered
    ///
    /// Constructed ones are traced normally; payloads still being written are
    /// scanned word by word for heap references.
    pub fn process_not_fully_constructed(&mut self) {
        let pending = std::mem::take(&mut *self.shared.not_fully_constructed.lock());
        for item in pending {
            let header = item.get();
            if !header.is_in_construction() {
                prepare_chunked_tracing(header);
                self.marking.push(item);
                continue;
            }
            // SAFETY: the object is allocated on a page of a live heap.
            let heap = unsafe { BasePage::from_payload(header.payload()) }.heap();
            let words = header.payload_size() / std::mem::size_of::<usize>();
            for i in 0..words {
                // SAFETY: reading initialized-or-zeroed payload words.
                let word = unsafe { (header.payload() as *const usize).add(i).read_volatile() };
                if let Some(found) = heap.find_object_conservatively(word) {
                    found.pin();
                    self.mark_and_push(found);
                }
            }
            header.mark_black();
        }
    }

    /// Hand every private item and the marked byte count to the shared side
    pub fn publish(&mut self) {
        self.marking.publish();
        self.write_barrier.publish();
        self.retrace.publish();
        self.ephemerons.publish();
        self.weak_callbacks.publish();
        if let Some(slots) = &mut self.movable_slots {
            slots.publish();
        }
        self.shared.marked_bytes.fetch_add(std::mem::take(&mut self.marked_bytes), Ordering::Relaxed);
    }

    /// This thread holds no tracing work and none is published
    pub fn is_tracing_work_empty(&self) -> bool {
        self.marking.is_empty() && self.write_barrier.is_empty() && self.retrace.is_empty()
    }

    /// Record `slot` for the compactor, or pin its target if it cannot move
    pub fn record_slot(&mut self, slot: &RawMember, header: &ObjectHeader) {
        match &mut self.movable_slots {
            Some(slots) if is_movable(header) => slots.push(MovableReference(slot.address())),
            _ => header.pin(),
        }
    }
}

impl Visitor for MarkingState {
    fn visit(&mut self, object: NonNull<u8>) {
        self.mark_pinned(object);
    }

    fn visit_movable(&mut self, slot: &RawMember) {
        let Some(object) = slot.load_object() else {
            return;
        };
        // SAFETY: members hold live payloads.
        let header = unsafe { ObjectHeader::from_payload(object.as_ptr()) };
        self.mark_and_push(header);
        self.record_slot(slot, header);
    }

    fn visit_weak(&mut self, object: NonNull<u8>, callback: WeakCallback, parameter: *const ()) {
        // SAFETY: weak members hold live or about-to-die payloads, still mapped.
        unsafe { ObjectHeader::from_payload(object.as_ptr()) }.pin();
        self.register_weak_callback(callback, parameter);
    }

    fn visit_ephemeron(&mut self, key: &RawMember, value: &RawMember) {
        let Some(key_object) = key.load_object() else {
            return;
        };
        // SAFETY: as for weak members.
        let key_header = unsafe { ObjectHeader::from_payload(key_object.as_ptr()) };
        key_header.pin();
        if key_header.is_marked() {
            self.visit_movable(value);
        } else {
            self.ephemerons.push(EphemeronItem {
                key_slot: key.address(),
                value_slot: value.address(),
            });
        }
    }

    fn register_weak_callback(&mut self, callback: WeakCallback, parameter: *const ()) {
        self.weak_callbacks.push(WeakCallbackItem {
            callback,
            parameter: parameter as usize,
        });
    }
}

impl Drop for MarkingState {
    fn drop(&mut self) {
        self.shared.marked_bytes.fetch_add(self.marked_bytes, Ordering::Relaxed);
    }
}
