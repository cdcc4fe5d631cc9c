//! Sweeper - reclaims unmarked objects after marking
//!
//! Sweeping is split into two halves:
//! - **sweep**: walk a page, clear the mark and pin bits of live objects and
//!   collect dead objects plus coalesced free ranges. Safe on any thread.
//! - **finalize**: run finalizers, return free ranges to the space and release
//!   empty pages. Always on the owning thread.
//!
//! ```text
//! Atomic:                   owning thread sweeps + finalizes every page
//! Incremental:              owning thread steps with a deadline
//! IncrementalAndConcurrent: workers sweep, owning thread finalizes in steps
//! ```
//!
//! Workers pick start pages through an [`IndexGenerator`] and claim each page
//! with a [`ParallelWorkItem`], so no page is swept twice. Pages mapped after
//! sweeping started are not swept; they only hold objects allocated since.

use crate::config::SweepingType;
use crate::heap::{finalize, BasePage, Heap, HeapPhase, SpaceKind};
use crate::logging::{GcEvent, LOG_TARGET};
use crate::object::header::ObjectHeader;
use crate::stats::timer::Deadline;
use crate::util::{IndexGenerator, ParallelWorkItem};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Outcome of sweeping one page, before finalization
#[derive(Debug, Default)]
struct SweptPage {
    /// Headers of dead objects, in address order
    dead: Vec<usize>,
    /// Coalesced free ranges; only used when the page keeps live objects
    free_ranges: Vec<(usize, usize)>,
    dead_bytes: usize,
    live_objects: usize,
}

#[derive(Debug)]
struct SweepItem {
    base: usize,
    claim: ParallelWorkItem,
    swept: Mutex<Option<SweptPage>>,
}

/// Totals of a completed sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepResult {
    pub swept_bytes: usize,
    pub finalized_objects: usize,
    pub freed_pages: usize,
}

/// Sweep one page, returning what the owning thread has to finalize
///
/// # Safety
/// The page is mapped, walkable, and no other thread sweeps it.
unsafe fn sweep_page(page: &BasePage) -> SweptPage {
    let mut swept = SweptPage::default();
    let mut run: Option<(usize, usize)> = None;

    page.for_each_block(|header| {
        let address = header.address();
        let size = header.size();
        let live = !header.is_free() && !header.is_forwarded() && header.is_marked();
        if live {
            header.unmark();
            header.unpin();
            swept.live_objects += 1;
            if let Some(range) = run.take() {
                swept.free_ranges.push(range);
            }
            return;
        }
        if !header.is_free() && !header.is_forwarded() {
            swept.dead.push(address);
            swept.dead_bytes += size;
        }
        run = match run {
            Some((start, run_size)) => Some((start, run_size + size)),
            None => Some((address, size)),
        };
    });
    if let Some(range) = run {
        swept.free_ranges.push(range);
    }
    swept
}

/// Sweeps the pages of one cycle
pub(crate) struct Sweeper {
    heap: Arc<Heap>,
    epoch: u64,
    sweeping_type: SweepingType,
    items: Arc<Vec<SweepItem>>,
    finalized: Vec<bool>,
    remaining: usize,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    result: SweepResult,
}

impl Sweeper {
    /// Enter the sweeping phase over every page mapped right now
    ///
    /// Free lists are dropped; allocation uses fresh pages until swept blocks
    /// are handed back.
    pub fn start(heap: Arc<Heap>, sweeping_type: SweepingType, epoch: u64) -> Self {
        heap.handle().set_phase(HeapPhase::Sweeping);
        heap.reset_free_lists();

        let items: Arc<Vec<SweepItem>> = Arc::new(
            heap.page_bases()
                .into_iter()
                .map(|base| SweepItem {
                    base,
                    claim: ParallelWorkItem::new(),
                    swept: Mutex::new(None),
                })
                .collect(),
        );
        let count = items.len();
        let mut sweeper = Self {
            heap,
            epoch,
            sweeping_type,
            items,
            finalized: vec![false; count],
            remaining: count,
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            result: SweepResult::default(),
        };
        if sweeping_type == SweepingType::IncrementalAndConcurrent && count > 0 {
            sweeper.spawn_workers();
        }
        log::trace!(target: LOG_TARGET, "sweeping {} pages ({:?})", count, sweeping_type);
        sweeper
    }

    pub fn sweeping_type(&self) -> SweepingType {
        self.sweeping_type
    }

    fn spawn_workers(&mut self) {
        let threads = self.heap.options().sweeper_threads.min(self.items.len());
        let generator = Arc::new(IndexGenerator::new(self.items.len()));
        for id in 0..threads {
            let items = Arc::clone(&self.items);
            let generator = Arc::clone(&generator);
            let stop = Arc::clone(&self.stop);
            let spawned = thread::Builder::new()
                .name(format!("hostgc-sweeper-{}", id))
                .spawn(move || run_worker(&items, &generator, &stop));
            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(e) => log::warn!(target: LOG_TARGET, "failed to spawn sweeper {}: {}", id, e),
            }
        }
    }

    /// Whether every page was finalized
    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    /// Sweep and finalize pages on the owning thread until `deadline`
    ///
    /// Pages a worker is still sweeping are skipped. Returns true when done.
    pub fn advance(&mut self, deadline: Deadline) -> bool {
        self.heap.handle().set_sweeping_on_owning_thread(true);
        for index in 0..self.items.len() {
            if self.remaining == 0 || deadline.is_reached() {
                break;
            }
            if self.finalized[index] {
                continue;
            }
            let item = &self.items[index];
            let swept = if item.claim.try_acquire() {
                // SAFETY: the claim makes this thread the page's only sweeper.
                Some(unsafe { sweep_page(BasePage::at(item.base)) })
            } else {
                item.swept.lock().take()
            };
            if let Some(swept) = swept {
                self.finalize_page(index, swept);
            }
        }
        self.heap.handle().set_sweeping_on_owning_thread(false);
        self.is_done()
    }

    fn finalize_page(&mut self, index: usize, swept: SweptPage) {
        let base = self.items[index].base;
        for &address in &swept.dead {
            // SAFETY: unmarked objects are unreachable; this is their last use.
            unsafe { finalize(ObjectHeader::at(address)) };
        }
        self.result.finalized_objects += swept.dead.len();
        self.result.swept_bytes += swept.dead_bytes;
        self.heap.account_freed(swept.dead_bytes);

        // SAFETY: the page stays mapped until released below.
        let kind = unsafe { BasePage::at(base) }.space();
        if swept.live_objects == 0 {
            self.heap.release_page(base);
            self.result.freed_pages += 1;
        } else if kind != SpaceKind::Large {
            for (address, size) in swept.free_ranges {
                // SAFETY: the range holds only dead, finalized or free blocks.
                unsafe { self.heap.add_free_block(kind, address, size) };
            }
        }
        self.finalized[index] = true;
        self.remaining -= 1;
    }

    /// Complete sweeping and leave the phase
    pub fn finish(mut self) -> SweepResult {
        self.stop.store(true, Ordering::Release);
        self.join_workers();
        self.advance(Deadline::Unlimited);
        crate::gc_dcheck!(self.is_done(), "pages left unswept");
        self.heap.handle().set_phase(HeapPhase::Idle);
        self.heap.logger().log(GcEvent::SweepFinished {
            epoch: self.epoch,
            swept_bytes: self.result.swept_bytes,
            finalized_objects: self.result.finalized_objects,
            freed_pages: self.result.freed_pages,
        });
        self.result
    }

    fn join_workers(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!(target: LOG_TARGET, "sweeper worker panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.join_workers();
    }
}

fn run_worker(items: &[SweepItem], generator: &IndexGenerator, stop: &AtomicBool) {
    let mut swept_pages = 0;
    'outer: while let Some(start) = generator.get_next() {
        for item in &items[start..] {
            if stop.load(Ordering::Acquire) {
                break 'outer;
            }
            if !item.claim.try_acquire() {
                break;
            }
            // SAFETY: the claim makes this worker the page's only sweeper, and
            // the owning thread releases the page only after taking the result.
            let swept = unsafe { sweep_page(BasePage::at(item.base)) };
            *item.swept.lock() = Some(swept);
            swept_pages += 1;
        }
    }
    log::trace!(target: LOG_TARGET, "sweeper worker swept {} pages", swept_pages);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapOptions;
    use crate::object::gc_info::GcInfoIndex;

    fn heap() -> Arc<Heap> {
        Arc::new(Heap::new(HeapOptions::default()).unwrap())
    }

    fn allocate(heap: &Heap, size: usize, kind: SpaceKind) -> &ObjectHeader {
        let payload = heap.allocate(size, GcInfoIndex::FREE, kind).unwrap();
        let header = unsafe { ObjectHeader::from_payload(payload.as_ptr()) };
        header.mark_fully_constructed();
        header
    }

    fn run_cycle(heap: &Arc<Heap>, sweeping_type: SweepingType) -> SweepResult {
        heap.handle().set_phase(HeapPhase::Marking);
        heap.handle().set_phase(HeapPhase::AtomicPause);
        heap.retire_labs();
        Sweeper::start(Arc::clone(heap), sweeping_type, 1).finish()
    }

    #[test]
    fn test_sweep_reclaims_unmarked_and_unmarks_live() {
        let heap = heap();
        let live = allocate(&heap, 32, SpaceKind::Regular);
        let _dead = allocate(&heap, 32, SpaceKind::Regular);
        live.try_mark();
        live.mark_black();

        let before = heap.allocated_object_size();
        let result = run_cycle(&heap, SweepingType::Atomic);
        assert_eq!(result.finalized_objects, 1);
        assert_eq!(result.swept_bytes, 48);
        assert_eq!(heap.allocated_object_size(), before - 48);
        assert!(!live.is_marked());
        assert_eq!(heap.handle().phase(), HeapPhase::Idle);
        heap.teardown();
    }

    #[test]
    fn test_empty_and_large_pages_released() {
        let heap = heap();
        allocate(&heap, 64, SpaceKind::Compactable);
        allocate(&heap, crate::heap::LARGE_OBJECT_THRESHOLD, SpaceKind::Regular);
        assert_eq!(heap.page_count(), 2);

        let result = run_cycle(&heap, SweepingType::Incremental);
        assert_eq!(result.freed_pages, 2);
        assert_eq!(heap.page_count(), 0);
        assert_eq!(heap.allocated_object_size(), 0);
    }

    #[test]
    fn test_concurrent_sweep_claims_every_page_once() {
        let heap = heap();
        let mut live = Vec::new();
        for _ in 0..6 {
            // Force one page per large object.
            let header = allocate(&heap, crate::heap::LARGE_OBJECT_THRESHOLD, SpaceKind::Regular);
            header.try_mark();
            header.mark_black();
            live.push(header.address());
        }
        allocate(&heap, crate::heap::LARGE_OBJECT_THRESHOLD, SpaceKind::Regular);

        let result = run_cycle(&heap, SweepingType::IncrementalAndConcurrent);
        assert_eq!(result.freed_pages, 1);
        assert_eq!(result.finalized_objects, 1);
        assert_eq!(heap.page_count(), 6);
        for address in live {
            assert!(!unsafe { ObjectHeader::at(address) }.is_marked());
        }
        heap.teardown();
    }

    #[test]
    fn test_freed_blocks_are_reused() {
        let heap = heap();
        let keep = allocate(&heap, 32, SpaceKind::Regular);
        let dead = allocate(&heap, 32, SpaceKind::Regular).address();
        keep.try_mark();
        keep.mark_black();
        run_cycle(&heap, SweepingType::Atomic);

        let again = allocate(&heap, 32, SpaceKind::Regular);
        assert_eq!(again.address(), dead);
        assert_eq!(heap.page_count(), 1);
        heap.teardown();
    }
}
