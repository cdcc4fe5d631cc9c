//! Heap Module - pages, spaces and the per-heap state
//!
//! A [`Heap`] owns:
//! - every page mapping, keyed by page base,
//! - the regular and compactable normal spaces (large objects get their own
//!   page each),
//! - the strong and weak persistent regions,
//! - the prefinalizer registry and the compaction move listeners,
//! - the [`HeapHandle`] with the current phase,
//! - the marking worklists while a marking cycle is active, shared with the
//!   write barrier.
//!
//! ```text
//! ┌──────────────────────────── Heap ────────────────────────────┐
//! │ pages: base -> mapping                                        │
//! │ ┌─ regular space ─┐  ┌─ compactable space ─┐  ┌─ large ────┐ │
//! │ │ LAB, free list  │  │ LAB, free list,     │  │ one object │ │
//! │ │                 │  │ compaction LAB      │  │ per page   │ │
//! │ └─────────────────┘  └─────────────────────┘  └────────────┘ │
//! │ persistents, weak persistents, handle, marking worklists      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Pages point back to their heap, so the heap always lives behind an `Arc`
//! and outlives its pages.

pub mod handle;
pub(crate) mod memory;
pub mod page;
pub(crate) mod prefinalizer;
pub(crate) mod space;
pub mod sweeper;

pub use handle::{HeapHandle, HeapPhase, HeapState};
pub use page::{BasePage, SpaceKind, LARGE_OBJECT_THRESHOLD, PAGE_HEADER_SIZE, PAGE_MASK, PAGE_SIZE};

use crate::config::HeapOptions;
use crate::error::{GcError, Result};
use crate::logging::{GcEvent, GcLogger};
use crate::marker::MarkingWorklists;
use crate::object::gc_info::{GcInfoIndex, GcInfoTable};
use crate::object::header::{ObjectHeader, ALLOCATION_GRANULARITY, MIN_PAYLOAD_SIZE, OBJECT_HEADER_SIZE};
use crate::object::persistent::PersistentRegion;
use crate::relocate::MoveListener;
use crate::stats::ProcessHeapStatistics;
use crate::util::align_up;
use crate::util::atomic::saturating_sub;
use indexmap::IndexMap;
use memory::{os_page_size, PageBackend, PageMemory};
use parking_lot::{Mutex, MutexGuard, RwLock};
use prefinalizer::PreFinalizerRegistry;
use space::NormalSpace;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Block size for an object with `payload_size` bytes, `None` on overflow
pub(crate) fn block_size_for(payload_size: usize) -> Option<usize> {
    let payload = payload_size.max(MIN_PAYLOAD_SIZE);
    let unaligned = payload.checked_add(OBJECT_HEADER_SIZE + ALLOCATION_GRANULARITY - 1)?;
    Some(unaligned & !(ALLOCATION_GRANULARITY - 1))
}

/// A managed heap
pub struct Heap {
    handle: HeapHandle,
    options: HeapOptions,
    backend: PageBackend,
    pages: Mutex<IndexMap<usize, PageMemory>>,
    regular: Mutex<NormalSpace>,
    compactable: Mutex<NormalSpace>,
    statistics: Arc<ProcessHeapStatistics>,
    allocated_object_bytes: AtomicUsize,
    persistents: Arc<PersistentRegion>,
    weak_persistents: Arc<PersistentRegion>,
    logger: Arc<GcLogger>,
    marking: RwLock<Option<Arc<MarkingWorklists>>>,
    prefinalizers: PreFinalizerRegistry,
    move_listeners: RwLock<Vec<Arc<dyn MoveListener>>>,
}

impl Heap {
    pub(crate) fn new(options: HeapOptions) -> Result<Self> {
        options.validate()?;
        let statistics = options
            .statistics
            .clone()
            .unwrap_or_else(|| Arc::new(ProcessHeapStatistics::new()));
        Ok(Self {
            handle: HeapHandle::new(options.young_generation),
            backend: PageBackend::new(options.max_heap_size, Arc::clone(&statistics)),
            pages: Mutex::new(IndexMap::new()),
            regular: Mutex::new(NormalSpace::new(SpaceKind::Regular)),
            compactable: Mutex::new(NormalSpace::new(SpaceKind::Compactable)),
            statistics,
            allocated_object_bytes: AtomicUsize::new(0),
            persistents: Arc::new(PersistentRegion::new()),
            weak_persistents: Arc::new(PersistentRegion::new()),
            logger: Arc::new(GcLogger::new(options.logger.clone())),
            marking: RwLock::new(None),
            prefinalizers: PreFinalizerRegistry::new(),
            move_listeners: RwLock::new(Vec::new()),
            options,
        })
    }

    #[inline]
    pub fn handle(&self) -> &HeapHandle {
        &self.handle
    }

    #[inline]
    pub fn options(&self) -> &HeapOptions {
        &self.options
    }

    #[inline]
    pub fn logger(&self) -> &Arc<GcLogger> {
        &self.logger
    }

    #[inline]
    pub fn statistics(&self) -> &Arc<ProcessHeapStatistics> {
        &self.statistics
    }

    /// Strong roots of this heap
    #[inline]
    pub fn persistents(&self) -> &Arc<PersistentRegion> {
        &self.persistents
    }

    /// Weak roots of this heap
    #[inline]
    pub fn weak_persistents(&self) -> &Arc<PersistentRegion> {
        &self.weak_persistents
    }

    pub(crate) fn prefinalizers(&self) -> &PreFinalizerRegistry {
        &self.prefinalizers
    }

    /// Objects whose prefinalizer has not run yet
    pub fn pending_prefinalizers(&self) -> usize {
        self.prefinalizers.len()
    }

    pub(crate) fn add_move_listener(&self, listener: Arc<dyn MoveListener>) {
        self.move_listeners.write().push(listener);
    }

    pub(crate) fn remove_move_listener(&self, listener: &Arc<dyn MoveListener>) -> bool {
        let mut listeners = self.move_listeners.write();
        match listeners.iter().position(|registered| Arc::ptr_eq(registered, listener)) {
            Some(position) => {
                listeners.remove(position);
                true
            },
            None => false,
        }
    }

    pub(crate) fn move_listeners(&self) -> Vec<Arc<dyn MoveListener>> {
        self.move_listeners.read().clone()
    }

    /// Object bytes allocated in this heap and not yet reclaimed
    pub fn allocated_object_size(&self) -> usize {
        self.allocated_object_bytes.load(Ordering::Relaxed)
    }

    /// Page bytes mapped by this heap
    pub fn allocated_space(&self) -> usize {
        self.backend.committed()
    }

    /// Number of live page mappings
    pub fn page_count(&self) -> usize {
        self.pages.lock().len()
    }

    // === Marking state shared with the write barrier ===

    pub(crate) fn marking_worklists(&self) -> Option<Arc<MarkingWorklists>> {
        self.marking.read().clone()
    }

    pub(crate) fn set_marking_worklists(&self, worklists: Option<Arc<MarkingWorklists>>) {
        *self.marking.write() = worklists;
    }

    // === Allocation ===

    fn space(&self, kind: SpaceKind) -> MutexGuard<'_, NormalSpace> {
        match kind {
            SpaceKind::Compactable => self.compactable.lock(),
            _ => self.regular.lock(),
        }
    }

    fn map_page(&self, size: usize, kind: SpaceKind) -> Result<&BasePage> {
        let memory = self.backend.allocate(size)?;
        let base = memory.base();
        let size = memory.size();
        // SAFETY: fresh mapping owned by this heap; the heap lives in an Arc.
        let page = unsafe { BasePage::init(base, self as *const Heap, kind, size) };
        self.pages.lock().insert(base, memory);
        Ok(page)
    }

    /// Allocate an uninitialized object of `payload_size` bytes
    ///
    /// The header is written and flagged in construction; the payload is zeroed.
    pub(crate) fn allocate(&self, payload_size: usize, index: GcInfoIndex, kind: SpaceKind) -> Result<NonNull<u8>> {
        let block_size = block_size_for(payload_size).ok_or_else(|| {
            GcError::InvalidArgument(format!("allocation of {} bytes overflows", payload_size))
        })?;

        let header = if block_size > LARGE_OBJECT_THRESHOLD {
            self.allocate_large(block_size, index)?
        } else {
            let mut space = self.space(kind);
            let block = match space.try_allocate(block_size) {
                Some(block) => block,
                None => {
                    let page = self.map_page(PAGE_SIZE, kind)?;
                    space.add_page(page.payload_start(), page.payload_end());
                    space.try_allocate(block_size).ok_or_else(|| {
                        GcError::InvalidArgument(format!("block of {} bytes exceeds a page", block_size))
                    })?
                },
            };
            // SAFETY: the block was just carved from this space.
            unsafe { ObjectHeader::init(block as *mut u8, index, block_size, false) }
        };

        // SAFETY: the payload spans block_size - OBJECT_HEADER_SIZE owned bytes.
        unsafe { std::ptr::write_bytes(header.payload(), 0, header.payload_size()) };
        self.statistics.increase_allocated_object_size(block_size);
        self.allocated_object_bytes.fetch_add(block_size, Ordering::Relaxed);
        // SAFETY: payload of a live block is never null.
        Ok(unsafe { NonNull::new_unchecked(header.payload()) })
    }

    fn allocate_large(&self, block_size: usize, index: GcInfoIndex) -> Result<&ObjectHeader> {
        let page_size = align_up(PAGE_HEADER_SIZE + block_size, os_page_size());
        let page = self.map_page(page_size, SpaceKind::Large)?;
        // SAFETY: the page payload is reserved for this one object.
        Ok(unsafe { ObjectHeader::init(page.payload_start() as *mut u8, index, block_size, true) })
    }

    /// Allocate a block for a relocated object in a fresh compaction page
    pub(crate) fn allocate_for_compaction(&self, block_size: usize) -> Result<usize> {
        let mut space = self.compactable.lock();
        if let Some(block) = space.try_allocate_for_compaction(block_size) {
            return Ok(block);
        }
        let page = self.map_page(PAGE_SIZE, SpaceKind::Compactable)?;
        space.add_compaction_page(page.payload_start(), page.payload_end());
        space.try_allocate_for_compaction(block_size).ok_or_else(|| {
            GcError::InvalidArgument(format!("block of {} bytes exceeds a page", block_size))
        })
    }

    /// Make every normal page walkable
    pub(crate) fn retire_labs(&self) {
        self.regular.lock().retire_lab();
        let mut compactable = self.compactable.lock();
        compactable.retire_lab();
        compactable.retire_compaction_lab();
    }

    // === Pages ===

    /// Bases of all pages, in mapping order
    pub(crate) fn page_bases(&self) -> Vec<usize> {
        self.pages.lock().keys().copied().collect()
    }

    /// Drop the free lists and LABs before the sweeper rebuilds them
    pub(crate) fn reset_free_lists(&self) {
        self.regular.lock().reset_free_list();
        let mut compactable = self.compactable.lock();
        compactable.retire_compaction_lab();
        compactable.reset_free_list();
    }

    /// Hand a swept free block back to its space
    ///
    /// # Safety
    /// The block lies in a normal page of this heap and holds no live object.
    pub(crate) unsafe fn add_free_block(&self, kind: SpaceKind, address: usize, size: usize) {
        self.space(kind).add_free_block(address, size);
    }

    /// Unmap a page; its objects must already be finalized
    pub(crate) fn release_page(&self, base: usize) {
        // SAFETY: only bases of live pages are passed in.
        let page = unsafe { BasePage::at(base) };
        let kind = page.space();
        if kind != SpaceKind::Large {
            self.space(kind).forget_page(base, page.size());
        }
        let memory = self.pages.lock().swap_remove(&base);
        if let Some(memory) = memory {
            self.backend.release(memory);
        }
    }

    /// Whether `address` lies inside a page of this heap
    pub fn contains(&self, address: usize) -> bool {
        self.page_containing(address).is_some()
    }

    fn page_containing(&self, address: usize) -> Option<&BasePage> {
        let pages = self.pages.lock();
        if pages.contains_key(&(address & PAGE_MASK)) {
            // SAFETY: a mapped page base.
            let page = unsafe { BasePage::at(address & PAGE_MASK) };
            return page.contains(address).then_some(page);
        }
        pages
            .iter()
            .find(|(&base, memory)| address >= base && address < base + memory.size())
            .map(|(&base, _)| unsafe { BasePage::at(base) })
    }

    /// Object whose payload contains `address`, for conservative scanning
    ///
    /// Requires walkable pages, so only valid with LABs retired.
    pub(crate) fn find_object_conservatively(&self, address: usize) -> Option<&ObjectHeader> {
        let page = self.page_containing(address)?;
        // SAFETY: LABs are retired by the caller; pages are walkable.
        unsafe { page.find_object(address) }
    }

    // === Explicit management ===

    /// Finalize and reclaim an object the embedder knows to be unreferenced
    ///
    /// Freeing during a collection is an embedder bug: debug builds abort,
    /// release builds ignore the call.
    pub(crate) fn free_unreferenced(&self, header: &ObjectHeader) {
        let in_gc = HeapState::is_in_gc(&self.handle);
        crate::gc_dcheck!(!in_gc, "object freed during a garbage collection");
        if in_gc {
            return;
        }
        crate::gc_dcheck!(!header.is_free() && !header.is_in_construction());
        let size = header.size();
        let address = header.address();
        self.prefinalizers.run_for(header);
        // SAFETY: the object is live and the embedder guarantees no references remain.
        unsafe { finalize(header) };
        self.account_freed(size);
        self.logger.log(GcEvent::ExplicitFree { size });

        // SAFETY: the header sits on a live page of this heap.
        let page = unsafe { BasePage::from_payload(header.payload()) };
        if page.is_large() {
            self.release_page(page.base());
        } else {
            self.space(page.space()).free_object(address, size);
        }
    }

    /// Change an object's payload to `new_payload_size` bytes in place
    ///
    /// Growth only succeeds when the object ends at the allocation buffer.
    /// Returns false without changing anything when resizing is not possible.
    pub(crate) fn resize(&self, header: &ObjectHeader, new_payload_size: usize) -> bool {
        if HeapState::is_in_gc(&self.handle) || header.is_large_object() {
            return false;
        }
        let new_size = match block_size_for(new_payload_size) {
            Some(size) if size <= LARGE_OBJECT_THRESHOLD => size,
            _ => return false,
        };
        let old_size = header.size();
        let address = header.address();
        // SAFETY: the header sits on a live normal page of this heap.
        let kind = unsafe { BasePage::from_payload(header.payload()) }.space();
        let mut space = self.space(kind);

        if new_size > old_size {
            if !space.try_grow(address, old_size, new_size) {
                return false;
            }
            // SAFETY: the grown range was LAB memory owned by this space.
            unsafe { std::ptr::write_bytes((address + old_size) as *mut u8, 0, new_size - old_size) };
            header.set_size(new_size);
            self.statistics.increase_allocated_object_size(new_size - old_size);
            self.allocated_object_bytes.fetch_add(new_size - old_size, Ordering::Relaxed);
        } else if new_size < old_size {
            header.set_size(new_size);
            if !space.try_shrink(address, old_size, new_size) {
                header.set_size(old_size);
                return false;
            }
            self.account_freed(old_size - new_size);
        }
        true
    }

    pub(crate) fn account_freed(&self, bytes: usize) {
        self.statistics.decrease_allocated_object_size(bytes);
        saturating_sub(&self.allocated_object_bytes, bytes);
    }

    // === Teardown ===

    /// Finalize every remaining object and unmap every page
    pub(crate) fn teardown(&self) {
        self.persistents.clear_all();
        self.weak_persistents.clear_all();
        self.retire_labs();
        let prefinalized = self.prefinalizers.run_all();
        let mut finalized = 0;
        for base in self.page_bases() {
            // SAFETY: LABs retired, no collection running; the page is walkable.
            unsafe {
                BasePage::at(base).for_each_block(|header| {
                    if !header.is_free() && !header.is_forwarded() {
                        finalize(header);
                        finalized += 1;
                    }
                });
            }
            self.release_page(base);
        }
        let remaining = self.allocated_object_bytes.swap(0, Ordering::Relaxed);
        self.statistics.decrease_allocated_object_size(remaining);
        log::debug!(
            target: crate::logging::LOG_TARGET,
            "heap torn down, {} objects prefinalized, {} finalized",
            prefinalized,
            finalized
        );
    }
}

/// Run the finalizer of the object behind `header`, if its type has one
///
/// # Safety
/// The object is fully constructed and is never accessed again.
pub(crate) unsafe fn finalize(header: &ObjectHeader) {
    if header.is_in_construction() {
        return;
    }
    if let Some(finalize) = GcInfoTable::global().get(header.gc_info_index()).finalize {
        finalize(header.payload());
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("phase", &self.handle.phase())
            .field("pages", &self.page_count())
            .field("allocated_object_size", &self.allocated_object_size())
            .finish()
    }
}
