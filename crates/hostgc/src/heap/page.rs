//! Page Layout
//!
//! Normal Page (PAGE_SIZE = 128KB, PAGE_SIZE aligned):
//! ┌──────────────┬────────┬─────────┬────────┬─────────┬─────┐
//! │  BasePage    │ header │ payload │ header │ payload │ ... │
//! └──────────────┴────────┴─────────┴────────┴─────────┴─────┘
//!
//! Large Page (one object, OS-page rounded):
//! ┌──────────────┬────────┬──────────────────────────────────┐
//! │  BasePage    │ header │ payload                          │
//! └──────────────┴────────┴──────────────────────────────────┘
//!
//! Normal pages are fully covered by blocks (objects or free blocks) once the
//! space's linear allocation buffer has been retired, so they can be walked
//! from the first header to the page end.

use crate::heap::Heap;
use crate::marker::MarkingProgressTracker;
use crate::object::header::{ObjectHeader, ALLOCATION_GRANULARITY, OBJECT_HEADER_SIZE};
use crate::util::align_up;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Size and alignment of a normal page
pub const PAGE_SIZE: usize = 1 << 17;

/// Masks an address down to its page base
pub const PAGE_MASK: usize = !(PAGE_SIZE - 1);

/// Objects with a block size above this get a dedicated large page
pub const LARGE_OBJECT_THRESHOLD: usize = PAGE_SIZE / 2;

/// Space a page belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceKind {
    /// Normal pages whose objects never move
    Regular,
    /// Normal pages whose objects may be relocated by the compactor
    Compactable,
    /// One object per page
    Large,
}

/// Page metadata at the start of every page
#[repr(C)]
pub struct BasePage {
    heap: *const Heap,
    space: SpaceKind,
    size: usize,
    progress: MarkingProgressTracker,
    traced_chunks: AtomicUsize,
}

/// Offset of the first block in a page
pub const PAGE_HEADER_SIZE: usize =
    align_up(std::mem::size_of::<BasePage>(), ALLOCATION_GRANULARITY);

impl BasePage {
    /// Write page metadata at `base`
    ///
    /// # Safety
    /// `base` is the start of a fresh, writable page mapping of `size` bytes.
    pub(crate) unsafe fn init<'a>(base: usize, heap: *const Heap, space: SpaceKind, size: usize) -> &'a BasePage {
        let page = base as *mut BasePage;
        page.write(BasePage {
            heap,
            space,
            size,
            progress: MarkingProgressTracker::new(),
            traced_chunks: AtomicUsize::new(0),
        });
        &*page
    }

    /// Page containing a payload address
    ///
    /// # Safety
    /// `address` must lie within the first `PAGE_SIZE` bytes of a live page.
    #[inline]
    pub unsafe fn from_payload<'a>(address: *const u8) -> &'a BasePage {
        &*((address as usize & PAGE_MASK) as *const BasePage)
    }

    /// Page starting at `base`
    ///
    /// # Safety
    /// `base` must be the base of a live page.
    #[inline]
    pub(crate) unsafe fn at<'a>(base: usize) -> &'a BasePage {
        &*(base as *const BasePage)
    }

    /// Owning heap
    #[inline]
    pub fn heap(&self) -> &Heap {
        // SAFETY: pages are released before their heap is dropped.
        unsafe { &*self.heap }
    }

    #[inline]
    pub(crate) fn heap_ptr(&self) -> *const Heap {
        self.heap
    }

    #[inline]
    pub fn space(&self) -> SpaceKind {
        self.space
    }

    #[inline]
    pub fn is_large(&self) -> bool {
        self.space == SpaceKind::Large
    }

    #[inline]
    pub fn is_compactable(&self) -> bool {
        self.space == SpaceKind::Compactable
    }

    #[inline]
    pub fn base(&self) -> usize {
        self as *const BasePage as usize
    }

    /// Mapped bytes starting at the base
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn payload_start(&self) -> usize {
        self.base() + PAGE_HEADER_SIZE
    }

    #[inline]
    pub fn payload_end(&self) -> usize {
        self.base() + self.size
    }

    /// Whether `address` lies in the block area of this page
    #[inline]
    pub fn contains(&self, address: usize) -> bool {
        address >= self.payload_start() && address < self.payload_end()
    }

    /// Chunk cursor for the object of a large page
    #[inline]
    pub fn progress(&self) -> &MarkingProgressTracker {
        &self.progress
    }

    /// Reset the per-cycle chunk completion count
    pub(crate) fn reset_traced_chunks(&self) {
        self.traced_chunks.store(0, Ordering::Relaxed);
    }

    /// Record one traced chunk; true when it was the last one
    pub(crate) fn chunk_traced(&self) -> bool {
        self.traced_chunks.fetch_add(1, Ordering::AcqRel) + 1 == self.progress.total_number_of_chunks()
    }

    /// Header of the single object on a large page
    #[inline]
    pub fn large_object_header(&self) -> &ObjectHeader {
        crate::gc_dcheck!(self.is_large());
        // SAFETY: large pages hold one object right after the page header.
        unsafe { ObjectHeader::at(self.payload_start()) }
    }

    /// Visit every block of the page in address order
    ///
    /// # Safety
    /// The page must be walkable: no active allocation buffer inside it and no
    /// concurrent writer changing block sizes.
    pub(crate) unsafe fn for_each_block(&self, mut visit: impl FnMut(&ObjectHeader)) {
        if self.is_large() {
            visit(self.large_object_header());
            return;
        }
        let mut address = self.payload_start();
        let end = self.payload_end();
        while address < end {
            let header = ObjectHeader::at(address);
            let size = header.size();
            crate::gc_dcheck!(
                size >= OBJECT_HEADER_SIZE && size % ALLOCATION_GRANULARITY == 0,
                "corrupt block at {:#x}: {:?}",
                address,
                header
            );
            visit(header);
            address += size;
        }
    }

    /// Object whose payload contains `address`, if any
    ///
    /// Addresses inside headers or free blocks resolve to nothing.
    ///
    /// # Safety
    /// Same walkability requirement as [`BasePage::for_each_block`].
    pub(crate) unsafe fn find_object(&self, address: usize) -> Option<&ObjectHeader> {
        if !self.contains(address) {
            return None;
        }
        if self.is_large() {
            let header = self.large_object_header();
            return (address >= header.payload() as usize).then_some(header);
        }
        let mut block = self.payload_start();
        while block < self.payload_end() {
            let header = ObjectHeader::at(block);
            let size = header.size();
            if address < block + size {
                let in_payload = address >= block + OBJECT_HEADER_SIZE;
                return (in_payload && !header.is_free()).then_some(header);
            }
            block += size;
        }
        None
    }
}

impl std::fmt::Debug for BasePage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasePage")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("space", &self.space)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::memory::PageBackend;
    use crate::object::gc_info::GcInfoIndex;
    use crate::stats::ProcessHeapStatistics;
    use std::sync::Arc;

    #[test]
    fn test_page_header_fits_granularity() {
        assert_eq!(PAGE_HEADER_SIZE % ALLOCATION_GRANULARITY, 0);
        assert!(PAGE_HEADER_SIZE < LARGE_OBJECT_THRESHOLD);
    }

    #[test]
    fn test_walk_and_find() {
        let backend = PageBackend::new(PAGE_SIZE, Arc::new(ProcessHeapStatistics::new()));
        let memory = backend.allocate(PAGE_SIZE).unwrap();
        let page = unsafe { BasePage::init(memory.base(), std::ptr::null(), SpaceKind::Regular, PAGE_SIZE) };

        let first = page.payload_start();
        let rest = page.payload_end() - (first + 64);
        unsafe {
            ObjectHeader::init(first as *mut u8, GcInfoIndex::from_u16(1), 64, false).mark_fully_constructed();
            ObjectHeader::init_free((first + 64) as *mut u8, rest);
        }

        let mut sizes = Vec::new();
        unsafe { page.for_each_block(|h| sizes.push((h.size(), h.is_free()))) };
        assert_eq!(sizes, vec![(64, false), (rest, true)]);

        unsafe {
            assert_eq!(page.find_object(first + 20).map(|h| h.address()), Some(first));
            assert!(page.find_object(first + 4).is_none(), "inside the header");
            assert!(page.find_object(first + 100).is_none(), "inside a free block");
            assert_eq!(BasePage::from_payload((first + 16) as *const u8).base(), page.base());
        }
        backend.release(memory);
    }
}
