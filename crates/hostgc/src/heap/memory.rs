//! Page Memory - anonymous memmap2 mappings aligned to the heap page size
//!
//! Pages must start at `PAGE_SIZE` boundaries so that masking a payload
//! address yields its page. Anonymous mappings are only OS-page aligned, so
//! each mapping over-reserves one heap page and the usable region starts at
//! the first aligned address inside it. Untouched parts of the reservation
//! are never committed by the OS.

use crate::error::{GcError, Result};
use crate::heap::page::PAGE_SIZE;
use crate::stats::ProcessHeapStatistics;
use crate::util::{align_up, atomic::saturating_sub};
use memmap2::{MmapMut, MmapOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// OS page size, cached
pub fn os_page_size() -> usize {
    static OS_PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);
    let cached = OS_PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let size = page_size::get();
    OS_PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

/// One page-aligned region backed by an anonymous mapping
pub(crate) struct PageMemory {
    _mmap: MmapMut,
    base: usize,
    size: usize,
}

impl PageMemory {
    /// Base address, a multiple of `PAGE_SIZE`
    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Usable bytes starting at `base`
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl std::fmt::Debug for PageMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageMemory")
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &self.size)
            .finish()
    }
}

/// Hands out page memory within the heap limit and keeps the space counter
#[derive(Debug)]
pub(crate) struct PageBackend {
    committed: AtomicUsize,
    limit: usize,
    stats: Arc<ProcessHeapStatistics>,
}

impl PageBackend {
    pub fn new(limit: usize, stats: Arc<ProcessHeapStatistics>) -> Self {
        crate::gc_dcheck!(PAGE_SIZE % os_page_size() == 0);
        Self {
            committed: AtomicUsize::new(0),
            limit,
            stats,
        }
    }

    /// Map `size` usable bytes (rounded to OS pages) at a `PAGE_SIZE` boundary
    pub fn allocate(&self, size: usize) -> Result<PageMemory> {
        let size = align_up(size, os_page_size());
        let committed = self.committed.fetch_add(size, Ordering::AcqRel) + size;
        if committed > self.limit {
            saturating_sub(&self.committed, size);
            return Err(GcError::OutOfMemory {
                requested: size,
                limit: self.limit,
            });
        }

        let reservation = size
            .checked_add(PAGE_SIZE)
            .ok_or_else(|| GcError::InvalidArgument(format!("page size {} overflows", size)))?;
        let mut mmap = match MmapOptions::new().len(reservation).map_anon() {
            Ok(mmap) => mmap,
            Err(e) => {
                saturating_sub(&self.committed, size);
                return Err(GcError::PageAllocation(e));
            },
        };

        let base = align_up(mmap.as_mut_ptr() as usize, PAGE_SIZE);
        self.stats.increase_allocated_space(size);
        Ok(PageMemory {
            _mmap: mmap,
            base,
            size,
        })
    }

    /// Unmap a page
    pub fn release(&self, memory: PageMemory) {
        saturating_sub(&self.committed, memory.size);
        self.stats.decrease_allocated_space(memory.size);
        drop(memory);
    }

    /// Bytes currently mapped for pages
    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }
}
