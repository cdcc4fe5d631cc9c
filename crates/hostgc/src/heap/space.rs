//! Normal Spaces - linear allocation buffer + first-fit free list
//!
//! Allocation bumps through the current linear allocation buffer (LAB). When
//! it runs dry the space takes the first free-list block large enough, or
//! asks the heap for a fresh page. The unused tail of a replaced LAB becomes a
//! free block, so pages stay walkable once [`NormalSpace::retire_lab`] ran.
//!
//! The compactable space has a second LAB used only by the compactor. It is
//! only ever refilled with fresh pages, never from the free list, so moved
//! objects cannot land on memory that is still being evacuated.

use crate::heap::page::SpaceKind;
use crate::object::header::{ObjectHeader, ALLOCATION_GRANULARITY, OBJECT_HEADER_SIZE};
use crate::util::is_aligned;

/// Bump region `[start, end)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Lab {
    pub start: usize,
    pub end: usize,
}

impl Lab {
    #[inline]
    pub fn size(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    fn try_bump(&mut self, size: usize) -> Option<usize> {
        if self.size() < size {
            return None;
        }
        let block = self.start;
        self.start += size;
        Some(block)
    }
}

/// One space of normal pages
#[derive(Debug)]
pub(crate) struct NormalSpace {
    kind: SpaceKind,
    lab: Lab,
    compaction_lab: Lab,
    free_list: Vec<(usize, usize)>,
}

impl NormalSpace {
    pub fn new(kind: SpaceKind) -> Self {
        crate::gc_dcheck!(kind != SpaceKind::Large);
        Self {
            kind,
            lab: Lab::default(),
            compaction_lab: Lab::default(),
            free_list: Vec::new(),
        }
    }

    #[inline]
    pub fn kind(&self) -> SpaceKind {
        self.kind
    }

    #[inline]
    pub fn lab(&self) -> Lab {
        self.lab
    }

    /// Allocate a block of `size` bytes from the LAB or the free list
    ///
    /// `None` means the caller has to add a page.
    pub fn try_allocate(&mut self, size: usize) -> Option<usize> {
        crate::gc_dcheck!(is_aligned(size, ALLOCATION_GRANULARITY));
        if let Some(block) = self.lab.try_bump(size) {
            return Some(block);
        }
        let index = self.free_list.iter().position(|&(_, block_size)| block_size >= size)?;
        let (address, block_size) = self.free_list.swap_remove(index);
        self.retire_lab();
        self.lab = Lab {
            start: address,
            end: address + block_size,
        };
        self.lab.try_bump(size)
    }

    /// Make the payload area of a fresh page the new LAB
    pub fn add_page(&mut self, payload_start: usize, payload_end: usize) {
        self.retire_lab();
        self.lab = Lab {
            start: payload_start,
            end: payload_end,
        };
    }

    /// Turn the unused LAB tail into a free block
    pub fn retire_lab(&mut self) {
        Self::retire(&mut self.lab, &mut self.free_list);
    }

    fn retire(lab: &mut Lab, free_list: &mut Vec<(usize, usize)>) {
        if !lab.is_empty() {
            // SAFETY: the LAB range belongs to this space and holds no objects.
            unsafe { ObjectHeader::init_free(lab.start as *mut u8, lab.size()) };
            free_list.push((lab.start, lab.size()));
        }
        *lab = Lab::default();
    }

    /// Hand a free block to the allocator
    ///
    /// # Safety
    /// `[address, address + size)` lies in a page of this space and no object
    /// overlaps it.
    pub unsafe fn add_free_block(&mut self, address: usize, size: usize) {
        crate::gc_dcheck!(size >= OBJECT_HEADER_SIZE);
        ObjectHeader::init_free(address as *mut u8, size);
        self.free_list.push((address, size));
    }

    /// Drop every free-list entry and the LAB; the sweeper rebuilds them
    pub fn reset_free_list(&mut self) {
        self.retire_lab();
        self.free_list.clear();
    }

    /// Forget free blocks inside `[base, base + size)`; used before a page is released
    pub fn forget_page(&mut self, base: usize, size: usize) {
        let end = base + size;
        self.free_list.retain(|&(address, _)| address < base || address >= end);
        if self.lab.start >= base && self.lab.start < end {
            self.lab = Lab::default();
        }
        if self.compaction_lab.start >= base && self.compaction_lab.start < end {
            self.compaction_lab = Lab::default();
        }
    }

    pub fn free_bytes(&self) -> usize {
        self.lab.size() + self.free_list.iter().map(|&(_, size)| size).sum::<usize>()
    }

    // === Explicit management ===

    /// Return a dead object's block to the space
    ///
    /// A block that ends where the LAB starts is merged back into the LAB.
    pub fn free_object(&mut self, address: usize, size: usize) {
        if address + size == self.lab.start {
            self.lab.start = address;
            // SAFETY: the block is part of the LAB again; the header keeps the
            // page walkable until the next bump overwrites it.
            unsafe { ObjectHeader::init_free(address as *mut u8, self.lab.size()) };
            return;
        }
        // SAFETY: the caller freed the object at `address`.
        unsafe { self.add_free_block(address, size) };
    }

    /// Grow the block at `address` in place by taking bytes from the LAB
    ///
    /// Only possible when the block ends exactly at the LAB start.
    pub fn try_grow(&mut self, address: usize, old_size: usize, new_size: usize) -> bool {
        let delta = new_size - old_size;
        if address + old_size != self.lab.start || self.lab.size() < delta {
            return false;
        }
        self.lab.start += delta;
        true
    }

    /// Shrink the block at `address`, returning the tail to the LAB or the free list
    ///
    /// Returns false when the tail is too small to form a free block; the
    /// object then keeps its size.
    pub fn try_shrink(&mut self, address: usize, old_size: usize, new_size: usize) -> bool {
        let tail = old_size - new_size;
        if tail == 0 {
            return true;
        }
        let tail_start = address + new_size;
        if address + old_size == self.lab.start {
            self.lab.start = tail_start;
            return true;
        }
        if tail < OBJECT_HEADER_SIZE {
            return false;
        }
        // SAFETY: the tail is cut off a live object owned by the caller.
        unsafe { self.add_free_block(tail_start, tail) };
        true
    }

    // === Compaction ===

    /// Allocate in the compaction LAB; `None` means a fresh page is needed
    pub fn try_allocate_for_compaction(&mut self, size: usize) -> Option<usize> {
        self.compaction_lab.try_bump(size)
    }

    /// Use a fresh page for compaction targets
    pub fn add_compaction_page(&mut self, payload_start: usize, payload_end: usize) {
        self.retire_compaction_lab();
        self.compaction_lab = Lab {
            start: payload_start,
            end: payload_end,
        };
    }

    pub fn retire_compaction_lab(&mut self) {
        Self::retire(&mut self.compaction_lab, &mut self.free_list);
    }
}
