//! Object Header - Metadata preceding every GC-managed payload
//!
//! Object Header Layout (16 bytes on 64-bit):
//! ┌─────────────────────────────────────────┐
//! │         State Word (4 bytes)            │  <- AtomicU32
//! │  - Bits 0-1: Color (white/gray/black)   │
//! │  - Bit 2: In construction               │
//! │  - Bit 3: Large object                  │
//! │  - Bit 4: Free block                    │
//! │  - Bit 5: Forwarded (compaction)        │
//! │  - Bit 6: Pinned (compaction)           │
//! │  - Bits 16-31: Type descriptor index    │
//! ├─────────────────────────────────────────┤
//! │         Padding (4 bytes)               │
//! ├─────────────────────────────────────────┤
//! │         Size (8 bytes)                  │  <- Block size incl. header
//! └─────────────────────────────────────────┘
//!
//! The payload starts right after the header, so `payload - 16` is the
//! header and `payload & PAGE_MASK` is the owning page.

use crate::object::gc_info::GcInfoIndex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Size of the object header in bytes
pub const OBJECT_HEADER_SIZE: usize = std::mem::size_of::<ObjectHeader>();

/// Every block size is a multiple of this
pub const ALLOCATION_GRANULARITY: usize = 16;

/// Smallest payload handed out; room for a forwarding address
pub const MIN_PAYLOAD_SIZE: usize = ALLOCATION_GRANULARITY;

const COLOR_MASK: u32 = 0b11;
const IN_CONSTRUCTION_BIT: u32 = 1 << 2;
const LARGE_BIT: u32 = 1 << 3;
const FREE_BIT: u32 = 1 << 4;
const FORWARDED_BIT: u32 = 1 << 5;
const PINNED_BIT: u32 = 1 << 6;
const GC_INFO_SHIFT: u32 = 16;

/// Tri-color marking state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    /// Not reached yet; reclaimed by the sweeper if still white
    White = 0,
    /// Reached and queued; children not traced yet
    Gray = 1,
    /// Traced; all children at least gray
    Black = 2,
}

impl Color {
    #[inline]
    fn from_bits(bits: u32) -> Self {
        match bits & COLOR_MASK {
            0 => Color::White,
            1 => Color::Gray,
            _ => Color::Black,
        }
    }
}

/// Object Header
///
/// Mark-state transitions are atomic read-modify-write operations so that
/// concurrent markers, the write barrier and the mutator can race on them.
#[repr(C)]
pub struct ObjectHeader {
    state: AtomicU32,
    _padding: u32,
    size: AtomicUsize,
}

impl ObjectHeader {
    /// Write the header of a freshly allocated object, still in construction
    ///
    /// # Safety
    /// `at` must point to `size` writable bytes owned by the caller.
    pub(crate) unsafe fn init<'a>(
        at: *mut u8,
        gc_info_index: GcInfoIndex,
        size: usize,
        large: bool,
    ) -> &'a ObjectHeader {
        let mut state = IN_CONSTRUCTION_BIT | ((gc_info_index.as_u16() as u32) << GC_INFO_SHIFT);
        if large {
            state |= LARGE_BIT;
        }
        let header = at as *mut ObjectHeader;
        header.write(ObjectHeader {
            state: AtomicU32::new(state),
            _padding: 0,
            size: AtomicUsize::new(size),
        });
        &*header
    }

    /// Write the header of a free block
    ///
    /// # Safety
    /// `at` must point to `size` bytes no live object overlaps.
    pub(crate) unsafe fn init_free<'a>(at: *mut u8, size: usize) -> &'a ObjectHeader {
        crate::gc_dcheck!(size >= OBJECT_HEADER_SIZE && size % ALLOCATION_GRANULARITY == 0);
        let header = at as *mut ObjectHeader;
        header.write(ObjectHeader {
            state: AtomicU32::new(FREE_BIT),
            _padding: 0,
            size: AtomicUsize::new(size),
        });
        &*header
    }

    /// Header of an object given its payload address
    ///
    /// # Safety
    /// `payload` must be the start of a live allocation in a hostgc page.
    #[inline]
    pub unsafe fn from_payload<'a>(payload: *const u8) -> &'a ObjectHeader {
        &*(payload.sub(OBJECT_HEADER_SIZE) as *const ObjectHeader)
    }

    /// Header located at `address`
    ///
    /// # Safety
    /// `address` must be a block start inside a walkable page.
    #[inline]
    pub(crate) unsafe fn at<'a>(address: usize) -> &'a ObjectHeader {
        &*(address as *const ObjectHeader)
    }

    /// Address of this header
    #[inline]
    pub fn address(&self) -> usize {
        self as *const ObjectHeader as usize
    }

    /// Payload address
    #[inline]
    pub fn payload(&self) -> *mut u8 {
        (self.address() + OBJECT_HEADER_SIZE) as *mut u8
    }

    // === Size ===

    /// Block size including the header
    #[inline]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Payload size in bytes (granularity rounded)
    #[inline]
    pub fn payload_size(&self) -> usize {
        self.size() - OBJECT_HEADER_SIZE
    }

    /// Update the block size; only the owning thread outside marking does this
    #[inline]
    pub(crate) fn set_size(&self, size: usize) {
        self.size.store(size, Ordering::Relaxed);
    }

    /// Type descriptor index
    #[inline]
    pub fn gc_info_index(&self) -> GcInfoIndex {
        GcInfoIndex::from_u16((self.state.load(Ordering::Relaxed) >> GC_INFO_SHIFT) as u16)
    }

    // === Marking ===

    /// Current tri-color state
    #[inline]
    pub fn color(&self) -> Color {
        Color::from_bits(self.state.load(Ordering::Acquire))
    }

    /// Gray or black
    #[inline]
    pub fn is_marked(&self) -> bool {
        self.state.load(Ordering::Acquire) & COLOR_MASK != 0
    }

    /// Transition white to gray
    ///
    /// Returns `true` for exactly one caller per cycle; that caller owns
    /// pushing the object onto a worklist.
    #[inline]
    pub fn try_mark(&self) -> bool {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            if current & COLOR_MASK != 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                current | Color::Gray as u32,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Transition gray to black after tracing
    #[inline]
    pub fn mark_black(&self) {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            crate::gc_dcheck!(current & COLOR_MASK != 0, "blackening an unmarked object");
            let new = (current & !COLOR_MASK) | Color::Black as u32;
            match self
                .state
                .compare_exchange_weak(current, new, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Reset to white; used by the sweeper with exclusive page access
    #[inline]
    pub(crate) fn unmark(&self) {
        self.state.fetch_and(!COLOR_MASK, Ordering::Relaxed);
    }

    // === Flags ===

    /// Allocation returned but the value is not written yet
    #[inline]
    pub fn is_in_construction(&self) -> bool {
        self.state.load(Ordering::Acquire) & IN_CONSTRUCTION_BIT != 0
    }

    /// Publish the fully constructed value
    #[inline]
    pub(crate) fn mark_fully_constructed(&self) {
        self.state.fetch_and(!IN_CONSTRUCTION_BIT, Ordering::Release);
    }

    /// Object lives on a dedicated large page
    #[inline]
    pub fn is_large_object(&self) -> bool {
        self.state.load(Ordering::Relaxed) & LARGE_BIT != 0
    }

    /// Block is free-list memory, not an object
    #[inline]
    pub fn is_free(&self) -> bool {
        self.state.load(Ordering::Relaxed) & FREE_BIT != 0
    }

    /// Object must not move in this cycle
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.state.load(Ordering::Acquire) & PINNED_BIT != 0
    }

    #[inline]
    pub(crate) fn pin(&self) {
        self.state.fetch_or(PINNED_BIT, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn unpin(&self) {
        self.state.fetch_and(!PINNED_BIT, Ordering::Relaxed);
    }

    // === Forwarding ===

    /// Object was relocated; its old payload holds the new address
    #[inline]
    pub fn is_forwarded(&self) -> bool {
        self.state.load(Ordering::Acquire) & FORWARDED_BIT != 0
    }

    /// Leave a forwarding address in the old payload
    ///
    /// # Safety
    /// The payload was copied to `new_payload` already and nothing reads the
    /// old payload as an object anymore.
    pub(crate) unsafe fn set_forwarding(&self, new_payload: *mut u8) {
        (*(self.payload() as *const AtomicUsize)).store(new_payload as usize, Ordering::Relaxed);
        self.state.fetch_or(FORWARDED_BIT, Ordering::Release);
    }

    /// New payload address if the object was relocated
    #[inline]
    pub fn forwarded_to(&self) -> Option<*mut u8> {
        if !self.is_forwarded() {
            return None;
        }
        // SAFETY: forwarded objects keep at least MIN_PAYLOAD_SIZE bytes holding the address.
        let address = unsafe { (*(self.payload() as *const AtomicUsize)).load(Ordering::Relaxed) };
        Some(address as *mut u8)
    }
}

impl std::fmt::Debug for ObjectHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHeader")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("size", &self.size())
            .field("color", &self.color())
            .field("gc_info_index", &self.gc_info_index())
            .field("free", &self.is_free())
            .finish()
    }
}
