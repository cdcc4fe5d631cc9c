//! Type Descriptor Table
//!
//! The collector is type-erased: a header only stores a dense
//! [`GcInfoIndex`]. The process-wide [`GcInfoTable`] maps that index to the
//! trace, prefinalize and finalize callbacks of the concrete type, registered
//! the first time a type is allocated.

use crate::error::{GcError, Result};
use crate::marker::Visitor;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::any::TypeId;
use std::ops::Range;

/// Types holding references the collector must see
///
/// # Examples
///
/// ```rust
/// use hostgc::{GarbageCollected, Member, Trace, Visitor};
///
/// struct Node {
///     next: Member<Node>,
/// }
///
/// impl Trace for Node {
///     fn trace(&self, visitor: &mut dyn Visitor) {
///         self.next.trace(visitor);
///     }
/// }
///
/// impl GarbageCollected for Node {}
/// ```
pub trait Trace {
    /// Report every outgoing reference to `visitor`
    fn trace(&self, visitor: &mut dyn Visitor);
}

/// Types that can be allocated on a hostgc heap
///
/// `Drop` runs as the finalizer when the sweeper reclaims the object. Drop
/// implementations must not dereference other managed objects; they may
/// already be reclaimed.
pub trait GarbageCollected: Trace + Send + Sync + Sized + 'static {
    /// Large instances are traced in `CHUNK_SIZE` pieces by several markers
    const CHUNKED_TRACING: bool = false;

    /// Allocate in the compactable space, where compacting collections may
    /// relocate instances referenced only through `Member` slots
    const COMPACTABLE: bool = false;

    /// Register every instance for [`pre_finalize`](Self::pre_finalize)
    const HAS_PRE_FINALIZER: bool = false;

    /// Called once for an instance found dead, in the atomic pause
    ///
    /// Runs before any object of the cycle is swept, so other dead objects
    /// can still be read. Must not allocate; must not resurrect `self` by
    /// storing it into a live object.
    fn pre_finalize(&self) {}

    /// Trace references stored in payload bytes `range`
    ///
    /// Only called when `CHUNKED_TRACING` is set. `range` is relative to the
    /// payload start and may extend into trailing bytes allocated with
    /// `make_garbage_collected_with_additional_bytes`.
    fn trace_chunk(&self, visitor: &mut dyn Visitor, range: Range<usize>) {
        if range.start == 0 {
            self.trace(visitor);
        }
    }
}

impl Trace for () {
    fn trace(&self, _visitor: &mut dyn Visitor) {}
}

impl<T: Trace> Trace for Option<T> {
    fn trace(&self, visitor: &mut dyn Visitor) {
        if let Some(value) = self {
            value.trace(visitor);
        }
    }
}

impl<T: Trace, const N: usize> Trace for [T; N] {
    fn trace(&self, visitor: &mut dyn Visitor) {
        for value in self {
            value.trace(visitor);
        }
    }
}

/// Dense index into the type table; 0 is reserved for free blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcInfoIndex(u16);

impl GcInfoIndex {
    /// Index of free-list blocks
    pub const FREE: GcInfoIndex = GcInfoIndex(0);

    #[inline]
    pub(crate) const fn from_u16(index: u16) -> Self {
        Self(index)
    }

    /// Raw index value
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

/// Trace a payload through its concrete type
pub type TraceCallback = unsafe fn(payload: *const u8, visitor: &mut dyn Visitor);

/// Trace one byte range of a payload
pub type TraceChunkCallback =
    unsafe fn(payload: *const u8, visitor: &mut dyn Visitor, range: Range<usize>);

/// Run the destructor of a payload in place
pub type FinalizationCallback = unsafe fn(payload: *mut u8);

/// Run the prefinalizer of a dead payload
pub type PreFinalizationCallback = unsafe fn(payload: *const u8);

/// Type descriptor
#[derive(Clone, Copy)]
pub struct GcInfo {
    /// Type name, for diagnostics
    pub name: &'static str,
    /// Whole-object trace
    pub trace: TraceCallback,
    /// Chunked trace for large objects
    pub trace_chunk: Option<TraceChunkCallback>,
    /// Set when the type declares a prefinalizer
    pub pre_finalize: Option<PreFinalizationCallback>,
    /// Destructor; `None` when the type needs no drop
    pub finalize: Option<FinalizationCallback>,
}

impl std::fmt::Debug for GcInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcInfo")
            .field("name", &self.name)
            .field("chunked", &self.trace_chunk.is_some())
            .field("prefinalized", &self.pre_finalize.is_some())
            .field("finalizable", &self.finalize.is_some())
            .finish()
    }
}

unsafe fn trace_trampoline<T: GarbageCollected>(payload: *const u8, visitor: &mut dyn Visitor) {
    (*(payload as *const T)).trace(visitor);
}

unsafe fn trace_chunk_trampoline<T: GarbageCollected>(
    payload: *const u8,
    visitor: &mut dyn Visitor,
    range: Range<usize>,
) {
    (*(payload as *const T)).trace_chunk(visitor, range);
}

unsafe fn pre_finalize_trampoline<T: GarbageCollected>(payload: *const u8) {
    (*(payload as *const T)).pre_finalize();
}

unsafe fn finalize_trampoline<T: GarbageCollected>(payload: *mut u8) {
    std::ptr::drop_in_place(payload as *mut T);
}

unsafe fn trace_nothing(_payload: *const u8, _visitor: &mut dyn Visitor) {}

/// Process-wide registry of type descriptors
pub struct GcInfoTable {
    infos: RwLock<Vec<GcInfo>>,
    by_type: RwLock<IndexMap<TypeId, GcInfoIndex>>,
}

lazy_static! {
    static ref GLOBAL_GC_INFO_TABLE: GcInfoTable = GcInfoTable::new();
}

impl GcInfoTable {
    fn new() -> Self {
        Self {
            infos: RwLock::new(vec![GcInfo {
                name: "<free>",
                trace: trace_nothing,
                trace_chunk: None,
                pre_finalize: None,
                finalize: None,
            }]),
            by_type: RwLock::new(IndexMap::new()),
        }
    }

    /// The process-wide table
    pub fn global() -> &'static GcInfoTable {
        &GLOBAL_GC_INFO_TABLE
    }

    /// Index of `T`, registering it on first use
    pub fn index_of<T: GarbageCollected>(&self) -> Result<GcInfoIndex> {
        let type_id = TypeId::of::<T>();
        if let Some(index) = self.by_type.read().get(&type_id) {
            return Ok(*index);
        }

        let mut by_type = self.by_type.write();
        if let Some(index) = by_type.get(&type_id) {
            return Ok(*index);
        }

        let mut infos = self.infos.write();
        let raw = u16::try_from(infos.len()).map_err(|_| GcError::TypeTableExhausted)?;
        infos.push(GcInfo {
            name: std::any::type_name::<T>(),
            trace: trace_trampoline::<T>,
            trace_chunk: T::CHUNKED_TRACING.then_some(trace_chunk_trampoline::<T> as TraceChunkCallback),
            pre_finalize: T::HAS_PRE_FINALIZER
                .then_some(pre_finalize_trampoline::<T> as PreFinalizationCallback),
            finalize: std::mem::needs_drop::<T>().then_some(finalize_trampoline::<T> as FinalizationCallback),
        });
        let index = GcInfoIndex(raw);
        by_type.insert(type_id, index);
        log::trace!(target: crate::logging::LOG_TARGET, "registered type {} as {}", std::any::type_name::<T>(), raw);
        Ok(index)
    }

    /// Descriptor for `index`
    #[inline]
    pub fn get(&self, index: GcInfoIndex) -> GcInfo {
        let infos = self.infos.read();
        crate::gc_dcheck!((index.0 as usize) < infos.len(), "unknown type index {}", index.0);
        infos[index.0 as usize]
    }

    /// Number of registered entries, the reserved free entry included
    pub fn len(&self) -> usize {
        self.infos.read().len()
    }

    /// Always false; the reserved free entry exists from the start
    pub fn is_empty(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Leaf;
    impl Trace for Leaf {
        fn trace(&self, _visitor: &mut dyn Visitor) {}
    }
    impl GarbageCollected for Leaf {}

    struct Owning(#[allow(dead_code)] Vec<u8>);
    impl Trace for Owning {
        fn trace(&self, _visitor: &mut dyn Visitor) {}
    }
    impl GarbageCollected for Owning {
        const CHUNKED_TRACING: bool = true;
        const HAS_PRE_FINALIZER: bool = true;
    }

    #[test]
    fn test_registration_is_stable() {
        let table = GcInfoTable::global();
        let first = table.index_of::<Leaf>().unwrap();
        let second = table.index_of::<Leaf>().unwrap();
        assert_eq!(first, second);
        assert_ne!(first, GcInfoIndex::FREE);
        assert!(table.len() > first.as_u16() as usize);
    }

    #[test]
    fn test_descriptor_callbacks() {
        let table = GcInfoTable::global();
        let leaf = table.get(table.index_of::<Leaf>().unwrap());
        assert!(leaf.finalize.is_none());
        assert!(leaf.trace_chunk.is_none());
        assert!(leaf.pre_finalize.is_none());
        assert!(leaf.name.ends_with("Leaf"));

        let owning = table.get(table.index_of::<Owning>().unwrap());
        assert!(owning.finalize.is_some());
        assert!(owning.trace_chunk.is_some());
        assert!(owning.pre_finalize.is_some());
    }
}
