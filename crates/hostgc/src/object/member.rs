//! Managed pointers and heap slots
//!
//! - [`GcPtr`]: copyable pointer to a managed object, valid while reachable.
//! - [`Member`]: strong heap-to-heap slot; stores run the write barrier.
//! - [`WeakMember`]: weak slot, reset to [`SentinelPointer`] when its target dies.
//!
//! Both slot kinds wrap a [`RawMember`], the type-erased slot the marker,
//! the ephemeron resolver and the compactor operate on.

use crate::barrier::{WriteBarrier, WriteBarrierKind};
use crate::marker::{LivenessBroker, Visitor};
use crate::object::gc_info::{GarbageCollected, Trace};
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

/// Marker value of a cleared weak slot
///
/// Non-null, never a valid heap address (payloads are 16-byte aligned), so a
/// cleared slot is distinguishable from one that was never set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentinelPointer;

impl SentinelPointer {
    /// Bit pattern stored in cleared slots
    pub const ADDRESS: usize = 0b10;

    /// Sentinel as a raw pointer
    #[inline]
    pub const fn as_ptr() -> *mut u8 {
        Self::ADDRESS as *mut u8
    }

    /// Whether `ptr` is the sentinel
    #[inline]
    pub fn is_sentinel<T>(ptr: *const T) -> bool {
        ptr as usize == Self::ADDRESS
    }
}

/// Pointer to a managed object
///
/// Valid while the object is reachable from a root or another reachable
/// object. Holding a `GcPtr` on the stack keeps nothing alive unless the
/// collection scans the stack (`StackState::MayContainHeapPointers`).
#[repr(transparent)]
pub struct GcPtr<T> {
    ptr: NonNull<T>,
}

impl<T> GcPtr<T> {
    /// Create from a payload pointer
    ///
    /// # Safety
    /// `ptr` must point to the payload of a live managed `T`.
    #[inline]
    pub const unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        Self { ptr }
    }

    /// Raw payload pointer
    #[inline]
    pub const fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Payload pointer as `NonNull`
    #[inline]
    pub const fn as_non_null(&self) -> NonNull<T> {
        self.ptr
    }

    /// Type-erased payload pointer
    #[inline]
    pub fn erased(&self) -> NonNull<u8> {
        self.ptr.cast()
    }

    /// Check pointer equality
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Clone for GcPtr<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for GcPtr<T> {}

impl<T> PartialEq for GcPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for GcPtr<T> {}

impl<T> std::hash::Hash for GcPtr<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ptr.hash(state);
    }
}

impl<T> Deref for GcPtr<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        // SAFETY: GcPtr is only created for live payloads; see type docs.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> std::fmt::Debug for GcPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GcPtr({:p})", self.ptr)
    }
}

impl<T> std::fmt::Pointer for GcPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Pointer::fmt(&self.ptr, f)
    }
}

// SAFETY: managed types are Send + Sync (GarbageCollected bound); the pointer
// itself is plain data.
unsafe impl<T: Sync> Send for GcPtr<T> {}
unsafe impl<T: Sync> Sync for GcPtr<T> {}

/// Type-erased heap slot
///
/// Holds null, the sentinel, or a payload address. Loads are acquire and
/// stores release so a marker reading the slot sees the initialized target.
#[repr(transparent)]
#[derive(Debug)]
pub struct RawMember(AtomicPtr<u8>);

impl RawMember {
    /// Null slot
    pub const fn null() -> Self {
        Self(AtomicPtr::new(ptr::null_mut()))
    }

    /// Slot holding `value`, stored without a barrier
    pub fn new(value: *mut u8) -> Self {
        Self(AtomicPtr::new(value))
    }

    /// Current raw value, possibly null or the sentinel
    #[inline]
    pub fn load(&self) -> *mut u8 {
        self.0.load(Ordering::Acquire)
    }

    /// Store without any barrier
    #[inline]
    pub fn store(&self, value: *mut u8) {
        self.0.store(value, Ordering::Release);
    }

    /// Target payload, `None` for null and the sentinel
    #[inline]
    pub fn load_object(&self) -> Option<NonNull<u8>> {
        let raw = self.load();
        if SentinelPointer::is_sentinel(raw) {
            return None;
        }
        NonNull::new(raw)
    }

    /// Slot address, as recorded in compaction worklists
    #[inline]
    pub fn address(&self) -> usize {
        self as *const RawMember as usize
    }
}

fn erase<T>(value: Option<GcPtr<T>>) -> *mut u8 {
    value.map_or(ptr::null_mut(), |p| p.as_ptr() as *mut u8)
}

/// Strong reference from one managed object to another
///
/// # Examples
///
/// ```rust
/// use hostgc::{GarbageCollected, GarbageCollector, GcConfig, HeapOptions, Member, Persistent, Trace, Visitor};
///
/// struct Node {
///     next: Member<Node>,
/// }
/// impl Trace for Node {
///     fn trace(&self, visitor: &mut dyn Visitor) {
///         self.next.trace(visitor);
///     }
/// }
/// impl GarbageCollected for Node {}
///
/// let gc = GarbageCollector::new(HeapOptions::default()).unwrap();
/// let head = gc.make_garbage_collected(Node { next: Member::null() }).unwrap();
/// let tail = gc.make_garbage_collected(Node { next: Member::null() }).unwrap();
/// head.next.set(Some(tail));
///
/// let root = Persistent::new(&gc, Some(head));
/// gc.collect_garbage(GcConfig::precise_atomic());
/// assert_eq!(root.get().unwrap().next.get(), Some(tail));
/// ```
#[repr(transparent)]
pub struct Member<T> {
    raw: RawMember,
    _marker: PhantomData<GcPtr<T>>,
}

impl<T: GarbageCollected> Member<T> {
    /// Empty member
    pub const fn null() -> Self {
        Self {
            raw: RawMember::null(),
            _marker: PhantomData,
        }
    }

    /// Member initialized without a barrier; for values under construction
    pub fn new(value: Option<GcPtr<T>>) -> Self {
        Self {
            raw: RawMember::new(erase(value)),
            _marker: PhantomData,
        }
    }

    /// Current target
    #[inline]
    pub fn get(&self) -> Option<GcPtr<T>> {
        // SAFETY: members only ever hold payloads of T.
        self.raw
            .load_object()
            .map(|p| unsafe { GcPtr::from_raw(p.cast()) })
    }

    /// Store a new target through the Dijkstra pointer barrier
    #[inline]
    pub fn set(&self, value: Option<GcPtr<T>>) {
        self.set_with_barrier(value, WriteBarrierKind::Pointer);
    }

    /// Store a new target and run the barrier of `kind` for it
    ///
    /// `IndirectPointer` is handed this member's slot. `Map` needs the
    /// object holding the member and `EphemeronKey` needs a pair, so both are
    /// fatal here; use [`Member::set_in_container`] and
    /// [`EphemeronPair::set_key`](crate::EphemeronPair::set_key).
    pub fn set_with_barrier(&self, value: Option<GcPtr<T>>, kind: WriteBarrierKind) {
        crate::gc_check!(
            !matches!(kind, WriteBarrierKind::Map | WriteBarrierKind::EphemeronKey),
            "{:?} barrier on a plain member; use Member::set_in_container or EphemeronPair::set_key",
            kind
        );
        let raw = erase(value);
        self.raw.store(raw);
        let barrier_value = match kind {
            WriteBarrierKind::IndirectPointer => self.raw.address() as *const u8,
            _ => raw as *const u8,
        };
        WriteBarrier::barrier(kind, Some(&self.raw), barrier_value);
    }

    /// Store a new target and run the Steele barrier on `container`
    ///
    /// `container` must be the object this member is a field of. An already
    /// marked container is traced again before marking finishes.
    pub fn set_in_container<H: GarbageCollected>(&self, value: Option<GcPtr<T>>, container: GcPtr<H>) {
        self.raw.store(erase(value));
        WriteBarrier::barrier(
            WriteBarrierKind::Map,
            Some(&self.raw),
            container.as_ptr() as *const u8,
        );
    }

    /// Reset to empty; clearing never needs a barrier
    #[inline]
    pub fn clear(&self) {
        self.raw.store(ptr::null_mut());
    }

    /// Whether the member is empty
    #[inline]
    pub fn is_null(&self) -> bool {
        self.get().is_none()
    }

    /// Underlying slot
    #[inline]
    pub fn raw(&self) -> &RawMember {
        &self.raw
    }
}

impl<T: GarbageCollected> Default for Member<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: GarbageCollected> From<GcPtr<T>> for Member<T> {
    fn from(value: GcPtr<T>) -> Self {
        Self::new(Some(value))
    }
}

impl<T: GarbageCollected> Trace for Member<T> {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        if self.raw.load_object().is_some() {
            visitor.visit_movable(&self.raw);
        }
    }
}

impl<T> std::fmt::Debug for Member<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Member({:p})", self.raw.load())
    }
}

/// Weak reference from one managed object to another
///
/// Does not keep the target alive. After a collection that reclaimed the
/// target, the slot holds the sentinel and `get` returns `None`.
#[repr(transparent)]
pub struct WeakMember<T> {
    raw: RawMember,
    _marker: PhantomData<GcPtr<T>>,
}

impl<T: GarbageCollected> WeakMember<T> {
    /// Empty weak member
    pub const fn null() -> Self {
        Self {
            raw: RawMember::null(),
            _marker: PhantomData,
        }
    }

    /// Weak member pointing to `value`
    pub fn new(value: Option<GcPtr<T>>) -> Self {
        Self {
            raw: RawMember::new(erase(value)),
            _marker: PhantomData,
        }
    }

    /// Current target, `None` if never set, reset, or cleared by the collector
    #[inline]
    pub fn get(&self) -> Option<GcPtr<T>> {
        // SAFETY: weak members only ever hold payloads of T.
        self.raw
            .load_object()
            .map(|p| unsafe { GcPtr::from_raw(p.cast()) })
    }

    /// Store a new target; weak stores never mark
    #[inline]
    pub fn set(&self, value: Option<GcPtr<T>>) {
        self.raw.store(erase(value));
    }

    /// Reset to empty
    #[inline]
    pub fn clear(&self) {
        self.raw.store(ptr::null_mut());
    }

    /// True iff the collector cleared the slot because the target died
    #[inline]
    pub fn is_cleared(&self) -> bool {
        SentinelPointer::is_sentinel(self.raw.load())
    }

    /// Underlying slot
    #[inline]
    pub fn raw(&self) -> &RawMember {
        &self.raw
    }
}

impl<T: GarbageCollected> Default for WeakMember<T> {
    fn default() -> Self {
        Self::null()
    }
}

fn clear_weak_slot_if_dead(broker: &LivenessBroker, slot: *const ()) {
    // SAFETY: registered by WeakMember::trace with the address of its slot;
    // the slot's holder was marked, so it is still allocated.
    let raw = unsafe { &*(slot as *const RawMember) };
    if let Some(target) = raw.load_object() {
        if !broker.is_heap_object_alive(target.as_ptr()) {
            raw.store(SentinelPointer::as_ptr());
        }
    }
}

impl<T: GarbageCollected> Trace for WeakMember<T> {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        if let Some(target) = self.raw.load_object() {
            visitor.visit_weak(
                target,
                clear_weak_slot_if_dead,
                &self.raw as *const RawMember as *const (),
            );
        }
    }
}

impl<T> std::fmt::Debug for WeakMember<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WeakMember({:p})", self.raw.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;
    impl Trace for Dummy {
        fn trace(&self, _visitor: &mut dyn Visitor) {}
    }
    impl GarbageCollected for Dummy {}

    #[test]
    fn test_sentinel_is_not_an_object() {
        let raw = RawMember::new(SentinelPointer::as_ptr());
        assert!(raw.load_object().is_none());
        assert!(!raw.load().is_null());
        assert!(SentinelPointer::is_sentinel(raw.load()));
    }

    #[test]
    fn test_weak_member_cleared_state() {
        let weak = WeakMember::<Dummy>::null();
        assert!(weak.get().is_none());
        assert!(!weak.is_cleared());

        weak.raw().store(SentinelPointer::as_ptr());
        assert!(weak.get().is_none());
        assert!(weak.is_cleared());
    }

    #[test]
    fn test_member_layout_is_a_slot() {
        assert_eq!(std::mem::size_of::<Member<Dummy>>(), std::mem::size_of::<usize>());
        assert_eq!(std::mem::size_of::<WeakMember<Dummy>>(), std::mem::size_of::<usize>());
        let member = Member::<Dummy>::null();
        assert!(member.is_null());
        assert_eq!(member.raw().address(), &member as *const _ as usize);
    }
}
