//! Ephemeron pairs
//!
//! An [`EphemeronPair`] keeps its value alive only while its key is reachable
//! through some other path. Marking defers pairs whose key is still white;
//! the ephemeron resolver revisits them after every marking fixpoint, and weak
//! processing clears the value of every pair whose key died.

use crate::barrier::{WriteBarrier, WriteBarrierKind};
use crate::marker::{LivenessBroker, Visitor};
use crate::object::gc_info::{GarbageCollected, Trace};
use crate::object::member::{GcPtr, Member, RawMember, WeakMember};

/// Type-erased view of an [`EphemeronPair`]; identical layout
#[repr(C)]
#[derive(Debug)]
pub struct RawEphemeronPair {
    pub key: RawMember,
    pub value: RawMember,
}

impl RawEphemeronPair {
    /// Pair whose key slot is `key`
    ///
    /// # Safety
    /// `key` must be the key slot of an `EphemeronPair`.
    #[inline]
    pub(crate) unsafe fn from_key_slot<'a>(key: &'a RawMember) -> &'a RawEphemeronPair {
        &*(key as *const RawMember as *const RawEphemeronPair)
    }
}

/// Weak key, strong-while-key-alive value
///
/// # Examples
///
/// ```rust
/// use hostgc::{EphemeronPair, GarbageCollected, Trace, Visitor};
///
/// struct Leaf;
/// impl Trace for Leaf {
///     fn trace(&self, _visitor: &mut dyn Visitor) {}
/// }
/// impl GarbageCollected for Leaf {}
///
/// struct Cache {
///     entry: EphemeronPair<Leaf, Leaf>,
/// }
/// impl Trace for Cache {
///     fn trace(&self, visitor: &mut dyn Visitor) {
///         self.entry.trace(visitor);
///     }
/// }
/// ```
#[repr(C)]
pub struct EphemeronPair<K, V> {
    /// Weak key
    pub key: WeakMember<K>,
    /// Value retained while the key is alive
    pub value: Member<V>,
}

impl<K: GarbageCollected, V: GarbageCollected> EphemeronPair<K, V> {
    /// Create a pair; no barrier, for values under construction
    pub fn new(key: Option<GcPtr<K>>, value: Option<GcPtr<V>>) -> Self {
        Self {
            key: WeakMember::new(key),
            value: Member::new(value),
        }
    }

    /// Replace the key
    ///
    /// Runs the ephemeron-key barrier so a pair already seen by the marker is
    /// re-examined with its new key.
    pub fn set_key(&self, key: Option<GcPtr<K>>) {
        self.key.set(key);
        WriteBarrier::barrier(
            WriteBarrierKind::EphemeronKey,
            Some(self.key.raw()),
            self.key.raw().load(),
        );
    }

    /// Replace the value through the pointer barrier
    pub fn set_value(&self, value: Option<GcPtr<V>>) {
        self.value.set(value);
    }

    /// Clear the value unless the key is alive
    ///
    /// A key that is null or was already cleared counts as dead.
    pub fn clear_value_if_key_is_dead(&self, broker: &LivenessBroker) {
        let alive = match self.key.get() {
            Some(key) => broker.is_heap_object_alive(key.as_ptr() as *const u8),
            None => false,
        };
        if !alive {
            self.value.clear();
        }
    }

    fn raw(&self) -> &RawEphemeronPair {
        // SAFETY: repr(C) with two transparent RawMember slots in the same order.
        unsafe { RawEphemeronPair::from_key_slot(self.key.raw()) }
    }
}

fn clear_ephemeron_value_if_key_is_dead(broker: &LivenessBroker, pair: *const ()) {
    // SAFETY: registered by EphemeronPair::trace; the holder was marked.
    let pair = unsafe { &*(pair as *const RawEphemeronPair) };
    let alive = match pair.key.load_object() {
        Some(key) => broker.is_heap_object_alive(key.as_ptr()),
        None => false,
    };
    if !alive {
        pair.value.store(std::ptr::null_mut());
    }
}

impl<K: GarbageCollected, V: GarbageCollected> Trace for EphemeronPair<K, V> {
    fn trace(&self, visitor: &mut dyn Visitor) {
        let raw = self.raw();
        self.key.trace(visitor);
        if raw.value.load_object().is_some() {
            visitor.visit_ephemeron(&raw.key, &raw.value);
        }
        visitor.register_weak_callback(
            clear_ephemeron_value_if_key_is_dead,
            raw as *const RawEphemeronPair as *const (),
        );
    }
}

impl<K, V> std::fmt::Debug for EphemeronPair<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeronPair")
            .field("key", &self.key)
            .field("value", &self.value)
            .finish()
    }
}
