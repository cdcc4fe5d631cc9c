//! Roots held outside the managed heap
//!
//! A [`Persistent`] keeps its target alive; a [`WeakPersistent`] is cleared
//! when its target dies. Both register a node in a [`PersistentRegion`] of
//! their heap on creation and unregister on drop.

use crate::gc::GarbageCollector;
use crate::object::gc_info::GarbageCollected;
use crate::object::member::{GcPtr, RawMember, SentinelPointer};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Root slots of one kind (strong or weak) for one heap
#[derive(Debug, Default)]
pub struct PersistentRegion {
    nodes: Mutex<IndexMap<u64, Arc<RawMember>>>,
    next_id: AtomicU64,
}

impl PersistentRegion {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn register(&self, node: Arc<RawMember>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.nodes.lock().insert(id, node);
        id
    }

    fn unregister(&self, id: u64) {
        self.nodes.lock().swap_remove(&id);
    }

    /// Number of registered roots
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Whether no roots are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every non-empty root slot
    pub(crate) fn for_each_object(&self, mut visit: impl FnMut(NonNull<u8>)) {
        let nodes = self.nodes.lock();
        for node in nodes.values() {
            if let Some(object) = node.load_object() {
                visit(object);
            }
        }
    }

    /// Clear every slot whose target `is_alive` rejects; returns the count
    pub(crate) fn clear_dead(&self, mut is_alive: impl FnMut(NonNull<u8>) -> bool) -> usize {
        let nodes = self.nodes.lock();
        let mut cleared = 0;
        for node in nodes.values() {
            if let Some(object) = node.load_object() {
                if !is_alive(object) {
                    node.store(SentinelPointer::as_ptr());
                    cleared += 1;
                }
            }
        }
        cleared
    }

    /// Reset every slot; used at heap teardown
    pub(crate) fn clear_all(&self) {
        for node in self.nodes.lock().values() {
            node.store(ptr::null_mut());
        }
    }
}

fn erase<T>(value: Option<GcPtr<T>>) -> *mut u8 {
    value.map_or(ptr::null_mut(), |p| p.as_ptr() as *mut u8)
}

struct Registration {
    region: Weak<PersistentRegion>,
    node: Arc<RawMember>,
    id: u64,
}

impl Registration {
    fn new(region: &Arc<PersistentRegion>, value: *mut u8) -> Self {
        let node = Arc::new(RawMember::new(value));
        let id = region.register(Arc::clone(&node));
        Self {
            region: Arc::downgrade(region),
            node,
            id,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(region) = self.region.upgrade() {
            region.unregister(self.id);
        }
    }
}

/// Strong root
///
/// # Examples
///
/// ```rust
/// use hostgc::{GarbageCollected, GarbageCollector, GcConfig, HeapOptions, Persistent, Trace, Visitor};
///
/// struct Leaf(u32);
/// impl Trace for Leaf {
///     fn trace(&self, _visitor: &mut dyn Visitor) {}
/// }
/// impl GarbageCollected for Leaf {}
///
/// let gc = GarbageCollector::new(HeapOptions::default()).unwrap();
/// let root = Persistent::new(&gc, Some(gc.make_garbage_collected(Leaf(7)).unwrap()));
/// gc.collect_garbage(GcConfig::precise_atomic());
/// assert_eq!(root.get().unwrap().0, 7);
/// ```
pub struct Persistent<T> {
    registration: Registration,
    _marker: PhantomData<GcPtr<T>>,
}

impl<T: GarbageCollected> Persistent<T> {
    /// Register a strong root in `gc`
    pub fn new(gc: &GarbageCollector, value: Option<GcPtr<T>>) -> Self {
        Self {
            registration: Registration::new(gc.heap().persistents(), erase(value)),
            _marker: PhantomData,
        }
    }

    /// Current target
    pub fn get(&self) -> Option<GcPtr<T>> {
        // SAFETY: the node only holds payloads of T.
        self.registration
            .node
            .load_object()
            .map(|p| unsafe { GcPtr::from_raw(p.cast()) })
    }

    /// Replace the target; roots are rescanned in the atomic pause, so no barrier
    pub fn set(&self, value: Option<GcPtr<T>>) {
        self.registration.node.store(erase(value));
    }

    /// Release the target
    pub fn clear(&self) {
        self.registration.node.store(ptr::null_mut());
    }
}

impl<T> std::fmt::Debug for Persistent<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Persistent({:p})", self.registration.node.load())
    }
}

/// Weak root, cleared when its target dies
pub struct WeakPersistent<T> {
    registration: Registration,
    _marker: PhantomData<GcPtr<T>>,
}

impl<T: GarbageCollected> WeakPersistent<T> {
    /// Register a weak root in `gc`
    pub fn new(gc: &GarbageCollector, value: Option<GcPtr<T>>) -> Self {
        Self {
            registration: Registration::new(gc.heap().weak_persistents(), erase(value)),
            _marker: PhantomData,
        }
    }

    /// Current target, `None` once cleared
    pub fn get(&self) -> Option<GcPtr<T>> {
        // SAFETY: the node only holds payloads of T.
        self.registration
            .node
            .load_object()
            .map(|p| unsafe { GcPtr::from_raw(p.cast()) })
    }

    /// Replace the target
    pub fn set(&self, value: Option<GcPtr<T>>) {
        self.registration.node.store(erase(value));
    }

    /// True iff the collector cleared the root
    pub fn is_cleared(&self) -> bool {
        SentinelPointer::is_sentinel(self.registration.node.load())
    }
}

impl<T> std::fmt::Debug for WeakPersistent<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WeakPersistent({:p})", self.registration.node.load())
    }
}
