//! Common test utilities for hostgc integration tests
//!
//! This module provides a shared fixture, managed test types and strict
//! assertion helpers used across all integration tests.
//!
//! ============================================================================
//! DESIGN PRINCIPLES:
//! - Each helper targets specific bugs
//! - Assertions fail loudly with diagnostic messages
//! - Objects are only reached again through roots after a collection
//! ============================================================================

#![allow(dead_code)]

use hostgc::{
    CycleStats, EphemeronPair, GarbageCollected, GarbageCollector, GcConfig, GcPtr, HeapOptions, Member, Persistent,
    Trace, Visitor, WeakMember, MB,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Heap limit for integration tests
pub const TEST_HEAP_SIZE: usize = 64 * MB;

/// ============================================================================
/// DROP TRACKING
/// ============================================================================

/// Records which tracked objects were finalized
///
/// **Bug this finds:** finalizers skipped, run twice, or run for live objects
#[derive(Debug, Default)]
pub struct DropLog {
    dropped: Mutex<HashSet<usize>>,
    count: AtomicUsize,
}

impl DropLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, id: usize) {
        let first = self.dropped.lock().insert(id);
        assert!(first, "object {} finalized twice", id);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_dropped(&self, id: usize) -> bool {
        self.dropped.lock().contains(&id)
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

/// ============================================================================
/// MANAGED TEST TYPES
/// ============================================================================

/// Object without references
pub struct Leaf {
    pub id: usize,
    pub log: Option<Arc<DropLog>>,
}

impl Trace for Leaf {
    fn trace(&self, _visitor: &mut dyn Visitor) {}
}
impl GarbageCollected for Leaf {}

impl Drop for Leaf {
    fn drop(&mut self) {
        if let Some(log) = &self.log {
            log.record(self.id);
        }
    }
}

/// Graph node with a fixed number of outgoing edges
pub struct Node {
    pub id: usize,
    pub edges: [Member<Node>; 3],
    pub log: Option<Arc<DropLog>>,
}

impl Trace for Node {
    fn trace(&self, visitor: &mut dyn Visitor) {
        self.edges.trace(visitor);
    }
}
impl GarbageCollected for Node {}

impl Drop for Node {
    fn drop(&mut self) {
        if let Some(log) = &self.log {
            log.record(self.id);
        }
    }
}

/// Linked object allocated in the compactable space
pub struct Blob {
    pub value: u64,
    pub next: Member<Blob>,
}

impl Trace for Blob {
    fn trace(&self, visitor: &mut dyn Visitor) {
        self.next.trace(visitor);
    }
}
impl GarbageCollected for Blob {
    const COMPACTABLE: bool = true;
}

/// Regular-space holder of strong, weak and ephemeron references
pub struct Holder {
    pub strong: Member<Leaf>,
    pub weak: WeakMember<Leaf>,
    pub blob: Member<Blob>,
    pub pair: EphemeronPair<Leaf, Leaf>,
}

impl Holder {
    pub fn empty() -> Self {
        Self {
            strong: Member::null(),
            weak: WeakMember::null(),
            blob: Member::null(),
            pair: EphemeronPair::new(None, None),
        }
    }
}

impl Trace for Holder {
    fn trace(&self, visitor: &mut dyn Visitor) {
        self.strong.trace(visitor);
        self.weak.trace(visitor);
        self.blob.trace(visitor);
        self.pair.trace(visitor);
    }
}
impl GarbageCollected for Holder {}

/// ============================================================================
/// TEST FIXTURES
/// ============================================================================

/// GC test fixture
///
/// **Bug this finds:** initialization failures, teardown leaks
pub struct GcFixture {
    pub gc: GarbageCollector,
    pub log: Arc<DropLog>,
}

impl GcFixture {
    /// Create fixture with default test options
    pub fn new() -> Self {
        Self::with_options(HeapOptions {
            max_heap_size: TEST_HEAP_SIZE,
            verify_marking: true,
            ..Default::default()
        })
    }

    /// Create fixture with custom options
    ///
    /// **Bug this finds:** option validation rejecting valid configurations
    pub fn with_options(options: HeapOptions) -> Self {
        let gc = GarbageCollector::new(options).expect("GC initialization should succeed");
        Self { gc, log: DropLog::new() }
    }

    /// Allocate a tracked leaf
    ///
    /// **Bug this finds:** allocation failures, uninitialized payloads
    pub fn leaf(&self, id: usize) -> GcPtr<Leaf> {
        self.gc
            .make_garbage_collected(Leaf {
                id,
                log: Some(Arc::clone(&self.log)),
            })
            .unwrap_or_else(|e| panic!("allocation of leaf {} failed: {:?}", id, e))
    }

    /// Allocate a tracked node without edges
    pub fn node(&self, id: usize) -> GcPtr<Node> {
        self.gc
            .make_garbage_collected(Node {
                id,
                edges: [Member::null(), Member::null(), Member::null()],
                log: Some(Arc::clone(&self.log)),
            })
            .unwrap_or_else(|e| panic!("allocation of node {} failed: {:?}", id, e))
    }

    /// Allocate a compactable blob
    pub fn blob(&self, value: u64) -> GcPtr<Blob> {
        self.gc
            .make_garbage_collected(Blob {
                value,
                next: Member::null(),
            })
            .expect("blob allocation should succeed")
    }

    pub fn holder(&self) -> GcPtr<Holder> {
        self.gc.make_garbage_collected(Holder::empty()).expect("holder allocation should succeed")
    }

    /// Root `object` strongly
    pub fn root<T: GarbageCollected>(&self, object: GcPtr<T>) -> Persistent<T> {
        Persistent::new(&self.gc, Some(object))
    }

    /// Run a precise atomic collection and return its summary
    ///
    /// **Bug this finds:** collection not completing, state machine bugs
    pub fn collect(&self) -> CycleStats {
        self.collect_with(GcConfig::precise_atomic())
    }

    /// Run a collection with `config` and finish its sweep
    pub fn collect_with(&self, config: GcConfig) -> CycleStats {
        self.gc.collect_garbage(config);
        self.gc.finish_sweeping_if_running();
        self.gc.last_cycle_stats().expect("a finished cycle should leave stats")
    }
}

impl Default for GcFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// ============================================================================
/// STRICT ASSERTION HELPERS
/// ============================================================================

/// Assert that exactly `expected` objects were finalized so far
///
/// **Bug this finds:** live objects swept, garbage retained
/// **Tolerance:** ZERO
#[track_caller]
pub fn assert_dropped(log: &DropLog, expected: usize, context: &str) {
    assert_eq!(
        log.count(),
        expected,
        "{}: {} objects finalized, expected {} - marking or sweeping is wrong",
        context,
        log.count(),
        expected
    );
}

/// Assert that none of `ids` was finalized
///
/// **Bug this finds:** reachable objects reclaimed (the worst GC bug)
/// **Tolerance:** ZERO
#[track_caller]
pub fn assert_alive(log: &DropLog, ids: &[usize], context: &str) {
    for &id in ids {
        assert!(
            !log.is_dropped(id),
            "{}: object {} was finalized while reachable - use-after-free in the mutator",
            context,
            id
        );
    }
}

/// Walk a blob chain from `head`, collecting values
pub fn blob_values(head: Option<GcPtr<Blob>>) -> Vec<u64> {
    let mut values = Vec::new();
    let mut current = head;
    while let Some(blob) = current {
        values.push(blob.value);
        current = blob.next.get();
    }
    values
}

/// Ids of every node reachable from `root`
pub fn reachable_ids(root: GcPtr<Node>) -> HashSet<usize> {
    reachable_nodes(root).into_iter().map(|node| node.id).collect()
}

/// Every node reachable from `root`, in discovery order
pub fn reachable_nodes(root: GcPtr<Node>) -> Vec<GcPtr<Node>> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if !seen.insert(node.id) {
            continue;
        }
        order.push(node);
        for edge in &node.edges {
            if let Some(next) = edge.get() {
                stack.push(next);
            }
        }
    }
    order
}
