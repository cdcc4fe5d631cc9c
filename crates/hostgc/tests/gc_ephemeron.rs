//! Ephemeron Tests - weak-key, strong-while-key-alive values
//!
//! These tests verify the ephemeron fixpoint:
//! - A value is retained iff its key is reachable through some other path
//! - Values of dead keys are cleared after the collection
//! - Chains where one value is the key of the next pair resolve completely
//! - The result does not depend on the order pairs are discovered in

mod common;

use common::*;
use hostgc::{EphemeronPair, GarbageCollected, GcConfig, LivenessBroker, Member, StackState, Trace, Visitor};

/// Table of ephemeron pairs, like a weak map
struct Table {
    pairs: [EphemeronPair<Node, Node>; 4],
}

impl Table {
    fn new() -> Self {
        Self {
            pairs: [
                EphemeronPair::new(None, None),
                EphemeronPair::new(None, None),
                EphemeronPair::new(None, None),
                EphemeronPair::new(None, None),
            ],
        }
    }
}

impl Trace for Table {
    fn trace(&self, visitor: &mut dyn Visitor) {
        self.pairs.trace(visitor);
    }
}
impl GarbageCollected for Table {}

/// Test that a live key keeps its value
///
/// **Bug this finds:** ephemeron values treated as weak
#[test]
fn test_value_retained_while_key_alive() {
    let fx = GcFixture::new();
    let holder = fx.holder();
    let root = fx.root(holder);
    let key = fx.leaf(1);
    let key_root = fx.root(key);
    holder.pair.set_key(Some(key));
    holder.pair.set_value(Some(fx.leaf(2)));

    fx.collect();

    let holder = root.get().unwrap();
    assert_eq!(holder.pair.key.get(), key_root.get());
    assert_eq!(holder.pair.value.get().unwrap().id, 2);
    assert_dropped(&fx.log, 0, "live key");
}

/// Test that a dead key releases and clears its value
///
/// **Bug this finds:** ephemeron values treated as strong, dangling values
#[test]
fn test_value_cleared_when_key_dies() {
    let fx = GcFixture::new();
    let holder = fx.holder();
    let root = fx.root(holder);
    holder.pair.set_key(Some(fx.leaf(1)));
    holder.pair.set_value(Some(fx.leaf(2)));

    fx.collect();

    let holder = root.get().unwrap();
    assert!(holder.pair.value.get().is_none(), "value of a dead key must be cleared");
    assert!(holder.pair.key.is_cleared());
    assert_dropped(&fx.log, 2, "dead key and its value");
}

/// Test that a value reachable only through itself does not keep its key
///
/// **Bug this finds:** treating value -> key edges as key liveness
#[test]
fn test_value_referencing_key_does_not_retain() {
    let fx = GcFixture::new();
    let table = fx.gc.make_garbage_collected(Table::new()).unwrap();
    let root = fx.root(table);
    let key = fx.node(1);
    let value = fx.node(2);
    value.edges[0].set(Some(key));
    table.pairs[0].set_key(Some(key));
    table.pairs[0].set_value(Some(value));

    fx.collect();

    assert!(root.get().unwrap().pairs[0].value.get().is_none());
    assert_dropped(&fx.log, 2, "self-referencing ephemeron");
}

/// Test that a chain of ephemerons resolves in any discovery order
///
/// pairs[i] maps node i+1 to node i; only node 4 is rooted.
///
/// **Bug this finds:** a single resolver pass instead of a fixpoint
#[test]
fn test_ephemeron_chain_reaches_fixpoint() {
    let fx = GcFixture::new();
    let table = fx.gc.make_garbage_collected(Table::new()).unwrap();
    let root = fx.root(table);
    let nodes: Vec<_> = (0..5).map(|id| fx.node(id)).collect();
    for i in 0..4 {
        // Pair i maps node i+1 to node i; stored in reverse so the first
        // pair traced is the last one to become resolvable.
        table.pairs[i].set_key(Some(nodes[i + 1]));
        table.pairs[i].set_value(Some(nodes[i]));
    }
    let key_root = fx.root(nodes[4]);

    let stats = fx.collect();

    assert_dropped(&fx.log, 0, "whole chain reachable through ephemerons");
    assert!(stats.ephemeron_passes >= 2, "chain needs several passes, got {}", stats.ephemeron_passes);
    let table = root.get().unwrap();
    for i in 0..4 {
        assert_eq!(table.pairs[i].value.get().unwrap().id, i);
    }

    drop(key_root);
    fx.collect();
    assert_dropped(&fx.log, 5, "chain collapses once the head key dies");
    assert!(root.get().unwrap().pairs.iter().all(|pair| pair.value.get().is_none()));
}

/// Test ephemeron values holding further ephemeron tables
///
/// **Bug this finds:** nested pairs discovered while resolving not revisited
#[test]
fn test_nested_ephemeron_tables() {
    struct Entry {
        inner: Member<Table>,
    }
    impl Trace for Entry {
        fn trace(&self, visitor: &mut dyn Visitor) {
            self.inner.trace(visitor);
        }
    }
    impl GarbageCollected for Entry {}

    struct Outer {
        pair: EphemeronPair<Node, Entry>,
    }
    impl Trace for Outer {
        fn trace(&self, visitor: &mut dyn Visitor) {
            self.pair.trace(visitor);
        }
    }
    impl GarbageCollected for Outer {}

    let fx = GcFixture::new();
    let outer_key = fx.node(1);
    let inner_key = fx.node(2);
    let inner_value = fx.node(3);
    let inner = fx.gc.make_garbage_collected(Table::new()).unwrap();
    inner.pairs[0].set_key(Some(inner_key));
    inner.pairs[0].set_value(Some(inner_value));
    let entry = fx.gc.make_garbage_collected(Entry { inner: Member::new(Some(inner)) }).unwrap();
    let outer = fx.gc.make_garbage_collected(Outer { pair: EphemeronPair::new(Some(outer_key), Some(entry)) }).unwrap();

    let _roots = (fx.root(outer), fx.root(outer_key), fx.root(inner_key));
    fx.collect();
    assert_dropped(&fx.log, 0, "nested tables with live keys");
    assert_eq!(inner.pairs[0].value.get().unwrap().id, 3);
}

/// Test that a key stored while incremental marking runs retains the value
///
/// **Bug this finds:** missing ephemeron-key barrier
#[test]
fn test_key_store_during_incremental_marking() {
    let fx = GcFixture::new();
    let holder = fx.holder();
    let root = fx.root(holder);
    let key_root = fx.root(fx.leaf(1));
    holder.pair.set_value(Some(fx.leaf(2)));

    assert!(fx.gc.start_incremental_garbage_collection(GcConfig::precise_incremental()));
    while !fx.gc.advance_incremental_marking(StackState::NoHeapPointers) {}
    fx.gc.finish_sweeping_if_running();
    // The first cycle saw no key: the value died with it.
    assert!(root.get().unwrap().pair.value.get().is_none());
    assert_dropped(&fx.log, 1, "value without key");

    let holder = root.get().unwrap();
    holder.pair.set_value(Some(fx.leaf(3)));
    assert!(fx.gc.start_incremental_garbage_collection(GcConfig::precise_incremental()));
    assert!(fx.gc.heap_handle().is_incremental_marking_in_progress());
    holder.pair.set_key(key_root.get());
    fx.gc.finalize_incremental_garbage_collection_if_running(StackState::NoHeapPointers);
    fx.gc.finish_sweeping_if_running();

    assert_eq!(root.get().unwrap().pair.value.get().unwrap().id, 3);
    assert_alive(&fx.log, &[1, 3], "key set during marking");
}

/// Test that pairs without a value only report weakness
///
/// **Bug this finds:** keys of empty pairs retained
#[test]
fn test_empty_pairs_are_ignored() {
    let fx = GcFixture::new();
    let table = fx.gc.make_garbage_collected(Table::new()).unwrap();
    let _root = fx.root(table);
    table.pairs[1].set_key(Some(fx.node(1)));
    let stats = fx.collect();
    assert_dropped(&fx.log, 1, "key without value");
    // One callback per pair plus the weak key slot of pairs[1].
    assert_eq!(stats.weak_callbacks, 5);
}

/// Pair cleaned up by its own weak callback instead of the built-in one
struct ManualPair {
    pair: EphemeronPair<Leaf, Leaf>,
}

fn clear_manual_pair(broker: &LivenessBroker, pair: *const ()) {
    let pair = unsafe { &*(pair as *const EphemeronPair<Leaf, Leaf>) };
    pair.clear_value_if_key_is_dead(broker);
}

impl Trace for ManualPair {
    fn trace(&self, visitor: &mut dyn Visitor) {
        visitor.register_weak_callback(clear_manual_pair, &self.pair as *const EphemeronPair<Leaf, Leaf> as *const ());
    }
}
impl GarbageCollected for ManualPair {}

/// Test `clear_value_if_key_is_dead` for dead and live keys
///
/// **Bug this finds:** clearing values of live keys, keeping values of dead keys
#[test]
fn test_clear_value_if_key_is_dead() {
    let fx = GcFixture::new();
    let value_root = fx.root(fx.leaf(10));
    let live_key = fx.root(fx.leaf(1));

    let dead = fx
        .gc
        .make_garbage_collected(ManualPair { pair: EphemeronPair::new(Some(fx.leaf(2)), value_root.get()) })
        .unwrap();
    let alive = fx
        .gc
        .make_garbage_collected(ManualPair { pair: EphemeronPair::new(live_key.get(), value_root.get()) })
        .unwrap();
    let roots = (fx.root(dead), fx.root(alive));

    fx.collect();

    assert!(roots.0.get().unwrap().pair.value.get().is_none(), "dead key must clear the value");
    assert_eq!(roots.1.get().unwrap().pair.value.get(), value_root.get(), "live key must keep the value");
    assert_dropped(&fx.log, 1, "only the dead key");
    assert!(fx.log.is_dropped(2));
}
