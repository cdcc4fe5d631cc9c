//! Explicit Management Tests - immediate free and in-place resize
//!
//! These tests verify the escape hatches for embedder-managed objects:
//! - free runs the finalizer once and makes the memory reusable
//! - resize either fully succeeds (header reports the new size) or changes
//!   nothing at all
//! - both are refused while a collection is in progress

mod common;

use common::*;
use hostgc::{free_unreferenced_object, resize, GcConfig, HeapState, ObjectHeader};

fn snapshot(header: &ObjectHeader) -> (usize, usize) {
    (header.size(), header.payload_size())
}

/// Test that freeing runs the finalizer and returns memory to the heap
///
/// **Bug this finds:** finalizers skipped, accounting drift
#[test]
fn test_free_runs_finalizer_once() {
    let fx = GcFixture::new();
    let leaf = fx.leaf(1);
    let block = fx.gc.header_of(leaf).size();
    let before = fx.gc.heap().allocated_object_size();

    free_unreferenced_object(fx.gc.heap_handle(), leaf);

    assert_dropped(&fx.log, 1, "explicit free");
    assert_eq!(fx.gc.heap().allocated_object_size(), before - block);

    // A later collection must not finalize the block again.
    fx.collect();
    assert_dropped(&fx.log, 1, "collection after explicit free");
}

/// Test that the most recently freed block is handed out again
///
/// **Bug this finds:** freed blocks leaked
#[test]
fn test_freed_block_is_reused() {
    let fx = GcFixture::new();
    let first = fx.leaf(1);
    let address = first.as_ptr() as usize;
    fx.gc.free_unreferenced_object(first);

    let second = fx.leaf(2);
    assert_eq!(second.as_ptr() as usize, address, "block at the allocation point should be reused");
    assert_eq!(second.id, 2);
}

/// Test that explicit free while marking trips the debug assertion
///
/// **Bug this finds:** embedder freeing objects the marker may be tracing
#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "freed during a garbage collection")]
fn test_free_during_gc_is_checked() {
    let fx = GcFixture::new();
    let leaf = fx.leaf(1);
    let _root = fx.root(leaf);

    assert!(fx.gc.start_incremental_garbage_collection(GcConfig::precise_incremental()));
    assert!(HeapState::is_in_gc(fx.gc.heap_handle()));
    fx.gc.free_unreferenced_object(leaf);
}

/// Test that release builds ignore explicit free while marking
///
/// **Bug this finds:** marker tracing freed memory
#[test]
#[cfg(not(debug_assertions))]
fn test_free_ignored_during_gc() {
    let fx = GcFixture::new();
    let leaf = fx.leaf(1);
    let _root = fx.root(leaf);

    assert!(fx.gc.start_incremental_garbage_collection(GcConfig::precise_incremental()));
    assert!(HeapState::is_in_gc(fx.gc.heap_handle()));
    fx.gc.free_unreferenced_object(leaf);
    assert_dropped(&fx.log, 0, "free during marking");

    fx.gc.collect_garbage(GcConfig::precise_atomic());
    assert_alive(&fx.log, &[1], "object after refused free");
}

/// Test that shrinking updates the header and frees the tail
///
/// **Bug this finds:** header size not updated, tail lost
#[test]
fn test_shrink_updates_header() {
    let fx = GcFixture::new();
    let object = fx
        .gc
        .make_garbage_collected_with_additional_bytes(Leaf { id: 1, log: None }, 96)
        .unwrap();
    let (old_size, _) = snapshot(fx.gc.header_of(object));
    let before = fx.gc.heap().allocated_object_size();

    assert!(resize(object, 16));

    let (new_size, new_payload) = snapshot(fx.gc.header_of(object));
    assert!(new_payload >= std::mem::size_of::<Leaf>() + 16);
    assert!(new_size < old_size);
    assert_eq!(fx.gc.heap().allocated_object_size(), before - (old_size - new_size));
    assert_eq!(object.id, 1, "payload prefix must survive shrinking");
}

/// Test that growing at the allocation point succeeds and zeroes the new bytes
///
/// **Bug this finds:** grown region holding stale bytes
#[test]
fn test_grow_at_allocation_point() {
    let fx = GcFixture::new();
    let object = fx.gc.make_garbage_collected(Leaf { id: 7, log: None }).unwrap();
    let (old_size, _) = snapshot(fx.gc.header_of(object));

    assert!(fx.gc.resize(object, 128));

    let (new_size, new_payload) = snapshot(fx.gc.header_of(object));
    assert_eq!(new_size, old_size + 128);
    assert!(new_payload >= std::mem::size_of::<Leaf>() + 128);
    let tail = unsafe {
        std::slice::from_raw_parts((object.as_ptr() as *const u8).add(std::mem::size_of::<Leaf>()), 128)
    };
    assert!(tail.iter().all(|&b| b == 0));
    assert_eq!(object.id, 7);
}

/// Test that a failed resize changes nothing
///
/// **Bug this finds:** partial mutation on failure
#[test]
fn test_failed_grow_changes_nothing() {
    let fx = GcFixture::new();
    let object = fx.gc.make_garbage_collected(Leaf { id: 3, log: None }).unwrap();
    // Another allocation sits right behind the object.
    let _neighbor = fx.gc.make_garbage_collected(Leaf { id: 4, log: None }).unwrap();
    let before = snapshot(fx.gc.header_of(object));
    let allocated = fx.gc.heap().allocated_object_size();

    assert!(!resize(object, 64));

    assert_eq!(snapshot(fx.gc.header_of(object)), before);
    assert_eq!(fx.gc.heap().allocated_object_size(), allocated);
    assert_eq!(object.id, 3);
}

/// Test that resize is refused for large objects and during collections
#[test]
fn test_resize_refused_for_large_and_during_gc() {
    let fx = GcFixture::new();
    let large = fx
        .gc
        .make_garbage_collected_with_additional_bytes(Leaf { id: 1, log: None }, hostgc::heap::LARGE_OBJECT_THRESHOLD)
        .unwrap();
    assert!(fx.gc.header_of(large).is_large_object());
    let before = snapshot(fx.gc.header_of(large));
    assert!(!resize(large, 0));
    assert_eq!(snapshot(fx.gc.header_of(large)), before);

    let small = fx.gc.make_garbage_collected(Leaf { id: 2, log: None }).unwrap();
    let _root = fx.root(small);
    assert!(fx.gc.start_incremental_garbage_collection(GcConfig::precise_incremental()));
    let before = snapshot(fx.gc.header_of(small));
    assert!(!resize(small, 0));
    assert_eq!(snapshot(fx.gc.header_of(small)), before);
}

/// Test that resizing to the current size is a successful no-op
#[test]
fn test_resize_same_size() {
    let fx = GcFixture::new();
    let object = fx.gc.make_garbage_collected(Leaf { id: 5, log: None }).unwrap();
    let before = snapshot(fx.gc.header_of(object));
    assert!(resize(object, 0));
    assert_eq!(snapshot(fx.gc.header_of(object)), before);
}

/// Test that freeing a large object releases its page
#[test]
fn test_free_large_object_releases_page() {
    let fx = GcFixture::new();
    let pages = fx.gc.heap().page_count();
    let large = fx
        .gc
        .make_garbage_collected_with_additional_bytes(Leaf { id: 9, log: None }, 2 * hostgc::heap::PAGE_SIZE)
        .unwrap();
    assert_eq!(fx.gc.heap().page_count(), pages + 1);
    fx.gc.free_unreferenced_object(large);
    assert_eq!(fx.gc.heap().page_count(), pages);
}

/// Test that freeing through another heap's handle is fatal
#[test]
#[should_panic(expected = "freed through a foreign heap")]
fn test_free_through_foreign_heap_panics() {
    let owner = GcFixture::new();
    let other = GcFixture::new();
    let leaf = owner.leaf(1);
    free_unreferenced_object(other.gc.heap_handle(), leaf);
}
