//! Explicit management - escape hatches for objects the embedder controls
//!
//! Neither operation may touch an object while a collection is in progress.
//! Freeing then is a debug assertion; resizing reports failure.

use crate::heap::{BasePage, HeapHandle};
use crate::object::gc_info::GarbageCollected;
use crate::object::header::ObjectHeader;
use crate::object::member::GcPtr;

/// Run the finalizer of `object` and reclaim its memory right away
///
/// The embedder guarantees that nothing references `object` anymore.
///
/// # Panics
/// When `object` does not belong to the heap of `heap_handle`. In debug
/// builds also when the heap is collecting; release builds ignore the call.
pub fn free_unreferenced_object<T: GarbageCollected>(heap_handle: &HeapHandle, object: GcPtr<T>) {
    let payload = object.erased().as_ptr();
    // SAFETY: GcPtr points to the payload of a live managed object.
    let heap = unsafe { BasePage::from_payload(payload) }.heap();
    crate::gc_check!(
        std::ptr::eq(heap.handle(), heap_handle),
        "object {:p} freed through a foreign heap",
        payload
    );
    // SAFETY: as above.
    heap.free_unreferenced(unsafe { ObjectHeader::from_payload(payload) });
}

/// Resize `object` to `size_of::<T>() + additional_bytes` payload bytes in place
///
/// Shrinking always succeeds once the freed tail can hold a free block.
/// Growing succeeds only when the object ends where the allocation buffer
/// starts. Returns false, changing nothing, when the object cannot be
/// resized: large objects, collections in progress, or no room to grow.
pub fn resize<T: GarbageCollected>(object: GcPtr<T>, additional_bytes: usize) -> bool {
    let Some(new_size) = std::mem::size_of::<T>().checked_add(additional_bytes) else {
        return false;
    };
    let payload = object.erased().as_ptr();
    // SAFETY: GcPtr points to the payload of a live managed object.
    let heap = unsafe { BasePage::from_payload(payload) }.heap();
    // SAFETY: as above.
    heap.resize(unsafe { ObjectHeader::from_payload(payload) }, new_size)
}
