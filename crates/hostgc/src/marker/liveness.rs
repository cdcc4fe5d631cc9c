//! Liveness Broker - mark-bit queries for weak processing

use crate::heap::{BasePage, HeapState};
use crate::object::header::ObjectHeader;
use crate::object::member::SentinelPointer;

/// Token handed to weak callbacks; only the collector creates one
///
/// Liveness is only meaningful between the marking fixpoint and the end of
/// sweeping. Asking outside a collection is a fatal embedder error.
#[derive(Debug)]
pub struct LivenessBroker {
    _private: (),
}

impl LivenessBroker {
    pub(crate) const fn new() -> Self {
        Self { _private: () }
    }

    /// Whether the object at `payload` survives the current collection
    ///
    /// Null and the sentinel count as alive, so callers never clear them.
    pub fn is_heap_object_alive(&self, payload: *const u8) -> bool {
        if payload.is_null() || SentinelPointer::is_sentinel(payload) {
            return true;
        }
        // SAFETY: non-null references handed to weak callbacks point into
        // live pages of the collecting heap.
        let page = unsafe { BasePage::from_payload(payload) };
        crate::gc_check!(
            HeapState::is_in_gc(page.heap().handle()),
            "liveness queried outside of a garbage collection"
        );
        // SAFETY: see above.
        unsafe { ObjectHeader::from_payload(payload) }.is_marked()
    }
}
