//! Visitor - the tracing interface between user types and the marker

use crate::marker::LivenessBroker;
use crate::object::member::RawMember;
use std::ptr::NonNull;

/// Called during weak processing with the registered parameter
pub type WeakCallback = fn(&LivenessBroker, *const ());

/// Receives the references reported by [`Trace`](crate::Trace) implementations
///
/// The provided `Member`, `WeakMember` and `EphemeronPair` trace impls call
/// the right method; user code normally only forwards the visitor.
pub trait Visitor {
    /// Strong reference that must not be updated by compaction
    fn visit(&mut self, object: NonNull<u8>);

    /// Strong reference held in a heap slot the compactor may rewrite
    fn visit_movable(&mut self, slot: &RawMember);

    /// Weak reference; `callback(broker, parameter)` runs in weak processing
    fn visit_weak(&mut self, object: NonNull<u8>, callback: WeakCallback, parameter: *const ());

    /// Ephemeron: `value` is strong only while the object in `key` is alive
    fn visit_ephemeron(&mut self, key: &RawMember, value: &RawMember);

    /// Run `callback(broker, parameter)` in weak processing
    fn register_weak_callback(&mut self, callback: WeakCallback, parameter: *const ());
}
