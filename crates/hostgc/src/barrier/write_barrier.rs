//! Write Barrier - barrier kinds and their slow paths
//!
//! | Kind              | Effect on the stored value while marking          |
//! |-------------------|---------------------------------------------------|
//! | `None`            | nothing                                           |
//! | `AssertNone`      | debug check that no barrier was needed            |
//! | `Pointer`         | Dijkstra: mark white targets, record the slot     |
//! | `IndirectPointer` | like `Pointer`; `value` is the slot address       |
//! | `Map`             | Steele: retrace `value`, the container, if marked |
//! | `EphemeronKey`    | re-examine the pair whose key slot was written    |
//! | `Full`            | `Pointer`, plus retrace when already marked       |

use super::MARKING_FLAG;
use crate::heap::{BasePage, Heap};
use crate::marker::MarkingWorklists;
use crate::object::ephemeron::RawEphemeronPair;
use crate::object::header::ObjectHeader;
use crate::object::member::{RawMember, SentinelPointer};
use std::sync::Arc;

/// Barrier to run after a reference store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteBarrierKind {
    /// No barrier; the store happens outside marking or on an unreachable holder
    None,
    /// Caller asserts no barrier is required
    AssertNone,
    /// Container contents changed; `value` is the container
    Map,
    /// `value` is the newly stored target
    Pointer,
    /// `value` is the address of a slot holding the target
    IndirectPointer,
    /// `slot` is the key slot of an ephemeron pair
    EphemeronKey,
    /// Dijkstra and Steele combined
    Full,
}

/// Write barrier entry points
pub struct WriteBarrier;

impl WriteBarrier {
    /// Run the barrier of `kind` for a store of `value` into `slot`
    #[inline]
    pub fn barrier(kind: WriteBarrierKind, slot: Option<&RawMember>, value: *const u8) {
        match kind {
            WriteBarrierKind::None => return,
            WriteBarrierKind::AssertNone => {
                crate::gc_dcheck!(
                    Self::kind_for(value) == WriteBarrierKind::None,
                    "barrier asserted unnecessary during marking"
                );
                return;
            },
            _ => {},
        }
        if !MARKING_FLAG.might_be_entered() {
            return;
        }
        Self::slow_path(kind, slot, value);
    }

    /// Barrier kind a `Pointer` store of `value` needs right now
    pub fn kind_for(value: *const u8) -> WriteBarrierKind {
        if !MARKING_FLAG.might_be_entered() {
            return WriteBarrierKind::None;
        }
        match marking_heap(value) {
            Some(_) => WriteBarrierKind::Pointer,
            None => WriteBarrierKind::None,
        }
    }

    #[cold]
    fn slow_path(kind: WriteBarrierKind, slot: Option<&RawMember>, value: *const u8) {
        let target = match kind {
            WriteBarrierKind::IndirectPointer => {
                if value.is_null() {
                    return;
                }
                // SAFETY: indirect barriers receive the address of a live slot.
                unsafe { &*(value as *const RawMember) }.load() as *const u8
            },
            _ => value,
        };
        let Some(worklists) = marking_heap(target).and_then(|heap| heap.marking_worklists()) else {
            return;
        };
        // SAFETY: `marking_heap` resolved the payload to a live page.
        let header = unsafe { ObjectHeader::from_payload(target) };

        match kind {
            WriteBarrierKind::Pointer => dijkstra(&worklists, slot, header),
            WriteBarrierKind::IndirectPointer => {
                header.pin();
                worklists.mark_from_barrier(header);
            },
            WriteBarrierKind::Map => {
                if let Some(slot) = slot {
                    let start = header.payload() as usize;
                    crate::gc_dcheck!(
                        (start..start + header.payload_size()).contains(&slot.address()),
                        "map barrier slot {:#x} outside its container",
                        slot.address()
                    );
                }
                if header.is_marked() {
                    worklists.retrace_from_barrier(header);
                }
            },
            WriteBarrierKind::EphemeronKey => {
                let Some(key_slot) = slot else {
                    crate::gc_dcheck!(false, "ephemeron key barrier without a slot");
                    return;
                };
                header.pin();
                // SAFETY: the key barrier is only issued for ephemeron key slots.
                let pair = unsafe { RawEphemeronPair::from_key_slot(key_slot) };
                worklists.push_ephemeron(pair.key.address(), pair.value.address());
            },
            WriteBarrierKind::Full => {
                if !worklists.mark_from_barrier(header) {
                    worklists.retrace_from_barrier(header);
                }
                record(&worklists, slot, header);
            },
            WriteBarrierKind::None | WriteBarrierKind::AssertNone => {},
        }
    }
}

/// Heap of `payload` if it is currently marking incrementally
fn marking_heap<'a>(payload: *const u8) -> Option<&'a Heap> {
    if payload.is_null() || SentinelPointer::is_sentinel(payload) {
        return None;
    }
    // SAFETY: barriers only see null, the sentinel or managed payloads.
    let heap = unsafe { BasePage::from_payload(payload) }.heap();
    heap.handle().is_incremental_marking_in_progress().then_some(heap)
}

fn dijkstra(worklists: &Arc<MarkingWorklists>, slot: Option<&RawMember>, header: &ObjectHeader) {
    worklists.mark_from_barrier(header);
    record(worklists, slot, header);
}

fn record(worklists: &Arc<MarkingWorklists>, slot: Option<&RawMember>, header: &ObjectHeader) {
    match slot {
        Some(slot) => worklists.record_slot_from_barrier(slot, header),
        None => header.pin(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barriers_without_marking_are_noops() {
        WriteBarrier::barrier(WriteBarrierKind::Pointer, None, std::ptr::null());
        WriteBarrier::barrier(WriteBarrierKind::None, None, 0x10 as *const u8);
        WriteBarrier::barrier(WriteBarrierKind::AssertNone, None, std::ptr::null());
        assert_eq!(WriteBarrier::kind_for(std::ptr::null()), WriteBarrierKind::None);
    }
}
