//! Marking verifier
//!
//! Runs in the atomic pause after the marking fixpoint, with walkable pages.
//! Every marked object must be black, every strong reference of a marked
//! object must point to a marked object, and every ephemeron with a marked
//! key must have a marked value.

use crate::heap::{BasePage, Heap};
use crate::marker::visitor::{Visitor, WeakCallback};
use crate::object::gc_info::GcInfoTable;
use crate::object::header::{Color, ObjectHeader};
use crate::object::member::RawMember;
use std::ptr::NonNull;

struct VerificationVisitor {
    holder: usize,
}

impl VerificationVisitor {
    fn check(&self, object: NonNull<u8>) {
        // SAFETY: marked objects only reference live payloads.
        let header = unsafe { ObjectHeader::from_payload(object.as_ptr()) };
        crate::gc_check!(
            header.is_marked(),
            "marked object {:#x} references unmarked object {:p}",
            self.holder,
            object
        );
    }
}

impl Visitor for VerificationVisitor {
    fn visit(&mut self, object: NonNull<u8>) {
        self.check(object);
    }

    fn visit_movable(&mut self, slot: &RawMember) {
        if let Some(object) = slot.load_object() {
            self.check(object);
        }
    }

    fn visit_weak(&mut self, _object: NonNull<u8>, _callback: WeakCallback, _parameter: *const ()) {}

    fn visit_ephemeron(&mut self, key: &RawMember, value: &RawMember) {
        let Some(key) = key.load_object() else {
            return;
        };
        // SAFETY: as in `check`.
        if unsafe { ObjectHeader::from_payload(key.as_ptr()) }.is_marked() {
            self.visit_movable(value);
        }
    }

    fn register_weak_callback(&mut self, _callback: WeakCallback, _parameter: *const ()) {}
}

/// Check the tri-color invariant over the whole heap; returns objects checked
///
/// Violations are fatal.
pub(crate) fn verify_marking(heap: &Heap) -> usize {
    let mut verified = 0;
    for base in heap.page_bases() {
        // SAFETY: LABs are retired in the atomic pause; the page is walkable.
        unsafe {
            BasePage::at(base).for_each_block(|header| {
                if header.is_free() || !header.is_marked() || header.is_in_construction() {
                    return;
                }
                crate::gc_check!(
                    header.color() == Color::Black,
                    "object {:#x} still gray at the marking fixpoint",
                    header.address()
                );
                let mut visitor = VerificationVisitor {
                    holder: header.address(),
                };
                let info = GcInfoTable::global().get(header.gc_info_index());
                (info.trace)(header.payload(), &mut visitor);
                verified += 1;
            });
        }
    }
    verified
}
