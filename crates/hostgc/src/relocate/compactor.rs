//! Compactor - evacuation of movable objects
//!
//! Runs in the atomic pause after weak processing, only for collections whose
//! stack holds no heap pointers.
//!
//! 1. Select compactable pages whose garbage ratio exceeds
//!    [`EVACUATION_GARBAGE_RATIO`].
//! 2. For every recorded slot, copy its target into a compaction page once and
//!    leave a forwarding address behind.
//! 3. Rewrite every recorded slot, following holders that moved themselves.
//!
//! Pinned objects never move. Evacuated blocks are reclaimed by the sweeper.
//! Move listeners are told about every copy as it happens.

use super::listener::MoveListener;
use super::worklists::CompactionWorklists;
use crate::heap::{BasePage, Heap, SpaceKind};
use crate::logging::LOG_TARGET;
use crate::object::header::ObjectHeader;
use crate::object::member::RawMember;
use indexmap::IndexSet;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Pages with more garbage than this share of their payload are evacuated
pub const EVACUATION_GARBAGE_RATIO: f64 = 0.3;

/// What a compaction moved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionResult {
    pub evacuated_pages: usize,
    pub moved_objects: usize,
    pub moved_bytes: usize,
    pub updated_slots: usize,
}

/// Old payload range -> new payload
#[derive(Debug, Default)]
struct ForwardingMap {
    moved: BTreeMap<usize, (usize, usize)>,
}

impl ForwardingMap {
    fn insert(&mut self, old_payload: usize, payload_size: usize, new_payload: usize) {
        self.moved.insert(old_payload, (old_payload + payload_size, new_payload));
    }

    /// Location of `address` after compaction, interior addresses included
    fn translate(&self, address: usize) -> usize {
        match self.moved.range(..=address).next_back() {
            Some((&start, &(end, new_payload))) if address < end => new_payload + (address - start),
            _ => address,
        }
    }
}

/// Evacuates one cycle's movable objects
pub(crate) struct Compactor<'a> {
    heap: &'a Heap,
    candidates: HashSet<usize>,
    forwarding: ForwardingMap,
    listeners: Vec<Arc<dyn MoveListener>>,
    result: CompactionResult,
}

impl<'a> Compactor<'a> {
    /// Select evacuation candidates; pages must be walkable and marks final
    pub fn new(heap: &'a Heap) -> Self {
        let candidates = select_pages(heap);
        Self {
            heap,
            result: CompactionResult {
                evacuated_pages: candidates.len(),
                ..Default::default()
            },
            candidates,
            forwarding: ForwardingMap::default(),
            listeners: heap.move_listeners(),
        }
    }

    /// Move every eligible target of `worklists` and rewrite the slots
    pub fn compact(mut self, worklists: &CompactionWorklists) -> CompactionResult {
        let slots: IndexSet<usize> = worklists.take_all().into_iter().map(|slot| slot.0).collect();
        if self.candidates.is_empty() {
            return self.result;
        }

        for &slot in &slots {
            if !self.relocate_target(slot) {
                log::debug!(target: LOG_TARGET, "compaction stopped early: heap limit reached");
                break;
            }
        }

        for &slot in &slots {
            let slot = self.slot_at(slot);
            let value = slot.load() as usize;
            let forwarded = self.forwarding.translate(value);
            if forwarded != value {
                slot.store(forwarded as *mut u8);
                self.result.updated_slots += 1;
            }
        }
        self.result
    }

    /// Current location of a recorded slot; holders may have moved
    fn slot_at(&self, slot: usize) -> &RawMember {
        // SAFETY: recorded slots live in mapped heap memory for the whole pause;
        // a slot in a moved holder is found at the same offset in the copy.
        unsafe { &*(self.forwarding.translate(slot) as *const RawMember) }
    }

    /// Evacuate the target of `slot` if eligible; false once the heap is full
    fn relocate_target(&mut self, slot: usize) -> bool {
        let Some(object) = self.slot_at(slot).load_object() else {
            return true;
        };
        // SAFETY: slots hold payloads of live objects.
        let header = unsafe { ObjectHeader::from_payload(object.as_ptr()) };
        if !self.is_eligible(header) {
            return true;
        }
        let size = header.size();
        let new_block = match self.heap.allocate_for_compaction(size) {
            Ok(block) => block,
            Err(_) => return false,
        };
        // SAFETY: the new block is fresh compaction memory of `size` bytes and
        // the old block is a live object of the same size.
        unsafe {
            std::ptr::copy_nonoverlapping(header.address() as *const u8, new_block as *mut u8, size);
            let copy = ObjectHeader::at(new_block);
            header.set_forwarding(copy.payload());
            self.forwarding
                .insert(header.payload() as usize, header.payload_size(), copy.payload() as usize);
        }
        for listener in &self.listeners {
            listener.on_move(header.address(), new_block, size);
        }
        self.result.moved_objects += 1;
        self.result.moved_bytes += size;
        true
    }

    fn is_eligible(&self, header: &ObjectHeader) -> bool {
        if !header.is_marked() || header.is_pinned() || header.is_forwarded() || header.is_large_object() {
            return false;
        }
        // SAFETY: marked objects live on mapped pages.
        let page = unsafe { BasePage::from_payload(header.payload()) };
        page.space() == SpaceKind::Compactable && self.candidates.contains(&page.base())
    }
}

/// Compactable pages worth evacuating
fn select_pages(heap: &Heap) -> HashSet<usize> {
    let mut selected = HashSet::new();
    for base in heap.page_bases() {
        // SAFETY: base of a mapped page.
        let page = unsafe { BasePage::at(base) };
        if page.space() != SpaceKind::Compactable {
            continue;
        }
        let mut live = 0;
        // SAFETY: LABs are retired in the atomic pause.
        unsafe {
            page.for_each_block(|header| {
                if !header.is_free() && header.is_marked() {
                    live += header.size();
                }
            });
        }
        let capacity = page.payload_end() - page.payload_start();
        let garbage_ratio = 1.0 - live as f64 / capacity as f64;
        if live > 0 && garbage_ratio > EVACUATION_GARBAGE_RATIO {
            selected.insert(base);
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarding_map_translates_interior_addresses() {
        let mut map = ForwardingMap::default();
        map.insert(0x1000, 0x40, 0x9000);
        assert_eq!(map.translate(0x1000), 0x9000);
        assert_eq!(map.translate(0x1018), 0x9018);
        assert_eq!(map.translate(0x1040), 0x1040);
        assert_eq!(map.translate(0x0ff0), 0x0ff0);
        assert_eq!(map.translate(0), 0);
    }
}
