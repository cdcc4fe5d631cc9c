//! Compaction worklists
//!
//! Markers record every movable slot whose target lives in the compactable
//! space. The compactor consumes them after the marking fixpoint of the same
//! cycle; whatever is left is cleared when the cycle ends.

use crate::marker::worklist::{Local, Worklist};
use std::sync::Arc;

/// Address of a heap slot holding a pointer to a relocatable object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MovableReference(pub usize);

/// Worklists feeding the compactor
#[derive(Debug, Default)]
pub struct CompactionWorklists {
    movable_slots: Arc<Worklist<MovableReference>>,
}

impl CompactionWorklists {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-thread recorder for marker threads
    pub(crate) fn local(&self) -> Local<MovableReference> {
        Local::new(Arc::clone(&self.movable_slots))
    }

    /// Record a slot from a thread without a local view
    pub(crate) fn push(&self, slot: MovableReference) {
        self.movable_slots.push_single(slot);
    }

    /// Take every recorded slot
    pub(crate) fn take_all(&self) -> Vec<MovableReference> {
        self.movable_slots.drain()
    }

    pub fn is_empty(&self) -> bool {
        self.movable_slots.is_empty()
    }

    /// Abandon every recorded slot
    pub fn clear_for_testing(&self) {
        self.movable_slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_clear() {
        let worklists = CompactionWorklists::new();
        {
            let mut local = worklists.local();
            local.push(MovableReference(0x100));
        }
        worklists.push(MovableReference(0x200));
        assert!(!worklists.is_empty());
        worklists.clear_for_testing();
        assert!(worklists.is_empty());
        assert!(worklists.take_all().is_empty());
    }
}
