//! Ephemeron resolver
//!
//! Pairs whose key was white when their holder was traced are parked here.
//! After every marking fixpoint a pass marks the value of every parked pair
//! whose key became marked. Marking a value can reach further pairs, so the
//! marker alternates draining and passes until a pass marks nothing new and
//! no tracing work is left. The result is the least fixpoint and does not
//! depend on the order pairs are visited in. Values of pairs whose key stays
//! unmarked are cleared by the pair's weak callback.

use crate::marker::marking_state::{EphemeronItem, MarkingState};
use crate::object::header::ObjectHeader;

#[derive(Debug, Default)]
pub(crate) struct EphemeronResolver {
    pending: Vec<EphemeronItem>,
    passes: usize,
}

impl EphemeronResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one pass; true iff it marked a previously unmarked value
    ///
    /// The caller publishes `state` first so pairs it discovered are visible.
    pub fn process(&mut self, state: &mut MarkingState) -> bool {
        self.passes += 1;
        self.pending.extend(state.shared().discovered_ephemerons.drain());

        let mut progressed = false;
        self.pending.retain(|item| {
            let Some(key) = item.key().load_object() else {
                return false;
            };
            // SAFETY: slots hold live payloads during marking.
            if !unsafe { ObjectHeader::from_payload(key.as_ptr()) }.is_marked() {
                return true;
            }
            if let Some(value) = item.value().load_object() {
                // SAFETY: as above.
                let header = unsafe { ObjectHeader::from_payload(value.as_ptr()) };
                progressed |= state.mark_and_push(header);
                state.record_slot(item.value(), header);
            }
            false
        });
        progressed
    }

    /// Pairs still waiting for their key
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn passes(&self) -> usize {
        self.passes
    }
}
