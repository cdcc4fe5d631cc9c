//! Prefinalizers - callbacks for dead objects that run before sweeping
//!
//! Objects of types with `HAS_PRE_FINALIZER` are registered right after
//! construction. In the atomic pause, once marking and weak processing are
//! done, every registered object left unmarked runs its prefinalizer and is
//! dropped from the registry. Nothing has been swept yet, so a prefinalizer
//! may still read other dead objects.
//!
//! Prefinalizers run newest first and must not allocate.

use crate::object::gc_info::GcInfoTable;
use crate::object::header::ObjectHeader;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Payloads of live objects that still owe a prefinalizer call
#[derive(Debug, Default)]
pub(crate) struct PreFinalizerRegistry {
    entries: Mutex<Vec<usize>>,
    running: AtomicBool,
}

/// Clears the running flag even when a prefinalizer panics
struct RunningScope<'a>(&'a AtomicBool);

impl<'a> RunningScope<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for RunningScope<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PreFinalizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, payload: usize) {
        self.entries.lock().push(payload);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether a prefinalizer is executing right now
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run the prefinalizers of unmarked objects; returns how many ran
    ///
    /// Marks must be final: call in the atomic pause after weak processing.
    pub fn run_dead(&self) -> usize {
        self.run_matching(|header| !header.is_marked())
    }

    /// Run every remaining prefinalizer; used when the heap is torn down
    pub fn run_all(&self) -> usize {
        self.run_matching(|_| true)
    }

    fn run_matching(&self, is_dead: impl Fn(&ObjectHeader) -> bool) -> usize {
        let entries = std::mem::take(&mut *self.entries.lock());
        if entries.is_empty() {
            return 0;
        }
        let _scope = RunningScope::enter(&self.running);
        let mut survivors = Vec::with_capacity(entries.len());
        let mut ran = 0;
        for &payload in entries.iter().rev() {
            // SAFETY: registered payloads stay live until their prefinalizer
            // ran, and sweeping has not reclaimed anything yet.
            let header = unsafe { ObjectHeader::from_payload(payload as *const u8) };
            if is_dead(header) {
                invoke(header);
                ran += 1;
            } else {
                survivors.push(payload);
            }
        }
        survivors.reverse();
        *self.entries.lock() = survivors;
        ran
    }

    /// Run and forget the prefinalizer of `header`, if it has one pending
    pub fn run_for(&self, header: &ObjectHeader) -> bool {
        let payload = header.payload() as usize;
        let found = {
            let mut entries = self.entries.lock();
            match entries.iter().rposition(|&entry| entry == payload) {
                Some(position) => {
                    entries.remove(position);
                    true
                },
                None => false,
            }
        };
        if found {
            let _scope = RunningScope::enter(&self.running);
            invoke(header);
        }
        found
    }

    /// Follow forwarding addresses of entries the compactor moved
    pub fn update_moved(&self) -> usize {
        let mut moved = 0;
        for entry in self.entries.lock().iter_mut() {
            // SAFETY: the old block keeps its forwarding header until swept.
            let header = unsafe { ObjectHeader::from_payload(*entry as *const u8) };
            if let Some(new_payload) = header.forwarded_to() {
                *entry = new_payload as usize;
                moved += 1;
            }
        }
        moved
    }
}

fn invoke(header: &ObjectHeader) {
    if let Some(pre_finalize) = GcInfoTable::global().get(header.gc_info_index()).pre_finalize {
        // SAFETY: the object is fully constructed and not yet finalized.
        unsafe { pre_finalize(header.payload()) };
    }
}
