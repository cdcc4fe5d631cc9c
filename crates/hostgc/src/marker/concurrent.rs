//! Concurrent Marker - background marking threads
//!
//! Workers steal published segments, trace them and publish what they
//! discover so the mutator's incremental steps and other workers can take
//! it. They run until the atomic pause sets the stop flag, then publish their
//! remaining items and exit; the pause joins them before draining the rest
//! itself.

use crate::logging::LOG_TARGET;
use crate::marker::marking_state::{MarkingState, MarkingWorklists};
use crate::stats::timer::Deadline;
use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Time a worker traces before publishing and polling the stop flag
const WORKER_SLICE: Duration = Duration::from_millis(1);

/// Park time once spinning found no work
const IDLE_PARK: Duration = Duration::from_micros(200);

pub(crate) struct ConcurrentMarker {
    stop: Arc<AtomicBool>,
    processed_slices: Arc<AtomicUsize>,
    handles: Vec<JoinHandle<()>>,
}

impl ConcurrentMarker {
    /// Spawn up to `threads` workers
    ///
    /// A worker that fails to spawn is skipped; the mutator finishes its share.
    pub fn start(worklists: &Arc<MarkingWorklists>, threads: usize) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let processed_slices = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(threads);

        for id in 0..threads {
            let worklists = Arc::clone(worklists);
            let stop = Arc::clone(&stop);
            let processed = Arc::clone(&processed_slices);
            let spawned = thread::Builder::new()
                .name(format!("gc-worker-{}", id))
                .spawn(move || run_worker(worklists, stop, processed));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => log::warn!(target: LOG_TARGET, "failed to spawn marker {}: {}", id, e),
            }
        }
        log::debug!(target: LOG_TARGET, "started {} concurrent markers", handles.len());

        Self {
            stop,
            processed_slices,
            handles,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Stop and join every worker; their items end up on the global worklists
    pub fn join(mut self) -> usize {
        self.stop_and_join();
        self.processed_slices.load(Ordering::Relaxed)
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!(target: LOG_TARGET, "concurrent marker panicked");
            }
        }
    }
}

impl Drop for ConcurrentMarker {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run_worker(worklists: Arc<MarkingWorklists>, stop: Arc<AtomicBool>, processed: Arc<AtomicUsize>) {
    let mut state = MarkingState::new(worklists);
    let backoff = Backoff::new();
    while !stop.load(Ordering::Acquire) {
        let drained = state.drain(Deadline::after(WORKER_SLICE));
        state.publish();
        processed.fetch_add(1, Ordering::Relaxed);
        if !drained {
            backoff.reset();
            continue;
        }
        if backoff.is_completed() {
            thread::park_timeout(IDLE_PARK);
            backoff.reset();
        } else {
            backoff.snooze();
        }
    }
    state.publish();
}
