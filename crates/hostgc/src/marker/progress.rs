//! Chunked marking progress for large objects
//!
//! A large object whose type opts into chunked tracing is split into
//! `CHUNK_SIZE` byte ranges. Every marker that pops the object claims the next
//! range with a fetch-add, so several markers trace one object in parallel and
//! no range is traced twice.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Payload bytes per traced chunk
pub const CHUNK_SIZE: usize = crate::heap::page::LARGE_OBJECT_THRESHOLD;

/// Chunk cursor stored in the page of a large object
#[derive(Debug, Default)]
pub struct MarkingProgressTracker {
    number_of_chunks: AtomicUsize,
    current_chunk: AtomicUsize,
}

impl MarkingProgressTracker {
    pub const fn new() -> Self {
        Self {
            number_of_chunks: AtomicUsize::new(0),
            current_chunk: AtomicUsize::new(0),
        }
    }

    /// Start a new cycle for an object of `size` bytes
    pub fn enable(&self, size: usize) {
        self.number_of_chunks.store(size.div_ceil(CHUNK_SIZE), Ordering::Relaxed);
        self.current_chunk.store(0, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.number_of_chunks.load(Ordering::Acquire) > 0
    }

    pub fn total_number_of_chunks(&self) -> usize {
        self.number_of_chunks.load(Ordering::Acquire)
    }

    /// Claim the next chunk; callers never claim more chunks than exist
    pub fn get_next_chunk_to_mark(&self) -> usize {
        let chunk = self.current_chunk.fetch_add(1, Ordering::AcqRel);
        crate::gc_dcheck!(
            chunk < self.total_number_of_chunks(),
            "chunk {} claimed past the end ({} chunks)",
            chunk,
            self.total_number_of_chunks()
        );
        chunk
    }

    /// Chunk `index` as a payload byte range for an object of `size` bytes
    pub fn chunk_range(index: usize, size: usize) -> std::ops::Range<usize> {
        let start = index * CHUNK_SIZE;
        start..size.min(start + CHUNK_SIZE)
    }
}
