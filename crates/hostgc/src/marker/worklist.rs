//! Segmented Worklist - shared segments + per-thread views
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │           GLOBAL SEGMENTS (crossbeam Injector)          │
//! │        [seg] [seg] [seg] ...  (<= 64 items each)        │
//! └────────────────────────────────────────────────────────┘
//!        ▲ publish          │ steal          ▲ push_single
//!        │                  ▼                │
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Local (main) │   │ Local (gc-1) │   │ write barrier│
//! │ push | pop   │   │ push | pop   │   │              │
//! └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! A [`Local`] fills a private push segment and hands it to the global side
//! once full, so contention is one steal or push per segment. Items moved
//! between threads are owned by exactly one `Local` between pop and re-push.

use crossbeam_deque::{Injector, Steal};
use std::sync::Arc;

/// Items per segment
pub const SEGMENT_CAPACITY: usize = 64;

/// Global side of a segmented worklist
pub struct Worklist<T> {
    segments: Injector<Vec<T>>,
}

impl<T> Worklist<T> {
    pub fn new() -> Self {
        Self {
            segments: Injector::new(),
        }
    }

    fn push_segment(&self, segment: Vec<T>) {
        crate::gc_dcheck!(!segment.is_empty());
        self.segments.push(segment);
    }

    fn pop_segment(&self) -> Option<Vec<T>> {
        loop {
            match self.segments.steal() {
                Steal::Success(segment) => return Some(segment),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Publish one item directly, for producers without a `Local`
    pub fn push_single(&self, item: T) {
        self.segments.push(vec![item]);
    }

    /// No published segment is left
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Drop every published item
    pub fn clear(&self) {
        while self.pop_segment().is_some() {}
    }

    /// Take every published item
    pub fn drain(&self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(mut segment) = self.pop_segment() {
            items.append(&mut segment);
        }
        items
    }
}

impl<T> Default for Worklist<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Worklist<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worklist")
            .field("empty", &self.is_empty())
            .finish()
    }
}

/// Thread-private view of a [`Worklist`]
///
/// Unpublished items are published when the view is dropped.
pub struct Local<T> {
    worklist: Arc<Worklist<T>>,
    push_segment: Vec<T>,
    pop_segment: Vec<T>,
}

impl<T> Local<T> {
    pub fn new(worklist: Arc<Worklist<T>>) -> Self {
        Self {
            worklist,
            push_segment: Vec::with_capacity(SEGMENT_CAPACITY),
            pop_segment: Vec::new(),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.push_segment.len() == SEGMENT_CAPACITY {
            let full = std::mem::replace(&mut self.push_segment, Vec::with_capacity(SEGMENT_CAPACITY));
            self.worklist.push_segment(full);
        }
        self.push_segment.push(item);
    }

    /// Next item: own pop segment, then own push segment, then a global segment
    pub fn pop(&mut self) -> Option<T> {
        if let Some(item) = self.pop_segment.pop() {
            return Some(item);
        }
        if !self.push_segment.is_empty() {
            std::mem::swap(&mut self.push_segment, &mut self.pop_segment);
            return self.pop_segment.pop();
        }
        self.pop_segment = self.worklist.pop_segment()?;
        self.pop_segment.pop()
    }

    /// Hand every private item to the global side
    pub fn publish(&mut self) {
        if !self.push_segment.is_empty() {
            let full = std::mem::replace(&mut self.push_segment, Vec::with_capacity(SEGMENT_CAPACITY));
            self.worklist.push_segment(full);
        }
        if !self.pop_segment.is_empty() {
            self.worklist.push_segment(std::mem::take(&mut self.pop_segment));
        }
    }

    pub fn is_local_empty(&self) -> bool {
        self.push_segment.is_empty() && self.pop_segment.is_empty()
    }

    /// Neither this view nor the global side holds items
    ///
    /// Other views may still hold unpublished items.
    pub fn is_empty(&self) -> bool {
        self.is_local_empty() && self.worklist.is_empty()
    }

    /// Drop private items without publishing them
    pub fn clear(&mut self) {
        self.push_segment.clear();
        self.pop_segment.clear();
    }

    pub fn worklist(&self) -> &Arc<Worklist<T>> {
        &self.worklist
    }
}

impl<T> Drop for Local<T> {
    fn drop(&mut self) {
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_local_round_trip_through_global() {
        let worklist = Arc::new(Worklist::new());
        let mut producer = Local::new(Arc::clone(&worklist));
        for i in 0..(SEGMENT_CAPACITY * 2 + 5) {
            producer.push(i);
        }
        assert!(!worklist.is_empty(), "full segments are published eagerly");
        drop(producer);

        let mut consumer = Local::new(Arc::clone(&worklist));
        let mut seen = HashSet::new();
        while let Some(item) = consumer.pop() {
            assert!(seen.insert(item));
        }
        assert_eq!(seen.len(), SEGMENT_CAPACITY * 2 + 5);
        assert!(consumer.is_empty());
    }

    #[test]
    fn test_push_single_and_drain() {
        let worklist = Worklist::new();
        worklist.push_single(1);
        worklist.push_single(2);
        let mut items = worklist.drain();
        items.sort();
        assert_eq!(items, vec![1, 2]);
        assert!(worklist.is_empty());
    }

    #[test]
    fn test_concurrent_items_claimed_once() {
        let worklist = Arc::new(Worklist::new());
        {
            let mut seed = Local::new(Arc::clone(&worklist));
            for i in 0..10_000usize {
                seed.push(i);
            }
        }

        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let worklist = Arc::clone(&worklist);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut local = Local::new(worklist);
                    barrier.wait();
                    let mut taken = Vec::new();
                    while let Some(item) = local.pop() {
                        taken.push(item);
                    }
                    taken
                })
            })
            .collect();

        let mut all: Vec<usize> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort();
        assert_eq!(all, (0..10_000).collect::<Vec<_>>());
    }
}
