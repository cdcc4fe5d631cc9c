//! Recursive range bisection for parallel start offsets
//!
//! Workers joining a parallel job at different times call
//! [`IndexGenerator::get_next`] to pick a starting index. The first caller gets
//! `0`; later callers get midpoints of ever smaller sub-ranges, so early
//! workers start far apart.

use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug)]
struct Ranges {
    first_use: bool,
    to_split: VecDeque<(usize, usize)>,
}

/// Hands out each index of `[0, size)` at most once
#[derive(Debug)]
pub struct IndexGenerator {
    ranges: Mutex<Ranges>,
}

impl IndexGenerator {
    /// Create a generator over `[0, size)`
    pub fn new(size: usize) -> Self {
        let mut to_split = VecDeque::new();
        if size > 1 {
            to_split.push_back((0, size));
        }
        Self {
            ranges: Mutex::new(Ranges {
                first_use: size > 0,
                to_split,
            }),
        }
    }

    /// Next starting index, or `None` once every range is exhausted
    pub fn get_next(&self) -> Option<usize> {
        let mut ranges = self.ranges.lock();
        if ranges.first_use {
            ranges.first_use = false;
            return Some(0);
        }

        let (start, end) = ranges.to_split.pop_front()?;
        let mid = start + (end - start) / 2;
        if mid - start > 1 {
            ranges.to_split.push_back((start, mid));
        }
        if end - mid > 1 {
            ranges.to_split.push_back((mid, end));
        }
        Some(mid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bisection_order() {
        let generator = IndexGenerator::new(8);
        let order: Vec<_> = std::iter::from_fn(|| generator.get_next()).collect();
        assert_eq!(order, vec![0, 4, 2, 6, 1, 3, 5, 7]);
    }

    #[test]
    fn test_empty_and_singleton() {
        assert_eq!(IndexGenerator::new(0).get_next(), None);

        let single = IndexGenerator::new(1);
        assert_eq!(single.get_next(), Some(0));
        assert_eq!(single.get_next(), None);
    }

    #[test]
    fn test_odd_size_covers_everything() {
        let generator = IndexGenerator::new(11);
        let mut seen: Vec<_> = std::iter::from_fn(|| generator.get_next()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..11).collect::<Vec<_>>());
    }
}
