//! Stack Scanning - conservative roots supplied by the embedder
//!
//! The collector never walks native stacks itself. When a collection runs
//! with `StackState::MayContainHeapPointers`, the installed [`StackScanner`]
//! reports candidate words. Any word that lands inside the payload of an
//! object (interior pointers included) marks and pins that object.
//!
//! False positives only retain garbage; they never corrupt the heap.

/// Source of conservative root candidates
pub trait StackScanner {
    /// Report every word that may be a heap pointer
    fn scan(&self, visit: &mut dyn FnMut(usize));
}

impl<F> StackScanner for F
where
    F: Fn(&mut dyn FnMut(usize)),
{
    fn scan(&self, visit: &mut dyn FnMut(usize)) {
        self(visit)
    }
}

/// Scanner over a fixed memory range, read with volatile word loads
#[derive(Debug, Clone, Copy)]
pub struct RangeStackScanner {
    start: usize,
    end: usize,
}

impl RangeStackScanner {
    /// Scanner over `[start, end)`
    ///
    /// # Safety
    /// The range must stay readable whenever a collection may scan it.
    pub unsafe fn new(start: usize, end: usize) -> Self {
        let word = std::mem::size_of::<usize>();
        Self {
            start: crate::util::align_up(start, word),
            end: end & !(word - 1),
        }
    }
}

impl StackScanner for RangeStackScanner {
    fn scan(&self, visit: &mut dyn FnMut(usize)) {
        let mut address = self.start;
        while address < self.end {
            // SAFETY: readability guaranteed by the constructor's contract.
            visit(unsafe { (address as *const usize).read_volatile() });
            address += std::mem::size_of::<usize>();
        }
    }
}
