//! Barrier Module - write barriers for incremental and concurrent marking
//!
//! While marking runs interleaved with the mutator, every store of a
//! reference into a managed object goes through a write barrier so that no
//! black object ever ends up pointing to a white one.
//!
//! Fast path:
//! ```text
//! if !MARKING_FLAG.might_be_entered()          -> return   // no heap is marking
//! if !heap(value).is_incremental_marking_in_progress() -> return
//! slow path: mark / retrace / record ephemeron
//! ```
//!
//! The global flag is a false-positive tolerant pre-check; the heap handle
//! check decides.

pub mod write_barrier;

pub use write_barrier::{WriteBarrier, WriteBarrierKind};

use crate::util::AtomicEntryFlag;

/// Entered by every heap while incremental or concurrent marking runs
pub(crate) static MARKING_FLAG: AtomicEntryFlag = AtomicEntryFlag::new();

/// Whether any heap in the process may currently be marking
#[inline]
pub fn is_any_incremental_marking_in_progress() -> bool {
    MARKING_FLAG.might_be_entered()
}
