//! Cancelable task handles
//!
//! Background and posted tasks hold a [`SingleThreadedHandle`] and poll it at
//! their own safe points. Cancellation never interrupts a running task.

use std::cell::Cell;
use std::rc::Rc;

/// Handle shared between a task and its owner, bound to one thread
///
/// A default handle is empty and permanently inactive. A handle created with
/// [`SingleThreadedHandle::new`] wraps a shared cancellation flag; clones
/// observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct SingleThreadedHandle {
    is_cancelled: Option<Rc<Cell<bool>>>,
}

impl SingleThreadedHandle {
    /// Create a non-empty, active handle
    pub fn new() -> Self {
        Self {
            is_cancelled: Some(Rc::new(Cell::new(false))),
        }
    }

    /// Cancel the task; idempotent, no-op on an empty handle
    pub fn cancel(&self) {
        if let Some(flag) = &self.is_cancelled {
            flag.set(true);
        }
    }

    /// True once `cancel` was called on this handle or a clone
    pub fn is_canceled(&self) -> bool {
        self.is_cancelled.as_ref().is_some_and(|flag| flag.get())
    }

    /// True iff the handle is non-empty and not cancelled
    pub fn is_active(&self) -> bool {
        self.is_cancelled.as_ref().is_some_and(|flag| !flag.get())
    }

    /// True for handles created with `new`
    pub fn is_non_empty(&self) -> bool {
        self.is_cancelled.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_handle_inactive() {
        let handle = SingleThreadedHandle::default();
        assert!(!handle.is_non_empty());
        assert!(!handle.is_active());
        assert!(!handle.is_canceled());
        handle.cancel();
        assert!(!handle.is_active());
    }

    #[test]
    fn test_cancel_is_shared_and_permanent() {
        let handle = SingleThreadedHandle::new();
        let task_side = handle.clone();
        assert!(task_side.is_active());

        handle.cancel();
        handle.cancel();
        assert!(task_side.is_canceled());
        assert!(!task_side.is_active());
        assert!(task_side.is_non_empty());
    }
}
