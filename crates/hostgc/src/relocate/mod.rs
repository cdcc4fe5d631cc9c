//! Relocate Module - compaction of the compactable space
//!
//! Markers record movable slots into [`CompactionWorklists`]; after weak
//! processing the [`Compactor`] evacuates sparse compactable pages and heals
//! every recorded slot through forwarding addresses left in the old payloads.
//!
//! Objects referenced from anything other than a recorded slot (roots,
//! conservative stack words, weak references, ephemeron keys, barrier stores
//! without a slot) are pinned and stay where they are. Registered
//! [`MoveListener`]s hear about every object that moved.

pub(crate) mod compactor;
pub mod listener;
pub mod worklists;

pub use compactor::{CompactionResult, EVACUATION_GARBAGE_RATIO};
pub use listener::MoveListener;
pub use worklists::{CompactionWorklists, MovableReference};

pub(crate) use compactor::Compactor;
